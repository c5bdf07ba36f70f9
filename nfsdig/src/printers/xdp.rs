use std::collections::HashSet;

use anyhow::{Result, anyhow};
use log::debug;
use nfsdig_common::XdpStats;

use super::{Column, Printer};
use crate::domain::TraceDomain;
use crate::state::{SharedFlowTable, StatsSource};
use crate::telemetry;

const COLUMNS: &[Column] = &[
    Column::new("PKTS", 10),
    Column::new("NFS_PKTS", 10),
    Column::new("TCP", 10),
    Column::new("UDP", 10),
    Column::new("BYTES", 12),
    Column::new("NFS_BYTES", 12),
    Column::new("FLOWS", 8),
    Column::new("XIDS", 8),
];

/// Packet counters since the previous tick plus the live flow table size.
pub struct XdpPrinter {
    stats: Box<dyn StatsSource>,
    flows: SharedFlowTable,
    previous: XdpStats,
}

impl XdpPrinter {
    pub fn new(stats: Box<dyn StatsSource>, flows: SharedFlowTable) -> Self {
        Self {
            stats,
            flows,
            previous: XdpStats::default(),
        }
    }

    fn flow_summary(&self) -> Result<(usize, usize)> {
        let table = self
            .flows
            .lock()
            .map_err(|_| anyhow!("flow table lock poisoned"))?;

        let mut flows = 0;
        let mut xids = HashSet::new();
        for entry in table.entries() {
            match entry {
                Ok((_, record)) => {
                    flows += 1;
                    if record.xid != 0 {
                        xids.insert(record.xid);
                    }
                }
                Err(e) => debug!("[xdp] Skipping unreadable flow: {:#}", e),
            }
        }
        Ok((flows, xids.len()))
    }
}

impl Printer for XdpPrinter {
    fn domain(&self) -> TraceDomain {
        TraceDomain::Xdp
    }

    fn columns(&self) -> &'static [Column] {
        COLUMNS
    }

    fn collect(&mut self) -> Result<Vec<Vec<String>>> {
        let current = self.stats.read()?;
        let prev = self.previous;
        self.previous = current;

        let packets = current.total_packets.saturating_sub(prev.total_packets);
        let nfs_packets = current.nfs_packets.saturating_sub(prev.nfs_packets);
        telemetry::record_xdp_packets(packets, nfs_packets);

        let (flows, xids) = self.flow_summary()?;
        Ok(vec![vec![
            packets.to_string(),
            nfs_packets.to_string(),
            current.tcp_packets.saturating_sub(prev.tcp_packets).to_string(),
            current.udp_packets.saturating_sub(prev.udp_packets).to_string(),
            current.total_bytes.saturating_sub(prev.total_bytes).to_string(),
            current.nfs_bytes.saturating_sub(prev.nfs_bytes).to_string(),
            flows.to_string(),
            xids.to_string(),
        ]])
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::state::testing::{MemFlows, flow};

    struct Fixed(Arc<Mutex<XdpStats>>);

    impl StatsSource for Fixed {
        fn read(&self) -> Result<XdpStats> {
            Ok(*self.0.lock().unwrap())
        }
    }

    #[test]
    fn test_counts_since_previous_tick() {
        let stats = Arc::new(Mutex::new(XdpStats {
            total_packets: 100,
            nfs_packets: 40,
            tcp_packets: 90,
            udp_packets: 10,
            total_bytes: 10_000,
            nfs_bytes: 4_000,
        }));
        let mut flows = MemFlows::default();
        flows.records.insert(1, flow(7, 0));
        flows.records.insert(2, flow(7, 0));
        flows.records.insert(3, flow(8, 0));
        let flows: SharedFlowTable = Arc::new(Mutex::new(flows));

        let mut printer = XdpPrinter::new(Box::new(Fixed(stats.clone())), flows);
        assert_eq!(
            printer.collect().unwrap(),
            vec![vec!["100", "40", "90", "10", "10000", "4000", "3", "2"]]
        );

        stats.lock().unwrap().total_packets = 150;
        stats.lock().unwrap().nfs_packets = 45;
        let rows = printer.collect().unwrap();
        assert_eq!(rows[0][0], "50");
        assert_eq!(rows[0][1], "5");
        assert_eq!(rows[0][2], "0");
    }
}
