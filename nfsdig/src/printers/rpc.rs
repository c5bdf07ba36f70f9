use std::collections::BTreeMap;

use anyhow::Result;
use nfsdig_common::{RpcEvent, c_str};

use super::{Column, MAX_EVENTS_PER_TICK, Printer, idle_row, us};
use crate::domain::TraceDomain;
use crate::state::{EventSource, drain};
use crate::telemetry;

const COLUMNS: &[Column] = &[
    Column::new("PROC", 20),
    Column::new("CALLS", 8),
    Column::new("AVG_WAKE(us)", 12),
    Column::new("AVG_RTT(us)", 12),
    Column::new("MAX_RTT(us)", 12),
];

#[derive(Default)]
struct ProcStats {
    calls: u64,
    wake_ns: u64,
    rtt_ns: u64,
    max_rtt_ns: u64,
}

/// Completed RPC tasks, aggregated per procedure for each tick.
pub struct RpcPrinter {
    source: Box<dyn EventSource<RpcEvent>>,
}

impl RpcPrinter {
    pub fn new(source: Box<dyn EventSource<RpcEvent>>) -> Self {
        Self { source }
    }
}

impl Printer for RpcPrinter {
    fn domain(&self) -> TraceDomain {
        TraceDomain::Rpc
    }

    fn columns(&self) -> &'static [Column] {
        COLUMNS
    }

    fn collect(&mut self) -> Result<Vec<Vec<String>>> {
        let events = drain(self.source.as_mut(), MAX_EVENTS_PER_TICK)?;
        if events.is_empty() {
            return Ok(vec![idle_row(COLUMNS)]);
        }

        let mut by_proc: BTreeMap<String, ProcStats> = BTreeMap::new();
        for event in &events {
            let name = c_str(&event.proc_name);
            telemetry::record_rpc_call(name, event.end_lat);
            let stats = by_proc.entry(name.to_string()).or_default();
            stats.calls += 1;
            stats.wake_ns = stats.wake_ns.saturating_add(event.wake_lat);
            stats.rtt_ns = stats.rtt_ns.saturating_add(event.end_lat);
            stats.max_rtt_ns = stats.max_rtt_ns.max(event.end_lat);
        }

        Ok(by_proc
            .into_iter()
            .map(|(name, s)| {
                vec![
                    name,
                    s.calls.to_string(),
                    us(s.wake_ns / s.calls).to_string(),
                    us(s.rtt_ns / s.calls).to_string(),
                    us(s.max_rtt_ns).to_string(),
                ]
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::state::testing::MemQueue;

    fn event(name: &str, wake_ns: u64, rtt_ns: u64) -> RpcEvent {
        let mut proc_name = [0u8; 32];
        proc_name[..name.len()].copy_from_slice(name.as_bytes());
        RpcEvent {
            tk_owner: 1,
            proc_name,
            timestamp: 0,
            wake_lat: wake_ns,
            end_lat: rtt_ns,
            end_action: 0,
        }
    }

    #[test]
    fn test_aggregates_per_procedure() {
        let queue = MemQueue(VecDeque::from(vec![
            event("WRITE", 2_000, 100_000),
            event("READ", 1_000, 50_000),
            event("WRITE", 4_000, 300_000),
        ]));
        let mut printer = RpcPrinter::new(Box::new(queue));

        let rows = printer.collect().unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["READ", "1", "1", "50", "50"],
                vec!["WRITE", "2", "3", "200", "300"],
            ]
        );
        assert_eq!(printer.collect().unwrap(), vec![idle_row(COLUMNS)]);
    }
}
