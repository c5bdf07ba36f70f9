use std::collections::BTreeMap;

use anyhow::Result;
use nfsdig_common::{IoEvent, IoOp, c_str};

use super::{Column, MAX_EVENTS_PER_TICK, Printer, idle_row, us};
use crate::domain::TraceDomain;
use crate::state::{EventSource, drain};
use crate::telemetry;

const COLUMNS: &[Column] = &[
    Column::new("OP", 12),
    Column::new("FILE", 32),
    Column::new("OPS", 8),
    Column::new("BYTES", 12),
    Column::new("AVG_LAT(us)", 12),
];

/// NFS file reads and writes grouped by operation and file.
pub struct IoPrinter {
    source: Box<dyn EventSource<IoEvent>>,
}

impl IoPrinter {
    pub fn new(source: Box<dyn EventSource<IoEvent>>) -> Self {
        Self { source }
    }
}

impl Printer for IoPrinter {
    fn domain(&self) -> TraceDomain {
        TraceDomain::FileIo
    }

    fn columns(&self) -> &'static [Column] {
        COLUMNS
    }

    fn collect(&mut self) -> Result<Vec<Vec<String>>> {
        let events = drain(self.source.as_mut(), MAX_EVENTS_PER_TICK)?;
        if events.is_empty() {
            return Ok(vec![idle_row(COLUMNS)]);
        }

        // (ops, bytes, latency ns)
        let mut groups: BTreeMap<(String, String), (u64, u64, u64)> = BTreeMap::new();
        for event in &events {
            let op = IoOp::from_raw(event.op)
                .map(|op| op.as_str().to_string())
                .unwrap_or_else(|| format!("op#{}", event.op));
            let file = c_str(&event.file).to_string();
            telemetry::record_io_event(&op, event.size, event.lat);

            let entry = groups.entry((op, file)).or_default();
            entry.0 += 1;
            entry.1 = entry.1.saturating_add(event.size);
            entry.2 = entry.2.saturating_add(event.lat);
        }

        Ok(groups
            .into_iter()
            .map(|((op, file), (ops, bytes, lat))| {
                vec![
                    op,
                    file,
                    ops.to_string(),
                    bytes.to_string(),
                    us(lat / ops).to_string(),
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

    fn event(op: IoOp, file: &str, size: u64, lat_ns: u64) -> IoEvent {
        let mut name = [0u8; 32];
        name[..file.len()].copy_from_slice(file.as_bytes());
        IoEvent {
            pid: 100,
            op: op as u32,
            lat: lat_ns,
            timestamp: 0,
            size,
            comm: [0; 32],
            file: name,
        }
    }

    #[test]
    fn test_groups_by_op_and_file() {
        let queue = MemQueue(VecDeque::from(vec![
            event(IoOp::Write, "data.bin", 4096, 20_000),
            event(IoOp::Read, "data.bin", 8192, 10_000),
            event(IoOp::Write, "data.bin", 4096, 40_000),
            event(IoOp::Write, "log.txt", 10, 5_000),
        ]));
        let mut printer = IoPrinter::new(Box::new(queue));

        let rows = printer.collect().unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["read", "data.bin", "1", "8192", "10"],
                vec!["write", "data.bin", "2", "8192", "30"],
                vec!["write", "log.txt", "1", "10", "5"],
            ]
        );
    }
}
