use std::collections::HashMap;

use anyhow::Result;
use nfsdig_common::LatencyHistogram;

use super::{Column, Printer, idle_row};
use crate::domain::TraceDomain;
use crate::image::{nfs_op_name, nfsd_op_name};
use crate::state::{HistogramSource, histogram_delta, mean_us, percentile_us};
use crate::telemetry;

const COLUMNS: &[Column] = &[
    Column::new("OP", 26),
    Column::new("CALLS", 8),
    Column::new("TOTAL", 10),
    Column::new("AVG(us)", 10),
    Column::new("P50(us)", 10),
    Column::new("P99(us)", 10),
];

/// Per-operation call counts and latency from cumulative kernel
/// histograms. Each tick reports the activity since the previous one.
pub struct HistogramPrinter {
    domain: TraceDomain,
    source: Box<dyn HistogramSource>,
    name_of: fn(u32) -> Option<String>,
    previous: HashMap<u32, LatencyHistogram>,
}

impl HistogramPrinter {
    /// NFS client operations.
    pub fn operations(source: Box<dyn HistogramSource>) -> Self {
        Self::new(TraceDomain::Operations, source, nfs_op_name)
    }

    /// NFSv4 server operations.
    pub fn nfsd(source: Box<dyn HistogramSource>) -> Self {
        Self::new(TraceDomain::Nfsd, source, nfsd_op_name)
    }

    fn new(
        domain: TraceDomain,
        source: Box<dyn HistogramSource>,
        name_of: fn(u32) -> Option<String>,
    ) -> Self {
        Self {
            domain,
            source,
            name_of,
            previous: HashMap::new(),
        }
    }
}

impl Printer for HistogramPrinter {
    fn domain(&self) -> TraceDomain {
        self.domain
    }

    fn columns(&self) -> &'static [Column] {
        COLUMNS
    }

    fn collect(&mut self) -> Result<Vec<Vec<String>>> {
        let mut snapshot = self.source.snapshot()?;
        snapshot.sort_by_key(|(key, _)| *key);

        let mut rows = Vec::new();
        for (key, current) in snapshot {
            let delta = histogram_delta(&current, self.previous.get(&key));
            self.previous.insert(key, current);
            if delta.cnt == 0 {
                continue;
            }

            let name = (self.name_of)(key).unwrap_or_else(|| format!("op#{key}"));
            telemetry::record_op_interval(self.domain, &name, delta.cnt, mean_us(&delta));
            rows.push(vec![
                name,
                delta.cnt.to_string(),
                current.cnt.to_string(),
                mean_us(&delta).to_string(),
                percentile_us(&delta, 0.50).to_string(),
                percentile_us(&delta, 0.99).to_string(),
            ]);
        }

        if rows.is_empty() {
            rows.push(idle_row(COLUMNS));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::Result;

    use super::*;
    use crate::lifecycle::shutdown_channel;
    use crate::printers::Exporter;
    use crate::printers::testing::SharedBuf;
    use crate::state::testing::{MemHistograms, hist};

    /// Source whose contents the test can change between ticks.
    #[derive(Clone, Default)]
    struct Live(Arc<Mutex<MemHistograms>>);

    impl HistogramSource for Live {
        fn snapshot(&self) -> Result<Vec<(u32, LatencyHistogram)>> {
            self.0.lock().unwrap().snapshot()
        }
    }

    #[test]
    fn test_reports_interval_deltas() {
        let live = Live::default();
        live.0.lock().unwrap().0.insert(5, hist(10, 500, 5));
        let mut printer = HistogramPrinter::operations(Box::new(live.clone()));

        let rows = printer.collect().unwrap();
        assert_eq!(rows, vec![vec!["nfs_lock", "10", "10", "50", "63", "63"]]);

        let rows = printer.collect().unwrap();
        assert_eq!(rows, vec![idle_row(COLUMNS)]);

        live.0.lock().unwrap().0.insert(5, hist(14, 900, 5));
        live.0.lock().unwrap().0.insert(0, hist(1, 3, 1));
        let rows = printer.collect().unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["nfs_file_mmap", "1", "1", "3", "3", "3"],
                vec!["nfs_lock", "4", "14", "100", "63", "63"],
            ]
        );
    }

    #[test]
    fn test_counter_going_backwards_is_not_negative() {
        let live = Live::default();
        live.0.lock().unwrap().0.insert(0, hist(10, 100, 0));
        let mut printer = HistogramPrinter::nfsd(Box::new(live.clone()));
        printer.collect().unwrap();

        live.0.lock().unwrap().0.insert(0, hist(3, 30, 0));
        assert_eq!(printer.collect().unwrap(), vec![idle_row(COLUMNS)]);
    }

    #[test]
    fn test_unknown_key_is_named_by_index() {
        let mut source = MemHistograms::default();
        source.0.insert(200, hist(1, 1, 0));
        let mut printer = HistogramPrinter::nfsd(Box::new(source));
        assert_eq!(printer.collect().unwrap()[0][0], "op#200");
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_exporter_prints_header_once() {
        let live = Live::default();
        live.0.lock().unwrap().0.insert(9, hist(2, 40, 4));
        let buf = SharedBuf::default();
        let exporter = Exporter::new(
            Box::new(HistogramPrinter::operations(Box::new(live.clone()))),
            Box::new(buf.clone()),
        );

        let (trigger, signal) = shutdown_channel();
        let task = tokio::spawn(exporter.run(Duration::from_secs(1), signal));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        trigger.trigger();
        task.await.unwrap();

        let text = buf.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("TIME"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("TIME")).count(), 1);
        assert!(lines[1].contains("nfs4_copy_file_range"));
        assert!(lines[2].trim_end().ends_with('-'));
    }
}
