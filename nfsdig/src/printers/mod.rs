//! Periodic tabular exporters, one per enabled domain.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{debug, warn};

use crate::domain::TraceDomain;
use crate::lifecycle::{PeriodicTask, ShutdownSignal, run_periodic};

pub mod error;
pub mod histogram;
pub mod io;
pub mod rpc;
pub mod xdp;

/// Upper bound on queue records consumed per tick.
pub const MAX_EVENTS_PER_TICK: usize = 4096;

const TIME_COLUMN: Column = Column::new("TIME", 8);

#[derive(Clone, Copy, Debug)]
pub struct Column {
    pub name: &'static str,
    pub width: usize,
}

impl Column {
    pub const fn new(name: &'static str, width: usize) -> Self {
        Self { name, width }
    }
}

/// Produces the rows of one domain's table.
pub trait Printer: Send {
    fn domain(&self) -> TraceDomain;

    /// Columns after the leading TIME column. Fixed for the life of the
    /// printer.
    fn columns(&self) -> &'static [Column];

    /// Rows for the current tick, one cell per column.
    fn collect(&mut self) -> Result<Vec<Vec<String>>>;
}

/// Row of dashes for ticks with nothing to report.
pub fn idle_row(columns: &[Column]) -> Vec<String> {
    vec!["-".to_string(); columns.len()]
}

fn format_line(out: &mut String, cells: impl Iterator<Item = (usize, String)>) {
    let start = out.len();
    for (width, cell) in cells {
        out.push_str(&format!("{:<width$} ", cell, width = width));
    }
    let trimmed = out[start..].trim_end().len();
    out.truncate(start + trimmed);
    out.push('\n');
}

pub fn header(columns: &[Column]) -> String {
    let mut out = String::new();
    format_line(
        &mut out,
        std::iter::once(TIME_COLUMN)
            .chain(columns.iter().copied())
            .map(|c| (c.width, c.name.to_string())),
    );
    out
}

pub fn format_rows(columns: &[Column], stamp: &str, rows: Vec<Vec<String>>) -> Result<String> {
    let mut out = String::new();
    for row in rows {
        if row.len() != columns.len() {
            bail!(
                "row has {} cells but the table has {} columns",
                row.len(),
                columns.len()
            );
        }
        format_line(
            &mut out,
            std::iter::once((TIME_COLUMN.width, stamp.to_string()))
                .chain(columns.iter().map(|c| c.width).zip(row)),
        );
    }
    Ok(out)
}

pub type Sink = Box<dyn Write + Send>;

/// Stdout, or `<dir>/<domain>.log` when an output directory is set.
pub fn open_sink(domain: TraceDomain, output_dir: Option<&Path>) -> Result<Sink> {
    match output_dir {
        None => Ok(Box::new(std::io::stdout())),
        Some(dir) => {
            let path = dir.join(format!("{}.log", domain.name()));
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            debug!("[{}] Writing to {}", domain, path.display());
            Ok(Box::new(BufWriter::new(file)))
        }
    }
}

/// Drives a [`Printer`]: header once, then one record per tick.
pub struct Exporter {
    printer: Box<dyn Printer>,
    sink: Sink,
}

impl Exporter {
    pub fn new(printer: Box<dyn Printer>, sink: Sink) -> Self {
        Self { printer, sink }
    }

    pub fn domain(&self) -> TraceDomain {
        self.printer.domain()
    }

    pub fn write_header(&mut self) -> Result<()> {
        let header = header(self.printer.columns());
        self.sink.write_all(header.as_bytes())?;
        self.sink.flush()?;
        Ok(())
    }

    pub fn tick(&mut self, stamp: &str) -> Result<()> {
        let rows = self.printer.collect()?;
        let text = format_rows(self.printer.columns(), stamp, rows)?;
        self.sink.write_all(text.as_bytes())?;
        self.sink.flush()?;
        Ok(())
    }

    pub async fn run(self, interval: Duration, shutdown: ShutdownSignal) {
        let domain = self.domain();
        run_periodic(interval, shutdown, self).await;
        debug!("[{}] Exporter stopped", domain);
    }
}

impl PeriodicTask for Exporter {
    fn on_start(&mut self) {
        if let Err(e) = self.write_header() {
            warn!("[{}] Failed to write header: {:#}", self.domain(), e);
        }
    }

    fn on_tick(&mut self) {
        let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
        if let Err(e) = self.tick(&stamp) {
            warn!("[{}] Failed to export: {:#}", self.domain(), e);
        }
    }
}

pub fn us(ns: u64) -> u64 {
    ns / 1_000
}

#[cfg(test)]
pub mod testing {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Writer whose contents stay readable after it is boxed.
    #[derive(Clone, Default)]
    pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
