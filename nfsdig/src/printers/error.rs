use anyhow::Result;
use nfsdig_common::{ErrorEvent, c_str};

use super::{Column, MAX_EVENTS_PER_TICK, Printer, idle_row};
use crate::domain::TraceDomain;
use crate::state::{EventSource, drain};
use crate::telemetry;

const COLUMNS: &[Column] = &[
    Column::new("PID", 8),
    Column::new("PROC", 20),
    Column::new("STATUS", 8),
    Column::new("MESSAGE", 32),
];

/// RPC tasks that completed with an error status.
pub struct ErrorPrinter {
    source: Box<dyn EventSource<ErrorEvent>>,
}

impl ErrorPrinter {
    pub fn new(source: Box<dyn EventSource<ErrorEvent>>) -> Self {
        Self { source }
    }
}

impl Printer for ErrorPrinter {
    fn domain(&self) -> TraceDomain {
        TraceDomain::Error
    }

    fn columns(&self) -> &'static [Column] {
        COLUMNS
    }

    fn collect(&mut self) -> Result<Vec<Vec<String>>> {
        let events = drain(self.source.as_mut(), MAX_EVENTS_PER_TICK)?;
        if events.is_empty() {
            return Ok(vec![idle_row(COLUMNS)]);
        }

        Ok(events
            .iter()
            .map(|event| {
                let proc_name = c_str(&event.proc_name);
                telemetry::record_nfs_error(proc_name, event.error_status);
                vec![
                    event.pid.to_string(),
                    proc_name.to_string(),
                    event.error_status.to_string(),
                    describe_status(event.error_status),
                ]
            })
            .collect())
    }
}

/// Kernel statuses are negated errno values.
fn describe_status(status: i64) -> String {
    match i32::try_from(status.unsigned_abs()) {
        Ok(errno) if errno != 0 => {
            let msg = std::io::Error::from_raw_os_error(errno).to_string();
            // drop the " (os error N)" suffix
            match msg.rfind(" (os error") {
                Some(idx) => msg[..idx].to_string(),
                None => msg,
            }
        }
        _ => "unknown".to_string(),
    }
}
