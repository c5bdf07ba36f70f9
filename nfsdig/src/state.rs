//! User-space views of the state the kernel programs maintain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use aya::Pod;
use aya::maps::{Array, HashMap, MapData, MapError, Queue};
use nfsdig_common::{FlowRecord, LatencyHistogram, MAX_SLOTS, XdpStats};

/// Cumulative per-operation histograms keyed by operation index.
pub trait HistogramSource: Send {
    fn snapshot(&self) -> Result<Vec<(u32, LatencyHistogram)>>;
}

/// FIFO of fixed-size records pushed by the kernel.
pub trait EventSource<T>: Send {
    /// `Ok(None)` once the queue is empty.
    fn next_event(&mut self) -> Result<Option<T>>;
}

/// The transaction table written by the ingress program.
pub trait FlowTable: Send {
    /// Best-effort snapshot; entries may come and go while it is taken.
    fn entries(&self) -> Vec<Result<(u32, FlowRecord)>>;
    /// Returns `false` when the key was already gone.
    fn remove(&mut self, key: u32) -> Result<bool>;
}

pub type SharedFlowTable = Arc<Mutex<dyn FlowTable>>;

pub trait StatsSource: Send {
    fn read(&self) -> Result<XdpStats>;
}

/// Pops up to `max` events so a busy producer cannot pin the caller.
pub fn drain<T>(source: &mut dyn EventSource<T>, max: usize) -> Result<Vec<T>> {
    let mut events = Vec::new();
    while events.len() < max {
        match source.next_event()? {
            Some(event) => events.push(event),
            None => break,
        }
    }
    Ok(events)
}

/// Current time on the clock `bpf_ktime_get_ns` reads.
pub fn monotonic_now() -> Result<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if ret != 0 {
        bail!(
            "clock_gettime(CLOCK_MONOTONIC) failed: {}",
            std::io::Error::last_os_error()
        );
    }
    Ok(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

/// Activity between two cumulative snapshots. Counters that went
/// backwards are treated as no activity.
pub fn histogram_delta(
    current: &LatencyHistogram,
    previous: Option<&LatencyHistogram>,
) -> LatencyHistogram {
    let Some(prev) = previous else {
        return *current;
    };
    let mut slots = [0u32; MAX_SLOTS];
    for (i, slot) in slots.iter_mut().enumerate() {
        *slot = current.slots[i].saturating_sub(prev.slots[i]);
    }
    LatencyHistogram {
        latency: current.latency.saturating_sub(prev.latency),
        cnt: current.cnt.saturating_sub(prev.cnt),
        slots,
    }
}

pub fn mean_us(hist: &LatencyHistogram) -> u64 {
    if hist.cnt == 0 {
        0
    } else {
        hist.latency / hist.cnt
    }
}

/// Upper bound, in microseconds, of the bucket holding the `p`-th
/// percentile (`0.0..=1.0`).
pub fn percentile_us(hist: &LatencyHistogram, p: f64) -> u64 {
    let total: u64 = hist.slots.iter().map(|&s| u64::from(s)).sum();
    if total == 0 {
        return 0;
    }
    let rank = ((total as f64) * p.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
    let mut seen = 0u64;
    for (i, &count) in hist.slots.iter().enumerate() {
        seen += u64::from(count);
        if seen >= rank {
            return (1u64 << (i + 1)) - 1;
        }
    }
    (1u64 << MAX_SLOTS) - 1
}

impl HistogramSource for HashMap<MapData, u32, LatencyHistogram> {
    fn snapshot(&self) -> Result<Vec<(u32, LatencyHistogram)>> {
        self.iter()
            .map(|entry| entry.context("Failed to read histogram entry"))
            .collect()
    }
}

impl<T: Pod + Send> EventSource<T> for Queue<MapData, T> {
    fn next_event(&mut self) -> Result<Option<T>> {
        match self.pop(0) {
            Ok(event) => Ok(Some(event)),
            Err(MapError::ElementNotFound) => Ok(None),
            Err(e) => Err(e).context("Failed to pop event"),
        }
    }
}

impl FlowTable for HashMap<MapData, u32, FlowRecord> {
    fn entries(&self) -> Vec<Result<(u32, FlowRecord)>> {
        self.iter()
            .map(|entry| entry.context("Failed to read flow record"))
            .collect()
    }

    fn remove(&mut self, key: u32) -> Result<bool> {
        match HashMap::remove(self, &key) {
            Ok(()) => Ok(true),
            Err(MapError::KeyNotFound) => Ok(false),
            Err(MapError::SyscallError(e)) if e.io_error.raw_os_error() == Some(libc::ENOENT) => {
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete flow {key}")),
        }
    }
}

impl StatsSource for Array<MapData, XdpStats> {
    fn read(&self) -> Result<XdpStats> {
        self.get(&0, 0).context("Failed to read packet counters")
    }
}
