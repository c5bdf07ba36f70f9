#![no_std]

/// Number of log2 latency buckets kept per traced operation.
pub const MAX_SLOTS: usize = 27;

/// Length of the fixed-size name buffers carried in events.
pub const NAME_LEN: usize = 32;

/// Cumulative latency distribution for one operation kind.
///
/// `latency` is the running sum in microseconds, slot `i` counts calls
/// that took `[2^i, 2^(i+1))` microseconds (slot 0 also holds zero).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencyHistogram {
    pub latency: u64,
    pub cnt: u64,
    pub slots: [u32; MAX_SLOTS],
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            latency: 0,
            cnt: 0,
            slots: [0; MAX_SLOTS],
        }
    }
}

/// Per-transaction record written by the ingress program.
/// `timestamp` is taken from the kernel monotonic clock.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowRecord {
    pub xid: u32,
    pub op_type: u32,
    pub op_count: u32,
    pub timestamp: u64,
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub status: u32,
    pub data_size: u64,
    pub tag: [u8; NAME_LEN],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XdpStats {
    pub total_packets: u64,
    pub nfs_packets: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
    pub total_bytes: u64,
    pub nfs_bytes: u64,
}

/// Completed RPC task. Latencies are in nanoseconds.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RpcEvent {
    pub tk_owner: u32,
    pub proc_name: [u8; NAME_LEN],
    pub timestamp: u64,
    pub wake_lat: u64,
    pub end_lat: u64,
    pub end_action: u64,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum IoOp {
    Read = 0,
    Write = 1,
    SpliceRead = 2,
    SpliceWrite = 3,
}

impl IoOp {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::SpliceRead),
            3 => Some(Self::SpliceWrite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::SpliceRead => "splice_read",
            Self::SpliceWrite => "splice_write",
        }
    }
}

/// Completed file I/O call. `lat` is in nanoseconds.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct IoEvent {
    pub pid: u32,
    pub op: u32,
    pub lat: u64,
    pub timestamp: u64,
    pub size: u64,
    pub comm: [u8; NAME_LEN],
    pub file: [u8; NAME_LEN],
}

/// RPC task that finished with a negative status.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ErrorEvent {
    pub timestamp: u64,
    pub pid: u32,
    pub proc_name: [u8; NAME_LEN],
    pub error_status: i64,
}

/// Interprets a NUL-padded kernel buffer as text, stopping at the first NUL.
/// Invalid UTF-8 yields the longest valid prefix.
pub fn c_str(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match core::str::from_utf8(&buf[..end]) {
        Ok(s) => s,
        Err(e) => {
            // valid_up_to() is always a char boundary
            core::str::from_utf8(&buf[..e.valid_up_to()]).unwrap_or("")
        }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for LatencyHistogram {}
#[cfg(feature = "user")]
unsafe impl aya::Pod for FlowRecord {}
#[cfg(feature = "user")]
unsafe impl aya::Pod for XdpStats {}
#[cfg(feature = "user")]
unsafe impl aya::Pod for RpcEvent {}
#[cfg(feature = "user")]
unsafe impl aya::Pod for IoEvent {}
#[cfg(feature = "user")]
unsafe impl aya::Pod for ErrorEvent {}
