//! Names the program image exposes, grouped by the domain that owns them.
//!
//! The image is built separately; these names are the only contract between
//! it and user space. Histogram keys are indices into [`NFS_OPS`] and
//! [`NFSD_OPS`], so both lists follow the image's enum order.

use std::collections::BTreeMap;

use crate::domain::TraceDomain;
use crate::symbols::to_snake;

/// NFS client operations in key order, as CamelCase logical names.
pub const NFS_OPS: [&str; 33] = [
    // file operations
    "NfsFileMmap",
    "Nfs4FileOpen",
    "Nfs4FileFlush",
    "NfsFileRelease",
    "NfsFileFsync",
    "NfsLock",
    "NfsFlock",
    "NfsCheckFlags",
    "Nfs4Setlease",
    "Nfs4CopyFileRange",
    "Nfs4FileLlseek",
    "Nfs42Fallocate",
    "Nfs42RemapFileRange",
    // inode operations
    "NfsCreate",
    "NfsLookup",
    "NfsAtomicOpen",
    "NfsLink",
    "NfsUnlink",
    "NfsSymlink",
    "NfsMkdir",
    "NfsRmdir",
    "NfsMknod",
    "NfsRename",
    "NfsPermission",
    "NfsGetattr",
    "NfsSetattr",
    "Nfs4Listxattr",
    // dentry operations
    "Nfs4LookupRevalidate",
    "NfsWeakRevalidate",
    "NfsDentryDelete",
    "NfsDentryIput",
    "NfsDAutomount",
    "NfsDRelease",
];

/// NFSv4 server operations in key order, without the `nfsd4_` prefix.
pub const NFSD_OPS: [&str; 61] = [
    "access",
    "close",
    "commit",
    "create",
    "delegreturn",
    "getattr",
    "getfh",
    "link",
    "lock",
    "lockt",
    "locku",
    "lookup",
    "lookupp",
    "nverify",
    "open",
    "open_confirm",
    "open_downgrade",
    "putfh",
    "putrootfh",
    "read",
    "readdir",
    "readlink",
    "remove",
    "rename",
    "renew",
    "restorefh",
    "savefh",
    "secinfo",
    "setattr",
    "setclientid",
    "setclientid_confirm",
    "verify",
    "write",
    "release_lockowner",
    // v4.1
    "exchange_id",
    "backchannel_ctl",
    "bind_conn_to_session",
    "create_session",
    "destroy_session",
    "sequence",
    "destroy_clientid",
    "reclaim_complete",
    "secinfo_no_name",
    "test_stateid",
    "free_stateid",
    // pNFS
    "getdeviceinfo",
    "layoutget",
    "layoutcommit",
    "layoutreturn",
    // v4.2
    "allocate",
    "deallocate",
    "clone",
    "copy",
    "seek",
    "offload_status",
    "offload_cancel",
    "copy_notify",
    "getxattr",
    "setxattr",
    "listxattrs",
    "removexattr",
];

/// Dispatcher entry points traced alongside the per-op handlers. Their
/// kernel names differ from the logical ones on most releases.
pub const NFSD_DISPATCH_OPS: [&str; 3] = ["compound", "null", "illegal"];

pub const FILE_IO_FUNCS: [&str; 4] = [
    "nfs_file_read",
    "nfs_file_write",
    "nfs_file_splice_read",
    "iter_file_splice_write",
];

pub const RPC_KPROBE: &str = "rpc_execute";
pub const RPC_TRACEPOINT_SUBSYSTEM: &str = "sunrpc";
pub const RPC_TRACEPOINTS: [&str; 4] = [
    "rpc_task_begin",
    "rpc_task_wakeup",
    "rpc_task_call_done",
    "rpc_task_end",
];

pub const XDP_PROGRAM: &str = "xdp_ingress";

pub const RPC_EVENTS_MAP: &str = "rpc_events";
pub const IO_EVENTS_MAP: &str = "io_events";
pub const OP_HISTS_MAP: &str = "op_hists";
pub const NFSD_HISTS_MAP: &str = "nfsd_op_hists";
pub const FLOW_MAP: &str = "nfs_op_stats_map";
pub const XDP_STATS_MAP: &str = "xdp_stats_map";
pub const ERROR_EVENTS_MAP: &str = "nfs_error_events";

pub const VAR_FILTER_PID: &str = "filter_pid";
pub const VAR_FILTER_SRC_IP: &str = "filter_src_ip";
pub const VAR_FILTER_DST_IP: &str = "filter_dst_ip";
pub const VAR_FILTER_SRC_PORT: &str = "filter_src_port";
pub const VAR_FILTER_DST_PORT: &str = "filter_dst_port";
pub const VAR_FILTER_PROTOCOL: &str = "filter_protocol";

/// Logical name of the n-th NFS client operation, in snake_case.
pub fn nfs_op_name(key: u32) -> Option<String> {
    NFS_OPS.get(key as usize).map(|op| to_snake(op))
}

pub fn nfsd_op_name(key: u32) -> Option<String> {
    NFSD_OPS.get(key as usize).map(|op| format!("nfsd4_{op}"))
}

/// Snake-case names of client operations that have probes in the image.
pub fn traced_nfs_ops() -> impl Iterator<Item = String> {
    NFS_OPS
        .iter()
        .map(|op| to_snake(op))
}

/// Logical names (`nfsd4_<op>`) of every traced server function.
pub fn traced_nfsd_ops() -> impl Iterator<Item = String> {
    NFSD_OPS
        .iter()
        .chain(NFSD_DISPATCH_OPS.iter())
        .map(|op| format!("nfsd4_{op}"))
}

pub fn entry_program(func: &str) -> String {
    format!("trace_entry_{func}")
}

pub fn exit_program(func: &str) -> String {
    format!("trace_exit_{func}")
}

/// Program and map names declared by the image, with their owning domain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageManifest {
    pub programs: BTreeMap<String, TraceDomain>,
    pub maps: BTreeMap<String, TraceDomain>,
}

impl ImageManifest {
    /// The catalogue of the nfsdig program image.
    pub fn nfsdig() -> Self {
        let mut m = Self::default();

        m.add_program(RPC_KPROBE, TraceDomain::Rpc);
        for tp in RPC_TRACEPOINTS {
            m.add_program(tp, TraceDomain::Rpc);
        }
        for map in ["rpc_start", RPC_EVENTS_MAP, "link_begin", "waiting_rpc", "link_end"] {
            m.add_map(map, TraceDomain::Rpc);
        }

        for func in FILE_IO_FUNCS {
            m.add_pair(func, TraceDomain::FileIo);
        }
        for map in [IO_EVENTS_MAP, "io_starts", "io_metrics_read", "io_metrics_write"] {
            m.add_map(map, TraceDomain::FileIo);
        }

        for func in traced_nfs_ops() {
            m.add_pair(&func, TraceDomain::Operations);
        }
        for map in ["starts", OP_HISTS_MAP] {
            m.add_map(map, TraceDomain::Operations);
        }

        for func in traced_nfsd_ops() {
            m.add_pair(&func, TraceDomain::Nfsd);
        }
        for map in ["nfsd_op_starts", NFSD_HISTS_MAP, "nfsd_compound_starts"] {
            m.add_map(map, TraceDomain::Nfsd);
        }

        m.add_program(XDP_PROGRAM, TraceDomain::Xdp);
        for map in [
            FLOW_MAP,
            XDP_STATS_MAP,
            "size_map",
            "nfs_packet_count",
            "packet_counter",
        ] {
            m.add_map(map, TraceDomain::Xdp);
        }

        m.add_map(ERROR_EVENTS_MAP, TraceDomain::Error);

        m
    }

    fn add_program(&mut self, name: &str, domain: TraceDomain) {
        self.programs.insert(name.to_string(), domain);
    }

    fn add_map(&mut self, name: &str, domain: TraceDomain) {
        self.maps.insert(name.to_string(), domain);
    }

    fn add_pair(&mut self, func: &str, domain: TraceDomain) {
        self.add_program(&entry_program(func), domain);
        self.add_program(&exit_program(func), domain);
    }

    pub fn has_program(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    pub fn has_map(&self, name: &str) -> bool {
        self.maps.contains_key(name)
    }
}
