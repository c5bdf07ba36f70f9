pub mod file_io;
pub mod nfsd;
pub mod operations;
pub mod rpc;
pub mod xdp;

use crate::domain::TraceDomain;

use super::Probe;

/// Planner for `domain`, or `None` for domains without hooks of their own.
pub fn probe_for(domain: TraceDomain) -> Option<Box<dyn Probe>> {
    match domain {
        TraceDomain::Rpc => Some(Box::new(rpc::RpcProbe)),
        TraceDomain::FileIo => Some(Box::new(file_io::FileIoProbe)),
        TraceDomain::Operations => Some(Box::new(operations::OperationsProbe)),
        TraceDomain::Nfsd => Some(Box::new(nfsd::NfsdProbe)),
        TraceDomain::Xdp => Some(Box::new(xdp::XdpProbe)),
        // Error events are emitted by the RPC programs.
        TraceDomain::Error => None,
    }
}
