use anyhow::Result;

use crate::domain::TraceDomain;
use crate::image::FILE_IO_FUNCS;
use crate::probes::{DomainPlan, Probe};
use crate::settings::Configuration;
use crate::symbols::SymbolOverrideTable;

/// Read/write path of the NFS client, timed per call.
pub struct FileIoProbe;

impl Probe for FileIoProbe {
    fn domain(&self) -> TraceDomain {
        TraceDomain::FileIo
    }

    fn plan(&self, _config: &Configuration, symbols: &SymbolOverrideTable) -> Result<DomainPlan> {
        let mut plan = DomainPlan::new(TraceDomain::FileIo);
        for func in FILE_IO_FUNCS {
            plan.add_kprobe_pair(func, symbols);
        }
        Ok(plan)
    }
}
