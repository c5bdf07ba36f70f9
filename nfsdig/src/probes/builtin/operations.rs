use anyhow::Result;

use crate::domain::TraceDomain;
use crate::image::traced_nfs_ops;
use crate::probes::{DomainPlan, Probe};
use crate::settings::Configuration;
use crate::symbols::SymbolOverrideTable;

/// File, inode and dentry operations of the NFS client, one histogram each.
pub struct OperationsProbe;

impl Probe for OperationsProbe {
    fn domain(&self) -> TraceDomain {
        TraceDomain::Operations
    }

    fn plan(&self, _config: &Configuration, symbols: &SymbolOverrideTable) -> Result<DomainPlan> {
        let mut plan = DomainPlan::new(TraceDomain::Operations);
        for func in traced_nfs_ops() {
            plan.add_kprobe_pair(&func, symbols);
        }
        Ok(plan)
    }
}
