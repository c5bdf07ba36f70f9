use anyhow::Result;

use crate::domain::TraceDomain;
use crate::image::traced_nfsd_ops;
use crate::probes::{DomainPlan, Probe};
use crate::settings::Configuration;
use crate::symbols::SymbolOverrideTable;

/// NFSv4 server operation handlers.
pub struct NfsdProbe;

impl Probe for NfsdProbe {
    fn domain(&self) -> TraceDomain {
        TraceDomain::Nfsd
    }

    fn plan(&self, _config: &Configuration, symbols: &SymbolOverrideTable) -> Result<DomainPlan> {
        let mut plan = DomainPlan::new(TraceDomain::Nfsd);
        for func in traced_nfsd_ops() {
            plan.add_kprobe_pair(&func, symbols);
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::AttachmentManager;
    use crate::probes::testing::MockCollection;

    #[test]
    fn test_absent_symbol_skipped_and_setup_continues() {
        let plan = NfsdProbe
            .plan(&Configuration::default(), &SymbolOverrideTable::default())
            .unwrap();
        let total = traced_nfsd_ops().count();

        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].logical_name, "nfsd4_illegal");
        assert_eq!(plan.hooks.len(), 2 * (total - 1));

        let mut collection = MockCollection::default();
        let mut manager = AttachmentManager::new();
        let n = manager.attach_plan(&mut collection, &plan).unwrap();

        assert_eq!(n, 2 * (total - 1));
        assert!(
            collection
                .live
                .iter()
                .all(|(_, h)| h.logical_name != "nfsd4_illegal")
        );
        assert!(
            collection
                .live
                .iter()
                .any(|(_, h)| h.target() == "kprobe:nfsd4_proc_compound")
        );
    }
}
