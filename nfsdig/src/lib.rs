pub mod domain;
pub mod image;
pub mod inject;
pub mod lifecycle;
pub mod loader;
pub mod printers;
pub mod probes;
pub mod pruner;
pub mod settings;
pub mod state;
pub mod sweeper;
pub mod symbols;
pub mod telemetry;

use anyhow::{Context, Result};
use log::info;

use crate::domain::TraceDomain;
use crate::image::{
    ERROR_EVENTS_MAP, IO_EVENTS_MAP, ImageManifest, NFSD_HISTS_MAP, OP_HISTS_MAP, RPC_EVENTS_MAP,
};
use crate::inject::ImageGlobals;
use crate::lifecycle::{Session, TaskSet, shutdown_channel, wait_for_termination};
use crate::loader::LoadedImage;
use crate::printers::error::ErrorPrinter;
use crate::printers::histogram::HistogramPrinter;
use crate::printers::io::IoPrinter;
use crate::printers::rpc::RpcPrinter;
use crate::printers::xdp::XdpPrinter;
use crate::printers::{Exporter, Printer, open_sink};
use crate::probes::DomainPlan;
use crate::probes::builtin::probe_for;
use crate::settings::Configuration;
use crate::sweeper::EvictionSweeper;
use crate::symbols::SymbolOverrideTable;

pub struct NfsDigEngine {
    pub config: Configuration,
    session: Session<LoadedImage>,
}

impl NfsDigEngine {
    /// Prunes, configures and loads the program image. Nothing is attached
    /// yet.
    pub fn new(config: Configuration) -> Result<Self> {
        loader::bump_rlimits()?;

        let path = &config.image_path;
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read program image {}", path.display()))?;

        let pruned = pruner::prune(&ImageManifest::nfsdig(), &config.domains);
        let injections = inject::plan(&config, &ImageGlobals::parse(&data)?);
        let image = LoadedImage::load(path, &data, &pruned, &injections)?;

        Ok(Self {
            config,
            session: Session::new(image),
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let (trigger, signal) = shutdown_channel();

        let mut tasks = TaskSet::default();
        let (exporters, sweeper) = match self.build_exporters() {
            Ok(built) => built,
            Err(e) => {
                self.session.shutdown();
                return Err(e);
            }
        };
        if let Err(e) = self.attach_probes() {
            self.session.shutdown();
            return Err(e);
        }

        for exporter in exporters {
            let name = exporter.domain().name();
            tasks.spawn(name, exporter.run(self.config.interval, signal.clone()));
        }
        if let Some(sweeper) = sweeper {
            tasks.spawn("sweeper", sweeper.run(signal.clone()));
        }

        info!(
            "Tracing {:?} with {} hooks. Press Ctrl-C to exit.",
            self.config.domains,
            self.session.attachments().len()
        );
        let result = wait_for_termination().await;

        trigger.trigger();
        tasks.join_all().await;
        self.session.shutdown();
        result
    }

    fn attach_probes(&mut self) -> Result<()> {
        for plan in plan_domains(&self.config)? {
            let attached = self.session.attach(&plan)?;
            telemetry::record_active_probe(plan.domain, attached as u64);
        }
        Ok(())
    }

    /// Takes the maps each enabled domain reads and wraps them in exporters.
    fn build_exporters(&mut self) -> Result<(Vec<Exporter>, Option<EvictionSweeper>)> {
        let image = self.session.collection_mut();
        let output_dir = self.config.output_dir.as_deref();
        let mut exporters = Vec::new();
        let mut sweeper = None;

        for domain in self.config.domains.iter() {
            let printer: Box<dyn Printer> = match domain {
                TraceDomain::Error => Box::new(ErrorPrinter::new(image.events(ERROR_EVENTS_MAP)?)),
                TraceDomain::Rpc => Box::new(RpcPrinter::new(image.events(RPC_EVENTS_MAP)?)),
                TraceDomain::FileIo => Box::new(IoPrinter::new(image.events(IO_EVENTS_MAP)?)),
                TraceDomain::Operations => {
                    Box::new(HistogramPrinter::operations(image.histograms(OP_HISTS_MAP)?))
                }
                TraceDomain::Nfsd => {
                    Box::new(HistogramPrinter::nfsd(image.histograms(NFSD_HISTS_MAP)?))
                }
                TraceDomain::Xdp => {
                    let flows = image.flow_table()?;
                    sweeper = Some(EvictionSweeper::new(
                        flows.clone(),
                        self.config.xdp.flow_ttl,
                        self.config.xdp.sweep_interval,
                    ));
                    Box::new(XdpPrinter::new(image.xdp_stats()?, flows))
                }
            };
            exporters.push(Exporter::new(printer, open_sink(domain, output_dir)?));
        }

        Ok((exporters, sweeper))
    }
}

/// Attachment plans for every enabled domain that has hooks, in domain
/// order.
pub fn plan_domains(config: &Configuration) -> Result<Vec<DomainPlan>> {
    let symbols = SymbolOverrideTable::with_overrides(&config.symbol_overrides);
    config
        .domains
        .iter()
        .filter_map(probe_for)
        .map(|probe| probe.plan(config, &symbols))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainSet;
    use crate::image::traced_nfs_ops;
    use crate::probes::testing::MockCollection;
    use crate::probes::{AttachmentManager, HookKind};

    #[test]
    fn test_operations_only_scenario() {
        let mut config = Configuration::default();
        config.domains = DomainSet::new().with(TraceDomain::Operations);
        config.filter_pid = 0;

        let plans = plan_domains(&config).unwrap();
        assert_eq!(plans.len(), 1);

        let mut collection = MockCollection::default();
        let mut manager = AttachmentManager::new();
        for plan in &plans {
            manager.attach_plan(&mut collection, plan).unwrap();
        }

        assert_eq!(manager.len(), 66);
        assert_eq!(manager.len(), 2 * traced_nfs_ops().count());
        assert_eq!(manager.count(TraceDomain::Operations), manager.len());
        assert!(
            collection
                .live
                .iter()
                .all(|(_, h)| h.kind() != HookKind::NetworkIngress)
        );
    }

    #[test]
    fn test_plans_follow_enabled_domains() {
        let mut config = Configuration::default();
        config.domains = DomainSet::new()
            .with(TraceDomain::Rpc)
            .with(TraceDomain::Xdp);

        let plans = plan_domains(&config).unwrap();
        let domains: Vec<_> = plans.iter().map(|p| p.domain).collect();
        assert_eq!(domains, vec![TraceDomain::Rpc, TraceDomain::Xdp]);

        let plans = plan_domains(&Configuration::default()).unwrap();
        assert!(plans.is_empty());
    }

    #[test]
    fn test_configured_override_reaches_plan() {
        let mut config = Configuration::default();
        config.domains = DomainSet::new().with(TraceDomain::Nfsd);
        config
            .symbol_overrides
            .insert("nfsd4_copy".to_string(), String::new());

        let plans = plan_domains(&config).unwrap();
        let skipped: Vec<_> = plans[0]
            .skipped
            .iter()
            .map(|s| s.logical_name.as_str())
            .collect();
        assert_eq!(skipped, vec!["nfsd4_copy", "nfsd4_illegal"]);
    }
}
