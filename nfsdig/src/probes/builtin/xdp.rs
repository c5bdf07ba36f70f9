use anyhow::{Result, bail};
use log::info;

use crate::domain::TraceDomain;
use crate::image::XDP_PROGRAM;
use crate::probes::{DomainPlan, Hook, HookSpec, Probe, XdpMode, interface_exists};
use crate::settings::{Configuration, DEFAULT_INTERFACE};
use crate::symbols::SymbolOverrideTable;

/// Packet-level NFS filter on one network interface.
pub struct XdpProbe;

impl Probe for XdpProbe {
    fn domain(&self) -> TraceDomain {
        TraceDomain::Xdp
    }

    fn plan(&self, config: &Configuration, _symbols: &SymbolOverrideTable) -> Result<DomainPlan> {
        let interface = match &config.xdp.interface {
            Some(name) => {
                if !interface_exists(name) {
                    bail!("network interface {} does not exist", name);
                }
                name.clone()
            }
            None => {
                info!("No XDP interface configured; using {}", DEFAULT_INTERFACE);
                DEFAULT_INTERFACE.to_string()
            }
        };
        let mode = XdpMode::from_config(&config.xdp.mode);

        let mut plan = DomainPlan::new(TraceDomain::Xdp);
        plan.hooks.push(HookSpec {
            domain: TraceDomain::Xdp,
            program: XDP_PROGRAM.to_string(),
            logical_name: XDP_PROGRAM.to_string(),
            hook: Hook::Ingress { interface, mode },
        });
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_mode_falls_back_to_generic() {
        let mut config = Configuration::default();
        config.xdp.mode = "unknown-mode".to_string();

        let plan = XdpProbe
            .plan(&config, &SymbolOverrideTable::default())
            .unwrap();

        assert_eq!(plan.hooks.len(), 1);
        assert_eq!(
            plan.hooks[0].hook,
            Hook::Ingress {
                interface: "lo".to_string(),
                mode: XdpMode::Generic
            }
        );
    }

    #[test]
    fn test_missing_interface_is_fatal() {
        let mut config = Configuration::default();
        config.xdp.interface = Some("nfsdig-no-such-if0".to_string());

        let err = XdpProbe
            .plan(&config, &SymbolOverrideTable::default())
            .unwrap_err();
        assert!(err.to_string().contains("nfsdig-no-such-if0"));
    }

    #[test]
    fn test_offload_mode() {
        let mut config = Configuration::default();
        config.xdp.mode = "offload".to_string();

        let plan = XdpProbe
            .plan(&config, &SymbolOverrideTable::default())
            .unwrap();
        assert_eq!(plan.hooks[0].target(), "xdp:lo (offload)");
    }
}
