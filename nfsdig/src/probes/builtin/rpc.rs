use anyhow::Result;

use crate::domain::TraceDomain;
use crate::image::{RPC_KPROBE, RPC_TRACEPOINT_SUBSYSTEM, RPC_TRACEPOINTS};
use crate::probes::{DomainPlan, Hook, HookSpec, Probe, ProbeSide};
use crate::settings::Configuration;
use crate::symbols::{Resolution, SymbolOverrideTable};

/// Client RPC lifecycle: task creation through completion.
pub struct RpcProbe;

impl Probe for RpcProbe {
    fn domain(&self) -> TraceDomain {
        TraceDomain::Rpc
    }

    fn plan(&self, _config: &Configuration, symbols: &SymbolOverrideTable) -> Result<DomainPlan> {
        let mut plan = DomainPlan::new(TraceDomain::Rpc);

        match symbols.resolve(RPC_KPROBE) {
            Resolution::Attach(symbol) => plan.hooks.push(HookSpec {
                domain: TraceDomain::Rpc,
                program: RPC_KPROBE.to_string(),
                logical_name: RPC_KPROBE.to_string(),
                hook: Hook::Kprobe {
                    symbol,
                    side: ProbeSide::Entry,
                },
            }),
            Resolution::Skip => plan.skip(RPC_KPROBE),
        }

        for event in RPC_TRACEPOINTS {
            plan.hooks.push(HookSpec {
                domain: TraceDomain::Rpc,
                program: event.to_string(),
                logical_name: event.to_string(),
                hook: Hook::Tracepoint {
                    subsystem: RPC_TRACEPOINT_SUBSYSTEM.to_string(),
                    event: event.to_string(),
                },
            });
        }

        Ok(plan)
    }
}
