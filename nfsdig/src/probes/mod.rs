use std::fmt;
use std::path::Path;

use anyhow::Result;
use log::warn;

use crate::domain::TraceDomain;
use crate::image::{entry_program, exit_program};
use crate::settings::Configuration;
use crate::symbols::{Resolution, SymbolOverrideTable};

pub mod attach;
pub mod builtin;

pub use attach::{Attachment, AttachmentManager};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeSide {
    Entry,
    Return,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XdpMode {
    Generic,
    Offload,
}

impl XdpMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "native" | "skb" | "generic" => Some(XdpMode::Generic),
            "offload" | "hw" => Some(XdpMode::Offload),
            _ => None,
        }
    }

    /// Like [`XdpMode::parse`], falling back to generic mode with a warning.
    pub fn from_config(value: &str) -> Self {
        Self::parse(value).unwrap_or_else(|| {
            warn!("Unknown XDP mode {:?}; using generic mode", value);
            XdpMode::Generic
        })
    }
}

impl fmt::Display for XdpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdpMode::Generic => f.write_str("generic"),
            XdpMode::Offload => f.write_str("offload"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Hook {
    Kprobe { symbol: String, side: ProbeSide },
    Tracepoint { subsystem: String, event: String },
    Ingress { interface: String, mode: XdpMode },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    EntryProbe,
    ReturnProbe,
    Tracepoint,
    NetworkIngress,
}

/// One kernel attachment a domain needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookSpec {
    pub domain: TraceDomain,
    /// Program name inside the image.
    pub program: String,
    /// Name the hook is known by before symbol resolution. Entry and return
    /// probes of one function share it.
    pub logical_name: String,
    pub hook: Hook,
}

impl HookSpec {
    pub fn kind(&self) -> HookKind {
        match &self.hook {
            Hook::Kprobe {
                side: ProbeSide::Entry,
                ..
            } => HookKind::EntryProbe,
            Hook::Kprobe {
                side: ProbeSide::Return,
                ..
            } => HookKind::ReturnProbe,
            Hook::Tracepoint { .. } => HookKind::Tracepoint,
            Hook::Ingress { .. } => HookKind::NetworkIngress,
        }
    }

    pub fn target(&self) -> String {
        match &self.hook {
            Hook::Kprobe {
                symbol,
                side: ProbeSide::Entry,
            } => format!("kprobe:{symbol}"),
            Hook::Kprobe {
                symbol,
                side: ProbeSide::Return,
            } => format!("kretprobe:{symbol}"),
            Hook::Tracepoint { subsystem, event } => format!("tracepoint:{subsystem}/{event}"),
            Hook::Ingress { interface, mode } => format!("xdp:{interface} ({mode})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedHook {
    pub logical_name: String,
    pub reason: String,
}

/// Hooks a domain will attach, plus the ones resolved away on this kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainPlan {
    pub domain: TraceDomain,
    pub hooks: Vec<HookSpec>,
    pub skipped: Vec<SkippedHook>,
}

impl DomainPlan {
    pub fn new(domain: TraceDomain) -> Self {
        Self {
            domain,
            hooks: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Records `logical_name` as resolved away by the symbol table.
    pub fn skip(&mut self, logical_name: &str) {
        self.skipped.push(SkippedHook {
            logical_name: logical_name.to_string(),
            reason: "symbol not present on this kernel".to_string(),
        });
    }

    /// Adds an entry/return probe pair on `func` unless the symbol table
    /// says the function is absent.
    pub fn add_kprobe_pair(&mut self, func: &str, symbols: &SymbolOverrideTable) {
        let symbol = match symbols.resolve(func) {
            Resolution::Attach(symbol) => symbol,
            Resolution::Skip => return self.skip(func),
        };

        for (program, side) in [
            (entry_program(func), ProbeSide::Entry),
            (exit_program(func), ProbeSide::Return),
        ] {
            self.hooks.push(HookSpec {
                domain: self.domain,
                program,
                logical_name: func.to_string(),
                hook: Hook::Kprobe {
                    symbol: symbol.clone(),
                    side,
                },
            });
        }
    }
}

/// Kernel-side collection that hooks can be bound to.
pub trait ProgramCollection {
    type Link;

    fn attach(&mut self, hook: &HookSpec) -> Result<Self::Link>;
    fn detach(&mut self, link: Self::Link) -> Result<()>;
}

/// A trace domain's attachment planner.
pub trait Probe {
    fn domain(&self) -> TraceDomain;
    fn plan(&self, config: &Configuration, symbols: &SymbolOverrideTable) -> Result<DomainPlan>;
}

pub fn interface_exists(name: &str) -> bool {
    Path::new("/sys/class/net").join(name).exists()
}
