use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use object::{Object, ObjectSymbol, SymbolKind};

use crate::domain::TraceDomain;
use crate::image::{
    VAR_FILTER_DST_IP, VAR_FILTER_DST_PORT, VAR_FILTER_PID, VAR_FILTER_PROTOCOL,
    VAR_FILTER_SRC_IP, VAR_FILTER_SRC_PORT,
};
use crate::settings::Configuration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalValue {
    U32(u32),
    U16(u16),
    U8(u8),
}

impl GlobalValue {
    pub fn size(&self) -> u64 {
        match self {
            GlobalValue::U32(_) => 4,
            GlobalValue::U16(_) => 2,
            GlobalValue::U8(_) => 1,
        }
    }
}

/// Byte sizes of the data symbols the program image declares.
#[derive(Clone, Debug, Default)]
pub struct ImageGlobals(BTreeMap<String, u64>);

impl ImageGlobals {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let obj = object::File::parse(data).context("Program image is not a valid ELF object")?;
        let globals: Self = obj
            .symbols()
            .filter(|sym| sym.kind() == SymbolKind::Data)
            .filter_map(|sym| Some((sym.name().ok()?.to_string(), sym.size())))
            .collect();
        debug!("Program image declares {} globals", globals.0.len());
        Ok(globals)
    }

    fn check(&self, name: &str, value: GlobalValue) -> Result<()> {
        match self.0.get(name) {
            None => bail!("variable not declared by the program image"),
            Some(&size) if size != value.size() => bail!(
                "image declares {} bytes but the value needs {}",
                size,
                value.size()
            ),
            Some(_) => Ok(()),
        }
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for ImageGlobals {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(name, size)| (name.into(), size)).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Injection {
    pub name: &'static str,
    pub value: GlobalValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectionFailure {
    pub name: &'static str,
    pub reason: String,
}

/// Values to write into the image before load. Variables listed in
/// `failures` keep the image's match-all default.
#[derive(Clone, Debug, Default)]
pub struct InjectionPlan {
    pub injections: Vec<Injection>,
    pub failures: Vec<InjectionFailure>,
}

impl InjectionPlan {
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<GlobalValue> {
        self.injections
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.value)
    }

    fn push(&mut self, globals: &ImageGlobals, name: &'static str, value: Result<GlobalValue>) {
        let outcome = value.and_then(|value| globals.check(name, value).map(|()| value));

        match outcome {
            Ok(value) => self.injections.push(Injection { name, value }),
            Err(e) => {
                warn!("Failed to set {}: {}; filter disabled", name, e);
                self.failures.push(InjectionFailure {
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Encodes the configured filters for the image. A bad value, or a variable
/// the image lacks or sizes differently, only costs its own filter.
pub fn plan(config: &Configuration, globals: &ImageGlobals) -> InjectionPlan {
    let mut plan = InjectionPlan::default();

    if config.filter_pid != 0 {
        if !process_exists(config.filter_pid) {
            warn!(
                "PID {} is not running; events will only appear once it exists",
                config.filter_pid
            );
        }
        plan.push(globals, VAR_FILTER_PID, Ok(GlobalValue::U32(config.filter_pid)));
        info!("Tracing only PID {}", config.filter_pid);
    }

    if config.domains.contains(TraceDomain::Xdp) {
        let xdp = &config.xdp;
        plan.push(
            globals,
            VAR_FILTER_SRC_IP,
            parse_ipv4(&xdp.src_ip).map(GlobalValue::U32),
        );
        plan.push(
            globals,
            VAR_FILTER_DST_IP,
            parse_ipv4(&xdp.dst_ip).map(GlobalValue::U32),
        );
        plan.push(globals, VAR_FILTER_SRC_PORT, Ok(GlobalValue::U16(xdp.src_port)));
        plan.push(globals, VAR_FILTER_DST_PORT, Ok(GlobalValue::U16(xdp.dst_port)));
        plan.push(
            globals,
            VAR_FILTER_PROTOCOL,
            parse_protocol(&xdp.protocol).map(GlobalValue::U8),
        );
    }

    plan
}

/// Dotted IPv4 to the host-order integer the ingress program compares
/// against. Empty means no filter.
fn parse_ipv4(value: &str) -> Result<u32> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    let addr: Ipv4Addr = value
        .parse()
        .map_err(|_| anyhow!("invalid IPv4 address {:?}", value))?;
    Ok(u32::from(addr))
}

fn parse_protocol(value: &str) -> Result<u8> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(0),
        "tcp" => Ok(libc::IPPROTO_TCP as u8),
        "udp" => Ok(libc::IPPROTO_UDP as u8),
        other => match other.parse::<u8>() {
            Ok(n) => Ok(n),
            Err(_) => bail!("unknown protocol {:?}", value),
        },
    }
}

fn process_exists(pid: u32) -> bool {
    i32::try_from(pid)
        .ok()
        .and_then(|pid| procfs::process::Process::new(pid).ok())
        .is_some()
}
