use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::domain::{DomainSet, TraceDomain};

pub const DEFAULT_IMAGE_PATH: &str = "/usr/lib/nfsdig/nfsdig.bpf.o";
pub const DEFAULT_INTERFACE: &str = "lo";
const DEFAULT_INTERVAL_SECONDS: u64 = 1;
const DEFAULT_FLOW_TTL_SECONDS: u64 = 3600;
const DEFAULT_SWEEP_MULTIPLIER: u32 = 5;

/// Per-domain switches. The error domain has no switch.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TraceToggles {
    pub rpc: Option<bool>,
    pub io: Option<bool>,
    pub op: Option<bool>,
    pub nfsd: Option<bool>,
    pub xdp: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct XdpSettings {
    pub interface: Option<String>,
    pub mode: Option<String>,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: Option<String>,
    pub flow_ttl_secs: Option<u64>,
    pub sweep_multiplier: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputSettings {
    pub dir: Option<String>,
}

/// Raw settings as read from the config file and `NFSDIG_*` variables.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub image_path: Option<String>,
    pub interval: Option<u64>,
    pub pid: Option<u32>,
    #[serde(default)]
    pub trace: TraceToggles,
    #[serde(default)]
    pub xdp: XdpSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub symbol_overrides: BTreeMap<String, String>,
}

impl Settings {
    /// Loads `.env`, then the optional YAML file, then the environment,
    /// later sources winning.
    pub fn new(config_file: Option<&Path>) -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let s = builder
            .add_source(
                Environment::with_prefix("NFSDIG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn enabled_domains(&self) -> DomainSet {
        let t = &self.trace;
        let mut set = DomainSet::new();
        for (flag, domain) in [
            (t.rpc, TraceDomain::Rpc),
            (t.io, TraceDomain::FileIo),
            (t.op, TraceDomain::Operations),
            (t.nfsd, TraceDomain::Nfsd),
            (t.xdp, TraceDomain::Xdp),
        ] {
            if flag.unwrap_or(false) {
                set.insert(domain);
            }
        }
        set
    }

    /// Validates the settings and freezes them into a [`Configuration`].
    pub fn to_configuration(&self) -> Result<Configuration> {
        let interval_secs = self.interval.unwrap_or(DEFAULT_INTERVAL_SECONDS);
        if interval_secs == 0 {
            bail!("interval must be greater than zero");
        }
        let interval = Duration::from_secs(interval_secs);

        let multiplier = self
            .xdp
            .sweep_multiplier
            .unwrap_or(DEFAULT_SWEEP_MULTIPLIER);
        if multiplier < 2 {
            bail!(
                "xdp.sweep_multiplier must be at least 2 (got {})",
                multiplier
            );
        }

        let sweep_interval = interval.checked_mul(multiplier).with_context(|| {
            format!(
                "interval {}s times xdp.sweep_multiplier {} is out of range",
                interval_secs, multiplier
            )
        })?;

        let ttl_secs = self.xdp.flow_ttl_secs.unwrap_or(DEFAULT_FLOW_TTL_SECONDS);
        if ttl_secs == 0 {
            bail!("xdp.flow_ttl_secs must be greater than zero");
        }

        let output_dir = self
            .output
            .dir
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from);
        if let Some(dir) = &output_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        }

        Ok(Configuration {
            image_path: PathBuf::from(
                self.image_path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_IMAGE_PATH.to_string()),
            ),
            domains: self.enabled_domains(),
            filter_pid: self.pid.unwrap_or(0),
            xdp: XdpConfig {
                interface: self.xdp.interface.clone().filter(|i| !i.is_empty()),
                mode: self.xdp.mode.clone().unwrap_or_default(),
                src_ip: self.xdp.src_ip.clone().unwrap_or_default(),
                dst_ip: self.xdp.dst_ip.clone().unwrap_or_default(),
                src_port: self.xdp.src_port.unwrap_or(0),
                dst_port: self.xdp.dst_port.unwrap_or(0),
                protocol: self.xdp.protocol.clone().unwrap_or_default(),
                flow_ttl: Duration::from_secs(ttl_secs),
                sweep_interval,
            },
            interval,
            output_dir,
            symbol_overrides: self.symbol_overrides.clone(),
        })
    }
}

/// Validated, immutable run configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub image_path: PathBuf,
    pub domains: DomainSet,
    /// 0 traces every process.
    pub filter_pid: u32,
    pub xdp: XdpConfig,
    pub interval: Duration,
    pub output_dir: Option<PathBuf>,
    pub symbol_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct XdpConfig {
    /// `None` attaches to the loopback default.
    pub interface: Option<String>,
    pub mode: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: String,
    pub flow_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        let interval = Duration::from_secs(DEFAULT_INTERVAL_SECONDS);
        Self {
            image_path: PathBuf::from(DEFAULT_IMAGE_PATH),
            domains: DomainSet::new(),
            filter_pid: 0,
            xdp: XdpConfig {
                interface: None,
                mode: String::new(),
                src_ip: String::new(),
                dst_ip: String::new(),
                src_port: 0,
                dst_port: 0,
                protocol: String::new(),
                flow_ttl: Duration::from_secs(DEFAULT_FLOW_TTL_SECONDS),
                sweep_interval: interval * DEFAULT_SWEEP_MULTIPLIER,
            },
            interval,
            output_dir: None,
            symbol_overrides: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_settings() {
        unsafe {
            std::env::set_var("NFSDIG_TRACE__NFSD", "true");
            std::env::set_var("NFSDIG_INTERVAL", "3");
            std::env::set_var("NFSDIG_XDP__MODE", "offload");
            std::env::set_var("NFSDIG_XDP__DST_PORT", "2049");
        }

        let settings = Settings::new(None).expect("Failed to load settings");

        assert_eq!(settings.trace.nfsd, Some(true));
        assert_eq!(settings.interval, Some(3));
        assert_eq!(settings.xdp.mode.as_deref(), Some("offload"));
        assert_eq!(settings.xdp.dst_port, Some(2049));

        unsafe {
            std::env::remove_var("NFSDIG_TRACE__NFSD");
            std::env::remove_var("NFSDIG_INTERVAL");
            std::env::remove_var("NFSDIG_XDP__MODE");
            std::env::remove_var("NFSDIG_XDP__DST_PORT");
        }
    }

    #[test]
    #[serial]
    fn test_load_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nfsdig.yaml");
        std::fs::write(
            &path,
            "interval: 2\ntrace:\n  op: true\nxdp:\n  interface: eth0\n  protocol: udp\n",
        )
        .unwrap();

        let settings = Settings::new(Some(&path)).expect("Failed to load settings");
        assert_eq!(settings.interval, Some(2));
        assert_eq!(settings.trace.op, Some(true));
        assert_eq!(settings.xdp.interface.as_deref(), Some("eth0"));
        assert_eq!(settings.xdp.protocol.as_deref(), Some("udp"));
    }

    #[test]
    fn test_to_configuration_defaults() {
        let config = Settings::default().to_configuration().unwrap();

        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.xdp.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.xdp.flow_ttl, Duration::from_secs(3600));
        assert_eq!(config.image_path, PathBuf::from(DEFAULT_IMAGE_PATH));
        assert_eq!(config.domains, DomainSet::new());
        assert!(config.xdp.interface.is_none());
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_to_configuration_rejects_zero_interval() {
        let settings = Settings {
            interval: Some(0),
            ..Default::default()
        };
        assert!(settings.to_configuration().is_err());
    }

    #[test]
    fn test_to_configuration_rejects_short_sweep() {
        let settings = Settings {
            xdp: XdpSettings {
                sweep_multiplier: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(settings.to_configuration().is_err());
    }

    #[test]
    fn test_to_configuration_rejects_overflowing_sweep_period() {
        let settings = Settings {
            interval: Some(u64::MAX / 2),
            ..Default::default()
        };
        let err = settings.to_configuration().unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err:#}");
    }

    #[test]
    fn test_enabled_domains() {
        let settings = Settings {
            trace: TraceToggles {
                op: Some(true),
                xdp: Some(false),
                ..Default::default()
            },
            ..Default::default()
        };
        let domains = settings.enabled_domains();
        assert!(domains.contains(TraceDomain::Operations));
        assert!(domains.contains(TraceDomain::Error));
        assert!(!domains.contains(TraceDomain::Xdp));
        assert!(!domains.contains(TraceDomain::Rpc));
    }
}
