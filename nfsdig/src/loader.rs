use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use aya::maps::{Array, HashMap, Map, MapData, Queue};
use aya::programs::kprobe::KProbeLinkId;
use aya::programs::trace_point::TracePointLinkId;
use aya::programs::xdp::XdpLinkId;
use aya::programs::{KProbe, TracePoint, Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader, Pod};
use aya_log::EbpfLogger;
use log::{debug, info, warn};
use nfsdig_common::{FlowRecord, LatencyHistogram, XdpStats};

use crate::image::{FLOW_MAP, ImageManifest, XDP_STATS_MAP};
use crate::inject::{GlobalValue, InjectionPlan};
use crate::lifecycle::Unload;
use crate::probes::{Hook, HookSpec, ProgramCollection, XdpMode};
use crate::pruner::PrunedImage;
use crate::state::{EventSource, HistogramSource, SharedFlowTable, StatsSource};

const NOFILE_LIMIT: libc::rlim_t = 8192;

/// Raises the locked-memory limit (map storage) and the descriptor limit
/// (one fd per program, map and link).
pub fn bump_rlimits() -> Result<()> {
    let memlock = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &memlock) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error()).context("Failed to raise RLIMIT_MEMLOCK");
    }

    let nofile = libc::rlimit {
        rlim_cur: NOFILE_LIMIT,
        rlim_max: NOFILE_LIMIT,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &nofile) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error()).context("Failed to raise RLIMIT_NOFILE");
    }
    Ok(())
}

pub enum AyaLink {
    Kprobe { program: String, id: KProbeLinkId },
    Tracepoint { program: String, id: TracePointLinkId },
    Xdp { program: String, id: XdpLinkId },
}

/// The program image instantiated in the kernel.
pub struct LoadedImage {
    bpf: Option<Ebpf>,
    retained: ImageManifest,
    loaded: HashSet<String>,
}

impl LoadedImage {
    /// Loads the image read from `path` with the injected variables.
    ///
    /// Maps of pruned domains are created with a single entry and pruned
    /// programs are never loaded, so the verifier only sees enabled domains.
    pub fn load(
        path: &Path,
        data: &[u8],
        pruned: &PrunedImage,
        injections: &InjectionPlan,
    ) -> Result<Self> {
        let mut loader = EbpfLoader::new();

        for injection in &injections.injections {
            match &injection.value {
                GlobalValue::U32(v) => loader.set_global(injection.name, v, true),
                GlobalValue::U16(v) => loader.set_global(injection.name, v, true),
                GlobalValue::U8(v) => loader.set_global(injection.name, v, true),
            };
            debug!("Set {} = {:?}", injection.name, injection.value);
        }

        for map in &pruned.removed_maps {
            loader.set_max_entries(map, 1);
        }

        let mut bpf = loader
            .load(data)
            .with_context(|| format!("Failed to load program image {}", path.display()))?;
        if let Err(e) = EbpfLogger::init(&mut bpf) {
            warn!("Failed to initialize eBPF logger: {}", e);
        }

        info!(
            "Loaded {} ({} programs available, {} pruned)",
            path.display(),
            pruned.retained.programs.len(),
            pruned.removed_programs.len()
        );

        Ok(Self {
            bpf: Some(bpf),
            retained: pruned.retained.clone(),
            loaded: HashSet::new(),
        })
    }

    fn bpf_mut(&mut self) -> Result<&mut Ebpf> {
        self.bpf.as_mut().context("program image already unloaded")
    }

    fn take_map(&mut self, name: &str) -> Result<Map> {
        if !self.retained.has_map(name) {
            bail!("map {} belongs to a disabled domain", name);
        }
        self.bpf_mut()?
            .take_map(name)
            .with_context(|| format!("Failed to find {} map", name))
    }

    pub fn histograms(&mut self, name: &str) -> Result<Box<dyn HistogramSource>> {
        let table: HashMap<MapData, u32, LatencyHistogram> = HashMap::try_from(self.take_map(name)?)
            .with_context(|| format!("{} is not a hash map", name))?;
        Ok(Box::new(table))
    }

    pub fn events<T: Pod + Send + 'static>(
        &mut self,
        name: &str,
    ) -> Result<Box<dyn EventSource<T>>> {
        let queue: Queue<MapData, T> = Queue::try_from(self.take_map(name)?)
            .with_context(|| format!("{} is not a queue", name))?;
        Ok(Box::new(queue))
    }

    pub fn flow_table(&mut self) -> Result<SharedFlowTable> {
        let table: HashMap<MapData, u32, FlowRecord> = HashMap::try_from(self.take_map(FLOW_MAP)?)
            .with_context(|| format!("{} is not a hash map", FLOW_MAP))?;
        Ok(Arc::new(Mutex::new(table)))
    }

    pub fn xdp_stats(&mut self) -> Result<Box<dyn StatsSource>> {
        let array: Array<MapData, XdpStats> = Array::try_from(self.take_map(XDP_STATS_MAP)?)
            .with_context(|| format!("{} is not an array", XDP_STATS_MAP))?;
        Ok(Box::new(array))
    }
}

fn xdp_flags(mode: XdpMode) -> XdpFlags {
    match mode {
        XdpMode::Generic => XdpFlags::SKB_MODE,
        XdpMode::Offload => XdpFlags::HW_MODE,
    }
}

impl ProgramCollection for LoadedImage {
    type Link = AyaLink;

    fn attach(&mut self, hook: &HookSpec) -> Result<AyaLink> {
        if !self.retained.has_program(&hook.program) {
            bail!("program {} was pruned from the image", hook.program);
        }
        let needs_load = !self.loaded.contains(&hook.program);
        let bpf = self.bpf.as_mut().context("program image already unloaded")?;
        let program = bpf
            .program_mut(&hook.program)
            .with_context(|| format!("Failed to find {} program", hook.program))?;

        let link = match &hook.hook {
            Hook::Kprobe { symbol, .. } => {
                let program: &mut KProbe = program.try_into()?;
                if needs_load {
                    program.load()?;
                    self.loaded.insert(hook.program.clone());
                }
                let id = program.attach(symbol, 0)?;
                AyaLink::Kprobe {
                    program: hook.program.clone(),
                    id,
                }
            }
            Hook::Tracepoint { subsystem, event } => {
                let program: &mut TracePoint = program.try_into()?;
                if needs_load {
                    program.load()?;
                    self.loaded.insert(hook.program.clone());
                }
                let id = program.attach(subsystem, event)?;
                AyaLink::Tracepoint {
                    program: hook.program.clone(),
                    id,
                }
            }
            Hook::Ingress { interface, mode } => {
                let program: &mut Xdp = program.try_into()?;
                if needs_load {
                    program.load()?;
                    self.loaded.insert(hook.program.clone());
                }
                let id = program.attach(interface, xdp_flags(*mode))?;
                AyaLink::Xdp {
                    program: hook.program.clone(),
                    id,
                }
            }
        };
        Ok(link)
    }

    fn detach(&mut self, link: AyaLink) -> Result<()> {
        let bpf = self.bpf_mut()?;
        match link {
            AyaLink::Kprobe { program, id } => {
                let p: &mut KProbe = bpf
                    .program_mut(&program)
                    .with_context(|| format!("Failed to find {} program", program))?
                    .try_into()?;
                p.detach(id)?;
            }
            AyaLink::Tracepoint { program, id } => {
                let p: &mut TracePoint = bpf
                    .program_mut(&program)
                    .with_context(|| format!("Failed to find {} program", program))?
                    .try_into()?;
                p.detach(id)?;
            }
            AyaLink::Xdp { program, id } => {
                let p: &mut Xdp = bpf
                    .program_mut(&program)
                    .with_context(|| format!("Failed to find {} program", program))?
                    .try_into()?;
                p.detach(id)?;
            }
        }
        Ok(())
    }
}

impl Unload for LoadedImage {
    fn unload(&mut self) {
        if self.bpf.take().is_some() {
            info!("Program image unloaded");
        }
    }
}
