//! The host probe: one call returns the current CPU and memory readings.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::collector::procfs::parser::{
    CpuInfoEntry, CpuStat, ParseError, parse_cpuinfo, parse_meminfo, parse_stat,
};
use crate::collector::traits::FileSystem;
use crate::model::{CpuReading, HostReading, MemoryUsage};

/// Error type for probe failures.
#[derive(Debug)]
pub enum ProbeError {
    /// I/O error reading a `/proc` file.
    Io(std::io::Error),
    /// Parse error in a `/proc` file.
    Parse(String),
    /// The files were readable but did not contain everything a sample needs.
    Partial(String),
    /// The probe did not return within the allotted time.
    Timeout,
    /// A previous, timed-out probe call is still running.
    Busy,
    /// The probe panicked.
    Panicked(String),
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Io(e) => write!(f, "I/O error: {}", e),
            ProbeError::Parse(msg) => write!(f, "parse error: {}", msg),
            ProbeError::Partial(msg) => write!(f, "partial reading: {}", msg),
            ProbeError::Timeout => write!(f, "probe timed out"),
            ProbeError::Busy => write!(f, "probe busy with a previous call"),
            ProbeError::Panicked(msg) => write!(f, "probe panicked: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<std::io::Error> for ProbeError {
    fn from(e: std::io::Error) -> Self {
        ProbeError::Io(e)
    }
}

impl From<ParseError> for ProbeError {
    fn from(e: ParseError) -> Self {
        ProbeError::Parse(e.message)
    }
}

/// Capability that reads the host's current CPU and memory state.
///
/// Implementations may keep state between calls (CPU usage is a delta of
/// counters), hence `&mut self`. Calls are expected to be short and are made
/// from a blocking thread.
pub trait HostProbe: Send {
    fn sample(&mut self) -> Result<HostReading, ProbeError>;
}

impl<P: HostProbe + ?Sized> HostProbe for Box<P> {
    fn sample(&mut self) -> Result<HostReading, ProbeError> {
        (**self).sample()
    }
}

/// Reads `/proc/stat`, `/proc/cpuinfo` and `/proc/meminfo`.
///
/// CPU usage is computed from the jiffy counters seen on the previous
/// successful call. The first call reports the average since boot.
pub struct ProcfsProbe<F: FileSystem> {
    fs: F,
    proc_path: String,
    /// Last counters and computed usage per cpu line (`None` = aggregate).
    prev: HashMap<Option<u32>, (CpuStat, f32)>,
}

impl<F: FileSystem> ProcfsProbe<F> {
    /// Creates a new probe.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            prev: HashMap::new(),
        }
    }

    fn read(&self, name: &str) -> Result<String, ProbeError> {
        let path = format!("{}/{}", self.proc_path, name);
        Ok(self.fs.read_to_string(Path::new(&path))?)
    }

    fn usage_since_prev(&self, cur: &CpuStat) -> f32 {
        let (total, idle) = match self.prev.get(&cur.cpu_id) {
            Some((prev, last_usage)) if cur.total() >= prev.total() => {
                let total = cur.total() - prev.total();
                if total == 0 {
                    // Sampled twice within one jiffy
                    return *last_usage;
                }
                (total, cur.idle_total().saturating_sub(prev.idle_total()))
            }
            // First sample, CPU hotplug, or counter reset
            _ => (cur.total(), cur.idle_total()),
        };
        if total == 0 {
            return 0.0;
        }
        let busy = total.saturating_sub(idle);
        (busy as f64 * 100.0 / total as f64) as f32
    }

    fn collect_memory(&self) -> Result<MemoryUsage, ProbeError> {
        let info = parse_meminfo(&self.read("meminfo")?)?;
        if info.mem_total == 0 {
            return Err(ProbeError::Partial("MemTotal is zero".into()));
        }

        let available = info
            .mem_available
            .unwrap_or(info.mem_free + info.buffers + info.cached);

        Ok(MemoryUsage {
            total: info.mem_total * 1024,
            used: info.mem_total.saturating_sub(available) * 1024,
            swap_total: info.swap_total * 1024,
            swap_used: info.swap_total.saturating_sub(info.swap_free) * 1024,
        })
    }

    fn collect_cpuinfo(&self) -> Result<Vec<CpuInfoEntry>, ProbeError> {
        let path = format!("{}/cpuinfo", self.proc_path);
        if !self.fs.exists(Path::new(&path)) {
            return Ok(Vec::new());
        }
        Ok(parse_cpuinfo(&self.read("cpuinfo")?)?)
    }
}

impl<F: FileSystem> HostProbe for ProcfsProbe<F> {
    fn sample(&mut self) -> Result<HostReading, ProbeError> {
        let stats = parse_stat(&self.read("stat")?)?;
        let Some(aggregate) = stats.iter().find(|s| s.cpu_id.is_none()) else {
            return Err(ProbeError::Partial("no aggregate cpu line in stat".into()));
        };
        if !stats.iter().any(|s| s.cpu_id.is_some()) {
            return Err(ProbeError::Partial("no per-core lines in stat".into()));
        }

        let memory = self.collect_memory()?;
        let cpuinfo = self.collect_cpuinfo()?;

        let first = cpuinfo.first();
        let vendor_id = first.map(|e| e.vendor_id.clone()).unwrap_or_default();
        let brand = first.map(|e| e.model_name.clone()).unwrap_or_default();

        let mhz: Vec<f64> = cpuinfo.iter().filter_map(|e| e.mhz).collect();
        let mean_mhz = if mhz.is_empty() {
            0
        } else {
            (mhz.iter().sum::<f64>() / mhz.len() as f64).round() as u64
        };

        let cpu = CpuReading {
            usage: self.usage_since_prev(aggregate),
            frequency_mhz: mean_mhz,
            vendor_id: vendor_id.clone(),
            brand: brand.clone(),
        };

        let cores: Vec<CpuReading> = stats
            .iter()
            .filter_map(|s| s.cpu_id.map(|id| (id, s)))
            .map(|(id, s)| {
                let entry = cpuinfo.iter().find(|e| e.processor == id);
                CpuReading {
                    usage: self.usage_since_prev(s),
                    frequency_mhz: entry
                        .and_then(|e| e.mhz)
                        .map(|m| m.round() as u64)
                        .unwrap_or(mean_mhz),
                    vendor_id: entry
                        .map(|e| e.vendor_id.clone())
                        .unwrap_or_else(|| vendor_id.clone()),
                    brand: entry
                        .map(|e| e.model_name.clone())
                        .unwrap_or_else(|| brand.clone()),
                }
            })
            .collect();

        debug!(
            cores = cores.len(),
            usage = cpu.usage,
            mem_used = memory.used,
            "procfs sample"
        );

        let mut prev = HashMap::with_capacity(stats.len());
        prev.insert(None, (aggregate.clone(), cpu.usage));
        for (s, c) in stats.iter().filter(|s| s.cpu_id.is_some()).zip(&cores) {
            prev.insert(s.cpu_id, (s.clone(), c.usage));
        }
        self.prev = prev;

        Ok(HostReading { cpu, cores, memory })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    const ADVANCED_STAT: &str = "\
cpu  10600 500 3200 81200 1000 200 100 0 0 0
cpu0 2650 125 800 20300 250 50 25 0 0 0
cpu1 2650 125 800 20300 250 50 25 0 0 0
cpu2 2650 125 800 20300 250 50 25 0 0 0
cpu3 2650 125 800 20300 250 50 25 0 0 0
";

    #[test]
    fn test_first_sample_reports_since_boot_average() {
        let mut probe = ProcfsProbe::new(MockFs::typical_system(), "/proc");
        let reading = probe.sample().unwrap();

        // busy 13800 of 94800 jiffies
        assert!((reading.cpu.usage - 14.5569).abs() < 0.01);
        assert_eq!(reading.cpu.frequency_mhz, 2100);
        assert_eq!(reading.cpu.vendor_id, "GenuineIntel");
        assert_eq!(
            reading.cpu.brand,
            "Intel(R) Core(TM) i7-8550U CPU @ 1.80GHz"
        );
        assert_eq!(reading.cores.len(), 4);
        assert_eq!(reading.cores[0].frequency_mhz, 1800);
        assert_eq!(reading.cores[3].frequency_mhz, 2400);
    }

    #[test]
    fn test_second_sample_uses_deltas() {
        let fs = MockFs::typical_system();
        let mut probe = ProcfsProbe::new(fs.clone(), "/proc");
        probe.sample().unwrap();

        fs.add_file("/proc/stat", ADVANCED_STAT);
        let reading = probe.sample().unwrap();

        // 800 busy of 2000 jiffies
        assert!((reading.cpu.usage - 40.0).abs() < 0.01);
        for core in &reading.cores {
            assert!((core.usage - 40.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_unchanged_counters_repeat_last_usage() {
        let fs = MockFs::typical_system();
        let mut probe = ProcfsProbe::new(fs.clone(), "/proc");
        probe.sample().unwrap();
        fs.add_file("/proc/stat", ADVANCED_STAT);
        probe.sample().unwrap();

        let reading = probe.sample().unwrap();
        assert!((reading.cpu.usage - 40.0).abs() < 0.01);
    }

    #[test]
    fn test_memory_uses_mem_available() {
        let mut probe = ProcfsProbe::new(MockFs::typical_system(), "/proc");
        let memory = probe.sample().unwrap().memory;

        assert_eq!(memory.total, 16384000 * 1024);
        assert_eq!(memory.used, (16384000 - 12000000) * 1024);
        assert_eq!(memory.swap_total, 4096000 * 1024);
        assert_eq!(memory.swap_used, 0);
    }

    #[test]
    fn test_memory_without_mem_available() {
        let mut probe = ProcfsProbe::new(MockFs::memory_pressure(), "/proc");
        let memory = probe.sample().unwrap().memory;

        // total - (free + buffers + cached)
        assert_eq!(memory.used, (16384000 - 576000) * 1024);
        assert_eq!(memory.swap_used, 3072000 * 1024);
    }

    #[test]
    fn test_missing_cpuinfo_is_tolerated() {
        let fs = MockFs::typical_system();
        fs.remove_file("/proc/cpuinfo");
        let mut probe = ProcfsProbe::new(fs, "/proc");
        let reading = probe.sample().unwrap();

        assert_eq!(reading.cpu.frequency_mhz, 0);
        assert!(reading.cpu.vendor_id.is_empty());
        assert_eq!(reading.cores.len(), 4);
    }

    #[test]
    fn test_missing_stat_is_io_error() {
        let fs = MockFs::typical_system();
        fs.remove_file("/proc/stat");
        let mut probe = ProcfsProbe::new(fs, "/proc");
        assert!(matches!(probe.sample(), Err(ProbeError::Io(_))));
    }

    #[test]
    fn test_stat_without_cores_is_partial() {
        let fs = MockFs::typical_system();
        fs.add_file("/proc/stat", "cpu  10000 500 3000 80000 1000 200 100 0\n");
        let mut probe = ProcfsProbe::new(fs, "/proc");
        assert!(matches!(probe.sample(), Err(ProbeError::Partial(_))));
    }

    #[test]
    fn test_failed_sample_keeps_previous_counters() {
        let fs = MockFs::typical_system();
        let mut probe = ProcfsProbe::new(fs.clone(), "/proc");
        probe.sample().unwrap();

        fs.remove_file("/proc/meminfo");
        assert!(probe.sample().is_err());

        fs.add_file(
            "/proc/meminfo",
            "MemTotal: 16384000 kB\nMemAvailable: 12000000 kB\n",
        );
        fs.add_file("/proc/stat", ADVANCED_STAT);
        let reading = probe.sample().unwrap();
        assert!((reading.cpu.usage - 40.0).abs() < 0.01);
    }

    #[test]
    fn test_boxed_probe() {
        let mut probe: Box<dyn HostProbe> =
            Box::new(ProcfsProbe::new(MockFs::typical_system(), "/proc"));
        assert!(probe.sample().is_ok());
    }
}
