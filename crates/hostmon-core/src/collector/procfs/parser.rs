//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of `/proc` files into
//! structured data, testable with plain string inputs.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parsed data from `/proc/meminfo`, in kB.
#[derive(Debug, Clone, Default)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    /// `None` on kernels older than 3.14, which lack the line.
    pub mem_available: Option<u64>,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

/// Parses `/proc/meminfo` content.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();
    let mut saw_total = false;

    let parse_kb = |line: &str| -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            info.mem_total = parse_kb(line);
            saw_total = true;
        } else if line.starts_with("MemFree:") {
            info.mem_free = parse_kb(line);
        } else if line.starts_with("MemAvailable:") {
            info.mem_available = Some(parse_kb(line));
        } else if line.starts_with("Buffers:") {
            info.buffers = parse_kb(line);
        } else if line.starts_with("Cached:") {
            info.cached = parse_kb(line);
        } else if line.starts_with("SwapTotal:") {
            info.swap_total = parse_kb(line);
        } else if line.starts_with("SwapFree:") {
            info.swap_free = parse_kb(line);
        }
    }

    if !saw_total {
        return Err(ParseError::new("meminfo has no MemTotal line"));
    }
    Ok(info)
}

/// Single CPU line from `/proc/stat`, in jiffies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuStat {
    pub cpu_id: Option<u32>, // None for aggregate "cpu" line
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    /// Time spent waiting: idle plus iowait.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    /// All accounted time. Guest time is already folded into `user`/`nice`.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

/// Parses the `cpu` lines of `/proc/stat`.
///
/// The aggregate line comes first (`cpu_id == None`), followed by one entry
/// per online core in file order.
pub fn parse_stat(content: &str) -> Result<Vec<CpuStat>, ParseError> {
    let mut cpus = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(label) = parts.first() else {
            continue;
        };
        if !label.starts_with("cpu") {
            continue;
        }

        let cpu_id = if *label == "cpu" {
            None
        } else {
            let id = label
                .strip_prefix("cpu")
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ParseError::new(format!("bad cpu label: {label}")))?;
            Some(id)
        };

        if parts.len() < 5 {
            return Err(ParseError::new(format!(
                "{label}: expected at least 4 counters, got {}",
                parts.len() - 1
            )));
        }

        let get_val =
            |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        cpus.push(CpuStat {
            cpu_id,
            user: get_val(1),
            nice: get_val(2),
            system: get_val(3),
            idle: get_val(4),
            iowait: get_val(5),
            irq: get_val(6),
            softirq: get_val(7),
            steal: get_val(8),
        });
    }

    Ok(cpus)
}

/// One `processor` block from `/proc/cpuinfo`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuInfoEntry {
    pub processor: u32,
    pub vendor_id: String,
    pub model_name: String,
    /// Current clock rate. Absent on platforms that do not report it (most ARM).
    pub mhz: Option<f64>,
}

/// Parses `/proc/cpuinfo` into one entry per `processor` block.
///
/// Keys that differ between architectures are mapped onto the same fields:
/// ARM reports `CPU implementer` instead of `vendor_id` and, on some boards,
/// `Hardware` or `Processor` instead of `model name`.
pub fn parse_cpuinfo(content: &str) -> Result<Vec<CpuInfoEntry>, ParseError> {
    let mut entries: Vec<CpuInfoEntry> = Vec::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key == "processor" {
            let processor = value
                .parse()
                .map_err(|_| ParseError::new(format!("bad processor id: {value}")))?;
            entries.push(CpuInfoEntry {
                processor,
                ..Default::default()
            });
            continue;
        }

        let Some(entry) = entries.last_mut() else {
            continue;
        };
        match key {
            "vendor_id" | "CPU implementer" if entry.vendor_id.is_empty() => {
                entry.vendor_id = value.to_string();
            }
            "model name" | "Processor" | "Hardware" if entry.model_name.is_empty() => {
                entry.model_name = value.to_string();
            }
            "cpu MHz" => {
                entry.mhz = value.parse().ok();
            }
            _ => {}
        }
    }

    Ok(entries)
}
