//! Canonical sample types and normalization of raw probe readings.
//!
//! The probe produces a [`HostReading`] with raw numbers. [`HostReading::normalize`]
//! validates it and turns it into the wire-facing [`CpuSample`] and
//! [`MemorySample`] values that the snapshot endpoints and streams serve.

use serde::{Deserialize, Serialize};

use crate::fmt::format_bytes;

// ============================================================
// Raw readings
// ============================================================

/// One CPU (or the all-core aggregate) as read from the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuReading {
    /// Busy percentage over the last sampling period.
    pub usage: f32,
    /// Current clock rate in MHz.
    pub frequency_mhz: u64,
    pub vendor_id: String,
    pub brand: String,
}

/// Memory and swap usage in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

/// Everything the probe returns for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostReading {
    pub cpu: CpuReading,
    pub cores: Vec<CpuReading>,
    pub memory: MemoryUsage,
}

/// Why a reading was rejected by [`HostReading::normalize`].
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidReading {
    /// CPU usage was NaN or infinite.
    NonFiniteUsage { core: Option<usize> },
    /// Memory total was zero, which only happens when meminfo was unreadable.
    NoMemoryTotal,
    /// Used exceeds total for memory or swap.
    UsedExceedsTotal(&'static str),
}

impl std::fmt::Display for InvalidReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReading::NonFiniteUsage { core: None } => {
                write!(f, "aggregate cpu usage is not finite")
            }
            InvalidReading::NonFiniteUsage { core: Some(i) } => {
                write!(f, "cpu usage of core {} is not finite", i)
            }
            InvalidReading::NoMemoryTotal => write!(f, "memory total is zero"),
            InvalidReading::UsedExceedsTotal(what) => write!(f, "used {} exceeds total", what),
        }
    }
}

impl std::error::Error for InvalidReading {}

// ============================================================
// Samples
// ============================================================

/// CPU sample served by `/api/cpus` and streamed on `/realtime/cpus`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct CpuSample {
    /// Busy percentage in `[0, 100]`.
    pub cpu_usage: f32,
    /// Current clock rate in MHz.
    pub frequency: u64,
    pub vendor_id: String,
    /// Model name.
    pub brand: String,
}

/// Memory sample served by `/api/memory` and streamed on `/realtime/memory`.
///
/// All fields are display-ready sizes such as `"7.8 GiB"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct MemorySample {
    pub total_memory: String,
    pub used_memory: String,
    pub total_swap: String,
    pub used_swap: String,
}

impl MemorySample {
    /// Served before the first successful tick.
    pub fn placeholder() -> Self {
        MemoryUsage::default().into()
    }
}

impl From<MemoryUsage> for MemorySample {
    fn from(m: MemoryUsage) -> Self {
        Self {
            total_memory: format_bytes(m.total),
            used_memory: format_bytes(m.used),
            total_swap: format_bytes(m.swap_total),
            used_swap: format_bytes(m.swap_used),
        }
    }
}

impl From<&CpuReading> for CpuSample {
    fn from(c: &CpuReading) -> Self {
        Self {
            cpu_usage: c.usage.clamp(0.0, 100.0),
            frequency: c.frequency_mhz,
            vendor_id: c.vendor_id.clone(),
            brand: c.brand.clone(),
        }
    }
}

/// Output of a successful normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSample {
    pub cpu: CpuSample,
    pub cores: Vec<CpuSample>,
    pub memory: MemorySample,
}

impl HostReading {
    /// Validates the reading and converts it into canonical samples.
    ///
    /// Usage values are clamped into `[0, 100]`; counter wrap-around on some
    /// virtualized hosts can push the raw ratio slightly outside that range.
    pub fn normalize(&self) -> Result<NormalizedSample, InvalidReading> {
        if !self.cpu.usage.is_finite() {
            return Err(InvalidReading::NonFiniteUsage { core: None });
        }
        if let Some(i) = self.cores.iter().position(|c| !c.usage.is_finite()) {
            return Err(InvalidReading::NonFiniteUsage { core: Some(i) });
        }
        if self.memory.total == 0 {
            return Err(InvalidReading::NoMemoryTotal);
        }
        if self.memory.used > self.memory.total {
            return Err(InvalidReading::UsedExceedsTotal("memory"));
        }
        if self.memory.swap_used > self.memory.swap_total {
            return Err(InvalidReading::UsedExceedsTotal("swap"));
        }

        Ok(NormalizedSample {
            cpu: CpuSample::from(&self.cpu),
            cores: self.cores.iter().map(CpuSample::from).collect(),
            memory: self.memory.into(),
        })
    }
}
