//! Host probe for Linux.
//!
//! The probe reads CPU and memory statistics from the `/proc` filesystem and
//! returns them as a raw [`HostReading`](crate::model::HostReading). File access
//! goes through the [`FileSystem`] trait so tests can run against [`MockFs`].
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │             ProcfsProbe              │
//! │  - /proc/stat     (jiffies, deltas)  │
//! │  - /proc/cpuinfo  (MHz, vendor)      │
//! │  - /proc/meminfo  (memory, swap)     │
//! └──────────────────┬───────────────────┘
//!                    │
//!             ┌──────▼──────┐
//!             │  FileSystem │ (trait)
//!             └──────┬──────┘
//!          ┌─────────┴─────────┐
//!   ┌──────▼──────┐     ┌──────▼──────┐
//!   │   RealFs    │     │   MockFs    │
//!   └─────────────┘     └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use hostmon_core::collector::{HostProbe, MockFs, ProcfsProbe};
//!
//! let fs = MockFs::typical_system();
//! let mut probe = ProcfsProbe::new(fs, "/proc");
//! let reading = probe.sample().unwrap();
//! assert_eq!(reading.cores.len(), 4);
//! ```

pub mod mock;
pub mod probe;
pub mod procfs;
pub mod traits;

pub use mock::MockFs;
pub use probe::{HostProbe, ProbeError, ProcfsProbe};
pub use traits::{FileSystem, RealFs};
