//! Filesystem access abstraction for the probe.
//!
//! The probe reads `/proc` through [`FileSystem`] so that the same code runs
//! against the real filesystem on Linux and against [`MockFs`](super::MockFs)
//! in tests and on other platforms.

use std::io;
use std::path::Path;

/// Abstraction for the read-only filesystem operations the probe needs.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
