//! In-memory mock filesystem for testing the probe without a real `/proc`.
//!
//! `MockFs` keeps files in a shared map so a test can hold one handle, give a
//! clone to the probe, and rewrite `/proc/stat` between samples to simulate
//! CPU activity or remove files to simulate probe failures.

use crate::collector::traits::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Tree {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Every ancestor directory of an added file.
    directories: HashSet<PathBuf>,
}

/// In-memory filesystem for testing.
///
/// Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    tree: Arc<RwLock<Tree>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());

        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                tree.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }

        tree.files.insert(path, content.into());
    }

    /// Removes a file. Returns `true` if it existed.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        tree.files.remove(path.as_ref()).is_some()
    }

    /// A four-core Intel host with 16 GB of RAM and untouched swap.
    pub fn typical_system() -> Self {
        let fs = Self::new();
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
Active:          4096000 kB
Inactive:        2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
Dirty:              1024 kB
Writeback:             0 kB
",
        );
        let mut cpuinfo = String::new();
        for (id, mhz) in [1800.0, 2000.0, 2200.0, 2400.0].into_iter().enumerate() {
            cpuinfo.push_str(&format!(
                "\
processor\t: {id}
vendor_id\t: GenuineIntel
cpu family\t: 6
model\t\t: 142
model name\t: Intel(R) Core(TM) i7-8550U CPU @ 1.80GHz
cpu MHz\t\t: {mhz:.3}
cache size\t: 8192 KB

"
            ));
        }
        fs.add_file("/proc/cpuinfo", cpuinfo);
        fs
    }

    /// A host under memory pressure, swapping, with an older kernel that has
    /// no `MemAvailable` line.
    pub fn memory_pressure() -> Self {
        let fs = Self::typical_system();
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:          256000 kB
Buffers:           64000 kB
Cached:           256000 kB
SwapCached:       128000 kB
SwapTotal:       4096000 kB
SwapFree:        1024000 kB
",
        );
        fs
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        tree.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        tree.files.contains_key(path) || tree.directories.contains(path)
    }
}
