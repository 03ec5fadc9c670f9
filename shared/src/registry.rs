//! Discovery registry of running servers.
//!
//! The store is a plain text file with one `<pid> <port>` line per server.
//! Every operation takes an exclusive `flock` on the file for the whole
//! read-modify-write, so independently launched processes can share it.
//! Lines that do not parse are skipped on read and therefore dropped by the
//! next rewrite.

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Environment variable overriding the default store location.
pub const REGISTRY_ENV: &str = "SNAKE_REGISTRY";

const DEFAULT_FILE_NAME: &str = "snake_arena_registry.txt";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to open registry {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("Failed to lock registry {path}: {source}")]
    Lock { path: PathBuf, source: io::Error },
    #[error("Registry IO error: {0}")]
    Io(#[from] io::Error),
}

/// One advertised server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerInfo {
    pub pid: u32,
    pub port: u16,
}

impl ServerInfo {
    pub fn new(pid: u32, port: u16) -> Self {
        Self { pid, port }
    }

    /// Entry for the calling process.
    pub fn current(port: u16) -> Self {
        Self::new(std::process::id(), port)
    }

    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let pid = fields.next()?.parse().ok()?;
        let port = fields.next()?.parse().ok()?;
        Some(Self { pid, port })
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.pid, self.port)
    }
}

/// Probe a process with signal 0.
///
/// `EPERM` means the process exists but belongs to someone else, which
/// still counts as alive. Any other failure counts as dead.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

/// Handle to a registry store on disk. Cheap to clone; holds no open file.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$SNAKE_REGISTRY` if set, otherwise a file in the system temp dir.
    pub fn default_path() -> PathBuf {
        match std::env::var_os(REGISTRY_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => std::env::temp_dir().join(DEFAULT_FILE_NAME),
        }
    }

    pub fn from_env() -> Self {
        Self::new(Self::default_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the entry for `entry.pid`.
    pub fn add(&self, entry: ServerInfo) -> Result<(), RegistryError> {
        self.update(|entries| {
            entries.retain(|e| e.pid != entry.pid);
            entries.push(entry);
        })
    }

    pub fn remove(&self, pid: u32) -> Result<(), RegistryError> {
        self.update(|entries| entries.retain(|e| e.pid != pid))
    }

    /// Live entries, at most `max`. Dead entries are pruned from the store
    /// as a side effect.
    pub fn list(&self, max: usize) -> Result<Vec<ServerInfo>, RegistryError> {
        let mut live = self.update(|entries| {
            prune(entries);
            entries.clone()
        })?;
        live.truncate(max);
        Ok(live)
    }

    /// Drop entries whose process is gone; returns how many were removed.
    pub fn prune_dead(&self) -> Result<usize, RegistryError> {
        let removed = self.update(prune)?;
        if removed > 0 {
            debug!("Pruned {} dead registry entries", removed);
        }
        Ok(removed)
    }

    /// Every parsable entry, without liveness filtering or rewriting.
    pub fn entries(&self) -> Result<Vec<ServerInfo>, RegistryError> {
        let mut store = LockedStore::open(&self.path)?;
        Ok(store.read_all()?)
    }

    fn update<T>(&self, mutate: impl FnOnce(&mut Vec<ServerInfo>) -> T) -> Result<T, RegistryError> {
        let mut store = LockedStore::open(&self.path)?;
        let mut entries = store.read_all()?;
        let result = mutate(&mut entries);
        store.write_all(&entries)?;
        Ok(result)
    }
}

fn prune(entries: &mut Vec<ServerInfo>) -> usize {
    let before = entries.len();
    entries.retain(|e| is_process_alive(e.pid));
    before - entries.len()
}

/// Open store file holding the exclusive lock until dropped.
struct LockedStore {
    file: Flock<File>,
}

impl LockedStore {
    fn open(path: &Path) -> Result<Self, RegistryError> {
        let open_err = |source: io::Error| RegistryError::Open {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(open_err)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(open_err)?;

        loop {
            match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(locked) => return Ok(Self { file: locked }),
                Err((unlocked, Errno::EINTR)) => file = unlocked,
                Err((_, errno)) => {
                    return Err(RegistryError::Lock {
                        path: path.to_path_buf(),
                        source: errno.into(),
                    })
                }
            }
        }
    }

    fn read_all(&mut self) -> io::Result<Vec<ServerInfo>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut raw = Vec::new();
        self.file.read_to_end(&mut raw)?;

        let text = String::from_utf8_lossy(&raw);
        let mut entries = Vec::new();
        for line in text.lines() {
            match ServerInfo::parse(line) {
                Some(entry) => entries.push(entry),
                None if line.trim().is_empty() => {}
                None => warn!("Skipping malformed registry line: {:?}", line),
            }
        }
        Ok(entries)
    }

    fn write_all(&mut self, entries: &[ServerInfo]) -> io::Result<()> {
        let mut text = String::new();
        for entry in entries {
            text.push_str(&format!("{}\n", entry));
        }

        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(text.as_bytes())?;
        self.file.flush()
    }
}
