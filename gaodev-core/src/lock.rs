//! Advisory instance lock (§4.10, §5, Open Question 4).
//!
//! `.gao-dev/lock` records the owning pid and hostname. On acquisition, a
//! stale lock (owning process no longer alive) is reclaimed; a live one
//! refuses startup with `GaoError::InstanceLocked`.

use crate::error::{GaoError, GaoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    host: String,
    acquired_at: chrono::DateTime<chrono::Utc>,
}

/// RAII guard: the lock file is removed when dropped.
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    /// Acquire the lock at `<project_root>/.gao-dev/lock`.
    pub fn acquire(project_root: &Path) -> GaoResult<Self> {
        let dir = project_root.join(".gao-dev");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("lock");

        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if let Ok(existing) = serde_json::from_str::<LockRecord>(&raw) {
                if pid_alive(existing.pid) {
                    return Err(GaoError::InstanceLocked {
                        pid: existing.pid,
                        host: existing.host,
                    });
                }
                tracing::warn!(
                    stale_pid = existing.pid,
                    host = %existing.host,
                    "reclaiming stale instance lock"
                );
            }
        }

        let record = LockRecord {
            pid: std::process::id(),
            host: hostname(),
            acquired_at: chrono::Utc::now(),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.do_release();
    }
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(pid: u32) -> bool {
    // Signal 0: probe without actually sending a signal.
    unsafe { libc_kill_probe(pid) }
}

#[cfg(not(target_os = "linux"))]
unsafe fn libc_kill_probe(_pid: u32) -> bool {
    // Conservative fallback on non-Linux targets: assume alive so we never
    // silently steal a live lock; the stale case is rare enough here that
    // erring towards InstanceLocked is safer than erring towards reclaim.
    true
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}
