//! Optimistic lock token generation.
//!
//! Tokens look like `<host>-<pid>-<start_ms>-<instance>-<n>`. Host, pid, and
//! start time separate processes; the instance tag separates generators
//! created in the same process and millisecond; `n` increases monotonically
//! per generator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Produces lock tokens that are unique across hosts, processes, and time.
///
/// Each store owns one generator; there is no process-global state.
#[derive(Debug)]
pub struct LockGenerator {
    prefix: String,
    next: AtomicU64,
}

impl LockGenerator {
    /// Generator prefixed with this host, process, and the current time.
    pub fn new() -> Self {
        let start_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let instance = Uuid::new_v4().simple().to_string();
        let prefix = format!(
            "{}-{}-{}-{}",
            host_name(),
            std::process::id(),
            start_ms,
            &instance[..8]
        );
        Self::with_prefix(prefix)
    }

    /// Generator with an explicit prefix (tests, or externally assigned ids).
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// A lock token never returned before by this generator.
    pub fn next_lock(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", self.prefix)
    }
}

impl Default for LockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn host_name() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        log::warn!(
            "error determining host name: {}",
            std::io::Error::last_os_error()
        );
        return "unknown".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).into_owned();
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}

#[cfg(not(unix))]
fn host_name() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string())
}
