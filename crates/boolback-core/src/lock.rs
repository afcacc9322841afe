//! Run-lock liveness classification.
//!
//! The pipeline writes `running.lock` (`{"hostname", "pid", "started"}`) into an
//! experiment directory while a run is executing. The state is recomputed from
//! the file bytes and the process table on every read.

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Host facts a lock inspection depends on.
pub trait HostProbe {
    fn hostname(&self) -> String;
    fn is_alive(&self, pid: u32) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl HostProbe for LocalHost {
    fn hostname(&self) -> String {
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn is_alive(&self, pid: u32) -> bool {
        Path::new("/proc").join(pid.to_string()).exists()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    None,
    Active,
    Blocked,
    Stale,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::None => "none",
            LockState::Active => "active",
            LockState::Blocked => "blocked",
            LockState::Stale => "stale",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockInfo {
    pub path: PathBuf,
    pub exists: bool,
    #[serde(rename = "status")]
    pub state: LockState,
    pub reason: String,
    pub hostname: Option<String>,
    pub pid: Option<u32>,
    pub started: Option<f64>,
    pub raw: Option<Value>,
}

impl LockInfo {
    fn new(path: &Path, exists: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            exists,
            state: LockState::None,
            reason: String::new(),
            hostname: None,
            pid: None,
            started: None,
            raw: None,
        }
    }

    fn with(mut self, state: LockState, reason: impl Into<String>) -> Self {
        self.state = state;
        self.reason = reason.into();
        self
    }
}

fn parse_pid(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn inspect_running_lock(lock_path: &Path, host: &dyn HostProbe) -> LockInfo {
    let bytes = match fs::read(lock_path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return LockInfo::new(lock_path, false);
        }
        Err(e) => {
            return LockInfo::new(lock_path, true)
                .with(LockState::Blocked, format!("Lock file unreadable: {}", e));
        }
    };
    let info = LockInfo::new(lock_path, true);
    if bytes.is_empty() {
        return info.with(LockState::Blocked, "Empty lock file");
    }
    let raw: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(_) => return info.with(LockState::Blocked, "Lock file is not valid JSON"),
    };
    let obj = match raw.as_object() {
        Some(obj) => obj.clone(),
        None => return info.with(LockState::Blocked, "Lock JSON must be an object"),
    };
    let mut info = info;
    info.raw = Some(raw);

    let hostname = match obj.get("hostname").and_then(Value::as_str) {
        Some(h) if !h.trim().is_empty() => h.to_string(),
        _ => return info.with(LockState::Blocked, "Lock missing hostname"),
    };
    info.hostname = Some(hostname.clone());

    let pid = match obj.get("pid").and_then(parse_pid) {
        Some(pid) => pid,
        None => return info.with(LockState::Blocked, "Lock has invalid pid"),
    };
    if pid <= 0 {
        return info.with(LockState::Blocked, "Lock has non-positive pid");
    }
    let pid = match u32::try_from(pid) {
        Ok(pid) => pid,
        Err(_) => return info.with(LockState::Blocked, "Lock has invalid pid"),
    };
    info.pid = Some(pid);
    info.started = obj.get("started").and_then(Value::as_f64);

    if hostname != host.hostname() {
        let reason = format!("Lock from another host ({})", hostname);
        return info.with(LockState::Active, reason);
    }
    if host.is_alive(pid) {
        return info.with(LockState::Active, "Lock PID is active");
    }
    tracing::debug!(path = %lock_path.display(), pid, "stale run lock");
    info.with(LockState::Stale, "Lock PID is not running on this host")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::artifacts::{atomic_write_bytes, scratch_dir};

    pub(crate) struct FakeHost {
        pub name: &'static str,
        pub live: Vec<u32>,
    }

    impl HostProbe for FakeHost {
        fn hostname(&self) -> String {
            self.name.to_string()
        }

        fn is_alive(&self, pid: u32) -> bool {
            self.live.contains(&pid)
        }
    }

    fn classify(contents: Option<&[u8]>, host: &FakeHost) -> LockInfo {
        let root = scratch_dir("lock");
        let path = root.join("running.lock");
        if let Some(bytes) = contents {
            atomic_write_bytes(&path, bytes).expect("write lock");
        }
        let info = inspect_running_lock(&path, host);
        let _ = fs::remove_dir_all(root);
        info
    }

    #[test]
    fn lock_states_follow_host_and_process_table() {
        let host = FakeHost {
            name: "node-a",
            live: vec![4242],
        };
        let missing = classify(None, &host);
        assert_eq!(missing.state, LockState::None);
        assert!(!missing.exists);

        let stale = classify(Some(br#"{"hostname":"node-a","pid":999,"started":17.5}"#), &host);
        assert_eq!(stale.state, LockState::Stale);
        assert_eq!(stale.pid, Some(999));
        assert_eq!(stale.started, Some(17.5));

        let foreign = classify(Some(br#"{"hostname":"node-b","pid":999}"#), &host);
        assert_eq!(foreign.state, LockState::Active);
        assert!(foreign.reason.contains("node-b"));

        let live = classify(Some(br#"{"hostname":"node-a","pid":"4242"}"#), &host);
        assert_eq!(live.state, LockState::Active);
        assert_eq!(live.reason, "Lock PID is active");
    }

    #[test]
    fn malformed_locks_are_blocked() {
        let host = FakeHost {
            name: "node-a",
            live: vec![],
        };
        let cases: Vec<(&[u8], &str)> = vec![
            (b"", "Empty lock file"),
            (b"not json", "Lock file is not valid JSON"),
            (b"[1,2]", "Lock JSON must be an object"),
            (br#"{"pid":12}"#, "Lock missing hostname"),
            (br#"{"hostname":"node-a","pid":"abc"}"#, "Lock has invalid pid"),
            (br#"{"hostname":"node-a"}"#, "Lock has invalid pid"),
            (br#"{"hostname":"node-a","pid":0}"#, "Lock has non-positive pid"),
        ];
        for (bytes, reason) in cases {
            let info = classify(Some(bytes), &host);
            assert_eq!(info.state, LockState::Blocked, "bytes: {:?}", bytes);
            assert_eq!(info.reason, reason);
            assert!(info.exists);
        }
    }
}
