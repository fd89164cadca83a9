//! File-backed host-key trust store
//!
//! Entries are one `host algorithm base64-key` line each. On first
//! contact with a host the key is recorded and trusted; a key that
//! differs from the recorded one is surfaced as [`TrustDecision::Changed`]
//! and the caller decides whether that is fatal.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use pl_core::error::TrustError;
use pl_core::traits::{TrustDecision, TrustStore};

/// Trust store over a flat known-hosts file
#[derive(Debug)]
pub struct KnownHostsStore {
    path: PathBuf,
    // Serializes appends from concurrent dials.
    write_lock: Mutex<()>,
}

impl KnownHostsStore {
    /// Create a store backed by the given file (created lazily)
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn entries_for(&self, host: &str) -> Result<Vec<String>, TrustError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TrustError::Io(e)),
        };

        let mut keys = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((entry_host, key)) = line.split_once(' ') else {
                tracing::warn!(
                    "Skipping malformed trust entry at {}:{}",
                    self.path.display(),
                    index + 1
                );
                continue;
            };
            if entry_host == host {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}

impl TrustStore for KnownHostsStore {
    fn verify(&self, host: &str, key: &str) -> Result<TrustDecision, TrustError> {
        let recorded = self.entries_for(host)?;
        if recorded.is_empty() {
            return Ok(TrustDecision::Unknown);
        }
        if recorded.iter().any(|k| k == key) {
            return Ok(TrustDecision::Known);
        }
        Ok(TrustDecision::Changed {
            expected: recorded[0].clone(),
        })
    }

    fn record(&self, host: &str, key: &str) -> Result<(), TrustError> {
        let _guard = self.write_lock.lock().unwrap();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(TrustError::Io)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(TrustError::Io)?;
        writeln!(file, "{} {}", host, key).map_err(TrustError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY_A: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFirst";
    const KEY_B: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAISecond";

    fn store_in(dir: &TempDir) -> KnownHostsStore {
        KnownHostsStore::new(dir.path().join("known_hosts"))
    }

    #[test]
    fn test_unknown_then_known_after_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.verify("alice", KEY_A).unwrap(), TrustDecision::Unknown);
        store.record("alice", KEY_A).unwrap();
        assert_eq!(store.verify("alice", KEY_A).unwrap(), TrustDecision::Known);
    }

    #[test]
    fn test_changed_key_reports_recorded_value() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.record("alice", KEY_A).unwrap();
        match store.verify("alice", KEY_B).unwrap() {
            TrustDecision::Changed { expected } => assert_eq!(expected, KEY_A),
            other => panic!("Expected Changed, got {:?}", other),
        }
    }

    #[test]
    fn test_hosts_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.record("alice", KEY_A).unwrap();
        assert_eq!(store.verify("bob", KEY_B).unwrap(), TrustDecision::Unknown);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, "garbage-without-space\nalice ssh-ed25519 AAAA\n").unwrap();

        let store = KnownHostsStore::new(path);
        assert_eq!(
            store.verify("alice", "ssh-ed25519 AAAA").unwrap(),
            TrustDecision::Known
        );
    }
}
