//! Fixed mapping of guest-visible paths to host read-only files.
//!
//! Functions resolve hostnames through their libc, which wants `/etc/hosts`
//! and `/etc/resolv.conf`; those are the only two paths a guest may open,
//! and they map to sandboxed copies configured at startup. The map is built
//! once and read-only thereafter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::SystemConfig;

#[derive(Debug, Clone)]
pub struct PathWhitelist {
    entries: HashMap<String, PathBuf>,
}

impl PathWhitelist {
    /// Empty whitelist; every open is blocked.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The standard entries, pointing at the configured host files.
    pub fn from_config(config: &SystemConfig) -> Self {
        Self::empty()
            .with_entry("/etc/hosts", &config.hosts_file)
            .with_entry("/etc/resolv.conf", &config.resolv_file)
    }

    pub fn with_entry(mut self, guest_path: &str, host_path: impl AsRef<Path>) -> Self {
        self.entries
            .insert(guest_path.to_owned(), host_path.as_ref().to_owned());
        self
    }

    /// Map a guest path to its host counterpart, or `None` if blocked.
    pub fn resolve(&self, guest_path: &str) -> Option<&Path> {
        self.entries.get(guest_path).map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_entries_resolve() {
        let whitelist = PathWhitelist::from_config(&SystemConfig::default());
        assert!(whitelist.resolve("/etc/hosts").is_some());
        assert!(whitelist.resolve("/etc/resolv.conf").is_some());
    }

    #[test]
    fn anything_else_is_blocked() {
        let whitelist = PathWhitelist::from_config(&SystemConfig::default());
        for path in ["/etc/passwd", "/etc/hosts/..", "", "/tmp/x", "etc/hosts"] {
            assert!(whitelist.resolve(path).is_none(), "{path} should be blocked");
        }
    }
}
