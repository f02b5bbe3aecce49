//! Blocklist of sinkholed domains.
//!
//! Loaded from a text file at startup, one domain per line, and immutable
//! afterwards. Matching is an exact membership test against the line as it
//! appeared in the file: no lowercasing, no subdomain walking.

use std::fs;
use std::path::Path;

use rustc_hash::FxHashSet;
use tracing::warn;

/// A set of blocked domains for efficient lookup.
pub struct Blocklist {
    domains: FxHashSet<String>,
}

impl Blocklist {
    /// Create an empty blocklist; every query passes through.
    pub fn empty() -> Self {
        Self {
            domains: FxHashSet::default(),
        }
    }

    /// Load a blocklist from a file.
    ///
    /// A missing or unreadable file is logged and yields an empty list; the
    /// server still starts and simply blocks nothing.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => text
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "unable to read blocklist, starting with an empty one"
                );
                Self::empty()
            }
        }
    }

    /// Exact-match membership test.
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    /// Returns the number of domains in the blocklist.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl FromIterator<String> for Blocklist {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            domains: iter.into_iter().collect(),
        }
    }
}
