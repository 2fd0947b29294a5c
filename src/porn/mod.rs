//! Porn domain classification.
//!
//! Two cooperating detectors: a pattern heuristic compiled into the
//! binary and an optional FST list shipped as a data file. The heuristic
//! runs first; it answers for roughly half of the list's domains without
//! touching the FST. The list catches the long tail:
//! `is_porn(d) = heuristic(d) OR list_contains_suffix(d)`.
//!
//! The same heuristic runs at build time to shed known-positive domains
//! before they are stored in the FST.

mod heuristic;
mod list;

pub use heuristic::is_porn_heuristic;
pub use list::{build_porn_list, PornList};

use std::path::Path;

use crate::Result;

/// Combined classifier.
#[derive(Default)]
pub struct PornChecker {
    list: Option<PornList>,
}

impl PornChecker {
    /// Heuristic-only detection; no data file.
    pub fn heuristic_only() -> Self {
        Self::default()
    }

    pub fn with_list(list: PornList) -> Self {
        Self { list: Some(list) }
    }

    /// Load the FST list from a `.fst` / `.fst.gz` file.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::with_list(PornList::open(path)?))
    }

    pub fn is_porn(&self, domain: &str) -> bool {
        if is_porn_heuristic(domain) {
            return true;
        }
        self.list
            .as_ref()
            .is_some_and(|list| list.contains(domain))
    }

    pub fn has_list(&self) -> bool {
        self.list.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_only_checker() {
        let checker = PornChecker::heuristic_only();
        assert!(checker.is_porn("pornhub.com"));
        assert!(!checker.is_porn("obscure-site.example"));
        assert!(!checker.has_list());
    }

    #[test]
    fn list_catches_what_heuristic_misses() {
        let data = build_porn_list(["obscure-site.example"]).unwrap();
        let checker = PornChecker::with_list(PornList::from_bytes(&data).unwrap());

        assert!(checker.is_porn("pornhub.com")); // heuristic
        assert!(checker.is_porn("obscure-site.example")); // list
        assert!(checker.is_porn("cdn.obscure-site.example")); // list suffix
        assert!(!checker.is_porn("github.com"));
    }
}
