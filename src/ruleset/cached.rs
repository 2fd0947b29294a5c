//! Lock-free current-ruleset handle with hot reload.

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::{Result, Ruleset, Target};

/// Holds at most one current [`Ruleset`] behind an atomic pointer.
///
/// Reads are wait-free: [`CachedRuleset::current`] is a single atomic
/// load. [`CachedRuleset::load`] builds and validates the replacement
/// before swapping, so a failed load never disturbs the ruleset in
/// service. A query that grabbed its handle before a swap keeps reading
/// the old map safely; the `Arc` it holds keeps the mapping alive until
/// the last in-flight reader drops it, at which point the map and file
/// handle are released.
#[derive(Default)]
pub struct CachedRuleset {
    current: ArcSwapOption<Ruleset>,
    generation: AtomicU64,
}

impl CachedRuleset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load or hot-reload from a `.k2r` / `.k2r.gz` file.
    /// The generation counter increments only on success.
    pub fn load(&self, path: &Path) -> Result<()> {
        let ruleset = Ruleset::open(path)?;
        self.install(ruleset);
        log::info!(
            "loaded ruleset from {} (generation {})",
            path.display(),
            self.generation()
        );
        Ok(())
    }

    /// Load or hot-reload from raw bytes.
    pub fn load_bytes(&self, data: Vec<u8>) -> Result<()> {
        let ruleset = Ruleset::from_bytes(data)?;
        self.install(ruleset);
        Ok(())
    }

    fn install(&self, ruleset: Ruleset) {
        self.current.store(Some(Arc::new(ruleset)));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// The current ruleset, or `None` before the first successful load.
    pub fn current(&self) -> Option<Arc<Ruleset>> {
        self.current.load_full()
    }

    /// Monotonic reload counter; 0 means uninitialized.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.generation() > 0
    }

    /// Embedded fallback of the current ruleset.
    pub fn fallback(&self) -> Option<Target> {
        self.current().map(|rs| rs.fallback())
    }

    pub fn match_domain(&self, domain: &str) -> Option<Target> {
        self.current()?.match_domain(domain)
    }

    pub fn match_ip(&self, ip: IpAddr) -> Option<Target> {
        self.current()?.match_ip(ip)
    }

    pub fn match_geoip(&self, country: &str) -> Option<Target> {
        self.current()?.match_geoip(country)
    }
}
