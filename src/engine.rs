//! The routing engine and its process-global facade.
//!
//! [`Engine::matches`] is the single decision point. Priority, highest
//! first:
//!
//! 1. private/LAN IPs: `DIRECT`, unconditionally
//! 2. temporary overrides keyed by the exact input string
//! 3. global mode: the configured global target
//! 4. the ruleset: CIDR then GeoIP slices for IPs, FST slices for
//!    domains, then the ruleset's embedded fallback
//! 5. no ruleset loaded: the configured global target, `DIRECT` when
//!    none was configured
//!
//! Anything that parses as an IPv4/IPv6 literal is an IP; everything
//! else is a domain. Every input resolves to a target; `matches` never
//! fails.

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::config::Config;
use crate::geoip::{GeoIpResolver, MaxMindResolver};
use crate::porn::{is_porn_heuristic, PornChecker};
use crate::remote::{GeoIpManager, PornListManager, RuleManager};
use crate::ruleset::{CachedRuleset, Ruleset};
use crate::{lan, Result, Target};

enum RulesBackend {
    /// File-loaded (or programmatically loaded) ruleset, no background task.
    Local(CachedRuleset),
    /// URL-managed ruleset with periodic refresh.
    Remote(Arc<RuleManager>),
}

enum GeoBackend {
    Local(Arc<MaxMindResolver>),
    Remote(Arc<GeoIpManager>),
    Custom(Arc<dyn GeoIpResolver>),
}

enum PornBackend {
    Local(PornChecker),
    Remote(Arc<PornListManager>),
}

/// One routing policy: configuration, overrides and data sources.
///
/// All query methods take `&self` and are safe to call from any number of
/// threads; mutation (overrides, global mode, hot reload) never blocks
/// in-flight queries.
pub struct Engine {
    is_global: AtomicBool,
    /// Target served in global mode. Defaults to `PROXY`.
    global_target: AtomicU8,
    /// Target served while no ruleset is loaded. `DIRECT` unless the
    /// config carried an explicit global target.
    unloaded_target: AtomicU8,
    tmp_rules: RwLock<AHashMap<String, Target>>,
    rules: RulesBackend,
    geoip: Option<GeoBackend>,
    porn: Option<PornBackend>,
}

impl Engine {
    /// Build an engine from a configuration.
    ///
    /// Local files load eagerly and their errors propagate. URL-backed
    /// artifacts that fail to initialize (no cache, download failed) are
    /// logged and left to the periodic refresh; the engine stays usable
    /// and serves the global target until rules arrive.
    pub fn new(config: Config) -> Result<Engine> {
        config.validate()?;
        let cache_dir = config.resolved_cache_dir();

        let rules = if let Some(path) = &config.rule_file {
            let cached = CachedRuleset::new();
            cached.load(path)?;
            RulesBackend::Local(cached)
        } else if let Some(url) = &config.rule_url {
            let manager = Arc::new(RuleManager::new(url, &cache_dir, Target::Direct));
            if let Err(e) = manager.init() {
                log::warn!("ruleset init failed, serving global target until refresh: {e}");
            }
            manager.start_periodic();
            RulesBackend::Remote(manager)
        } else {
            RulesBackend::Local(CachedRuleset::new())
        };

        let geoip = if let Some(path) = &config.geoip_file {
            Some(GeoBackend::Local(Arc::new(MaxMindResolver::open(path)?)))
        } else if let Some(url) = &config.geoip_url {
            let manager = Arc::new(GeoIpManager::new(url, &cache_dir));
            if let Err(e) = manager.init() {
                log::warn!("geoip init failed, country lookups disabled until refresh: {e}");
            }
            manager.start_periodic();
            Some(GeoBackend::Remote(manager))
        } else {
            None
        };

        let porn = if let Some(path) = &config.porn_file {
            Some(PornBackend::Local(PornChecker::open(path)?))
        } else if let Some(url) = &config.porn_url {
            let manager = Arc::new(PornListManager::new(url, &cache_dir));
            if let Err(e) = manager.init() {
                log::warn!("porn list init failed, heuristic-only until refresh: {e}");
            }
            manager.start_periodic();
            Some(PornBackend::Remote(manager))
        } else {
            None
        };

        Ok(Engine {
            is_global: AtomicBool::new(config.is_global),
            global_target: AtomicU8::new(config.global_target.unwrap_or(Target::Proxy).as_byte()),
            unloaded_target: AtomicU8::new(
                config.global_target.unwrap_or(Target::Direct).as_byte(),
            ),
            tmp_rules: RwLock::new(AHashMap::new()),
            rules,
            geoip,
            porn,
        })
    }

    /// Decide the routing target for a domain or IP literal. Total: every
    /// input maps to `DIRECT`, `PROXY` or `REJECT`.
    pub fn matches(&self, input: &str) -> Target {
        if let Ok(ip) = input.parse::<IpAddr>() {
            if lan::is_private(ip) {
                return Target::Direct;
            }
            if let Some(target) = self.tmp_rule(input) {
                return target;
            }
            if self.is_global() {
                return self.global_target();
            }
            let Some(ruleset) = self.ruleset() else {
                return self.unloaded_target();
            };
            if let Some(target) = ruleset.match_ip(ip) {
                return target;
            }
            if let Some(code) = self.lookup_country(ip) {
                if let Ok(country) = std::str::from_utf8(&code) {
                    if let Some(target) = ruleset.match_geoip(country) {
                        return target;
                    }
                }
            }
            return ruleset.fallback();
        }

        if let Some(target) = self.tmp_rule(input) {
            return target;
        }
        if self.is_global() {
            return self.global_target();
        }
        match self.ruleset() {
            Some(ruleset) => ruleset
                .match_domain(input)
                .unwrap_or_else(|| ruleset.fallback()),
            None => self.unloaded_target(),
        }
    }

    /// Porn classification: compiled-in heuristic, then the FST list when
    /// one is configured.
    pub fn is_porn(&self, domain: &str) -> bool {
        match &self.porn {
            Some(PornBackend::Local(checker)) => checker.is_porn(domain),
            Some(PornBackend::Remote(manager)) => manager.is_porn(domain),
            None => is_porn_heuristic(domain),
        }
    }

    /// The current ruleset handle, if any is loaded.
    pub fn ruleset(&self) -> Option<Arc<Ruleset>> {
        match &self.rules {
            RulesBackend::Local(cached) => cached.current(),
            RulesBackend::Remote(manager) => manager.ruleset(),
        }
    }

    /// Reload counter of the ruleset source; 0 = nothing loaded yet.
    pub fn generation(&self) -> u64 {
        match &self.rules {
            RulesBackend::Local(cached) => cached.generation(),
            RulesBackend::Remote(manager) => manager.generation(),
        }
    }

    /// Hot-load a ruleset file into a locally-backed engine.
    pub fn load_rule_file(&self, path: &Path) -> Result<()> {
        match &self.rules {
            RulesBackend::Local(cached) => cached.load(path),
            RulesBackend::Remote(_) => Err(crate::Error::Config(
                "engine rules are URL-managed; use update_rules()".into(),
            )),
        }
    }

    /// Trigger an immediate conditional refresh of URL-managed rules.
    /// `Ok(false)` for 304 or a locally-backed engine.
    pub fn update_rules(&self) -> Result<bool> {
        match &self.rules {
            RulesBackend::Local(_) => Ok(false),
            RulesBackend::Remote(manager) => manager.update(),
        }
    }

    /// Install a custom country resolver (tests, embedders with their own
    /// GeoIP stack).
    pub fn set_geoip_resolver(&mut self, resolver: Arc<dyn GeoIpResolver>) {
        self.geoip = Some(GeoBackend::Custom(resolver));
    }

    fn lookup_country(&self, ip: IpAddr) -> Option<[u8; 2]> {
        match self.geoip.as_ref()? {
            GeoBackend::Local(r) => r.lookup_country(ip),
            GeoBackend::Remote(r) => r.lookup_country(ip),
            GeoBackend::Custom(r) => r.lookup_country(ip),
        }
    }

    /// Set an exact-string override. Wins over global mode and the
    /// ruleset; LAN bypass still dominates.
    pub fn set_tmp_rule(&self, input: &str, target: Target) {
        self.tmp_rules.write().insert(input.to_string(), target);
    }

    pub fn clear_tmp_rule(&self, input: &str) {
        self.tmp_rules.write().remove(input);
    }

    pub fn clear_tmp_rules(&self) {
        self.tmp_rules.write().clear();
    }

    fn tmp_rule(&self, input: &str) -> Option<Target> {
        self.tmp_rules.read().get(input).copied()
    }

    /// Switch global mode on or off; effective immediately.
    pub fn toggle_global(&self, enabled: bool) {
        self.is_global.store(enabled, Ordering::Release);
    }

    pub fn is_global(&self) -> bool {
        self.is_global.load(Ordering::Acquire)
    }

    /// Set the target served in global mode (and while no ruleset is
    /// loaded).
    pub fn set_global_target(&self, target: Target) {
        self.global_target.store(target.as_byte(), Ordering::Release);
        self.unloaded_target
            .store(target.as_byte(), Ordering::Release);
    }

    pub fn global_target(&self) -> Target {
        Target::from_byte(self.global_target.load(Ordering::Acquire))
    }

    fn unloaded_target(&self) -> Target {
        Target::from_byte(self.unloaded_target.load(Ordering::Acquire))
    }

    /// Stop all background refresh tasks. Queries keep working against
    /// whatever data is loaded.
    pub fn stop(&self) {
        match &self.rules {
            RulesBackend::Remote(manager) => manager.stop(),
            RulesBackend::Local(_) => {}
        }
        if let Some(GeoBackend::Remote(manager)) = &self.geoip {
            manager.stop();
        }
        if let Some(PornBackend::Remote(manager)) = &self.porn {
            manager.stop();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Process-global facade. A host has exactly one routing policy; these
// free functions mirror the Engine API over a swappable singleton.
// ---------------------------------------------------------------------------

static ENGINE: Lazy<RwLock<Option<Arc<Engine>>>> = Lazy::new(|| RwLock::new(None));

fn current() -> Option<Arc<Engine>> {
    ENGINE.read().clone()
}

/// Initialize the process-global engine from a configuration, replacing
/// (and stopping) any previous one.
pub fn init(config: Config) -> Result<()> {
    install(Engine::new(config)?);
    Ok(())
}

/// Install a pre-built engine as the process-global one.
pub fn install(engine: Engine) {
    let previous = ENGINE.write().replace(Arc::new(engine));
    if let Some(previous) = previous {
        previous.stop();
    }
}

/// Stop and discard the process-global engine.
pub fn shutdown() {
    if let Some(engine) = ENGINE.write().take() {
        engine.stop();
    }
}

pub fn is_initialized() -> bool {
    current().is_some()
}

/// Routing decision through the global engine; `DIRECT` when none is
/// installed.
pub fn match_target(input: &str) -> Target {
    match current() {
        Some(engine) => engine.matches(input),
        None => Target::Direct,
    }
}

/// Porn check through the global engine; heuristic-only when none is
/// installed.
pub fn is_porn(domain: &str) -> bool {
    match current() {
        Some(engine) => engine.is_porn(domain),
        None => is_porn_heuristic(domain),
    }
}

pub fn set_tmp_rule(input: &str, target: Target) {
    if let Some(engine) = current() {
        engine.set_tmp_rule(input, target);
    }
}

pub fn clear_tmp_rule(input: &str) {
    if let Some(engine) = current() {
        engine.clear_tmp_rule(input);
    }
}

pub fn clear_tmp_rules() {
    if let Some(engine) = current() {
        engine.clear_tmp_rules();
    }
}

pub fn toggle_global(enabled: bool) {
    if let Some(engine) = current() {
        engine.toggle_global(enabled);
    }
}

pub fn set_global_target(target: Target) {
    if let Some(engine) = current() {
        engine.set_global_target(target);
    }
}

/// Ruleset generation of the global engine; 0 when none is installed or
/// nothing has loaded.
pub fn generation() -> u64 {
    current().map(|engine| engine.generation()).unwrap_or(0)
}
