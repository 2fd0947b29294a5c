//! k2route - rule-based routing decisions for proxy clients.
//!
//! Given a domain name or an IP address, the engine answers with one of
//! three targets: `DIRECT`, `PROXY` or `REJECT`. Decisions come from a
//! pre-compiled binary ruleset (the ordered-slice `.k2r` format) that
//! preserves source order (first match wins) plus a few hardcoded
//! priorities layered on top.
//!
//! # Features
//!
//! - **Domain matching**: suffix and exact rules stored in a compact
//!   finite-state transducer, probed without allocation
//! - **IP matching**: IPv4/IPv6 CIDR ranges and exact addresses
//! - **GeoIP**: country-based routing through a MaxMind MMDB database
//! - **Hot reload**: memory-mapped rulesets swapped atomically; readers
//!   are never blocked
//! - **Remote management**: download, cache, ETag-conditional refresh
//! - **Porn filtering**: an 8-layer heuristic plus an optional FST list
//!
//! # Quick start
//!
//! ```ignore
//! use k2route::{Config, Target};
//!
//! k2route::init(Config {
//!     rule_url: Some("https://cdn.example.com/cn_blacklist.k2r.gz".into()),
//!     ..Default::default()
//! })?;
//!
//! assert_eq!(k2route::match_target("192.168.1.1"), Target::Direct); // LAN
//! let target = k2route::match_target("www.google.com");
//! let blocked = k2route::is_porn("example.xxx");
//! ```
//!
//! # Matching priority
//!
//! 1. Private/LAN IPs always go `DIRECT`
//! 2. Temporary overrides ([`set_tmp_rule`])
//! 3. Global mode ([`toggle_global`])
//! 4. Ruleset slices in compiled order, then the embedded fallback
//! 5. With no ruleset loaded: the configured global target
//!
//! Hosts that prefer explicit ownership over the process-global facade
//! can hold an [`Engine`] directly; the facade is a thin wrapper over
//! one.

mod config;
mod engine;
mod error;
mod format;
mod geoip;
mod lan;
mod metadata;
mod target;

pub mod compile;
pub mod fst;
pub mod porn;
pub mod remote;
pub mod ruleset;

pub use config::{default_cache_dir, Config};
pub use engine::{
    clear_tmp_rule, clear_tmp_rules, generation, init, install, is_initialized, is_porn,
    match_target, set_global_target, set_tmp_rule, shutdown, toggle_global, Engine,
};
pub use error::{Error, Result};
pub use format::{Header, SliceEntry, SliceType};
pub use geoip::{GeoIpResolver, MaxMindResolver};
pub use lan::{is_private, is_private_str};
pub use metadata::CacheStamp;
pub use porn::{is_porn_heuristic, PornChecker, PornList};
pub use remote::{GeoIpManager, PornListManager, RuleManager};
pub use ruleset::{CachedRuleset, Ruleset};
pub use target::Target;
