//! Remote artifact managers: download, cache, refresh, hot-reload.
//!
//! Three artifacts are managed the same way: the ruleset (`.k2r[.gz]`),
//! the GeoIP database (`.mmdb[.gz]`) and the porn list (`.fst[.gz]`).
//! Each keeps one cache file under the cache directory, named by a hash
//! of its URL, plus a JSON sidecar with the last ETag and fetch time.
//!
//! Lifecycle per artifact:
//! 1. `init`: load the cache file if it parses, otherwise download.
//!    Both failing is an error; the engine then serves its global target.
//! 2. `update`: conditional GET with `If-None-Match`. A 304 is a no-op;
//!    a 200 is written to `<cache>.tmp`, renamed atomically over the
//!    cache file and hot-reloaded. Errors leave the current data serving.
//! 3. A background thread repeats `update` on a fixed cadence until
//!    `stop` is signalled.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwapOption;
use flate2::read::GzDecoder;
use parking_lot::{Condvar, Mutex};
use sha2::{Digest, Sha256};

use crate::geoip::{GeoIpResolver, MaxMindResolver};
use crate::metadata::CacheStamp;
use crate::porn::{is_porn_heuristic, PornList};
use crate::ruleset::{CachedRuleset, Ruleset};
use crate::{Error, Result, Target};

/// Download timeout for rule and porn-list files.
pub const RULE_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Download timeout for the GeoIP database.
pub const GEOIP_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Periodic refresh cadence for rules and the porn list.
pub const RULE_UPDATE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Periodic refresh cadence for the GeoIP database.
pub const GEOIP_UPDATE_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Outcome of one conditional fetch.
#[derive(Debug, PartialEq, Eq)]
enum FetchOutcome {
    NotModified,
    Downloaded,
}

/// One URL-backed cache file with ETag bookkeeping.
struct HttpSource {
    url: String,
    cache_path: PathBuf,
    meta_path: PathBuf,
    timeout: Duration,
    /// Store the body decompressed (the MMDB needs random access).
    decompress: bool,
    etag: Mutex<Option<String>>,
}

impl HttpSource {
    fn new(url: &str, cache_path: PathBuf, timeout: Duration, decompress: bool) -> Self {
        let meta_path = sidecar_path(&cache_path);
        let etag = CacheStamp::load(&meta_path).etag;
        Self {
            url: url.to_string(),
            cache_path,
            meta_path,
            timeout,
            decompress,
            etag: Mutex::new(etag),
        }
    }

    /// GET the URL, honoring the stored ETag when `conditional`.
    /// On 200 the body lands in the cache file via tmp + atomic rename.
    fn fetch(&self, conditional: bool) -> Result<FetchOutcome> {
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let mut request = agent.get(&self.url);
        if conditional {
            if let Some(etag) = self.etag.lock().as_deref() {
                request = request.set("If-None-Match", etag);
            }
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(304, _)) => {
                log::debug!("{} not modified (304)", self.url);
                return Ok(FetchOutcome::NotModified);
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(Error::HttpStatus {
                    url: self.url.clone(),
                    status: code,
                })
            }
            Err(ureq::Error::Transport(t)) => {
                return Err(Error::Download {
                    url: self.url.clone(),
                    reason: t.to_string(),
                })
            }
        };

        let new_etag = response.header("ETag").map(str::to_string);

        let tmp_path = tmp_path(&self.cache_path);
        let written = {
            let mut file = fs::File::create(&tmp_path)?;
            let mut body = response.into_reader();
            let copied = if self.decompress && self.url.ends_with(".gz") {
                std::io::copy(&mut GzDecoder::new(&mut body), &mut file)
            } else {
                std::io::copy(&mut body, &mut file)
            };
            match copied {
                Ok(n) => n,
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path);
                    return Err(e.into());
                }
            }
        };
        fs::rename(&tmp_path, &self.cache_path)?;

        *self.etag.lock() = new_etag.clone();
        CacheStamp::now(new_etag).save(&self.meta_path)?;

        log::info!(
            "downloaded {} -> {} ({} bytes)",
            self.url,
            self.cache_path.display(),
            written
        );
        Ok(FetchOutcome::Downloaded)
    }

    fn etag(&self) -> Option<String> {
        self.etag.lock().clone()
    }

    fn last_fetched(&self) -> Option<SystemTime> {
        CacheStamp::load(&self.meta_path).fetched_at()
    }
}

/// Cache file name for a URL: hash prefix plus an extension that keeps
/// the `.gz` suffix iff the source is gzipped.
fn cache_file_name(url: &str, base_ext: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hash = crate::ruleset::hex_prefix(&digest, 8);
    if url.ends_with(".gz") {
        format!("{hash}.{base_ext}.gz")
    } else {
        format!("{hash}.{base_ext}")
    }
}

fn sidecar_path(cache: &Path) -> PathBuf {
    let mut s = cache.as_os_str().to_os_string();
    s.push(".meta");
    PathBuf::from(s)
}

fn tmp_path(cache: &Path) -> PathBuf {
    let mut s = cache.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Background refresh thread, terminated promptly via condvar signal.
struct Refresher {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    fn spawn(name: &str, interval: Duration, task: impl Fn() + Send + 'static) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_for_thread = Arc::clone(&stop);
        let spawned = std::thread::Builder::new()
            .name(format!("k2route-{name}"))
            .spawn(move || {
                let (flag, cond) = &*stop_for_thread;
                loop {
                    {
                        let mut stopped = flag.lock();
                        if *stopped {
                            break;
                        }
                        let wait = cond.wait_for(&mut stopped, interval);
                        if *stopped {
                            break;
                        }
                        if !wait.timed_out() {
                            continue;
                        }
                    }
                    task();
                }
            });
        let handle = match spawned {
            Ok(h) => Some(h),
            Err(e) => {
                log::error!("failed to spawn {name} refresh thread: {e}");
                None
            }
        };
        Self { stop, handle }
    }

    fn stop(&mut self) {
        {
            let (flag, cond) = &*self.stop;
            *flag.lock() = true;
            cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            // The refresh task may hold the last strong reference to its
            // manager, in which case this runs on the refresh thread
            // itself; joining would then wait on ourselves.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Remote ruleset manager.
pub struct RuleManager {
    source: HttpSource,
    cache_dir: PathBuf,
    reader: CachedRuleset,
    /// Served only while no ruleset is loaded; afterwards the embedded
    /// fallback is authoritative.
    fallback: Target,
    interval: Duration,
    refresher: Mutex<Option<Refresher>>,
}

impl RuleManager {
    pub fn new(url: &str, cache_dir: &Path, fallback: Target) -> Self {
        let cache_path = cache_dir.join(cache_file_name(url, "k2r"));
        Self {
            source: HttpSource::new(url, cache_path, RULE_FETCH_TIMEOUT, false),
            cache_dir: cache_dir.to_path_buf(),
            reader: CachedRuleset::new(),
            fallback,
            interval: RULE_UPDATE_INTERVAL,
            refresher: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Load from cache, falling back to a download. Errors only when both
    /// sources fail.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;

        if self.source.cache_path.exists() {
            match self.reader.load(&self.source.cache_path) {
                Ok(()) => return Ok(()),
                Err(e) => log::warn!("cached ruleset unreadable, re-downloading: {e}"),
            }
        }

        self.source.fetch(false)?;
        self.reader.load(&self.source.cache_path)
    }

    /// Conditional refresh. `Ok(true)` means new rules are live;
    /// `Ok(false)` means 304. Errors leave the current ruleset serving.
    pub fn update(&self) -> Result<bool> {
        match self.source.fetch(true)? {
            FetchOutcome::NotModified => Ok(false),
            FetchOutcome::Downloaded => {
                self.reader.load(&self.source.cache_path)?;
                Ok(true)
            }
        }
    }

    /// Start the periodic background check. The thread holds only a weak
    /// reference; dropping the manager shuts it down.
    pub fn start_periodic(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let refresher = Refresher::spawn("rules", self.interval, move || {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            match manager.update() {
                Ok(true) => {}
                Ok(false) => log::debug!("rules unchanged"),
                Err(e) => log::warn!("periodic rule refresh failed: {e}"),
            }
        });
        *self.refresher.lock() = Some(refresher);
    }

    /// Terminate the periodic task. The cache file persists.
    pub fn stop(&self) {
        if let Some(mut refresher) = self.refresher.lock().take() {
            refresher.stop();
        }
    }

    /// The current ruleset, if one has been loaded.
    pub fn ruleset(&self) -> Option<Arc<Ruleset>> {
        self.reader.current()
    }

    pub fn generation(&self) -> u64 {
        self.reader.generation()
    }

    pub fn is_initialized(&self) -> bool {
        self.reader.is_loaded()
    }

    /// Match a domain, resolving misses to the effective fallback.
    pub fn match_domain(&self, domain: &str) -> Target {
        match self.ruleset() {
            Some(rs) => rs.match_domain(domain).unwrap_or_else(|| rs.fallback()),
            None => self.fallback,
        }
    }

    /// Match an IP, resolving misses to the effective fallback.
    pub fn match_ip(&self, ip: IpAddr) -> Target {
        match self.ruleset() {
            Some(rs) => rs.match_ip(ip).unwrap_or_else(|| rs.fallback()),
            None => self.fallback,
        }
    }

    pub fn etag(&self) -> Option<String> {
        self.source.etag()
    }

    pub fn last_updated(&self) -> Option<SystemTime> {
        self.source.last_fetched()
    }

    pub fn url(&self) -> &str {
        &self.source.url
    }

    pub fn cache_path(&self) -> &Path {
        &self.source.cache_path
    }
}

impl Drop for RuleManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Remote GeoIP database manager. The MMDB is stored decompressed (it
/// needs random access) and hot-swapped behind an atomic pointer.
pub struct GeoIpManager {
    source: HttpSource,
    cache_dir: PathBuf,
    resolver: ArcSwapOption<MaxMindResolver>,
    interval: Duration,
    refresher: Mutex<Option<Refresher>>,
}

impl GeoIpManager {
    pub fn new(url: &str, cache_dir: &Path) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        let cache_path = cache_dir.join(format!(
            "{}.mmdb",
            crate::ruleset::hex_prefix(&digest, 8)
        ));
        Self {
            source: HttpSource::new(url, cache_path, GEOIP_FETCH_TIMEOUT, true),
            cache_dir: cache_dir.to_path_buf(),
            resolver: ArcSwapOption::empty(),
            interval: GEOIP_UPDATE_INTERVAL,
            refresher: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;

        if self.source.cache_path.exists() {
            match self.load_current() {
                Ok(()) => return Ok(()),
                Err(e) => log::warn!("cached geoip database unreadable, re-downloading: {e}"),
            }
        }

        self.source.fetch(false)?;
        self.load_current()
    }

    pub fn update(&self) -> Result<bool> {
        match self.source.fetch(true)? {
            FetchOutcome::NotModified => Ok(false),
            FetchOutcome::Downloaded => {
                self.load_current()?;
                Ok(true)
            }
        }
    }

    fn load_current(&self) -> Result<()> {
        let resolver = MaxMindResolver::open(&self.source.cache_path)?;
        self.resolver.store(Some(Arc::new(resolver)));
        Ok(())
    }

    pub fn start_periodic(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let refresher = Refresher::spawn("geoip", self.interval, move || {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if let Err(e) = manager.update() {
                log::warn!("periodic geoip refresh failed: {e}");
            }
        });
        *self.refresher.lock() = Some(refresher);
    }

    pub fn stop(&self) {
        if let Some(mut refresher) = self.refresher.lock().take() {
            refresher.stop();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.resolver.load().is_some()
    }
}

impl GeoIpResolver for GeoIpManager {
    fn lookup_country(&self, ip: IpAddr) -> Option<[u8; 2]> {
        self.resolver.load_full()?.lookup_country(ip)
    }
}

impl Drop for GeoIpManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Remote porn-list manager. Falls back to the compiled-in heuristic
/// until (and alongside) the list.
pub struct PornListManager {
    source: HttpSource,
    cache_dir: PathBuf,
    list: ArcSwapOption<PornList>,
    interval: Duration,
    refresher: Mutex<Option<Refresher>>,
}

impl PornListManager {
    pub fn new(url: &str, cache_dir: &Path) -> Self {
        let cache_path = cache_dir.join(cache_file_name(url, "fst"));
        Self {
            source: HttpSource::new(url, cache_path, RULE_FETCH_TIMEOUT, false),
            cache_dir: cache_dir.to_path_buf(),
            list: ArcSwapOption::empty(),
            interval: RULE_UPDATE_INTERVAL,
            refresher: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;

        if self.source.cache_path.exists() {
            match self.load_current() {
                Ok(()) => return Ok(()),
                Err(e) => log::warn!("cached porn list unreadable, re-downloading: {e}"),
            }
        }

        self.source.fetch(false)?;
        self.load_current()
    }

    pub fn update(&self) -> Result<bool> {
        match self.source.fetch(true)? {
            FetchOutcome::NotModified => Ok(false),
            FetchOutcome::Downloaded => {
                self.load_current()?;
                Ok(true)
            }
        }
    }

    fn load_current(&self) -> Result<()> {
        let list = PornList::open(&self.source.cache_path)?;
        log::info!("loaded porn list ({} domains)", list.domain_count());
        self.list.store(Some(Arc::new(list)));
        Ok(())
    }

    pub fn start_periodic(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let refresher = Refresher::spawn("porn-list", self.interval, move || {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if let Err(e) = manager.update() {
                log::warn!("periodic porn list refresh failed: {e}");
            }
        });
        *self.refresher.lock() = Some(refresher);
    }

    pub fn stop(&self) {
        if let Some(mut refresher) = self.refresher.lock().take() {
            refresher.stop();
        }
    }

    /// Heuristic first, list second; total either way.
    pub fn is_porn(&self, domain: &str) -> bool {
        if is_porn_heuristic(domain) {
            return true;
        }
        self.list
            .load_full()
            .is_some_and(|list| list.contains(domain))
    }

    pub fn is_initialized(&self) -> bool {
        self.list.load().is_some()
    }
}

impl Drop for PornListManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::RulesetWriter;
    use std::time::Instant;

    fn sample_rules() -> Vec<u8> {
        let mut w = RulesetWriter::new(Target::Proxy);
        w.push_domains(&["example.com"], &[], Target::Direct).unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn cache_file_names() {
        let gz = cache_file_name("https://cdn.example/rules.k2r.gz", "k2r");
        assert!(gz.ends_with(".k2r.gz"));
        let plain = cache_file_name("https://cdn.example/rules.k2r", "k2r");
        assert!(plain.ends_with(".k2r"));
        assert!(!plain.ends_with(".gz"));
        // Distinct URLs get distinct cache files.
        assert_ne!(gz, cache_file_name("https://other.example/rules.k2r.gz", "k2r"));
    }

    #[test]
    fn sidecar_and_tmp_paths() {
        let cache = Path::new("/cache/ab12.k2r.gz");
        assert_eq!(sidecar_path(cache), Path::new("/cache/ab12.k2r.gz.meta"));
        assert_eq!(tmp_path(cache), Path::new("/cache/ab12.k2r.gz.tmp"));
    }

    #[test]
    fn init_from_cache_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RuleManager::new("https://unreachable.invalid/rules.k2r", dir.path(), Target::Proxy);
        std::fs::write(manager.cache_path(), sample_rules()).unwrap();

        manager.init().unwrap();
        assert!(manager.is_initialized());
        assert_eq!(manager.generation(), 1);
        assert_eq!(manager.match_domain("example.com"), Target::Direct);
        assert_eq!(manager.match_domain("other.org"), Target::Proxy);
    }

    #[test]
    fn init_fails_when_cache_and_network_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RuleManager::new("https://unreachable.invalid/rules.k2r", dir.path(), Target::Proxy);
        assert!(manager.init().is_err());
        assert!(!manager.is_initialized());
        // Matching still answers through the configured fallback.
        assert_eq!(manager.match_domain("example.com"), Target::Proxy);
    }

    #[test]
    fn corrupt_cache_attempts_redownload() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RuleManager::new("https://unreachable.invalid/rules.k2r", dir.path(), Target::Direct);
        std::fs::write(manager.cache_path(), b"garbage").unwrap();

        // Cache is unreadable and the host does not resolve: init errors,
        // nothing is installed.
        assert!(manager.init().is_err());
        assert_eq!(manager.generation(), 0);
    }

    #[test]
    fn failed_update_retains_current_ruleset() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RuleManager::new("https://unreachable.invalid/rules.k2r", dir.path(), Target::Proxy);
        std::fs::write(manager.cache_path(), sample_rules()).unwrap();
        manager.init().unwrap();

        assert!(manager.update().is_err());
        assert_eq!(manager.generation(), 1);
        assert_eq!(manager.match_domain("example.com"), Target::Direct);
    }

    #[test]
    fn etag_persists_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://unreachable.invalid/rules.k2r";
        {
            let manager = RuleManager::new(url, dir.path(), Target::Proxy);
            CacheStamp::now(Some("\"v1\"".into()))
                .save(&sidecar_path(manager.cache_path()))
                .unwrap();
        }
        let manager = RuleManager::new(url, dir.path(), Target::Proxy);
        assert_eq!(manager.etag().as_deref(), Some("\"v1\""));
    }

    #[test]
    fn refresher_stops_promptly() {
        let mut refresher = Refresher::spawn("test", Duration::from_secs(3600), || {});
        let started = Instant::now();
        refresher.stop();
        // A sleep-polling loop would take the whole hour.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn manager_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(RuleManager::new(
            "https://unreachable.invalid/rules.k2r",
            dir.path(),
            Target::Proxy,
        ));
        manager.start_periodic();
        manager.stop();
        manager.stop();
    }

    #[test]
    fn porn_manager_heuristic_before_init() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PornListManager::new("https://unreachable.invalid/list.fst", dir.path());
        assert!(!manager.is_initialized());
        assert!(manager.is_porn("pornhub.com"));
        assert!(!manager.is_porn("github.com"));
    }

    #[test]
    fn porn_manager_init_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PornListManager::new("https://unreachable.invalid/list.fst", dir.path());
        let data = crate::porn::build_porn_list(["obscure-site.example"]).unwrap();
        std::fs::write(&manager.source.cache_path, data).unwrap();

        manager.init().unwrap();
        assert!(manager.is_initialized());
        assert!(manager.is_porn("www.obscure-site.example"));
    }
}
