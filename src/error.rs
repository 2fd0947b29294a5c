//! Error types for k2route.

use thiserror::Error;

/// Error type covering ruleset decoding, remote refresh and configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not start with the K2RULEV2 magic bytes
    #[error("bad magic bytes: not a K2RULEV2 ruleset")]
    BadMagic,

    /// Format version newer than this reader understands
    #[error("unsupported ruleset version: {0}")]
    UnsupportedVersion(u32),

    /// Input shorter than a fixed layout requires
    #[error("truncated input: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// Slice entry points outside the file
    #[error("slice {index} out of bounds: offset {offset} + size {size} > file size {file_len}")]
    SliceBounds {
        index: usize,
        offset: u64,
        size: u64,
        file_len: u64,
    },

    /// Slice payloads overlap or are not laid out in index order
    #[error("slice {index} overlaps the previous slice or breaks index order")]
    SliceOrder { index: usize },

    /// FST blob carries an unsupported trailer version
    #[error("unsupported fst version: {0} (expected 3)")]
    FstVersion(u64),

    /// FST construction failed
    #[error("fst build failed: {0}")]
    FstBuild(String),

    /// Porn list file is malformed
    #[error("invalid porn list: {0}")]
    PornList(String),

    /// GeoIP database could not be opened or queried
    #[error("geoip: {0}")]
    GeoIp(String),

    /// Non-success HTTP status (anything but 200 and 304)
    #[error("http {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// DNS, TCP or TLS failure while fetching
    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    /// Conflicting or invalid configuration
    #[error("config: {0}")]
    Config(String),

    /// Invalid CIDR notation fed to the compiler
    #[error("invalid cidr: {0}")]
    Cidr(String),

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Clash YAML parsing error
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Metadata sidecar (de)serialization error
    #[error("metadata: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for k2route operations.
pub type Result<T> = std::result::Result<T, Error>;
