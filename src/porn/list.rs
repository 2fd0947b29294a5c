//! FST-backed porn domain list (PORNFST file format).
//!
//! ```text
//! +--------------------+
//! | MAGIC (8 bytes)    |  "PORNFST\x01"
//! +--------------------+
//! | VERSION (u32 LE)   |
//! +--------------------+
//! | TIMESTAMP (i64 LE) |
//! +--------------------+
//! | DOMAIN_COUNT (u32) |
//! +--------------------+
//! | FST DATA           |  reversed, dot-prefixed lowercase keys
//! +--------------------+
//! ```

use std::io::Read;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;

use crate::fst::{FstBuilder, FstReader};
use crate::{Error, Result};

const MAGIC: &[u8; 8] = b"PORNFST\x01";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 24;

/// Serialize a domain list into a PORNFST file.
///
/// Every entry is stored with suffix semantics: `pornhub.com` and
/// `.pornhub.com` produce the same key and both cover subdomains.
pub fn build_porn_list<'a>(domains: impl IntoIterator<Item = &'a str>) -> Result<Vec<u8>> {
    let mut fst = FstBuilder::new();
    for domain in domains {
        fst.insert_suffix_domain(domain);
    }
    let count = fst.len() as u32;
    let blob = fst.build()?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let mut out = Vec::with_capacity(HEADER_LEN + blob.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&blob);
    Ok(out)
}

/// Loaded porn domain list. Immutable after construction; probes are
/// allocation-free suffix lookups.
pub struct PornList {
    blob: Vec<u8>,
    version: u32,
    timestamp: i64,
    domain_count: u32,
}

impl PornList {
    /// Parse a raw PORNFST file.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::PornList(format!(
                "file too short: {} bytes",
                data.len()
            )));
        }
        if &data[0..8] != MAGIC {
            return Err(Error::PornList("bad magic".to_string()));
        }
        let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        if version > VERSION {
            return Err(Error::PornList(format!("unsupported version {version}")));
        }
        let timestamp = i64::from_le_bytes([
            data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
        ]);
        let domain_count = u32::from_le_bytes([data[20], data[21], data[22], data[23]]);

        let blob = data[HEADER_LEN..].to_vec();
        // Trailer sanity, once; probes later never fail loudly.
        FstReader::new(&blob)?;

        Ok(Self {
            blob,
            version,
            timestamp,
            domain_count,
        })
    }

    /// Parse a gzip-compressed PORNFST file.
    pub fn from_gzip_bytes(data: &[u8]) -> Result<Self> {
        let mut plain = Vec::new();
        GzDecoder::new(data).read_to_end(&mut plain)?;
        Self::from_bytes(&plain)
    }

    /// Load from a file; `.gz` extension or gzip magic selects
    /// decompression.
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        if path.extension().and_then(|e| e.to_str()) == Some("gz")
            || data.starts_with(&[0x1F, 0x8B])
        {
            Self::from_gzip_bytes(&data)
        } else {
            Self::from_bytes(&data)
        }
    }

    /// Suffix membership for a domain, case-insensitive.
    pub fn contains(&self, domain: &str) -> bool {
        FstReader::new(&self.blob)
            .map(|fst| fst.contains_domain(domain))
            .unwrap_or(false)
    }

    pub fn domain_count(&self) -> u32 {
        self.domain_count
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}
