//! IP to country-code resolution.
//!
//! The routing pipeline only ever asks one question of GeoIP: which
//! ISO-3166-1 alpha-2 code does an address belong to. The MaxMind MMDB
//! database answers it here behind the narrow [`GeoIpResolver`] trait, so
//! tests can substitute a table-driven resolver and the engine never
//! learns what a MMDB is.

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::{Error, Result};

/// The lookup seam the routing pipeline depends on. Resolution failures
/// are expressed as `None` and are never fatal to a query.
pub trait GeoIpResolver: Send + Sync {
    /// Uppercase ISO-3166-1 alpha-2 code, or `None` when unknown.
    fn lookup_country(&self, ip: IpAddr) -> Option<[u8; 2]>;
}

/// MMDB-backed resolver.
pub struct MaxMindResolver {
    reader: maxminddb::Reader<Vec<u8>>,
}

#[derive(Deserialize)]
struct CountryRecord {
    country: Option<CountryField>,
}

#[derive(Deserialize)]
struct CountryField {
    iso_code: Option<String>,
}

impl MaxMindResolver {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)
            .map_err(|e| Error::GeoIp(format!("{}: {e}", path.display())))?;
        Ok(Self { reader })
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let reader =
            maxminddb::Reader::from_source(data).map_err(|e| Error::GeoIp(e.to_string()))?;
        Ok(Self { reader })
    }
}

impl GeoIpResolver for MaxMindResolver {
    fn lookup_country(&self, ip: IpAddr) -> Option<[u8; 2]> {
        let record: CountryRecord = self.reader.lookup(ip).ok()?;
        let iso = record.country?.iso_code?;
        let bytes = iso.as_bytes();
        if bytes.len() < 2 {
            return None;
        }
        Some([bytes[0].to_ascii_uppercase(), bytes[1].to_ascii_uppercase()])
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Table-driven resolver for pipeline tests.
    pub struct StaticResolver {
        table: HashMap<IpAddr, [u8; 2]>,
    }

    impl StaticResolver {
        pub fn new(entries: &[(&str, &str)]) -> Self {
            let table = entries
                .iter()
                .map(|(ip, cc)| {
                    let code = cc.as_bytes();
                    (ip.parse().unwrap(), [code[0], code[1]])
                })
                .collect();
            Self { table }
        }
    }

    impl GeoIpResolver for StaticResolver {
        fn lookup_country(&self, ip: IpAddr) -> Option<[u8; 2]> {
            self.table.get(&ip).copied()
        }
    }
}
