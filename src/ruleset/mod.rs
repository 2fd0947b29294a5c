//! Memory-mapped ruleset with ordered-slice matching.
//!
//! A [`Ruleset`] is decoded and validated once, then immutable: queries
//! walk the slice index in order and read payload bytes straight out of
//! the backing (an mmap for files, a heap buffer for byte sources),
//! copying nothing. A slice whose payload turns out to be unparsable is
//! treated as a miss and the walk continues, so damage from a malformed but
//! structurally valid file stays contained.

mod cached;

pub use cached::CachedRuleset;

use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use memmap2::Mmap;
use sha2::{Digest, Sha256};

use crate::format::{Header, SliceEntry, SliceType, ENTRY_LEN, HEADER_LEN};
use crate::fst::FstReader;
use crate::{Error, Result, Target};

enum Backing {
    Mapped { map: Mmap, _file: File },
    Heap(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped { map, .. } => map,
            Backing::Heap(data) => data,
        }
    }
}

/// An immutable, validated view of one k2r file.
pub struct Ruleset {
    backing: Backing,
    header: Header,
    entries: Vec<SliceEntry>,
}

impl Ruleset {
    /// Open a `.k2r` or `.k2r.gz` file.
    ///
    /// Gzip sources cannot be mapped directly; they are decompressed once
    /// into a sibling file named after the hash of the compressed bytes,
    /// which later opens of the same bytes reuse.
    pub fn open(path: &Path) -> Result<Ruleset> {
        if is_gzip_file(path)? {
            let plain = decompress_cached(path)?;
            Self::map_file(&plain)
        } else {
            Self::map_file(path)
        }
    }

    /// Build a ruleset from an in-memory buffer (heap backing). Gzip input
    /// is decompressed transparently. Every contract except residency is
    /// preserved.
    pub fn from_bytes(data: Vec<u8>) -> Result<Ruleset> {
        let data = if data.starts_with(&[0x1F, 0x8B]) {
            let mut plain = Vec::new();
            GzDecoder::new(data.as_slice()).read_to_end(&mut plain)?;
            plain
        } else {
            data
        };
        let (header, entries) = parse(&data)?;
        Ok(Ruleset {
            backing: Backing::Heap(data),
            header,
            entries,
        })
    }

    fn map_file(path: &Path) -> Result<Ruleset> {
        let file = File::open(path)?;
        // Safety: the map is read-only and the file is owned for the
        // ruleset's lifetime; truncation by another process is outside
        // the format's contract.
        match unsafe { Mmap::map(&file) } {
            Ok(map) => {
                let (header, entries) = parse(&map)?;
                Ok(Ruleset {
                    backing: Backing::Mapped { map, _file: file },
                    header,
                    entries,
                })
            }
            Err(e) => {
                log::warn!("mmap of {} failed ({e}), reading into memory", path.display());
                Self::from_bytes(std::fs::read(path)?)
            }
        }
    }

    /// The embedded fallback target, returned when every slice misses.
    pub fn fallback(&self) -> Target {
        self.header.fallback
    }

    pub fn slice_count(&self) -> usize {
        self.entries.len()
    }

    /// The decoded slice index, in file order.
    pub fn entries(&self) -> &[SliceEntry] {
        &self.entries
    }

    /// Generation time recorded by the compiler (Unix seconds).
    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    /// Walk FST-domain slices in index order; first hit wins.
    /// `None` means no slice claimed the input; use [`Self::fallback`].
    pub fn match_domain(&self, domain: &str) -> Option<Target> {
        if domain.is_empty() {
            return None;
        }
        for entry in &self.entries {
            if entry.kind() != Some(SliceType::FstDomain) {
                continue;
            }
            let Some(payload) = self.payload(entry) else {
                continue;
            };
            let Ok(fst) = FstReader::new(payload) else {
                continue;
            };
            if fst.contains_domain(domain) {
                return Some(entry.target());
            }
        }
        None
    }

    /// Walk CIDR and exact-IP slices in index order; first hit wins.
    pub fn match_ip(&self, ip: IpAddr) -> Option<Target> {
        let ip = unmap(ip);
        for entry in &self.entries {
            let hit = match (entry.kind(), ip) {
                (Some(SliceType::CidrV4 | SliceType::ExactIpV4), IpAddr::V4(v4)) => self
                    .payload(entry)
                    .is_some_and(|p| cidr4_hit(p, entry.count as usize, u32::from(v4))),
                (Some(SliceType::CidrV6 | SliceType::ExactIpV6), IpAddr::V6(v6)) => self
                    .payload(entry)
                    .is_some_and(|p| cidr6_hit(p, entry.count as usize, v6.octets())),
                _ => false,
            };
            if hit {
                return Some(entry.target());
            }
        }
        None
    }

    /// Walk GeoIP slices in index order for an exact country-code match.
    pub fn match_geoip(&self, country: &str) -> Option<Target> {
        let c = country.as_bytes();
        if c.len() < 2 {
            return None;
        }
        let code = [c[0].to_ascii_uppercase(), c[1].to_ascii_uppercase()];
        for entry in &self.entries {
            if entry.kind() != Some(SliceType::GeoIp) {
                continue;
            }
            let hit = self.payload(entry).is_some_and(|p| {
                p.chunks_exact(4)
                    .take(entry.count as usize)
                    .any(|rec| rec[0] == code[0] && rec[1] == code[1])
            });
            if hit {
                return Some(entry.target());
            }
        }
        None
    }

    fn payload(&self, entry: &SliceEntry) -> Option<&[u8]> {
        let start = entry.offset as usize;
        let end = start.checked_add(entry.size as usize)?;
        self.backing.bytes().get(start..end)
    }
}

/// Decode the header and slice index, enforcing the file invariants:
/// every payload inside the file, past the index, disjoint, and in index
/// order. Runs once per load; queries trust the result.
fn parse(data: &[u8]) -> Result<(Header, Vec<SliceEntry>)> {
    let header = Header::decode(data)?;
    let count = header.slice_count as usize;
    let index_end = HEADER_LEN as u64 + count as u64 * ENTRY_LEN as u64;
    let file_len = data.len() as u64;
    if file_len < index_end {
        return Err(Error::Truncated {
            need: index_end as usize,
            have: data.len(),
        });
    }

    let mut entries = Vec::with_capacity(count);
    let mut prev_end = index_end;
    for i in 0..count {
        let entry = SliceEntry::decode(&data[HEADER_LEN + i * ENTRY_LEN..])?;
        let offset = u64::from(entry.offset);
        let end = offset + u64::from(entry.size);
        if end > file_len {
            return Err(Error::SliceBounds {
                index: i,
                offset,
                size: u64::from(entry.size),
                file_len,
            });
        }
        if offset < prev_end {
            return Err(Error::SliceOrder { index: i });
        }
        prev_end = end;
        entries.push(entry);
    }
    Ok((header, entries))
}

/// IPv4-mapped IPv6 queries match against IPv4 slices.
fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    }
}

fn cidr4_hit(payload: &[u8], count: usize, ip: u32) -> bool {
    // 8-byte records: network (big-endian) + prefix + 3 pad
    payload.chunks_exact(8).take(count).any(|rec| {
        let network = u32::from_be_bytes([rec[0], rec[1], rec[2], rec[3]]);
        let prefix = rec[4];
        let mask = match prefix {
            0 => 0,
            1..=31 => !0u32 << (32 - u32::from(prefix)),
            _ => !0u32,
        };
        ip & mask == network & mask
    })
}

fn cidr6_hit(payload: &[u8], count: usize, ip: [u8; 16]) -> bool {
    // 24-byte records: network + prefix + 7 pad
    payload.chunks_exact(24).take(count).any(|rec| {
        let prefix = rec[16].min(128) as usize;
        let full = prefix / 8;
        let rem = prefix % 8;
        if ip[..full] != rec[..full] {
            return false;
        }
        if rem > 0 && full < 16 {
            let mask = 0xFFu8 << (8 - rem);
            if ip[full] & mask != rec[full] & mask {
                return false;
            }
        }
        true
    })
}

fn is_gzip_file(path: &Path) -> Result<bool> {
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        return Ok(true);
    }
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == [0x1F, 0x8B]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Decompress a gzip source next to itself, keyed by the hash of the
/// compressed bytes so identical inputs decompress once. Returns the path
/// of the plain file.
fn decompress_cached(path: &Path) -> Result<PathBuf> {
    let compressed = std::fs::read(path)?;
    let digest = Sha256::digest(&compressed);
    let name = format!("k2route-{}.bin", hex_prefix(&digest, 8));
    let out = path.parent().unwrap_or(Path::new(".")).join(name);

    if !out.exists() {
        let mut plain = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut plain)?;
        let tmp = out.with_extension("bin.tmp");
        std::fs::write(&tmp, &plain)?;
        std::fs::rename(&tmp, &out)?;
        log::debug!(
            "decompressed {} -> {} ({} bytes)",
            path.display(),
            out.display(),
            plain.len()
        );
    }
    Ok(out)
}

pub(crate) fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes
        .iter()
        .take(n)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::RulesetWriter;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn sample() -> Vec<u8> {
        let mut w = RulesetWriter::new(Target::Proxy);
        w.push_domains(&["cn.bing.com"], &[], Target::Direct).unwrap();
        w.push_domains(&["bing.com", "google.com"], &[], Target::Proxy)
            .unwrap();
        w.push_cidrs_v4(&[(0x0A00_0000, 8)], Target::Direct).unwrap();
        w.push_geoip(&["CN"], Target::Direct).unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn first_matching_slice_wins() {
        let rs = Ruleset::from_bytes(sample()).unwrap();
        assert_eq!(rs.slice_count(), 4);
        assert_eq!(rs.match_domain("cn.bing.com"), Some(Target::Direct));
        assert_eq!(rs.match_domain("www.cn.bing.com"), Some(Target::Direct));
        assert_eq!(rs.match_domain("bing.com"), Some(Target::Proxy));
        assert_eq!(rs.match_domain("www.bing.com"), Some(Target::Proxy));
        assert_eq!(rs.match_domain("example.org"), None);
        assert_eq!(rs.fallback(), Target::Proxy);
    }

    #[test]
    fn domain_suffix_not_substring() {
        let rs = Ruleset::from_bytes(sample()).unwrap();
        assert_eq!(rs.match_domain("googlecom.example.org"), None);
        assert_eq!(rs.match_domain("notbing.com"), None);
    }

    #[test]
    fn empty_domain_misses() {
        let rs = Ruleset::from_bytes(sample()).unwrap();
        assert_eq!(rs.match_domain(""), None);
    }

    #[test]
    fn cidr_v4_boundaries() {
        let mut w = RulesetWriter::new(Target::Proxy);
        w.push_cidrs_v4(&[(0x0A00_0000, 8), (0xC0A8_0100, 24)], Target::Direct)
            .unwrap();
        let rs = Ruleset::from_bytes(w.finish().unwrap()).unwrap();

        assert_eq!(rs.match_ip("10.0.0.0".parse().unwrap()), Some(Target::Direct));
        assert_eq!(
            rs.match_ip("10.255.255.255".parse().unwrap()),
            Some(Target::Direct)
        );
        assert_eq!(rs.match_ip("11.0.0.0".parse().unwrap()), None);
        assert_eq!(rs.match_ip("9.255.255.255".parse().unwrap()), None);

        assert_eq!(
            rs.match_ip("192.168.1.77".parse().unwrap()),
            Some(Target::Direct)
        );
        assert_eq!(rs.match_ip("192.168.2.1".parse().unwrap()), None);
    }

    #[test]
    fn cidr_prefix_zero_matches_everything() {
        let mut w = RulesetWriter::new(Target::Direct);
        w.push_cidrs_v4(&[(0, 0)], Target::Reject).unwrap();
        let rs = Ruleset::from_bytes(w.finish().unwrap()).unwrap();
        assert_eq!(rs.match_ip("8.8.8.8".parse().unwrap()), Some(Target::Reject));
        assert_eq!(
            rs.match_ip("255.255.255.255".parse().unwrap()),
            Some(Target::Reject)
        );
    }

    #[test]
    fn cidr_v6_partial_byte_prefix() {
        let mut w = RulesetWriter::new(Target::Proxy);
        let mut net = [0u8; 16];
        net[0] = 0xFC;
        w.push_cidrs_v6(&[(net, 7)], Target::Direct).unwrap();
        let rs = Ruleset::from_bytes(w.finish().unwrap()).unwrap();

        assert_eq!(rs.match_ip("fc00::1".parse().unwrap()), Some(Target::Direct));
        assert_eq!(rs.match_ip("fdff::1".parse().unwrap()), Some(Target::Direct));
        assert_eq!(rs.match_ip("fe00::1".parse().unwrap()), None);
    }

    #[test]
    fn exact_ip_slices() {
        let mut w = RulesetWriter::new(Target::Proxy);
        w.push_exact_ips_v4(&[0x0808_0808], Target::Reject).unwrap();
        let rs = Ruleset::from_bytes(w.finish().unwrap()).unwrap();
        assert_eq!(rs.match_ip("8.8.8.8".parse().unwrap()), Some(Target::Reject));
        assert_eq!(rs.match_ip("8.8.8.9".parse().unwrap()), None);
    }

    #[test]
    fn v4_mapped_v6_query_hits_v4_slices() {
        let mut w = RulesetWriter::new(Target::Proxy);
        w.push_cidrs_v4(&[(0x0A00_0000, 8)], Target::Direct).unwrap();
        let rs = Ruleset::from_bytes(w.finish().unwrap()).unwrap();
        assert_eq!(
            rs.match_ip("::ffff:10.1.2.3".parse().unwrap()),
            Some(Target::Direct)
        );
    }

    #[test]
    fn geoip_case_insensitive() {
        let rs = Ruleset::from_bytes(sample()).unwrap();
        assert_eq!(rs.match_geoip("CN"), Some(Target::Direct));
        assert_eq!(rs.match_geoip("cn"), Some(Target::Direct));
        assert_eq!(rs.match_geoip("US"), None);
        assert_eq!(rs.match_geoip("C"), None);
        assert_eq!(rs.match_geoip(""), None);
    }

    #[test]
    fn rejects_truncated_index() {
        let data = sample();
        assert!(Ruleset::from_bytes(data[..70].to_vec()).is_err());
    }

    #[test]
    fn rejects_out_of_bounds_slice() {
        let mut data = sample();
        // Inflate the first entry's size past the end of the file.
        let size_off = HEADER_LEN + 8;
        data[size_off..size_off + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Ruleset::from_bytes(data),
            Err(Error::SliceBounds { .. })
        ));
    }

    #[test]
    fn rejects_overlapping_slices() {
        let mut data = sample();
        // Point the second entry back into the first payload.
        let off2 = HEADER_LEN + ENTRY_LEN + 4;
        let first_off = u32::from_le_bytes(
            data[HEADER_LEN + 4..HEADER_LEN + 8].try_into().unwrap(),
        );
        data[off2..off2 + 4].copy_from_slice(&first_off.to_le_bytes());
        assert!(matches!(
            Ruleset::from_bytes(data),
            Err(Error::SliceOrder { .. })
        ));
    }

    #[test]
    fn corrupt_fst_payload_is_a_miss_not_an_error() {
        let mut w = RulesetWriter::new(Target::Proxy);
        w.push_domains(&["first.com"], &[], Target::Reject).unwrap();
        w.push_domains(&["second.com"], &[], Target::Direct).unwrap();
        let mut data = w.finish().unwrap();

        // Wreck the first FST's trailer version; the slice demotes to a
        // miss and the walk continues into the second slice.
        let first = SliceEntry::decode(&data[HEADER_LEN..]).unwrap();
        let trailer_version = first.offset as usize + first.size as usize - 36;
        data[trailer_version..trailer_version + 8].copy_from_slice(&9u64.to_le_bytes());

        let rs = Ruleset::from_bytes(data).unwrap();
        assert_eq!(rs.match_domain("first.com"), None);
        assert_eq!(rs.match_domain("second.com"), Some(Target::Direct));
    }

    #[test]
    fn open_plain_and_gzip_files() {
        let dir = tempfile::tempdir().unwrap();
        let data = sample();

        let plain = dir.path().join("rules.k2r");
        std::fs::write(&plain, &data).unwrap();
        let rs = Ruleset::open(&plain).unwrap();
        assert_eq!(rs.match_domain("cn.bing.com"), Some(Target::Direct));

        let gz = dir.path().join("rules.k2r.gz");
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&data).unwrap();
        std::fs::write(&gz, enc.finish().unwrap()).unwrap();

        let rs = Ruleset::open(&gz).unwrap();
        assert_eq!(rs.match_domain("cn.bing.com"), Some(Target::Direct));

        // The decompressed sibling exists and is reused on reopen.
        let siblings: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bin"))
            .collect();
        assert_eq!(siblings.len(), 1);
        assert!(Ruleset::open(&gz).is_ok());
    }

    #[test]
    fn gzip_detected_by_magic_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let data = sample();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&data).unwrap();
        let path = dir.path().join("rules.k2r");
        std::fs::write(&path, enc.finish().unwrap()).unwrap();

        let rs = Ruleset::open(&path).unwrap();
        assert_eq!(rs.fallback(), Target::Proxy);
    }
}
