//! Ordered-slice ruleset writer.

use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::format::{Header, SliceEntry, SliceType, ENTRY_LEN, FORMAT_VERSION, HEADER_LEN};
use crate::fst::FstBuilder;
use crate::{Error, Result, Target};

/// Builds a `.k2r` file slice by slice. Slices are emitted in push order;
/// that order is the ruleset's priority. Within a slice, domains dedup into
/// the FST and CIDRs are sorted; record order inside one slice never
/// affects the answer, only latency.
///
/// Output is deterministic for identical inputs, modulo the header
/// timestamp and checksum.
pub struct RulesetWriter {
    fallback: Target,
    slices: Vec<Pending>,
}

struct Pending {
    slice_type: SliceType,
    target: Target,
    count: u32,
    data: Vec<u8>,
}

impl RulesetWriter {
    pub fn new(fallback: Target) -> Self {
        Self {
            fallback,
            slices: Vec::new(),
        }
    }

    /// Add one FST-domain slice. `suffixes` match themselves and all
    /// subdomains; `exacts` match only themselves. An empty call adds no
    /// slice.
    pub fn push_domains(
        &mut self,
        suffixes: &[&str],
        exacts: &[&str],
        target: Target,
    ) -> Result<()> {
        if suffixes.is_empty() && exacts.is_empty() {
            return Ok(());
        }
        let mut fst = FstBuilder::new();
        for domain in suffixes {
            fst.insert_suffix_domain(domain);
        }
        for domain in exacts {
            fst.insert_exact_domain(domain);
        }
        let count = fst.len() as u32;
        let data = fst.build()?;
        self.slices.push(Pending {
            slice_type: SliceType::FstDomain,
            target,
            count,
            data,
        });
        Ok(())
    }

    /// Add one IPv4 CIDR slice from `(network, prefix)` pairs, network in
    /// host order.
    pub fn push_cidrs_v4(&mut self, cidrs: &[(u32, u8)], target: Target) -> Result<()> {
        if cidrs.is_empty() {
            return Ok(());
        }
        let mut sorted = cidrs.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut data = Vec::with_capacity(sorted.len() * 8);
        for (network, prefix) in &sorted {
            data.extend_from_slice(&network.to_be_bytes());
            data.push(*prefix);
            data.extend_from_slice(&[0u8; 3]);
        }
        self.push_raw(SliceType::CidrV4, target, sorted.len() as u32, data);
        Ok(())
    }

    /// Add one IPv6 CIDR slice from `(network_octets, prefix)` pairs.
    pub fn push_cidrs_v6(&mut self, cidrs: &[([u8; 16], u8)], target: Target) -> Result<()> {
        if cidrs.is_empty() {
            return Ok(());
        }
        let mut sorted = cidrs.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut data = Vec::with_capacity(sorted.len() * 24);
        for (network, prefix) in &sorted {
            data.extend_from_slice(network);
            data.push(*prefix);
            data.extend_from_slice(&[0u8; 7]);
        }
        self.push_raw(SliceType::CidrV6, target, sorted.len() as u32, data);
        Ok(())
    }

    /// Add one GeoIP slice of ISO country codes, kept in insertion order.
    pub fn push_geoip(&mut self, countries: &[&str], target: Target) -> Result<()> {
        if countries.is_empty() {
            return Ok(());
        }
        let mut data = Vec::with_capacity(countries.len() * 4);
        for country in countries {
            let code = country.as_bytes();
            if code.len() < 2 {
                return Err(Error::Config(format!("invalid country code: {country}")));
            }
            data.push(code[0].to_ascii_uppercase());
            data.push(code[1].to_ascii_uppercase());
            data.extend_from_slice(&[0u8; 2]);
        }
        self.push_raw(SliceType::GeoIp, target, countries.len() as u32, data);
        Ok(())
    }

    /// Add one exact-IPv4 slice (CIDR records with /32).
    pub fn push_exact_ips_v4(&mut self, ips: &[u32], target: Target) -> Result<()> {
        if ips.is_empty() {
            return Ok(());
        }
        let mut sorted = ips.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut data = Vec::with_capacity(sorted.len() * 8);
        for ip in &sorted {
            data.extend_from_slice(&ip.to_be_bytes());
            data.push(32);
            data.extend_from_slice(&[0u8; 3]);
        }
        self.push_raw(SliceType::ExactIpV4, target, sorted.len() as u32, data);
        Ok(())
    }

    /// Add one exact-IPv6 slice (CIDR records with /128).
    pub fn push_exact_ips_v6(&mut self, ips: &[[u8; 16]], target: Target) -> Result<()> {
        if ips.is_empty() {
            return Ok(());
        }
        let mut sorted = ips.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut data = Vec::with_capacity(sorted.len() * 24);
        for ip in &sorted {
            data.extend_from_slice(ip);
            data.push(128);
            data.extend_from_slice(&[0u8; 7]);
        }
        self.push_raw(SliceType::ExactIpV6, target, sorted.len() as u32, data);
        Ok(())
    }

    fn push_raw(&mut self, slice_type: SliceType, target: Target, count: u32, data: Vec<u8>) {
        self.slices.push(Pending {
            slice_type,
            target,
            count,
            data,
        });
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    /// Assemble the final file: header, index, payloads back to back in
    /// push order. The checksum covers everything after the header.
    pub fn finish(&self) -> Result<Vec<u8>> {
        let index_len = self.slices.len() * ENTRY_LEN;
        let mut offset = (HEADER_LEN + index_len) as u32;

        let mut body = Vec::with_capacity(index_len);
        for pending in &self.slices {
            let entry = SliceEntry {
                slice_type: pending.slice_type as u8,
                target: pending.target.as_byte(),
                offset,
                size: pending.data.len() as u32,
                count: pending.count,
            };
            body.extend_from_slice(&entry.encode());
            offset += pending.data.len() as u32;
        }
        for pending in &self.slices {
            body.extend_from_slice(&pending.data);
        }

        let digest = Sha256::digest(&body);
        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&digest[..16]);

        let header = Header {
            version: FORMAT_VERSION,
            slice_count: self.slices.len() as u32,
            fallback: self.fallback,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64,
            checksum,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&body);
        Ok(out)
    }
}
