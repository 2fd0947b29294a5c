//! Build-time serializer for domain transducers.

use std::collections::BTreeMap;

use crate::{Error, Result};

use super::{FST_VERSION, TRAILER_LEN};

/// Accumulates byte keys into a prefix tree and serializes it in the
/// tail-encoded layout [`super::FstReader`] consumes.
///
/// Nodes are emitted in post order, so every transition points strictly
/// backwards and the root lands last, just before the trailer. Keys share
/// prefixes in the tree; no suffix minimization is performed, since the
/// rule compiler runs offline and the payload stays small enough.
#[derive(Default)]
pub struct FstBuilder {
    root: Node,
    keys: u64,
}

#[derive(Default)]
struct Node {
    children: BTreeMap<u8, Node>,
    terminal: bool,
}

impl FstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw key, bytes taken as-is. Duplicates are absorbed.
    pub fn insert(&mut self, key: &[u8]) {
        let mut node = &mut self.root;
        for &b in key {
            node = node.children.entry(b).or_default();
        }
        if !node.terminal {
            node.terminal = true;
            self.keys += 1;
        }
    }

    /// Insert a suffix rule: lowercase, leading `.` ensured, reversed.
    /// `.bing.com` and `bing.com` both store the key `moc.gnib.`.
    pub fn insert_suffix_domain(&mut self, domain: &str) {
        let mut key: Vec<u8> = domain
            .bytes()
            .rev()
            .map(|b| b.to_ascii_lowercase())
            .collect();
        if !domain.starts_with('.') {
            key.push(b'.');
        }
        self.insert(&key);
    }

    /// Insert an exact rule: lowercase and reversed, no dot marker.
    pub fn insert_exact_domain(&mut self, domain: &str) {
        let key: Vec<u8> = domain
            .bytes()
            .rev()
            .map(|b| b.to_ascii_lowercase())
            .collect();
        self.insert(&key);
    }

    /// Number of distinct keys inserted so far.
    pub fn len(&self) -> u64 {
        self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys == 0
    }

    /// Serialize nodes and trailer into a standalone blob.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let root_addr = write_node(&self.root, &mut out)?;
        let checksum = fnv1a(&out) as u32;

        let mut trailer = [0u8; TRAILER_LEN];
        trailer[0..8].copy_from_slice(&FST_VERSION.to_le_bytes());
        // type: 0 = plain set, outputs unused
        trailer[16..24].copy_from_slice(&root_addr.to_le_bytes());
        trailer[24..32].copy_from_slice(&self.keys.to_le_bytes());
        trailer[32..36].copy_from_slice(&checksum.to_le_bytes());
        out.extend_from_slice(&trailer);
        Ok(out)
    }
}

/// Emit `node` after all of its children; returns the node's address.
fn write_node(node: &Node, out: &mut Vec<u8>) -> Result<u64> {
    if node.children.len() > 0x7F {
        return Err(Error::FstBuild(format!(
            "node fan-out {} exceeds 127",
            node.children.len()
        )));
    }

    let mut targets: Vec<(u8, u64)> = Vec::with_capacity(node.children.len());
    for (&input, child) in &node.children {
        targets.push((input, write_node(child, out)?));
    }

    let addr = out.len() as u64;
    let mut header = node.children.len() as u8;
    if node.terminal {
        header |= 0x80;
    }
    out.push(header);
    if node.terminal {
        write_packed_u64(out, 0); // final output, unused
    }
    for (input, child_addr) in targets {
        out.push(input);
        write_packed_u64(out, 0); // transition output, unused
        write_packed_u64(out, addr - child_addr);
    }
    Ok(addr)
}

fn write_packed_u64(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut b = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            b |= 0x80;
        }
        out.push(b);
        if value == 0 {
            return;
        }
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    const OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET;
    for &b in data {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_encoding() {
        let mut out = Vec::new();
        write_packed_u64(&mut out, 0);
        assert_eq!(out, [0x00]);

        out.clear();
        write_packed_u64(&mut out, 127);
        assert_eq!(out, [0x7F]);

        out.clear();
        write_packed_u64(&mut out, 128);
        assert_eq!(out, [0x80, 0x01]);

        out.clear();
        write_packed_u64(&mut out, 300);
        assert_eq!(out, [0xAC, 0x02]);
    }

    #[test]
    fn duplicate_keys_counted_once() {
        let mut b = FstBuilder::new();
        b.insert(b"abc");
        b.insert(b"abc");
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn suffix_and_exact_normalization() {
        let mut b = FstBuilder::new();
        b.insert_suffix_domain("Bing.COM");
        b.insert_suffix_domain(".bing.com");
        // Both normalize to the same key.
        assert_eq!(b.len(), 1);

        b.insert_exact_domain("bing.com");
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn trailer_layout() {
        let mut b = FstBuilder::new();
        b.insert(b"xy");
        let blob = b.build().unwrap();
        let base = blob.len() - TRAILER_LEN;

        let version = u64::from_le_bytes(blob[base..base + 8].try_into().unwrap());
        assert_eq!(version, FST_VERSION);

        let len = u64::from_le_bytes(blob[base + 24..base + 32].try_into().unwrap());
        assert_eq!(len, 1);

        let root = u64::from_le_bytes(blob[base + 16..base + 24].try_into().unwrap());
        assert!((root as usize) < base);
    }

    #[test]
    fn deterministic_output() {
        let build = || {
            let mut b = FstBuilder::new();
            // Insertion order must not matter.
            for k in [b"zzz".as_slice(), b"aaa", b"mmm"] {
                b.insert(k);
            }
            b.build().unwrap()
        };
        let build_rev = || {
            let mut b = FstBuilder::new();
            for k in [b"mmm".as_slice(), b"aaa", b"zzz"] {
                b.insert(k);
            }
            b.build().unwrap()
        };
        assert_eq!(build(), build_rev());
    }
}
