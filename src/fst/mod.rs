//! Finite-state-transducer storage for domain sets.
//!
//! Domains share long suffixes, so keys are stored character-reversed:
//! suffix membership becomes a prefix walk, which the transducer
//! compresses well. Suffix rules carry a leading `.` before reversal
//! (`.bing.com` -> `moc.gnib.`), exact rules are reversed bare. Probing a
//! query therefore means walking its bytes back to front, which
//! [`FstReader`] does without materializing the reversed string.
//!
//! The serialized blob is the version-3 tail-encoded layout: node records
//! front to back, then a 36-byte trailer
//! `version:u64 | type:u64 | root_addr:u64 | len:u64 | checksum:u32`,
//! all little-endian. [`FstBuilder`] and [`FstReader`] agree on this
//! layout byte for byte.

mod builder;
mod reader;

pub use builder::FstBuilder;
pub use reader::FstReader;

/// Trailer length in bytes.
pub const TRAILER_LEN: usize = 36;

/// The only supported trailer version.
pub const FST_VERSION: u64 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    fn build(keys: &[&str]) -> Vec<u8> {
        let mut b = FstBuilder::new();
        for k in keys {
            b.insert(k.as_bytes());
        }
        b.build().unwrap()
    }

    #[test]
    fn builder_reader_agree_on_membership() {
        let blob = build(&["moc.elpmaxe.", "moc.gnib.", "gro.ikiw"]);
        let fst = FstReader::new(&blob).unwrap();

        assert!(fst.contains(b"moc.elpmaxe."));
        assert!(fst.contains(b"moc.gnib."));
        assert!(fst.contains(b"gro.ikiw"));

        assert!(!fst.contains(b"moc.gnib"));
        assert!(!fst.contains(b"moc."));
        assert!(!fst.contains(b""));
        assert!(!fst.contains(b"zzz"));
    }

    #[test]
    fn prefix_of_key_is_not_member() {
        // "moc.gnib." is stored; its proper prefixes must not be accepted.
        let blob = build(&["moc.gnib."]);
        let fst = FstReader::new(&blob).unwrap();
        for end in 1.."moc.gnib.".len() {
            assert!(!fst.contains(&"moc.gnib.".as_bytes()[..end]));
        }
    }

    #[test]
    fn shared_prefixes_stay_distinct() {
        let blob = build(&["abc", "abcd", "abx"]);
        let fst = FstReader::new(&blob).unwrap();
        assert!(fst.contains(b"abc"));
        assert!(fst.contains(b"abcd"));
        assert!(fst.contains(b"abx"));
        assert!(!fst.contains(b"ab"));
        assert!(!fst.contains(b"abcde"));
    }

    #[test]
    fn domain_probe_matches_suffix_rules() {
        let mut b = FstBuilder::new();
        b.insert_suffix_domain("bing.com");
        b.insert_suffix_domain(".example.org");
        let blob = b.build().unwrap();
        let fst = FstReader::new(&blob).unwrap();

        assert!(fst.contains_domain("bing.com"));
        assert!(fst.contains_domain("www.bing.com"));
        assert!(fst.contains_domain("a.b.bing.com"));
        assert!(fst.contains_domain("WWW.BING.COM"));
        assert!(fst.contains_domain("example.org"));
        assert!(fst.contains_domain("cdn.example.org"));

        // Suffix means label boundary, not substring.
        assert!(!fst.contains_domain("notbing.com"));
        assert!(!fst.contains_domain("bingxcom"));
        assert!(!fst.contains_domain("bing.com.evil.net"));
        assert!(!fst.contains_domain(""));
    }

    #[test]
    fn domain_probe_matches_exact_rules() {
        let mut b = FstBuilder::new();
        b.insert_exact_domain("login.corp.net");
        let blob = b.build().unwrap();
        let fst = FstReader::new(&blob).unwrap();

        assert!(fst.contains_domain("login.corp.net"));
        // Exact keys do not cover subdomains.
        assert!(!fst.contains_domain("sso.login.corp.net"));
        assert!(!fst.contains_domain("corp.net"));
    }

    #[test]
    fn leading_dot_query_is_verbatim() {
        let mut b = FstBuilder::new();
        b.insert_suffix_domain("foo.com");
        let blob = b.build().unwrap();
        let fst = FstReader::new(&blob).unwrap();

        // ".foo.com" keeps its dot; the trim loop still reaches "foo.com".
        assert!(fst.contains_domain(".foo.com"));
    }

    #[test]
    fn single_label_query() {
        let mut b = FstBuilder::new();
        b.insert_suffix_domain("lan");
        let blob = b.build().unwrap();
        let fst = FstReader::new(&blob).unwrap();

        assert!(fst.contains_domain("lan"));
        assert!(fst.contains_domain("printer.lan"));
        assert!(!fst.contains_domain("wlan"));
    }

    #[test]
    fn empty_set() {
        let blob = FstBuilder::new().build().unwrap();
        let fst = FstReader::new(&blob).unwrap();
        assert!(!fst.contains(b"anything"));
        assert!(!fst.contains_domain("anything.com"));
    }

    #[test]
    fn reader_rejects_short_and_wrong_version() {
        assert!(FstReader::new(&[0u8; 35]).is_err());

        let mut blob = build(&["abc"]);
        let base = blob.len() - TRAILER_LEN;
        blob[base..base + 8].copy_from_slice(&2u64.to_le_bytes());
        assert!(FstReader::new(&blob).is_err());
    }

    #[test]
    fn corrupted_nodes_answer_false_without_panic() {
        let mut blob = build(&["moc.gnib.", "gro.ikiw"]);
        // Stomp over the node area; trailer stays intact so construction
        // succeeds and every probe must degrade to a miss or a harmless hit.
        let node_end = blob.len() - TRAILER_LEN;
        for i in 0..node_end {
            blob[i] = 0xFF;
        }
        let fst = FstReader::new(&blob).unwrap();
        assert!(!fst.contains(b"moc.gnib."));
    }

    #[test]
    fn root_address_out_of_bounds_answers_false() {
        let mut blob = build(&["abc"]);
        let base = blob.len() - TRAILER_LEN;
        blob[base + 16..base + 24].copy_from_slice(&u64::MAX.to_le_bytes());
        let fst = FstReader::new(&blob).unwrap();
        assert!(!fst.contains(b"abc"));
    }

    #[test]
    fn large_set() {
        let mut b = FstBuilder::new();
        for i in 0..5000 {
            b.insert_suffix_domain(&format!("host{i}.example.com"));
        }
        assert_eq!(b.len(), 5000);
        let blob = b.build().unwrap();
        let fst = FstReader::new(&blob).unwrap();
        assert!(fst.contains_domain("host0.example.com"));
        assert!(fst.contains_domain("www.host4999.example.com"));
        assert!(!fst.contains_domain("host5000.example.com"));
    }
}
