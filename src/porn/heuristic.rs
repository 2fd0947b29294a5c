//! Pattern-based porn domain detection.
//!
//! Eight layers, evaluated in order, first hit wins. The ordering is a
//! fast-path early exit: most inputs leave at layers 1-2 through a single
//! regex. The contains-based layers only see domains that survived the
//! exclusions and missed the strong keywords. Patterns live in source, not
//! in data files: updates ship as a new binary and matching never
//! allocates.
//!
//! Layer map:
//! 1. false-positive exclusions (geographic `-sex` suffixes, adult
//!    education, macosx); a hit exits with `false`
//! 2. strong keywords, careful tokens and adult TLDs, in one regex
//! 3. `3x` prefix
//! 4. explicit terminology
//! 5. compound terms, which re-admit risky substrings (`ass`, `tube`,
//!    `tit`) only inside discriminating combinations
//! 6. verb+noun pairs: concatenated, separated or with up to 4 filler
//!    characters between the tokens
//! 7. repetition patterns
//! 8. `false`

use once_cell::sync::Lazy;
use regex::Regex;

/// Platform brands and tokens that are porn with near certainty.
const STRONG_KEYWORDS: &[&str] = &[
    "porn",
    "hentai",
    "xnxx",
    "xhamster",
    "xvideo",
    "redtube",
    "youporn",
    "spankbang",
    "brazzers",
    "bangbros",
    "chaturbate",
    "onlyfans",
    "livejasmin",
    "bongacams",
    "stripchat",
    "manyvids",
    "camsoda",
    "myfreecams",
    "tnaflix",
    "eporner",
    "youjizz",
];

/// High-frequency tokens that need the layer-1 exclusions first:
/// "sex" appears in essex/middlesex/sussex/wessex, "adult" in adult
/// education, "xxx" in macosx-adjacent names.
const CAREFUL_KEYWORDS: &[&str] = &["xxx", "sex", "adult"];

/// ICANN adult TLDs.
const ADULT_TLDS: &[&str] = &["xxx", "adult", "porn", "sex"];

/// Explicit terms frequent enough in the training corpus to stand alone.
const TERMINOLOGY: &[&str] = &[
    "fuck",
    "milf",
    "bdsm",
    "bukkake",
    "gangbang",
    "creampie",
    "cumshot",
    "blowjob",
    "handjob",
    "rimjob",
    "footjob",
    "deepthroat",
    "threesome",
    "foursome",
    "shemale",
    "futanari",
    "dildo",
    "strapon",
    "bondage",
    "femdom",
    "dominatrix",
    "voyeur",
    "upskirt",
    "hotwife",
    "cuckold",
    "swinger",
    "masturbat",
    "pussy",
    "slut",
    "whore",
    "nympho",
    "jizz",
    "smut",
    "xrated",
    "nsfw",
    "ahegao",
    "erotic",
    "striptease",
    "lapdance",
    "camwhore",
];

/// Compound strings whose components would be unacceptable alone.
/// `tube` and `ass` never match by themselves; `porntube` and `bigass`
/// are themselves the discriminator.
const COMPOUNDS: &[&str] = &[
    "sexcam",
    "sexcams",
    "sexchat",
    "sextube",
    "sexvideo",
    "freeporn",
    "livesex",
    "livecam",
    "livecams",
    "porntube",
    "xxxtube",
    "fucktube",
    "tubegalore",
    "camgirl",
    "camgirls",
    "webcamsex",
    "nudecam",
    "hotcams",
    "bigass",
    "phatass",
    "asslick",
    "bigtits",
    "bigboobs",
    "bigcock",
    "bigdick",
    "titfuck",
    "titjob",
];

/// Verb+noun pairs. Each pair matches concatenated, with a single
/// separator, or with at most 4 characters between the tokens.
const VERB_NOUN: &[(&str, &str)] = &[
    ("watch", "porn"),
    ("watch", "sex"),
    ("watch", "girl"),
    ("watch", "girls"),
    ("watch", "cam"),
    ("watch", "cams"),
    ("watch", "milf"),
    ("watch", "babe"),
    ("watch", "tits"),
    ("watch", "pussy"),
    ("free", "porn"),
    ("free", "sex"),
    ("free", "cam"),
    ("free", "cams"),
    ("free", "girl"),
    ("free", "girls"),
    ("free", "milf"),
    ("free", "pussy"),
    ("free", "tits"),
    ("free", "boobs"),
    ("free", "fuck"),
    ("free", "nudes"),
    ("live", "sex"),
    ("live", "cam"),
    ("live", "cams"),
    ("live", "girl"),
    ("live", "girls"),
    ("live", "porn"),
    ("live", "nude"),
    ("live", "babe"),
    ("live", "fuck"),
    ("hot", "sex"),
    ("hot", "porn"),
    ("hot", "girl"),
    ("hot", "girls"),
    ("hot", "babe"),
    ("hot", "babes"),
    ("hot", "milf"),
    ("hot", "wife"),
    ("hot", "moms"),
    ("hot", "teens"),
    ("hot", "pussy"),
    ("hot", "chick"),
    ("hot", "chicks"),
    ("sexy", "girl"),
    ("sexy", "girls"),
    ("sexy", "babe"),
    ("sexy", "babes"),
    ("sexy", "milf"),
    ("sexy", "teens"),
    ("nude", "girl"),
    ("nude", "girls"),
    ("nude", "babe"),
    ("nude", "babes"),
    ("nude", "cam"),
    ("nude", "cams"),
    ("nude", "milf"),
    ("nude", "teens"),
    ("nude", "pics"),
    ("nude", "photos"),
    ("naked", "girl"),
    ("naked", "girls"),
    ("naked", "babe"),
    ("naked", "babes"),
    ("naked", "milf"),
    ("naked", "teens"),
    ("naked", "moms"),
    ("naked", "wives"),
    ("dirty", "girl"),
    ("dirty", "girls"),
    ("dirty", "milf"),
    ("dirty", "talk"),
    ("dirty", "chat"),
    ("horny", "girl"),
    ("horny", "girls"),
    ("horny", "milf"),
    ("horny", "milfs"),
    ("horny", "mom"),
    ("horny", "moms"),
    ("horny", "teen"),
    ("horny", "teens"),
    ("horny", "wife"),
    ("horny", "babe"),
    ("naughty", "girl"),
    ("naughty", "girls"),
    ("naughty", "milf"),
    ("naughty", "mom"),
    ("naughty", "moms"),
    ("naughty", "teen"),
    ("naughty", "teens"),
    ("naughty", "babe"),
    ("naughty", "wife"),
    ("wild", "girl"),
    ("wild", "girls"),
    ("wild", "pussy"),
    ("amateur", "porn"),
    ("amateur", "sex"),
    ("amateur", "cam"),
    ("amateur", "cams"),
    ("amateur", "girl"),
    ("amateur", "girls"),
    ("amateur", "milf"),
    ("amateur", "wife"),
    ("amateur", "fuck"),
    ("suck", "dick"),
    ("suck", "cock"),
    ("lick", "pussy"),
    ("bang", "milf"),
    ("bang", "milfs"),
    ("bang", "teens"),
    ("bang", "babes"),
    ("bang", "moms"),
    ("bang", "wife"),
    ("cam", "girl"),
    ("cam", "girls"),
    ("cam", "babe"),
    ("cam", "babes"),
    ("cam", "sex"),
    ("cam", "show"),
    ("cam", "shows"),
    ("cam", "model"),
    ("cam", "models"),
    ("cam", "whore"),
    ("meet", "girls"),
    ("meet", "milf"),
    ("meet", "milfs"),
    ("meet", "sluts"),
    ("meet", "babes"),
    ("teen", "porn"),
    ("teen", "pussy"),
    ("teen", "tits"),
    ("girl", "porn"),
    ("granny", "porn"),
    ("granny", "sex"),
    ("granny", "tube"),
    ("mature", "porn"),
    ("mature", "tube"),
];

/// Character and word repetitions.
const REPETITIONS: &[&str] = &["xxx", "xxxxxx", "sexsex", "camcam", "girlgirl"];

/// Legitimate domains that embed porn-adjacent substrings.
static FALSE_POSITIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(essex|middlesex|sussex|wessex)\.|adult(education|learning)\.|macosx\.")
        .expect("false-positive pattern")
});

/// Strong keywords, careful tokens and adult TLDs in one pass.
static KEYWORD: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"(?i)({strong})|({careful})|\.({tld})$",
        strong = STRONG_KEYWORDS.join("|"),
        careful = CAREFUL_KEYWORDS.join("|"),
        tld = ADULT_TLDS.join("|"),
    );
    Regex::new(&pattern).expect("keyword pattern")
});

static PREFIX_3X: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^3x").expect("3x pattern"));

/// Heuristic porn classification of a domain name.
///
/// Designed to shed roughly half of a large porn-domain list before FST
/// storage while staying false-positive-free on common legitimate
/// domains. Case-insensitive; no per-call allocation.
pub fn is_porn_heuristic(domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }

    if FALSE_POSITIVE.is_match(domain) {
        return false;
    }

    if KEYWORD.is_match(domain) {
        return true;
    }

    if PREFIX_3X.is_match(domain) {
        return true;
    }

    let d = domain.as_bytes();

    if TERMINOLOGY.iter().any(|t| contains_fold(d, t.as_bytes())) {
        return true;
    }

    if COMPOUNDS.iter().any(|c| contains_fold(d, c.as_bytes())) {
        return true;
    }

    if VERB_NOUN
        .iter()
        .any(|(v, n)| verb_noun_hit(d, v.as_bytes(), n.as_bytes()))
    {
        return true;
    }

    if REPETITIONS.iter().any(|r| contains_fold(d, r.as_bytes())) {
        return true;
    }

    false
}

/// ASCII case-folding substring search. `needle` must be lowercase.
fn contains_fold(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| eq_fold(w, needle))
}

fn eq_fold(a: &[u8], lower: &[u8]) -> bool {
    a.iter()
        .zip(lower)
        .all(|(x, y)| x.to_ascii_lowercase() == *y)
}

/// One verb+noun pair in any of its three shapes: `verbnoun`,
/// `verb-noun` / `verb_noun` / `verb.noun`, or `verb????noun` with up to
/// four characters of filler. Every occurrence of the verb is considered.
fn verb_noun_hit(d: &[u8], verb: &[u8], noun: &[u8]) -> bool {
    if d.len() < verb.len() + noun.len() {
        return false;
    }
    let mut i = 0;
    while i + verb.len() <= d.len() {
        if eq_fold(&d[i..i + verb.len()], verb) {
            let after = &d[i + verb.len()..];
            if after.len() >= noun.len() {
                let max_skip = (after.len() - noun.len()).min(4);
                for skip in 0..=max_skip {
                    if eq_fold(&after[skip..skip + noun.len()], noun) {
                        return true;
                    }
                }
            }
        }
        i += 1;
    }
    false
}
