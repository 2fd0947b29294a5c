//! Routing verdicts.

use std::fmt;

/// The decision returned for every query: route directly, through the
/// proxy, or drop the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Target {
    /// Bypass the proxy
    Direct = 0,
    /// Route through the proxy
    #[default]
    Proxy = 1,
    /// Refuse the connection
    Reject = 2,
}

impl Target {
    /// Decode a persisted target byte. Unknown values decode as `Direct`.
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => Target::Proxy,
            2 => Target::Reject,
            _ => Target::Direct,
        }
    }

    /// The persisted byte form.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a policy name, mapping anything unknown to `Proxy`.
    ///
    /// The rule compiler uses this for Clash policy names, where custom
    /// proxy-group names all mean "send it through the proxy".
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "DIRECT" => Target::Direct,
            "REJECT" => Target::Reject,
            _ => Target::Proxy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Direct => "DIRECT",
            Target::Proxy => "PROXY",
            Target::Reject => "REJECT",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Target {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DIRECT" => Ok(Target::Direct),
            "PROXY" => Ok(Target::Proxy),
            "REJECT" => Ok(Target::Reject),
            other => Err(crate::Error::Config(format!("unknown target: {other}"))),
        }
    }
}

impl serde::Serialize for Target {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Target {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
