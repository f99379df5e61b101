//! CIDR parsing, delegated to the `ipnetwork` crate: subnet-mask
//! arithmetic is an external collaborator's job, not ours to reimplement.

use crate::{Addr, Error, Range};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An IPv4 CIDR block (address + prefix length).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr(Ipv4Network);

impl Cidr {
    /// Converts the block to the `[start, end)` range it covers.
    #[must_use]
    pub fn to_range(&self) -> Range {
        let start = u32::from(self.0.network());
        let end = start + self.0.size();
        Range::new(Addr(start), Addr(end))
    }

    /// The first usable address in the block (network address + 1) — the
    /// address an allocation from a freshly-donated block should hand out
    /// first.
    #[must_use]
    pub fn first_usable(&self) -> Addr {
        Addr(u32::from(self.0.network()) + 1)
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Ipv4Network>()
            .map(Cidr)
            .map_err(|e| Error::InvalidCidr(format!("{s}: {e}")))
    }
}

impl TryFrom<String> for Cidr {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> Self {
        cidr.0.to_string()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_converts_to_range() {
        let cidr: Cidr = "10.0.0.0/24".parse().unwrap();
        let range = cidr.to_range();
        assert_eq!(range.count(), 256);
        assert_eq!(cidr.first_usable(), Addr(u32::from(Ipv4Network::from_str("10.0.0.0/24").unwrap().network()) + 1));
    }

    #[test]
    fn rejects_invalid_cidr() {
        assert!("not-a-cidr".parse::<Cidr>().is_err());
    }
}
