//! validated spiffe trust domain names and spiffe ids.
//!
//! trust domain names must:
//! - be 1-255 characters long
//! - contain only lowercase letters, digits, dots, hyphens and underscores
//!
//! spiffe ids have the form `spiffe://<trust-domain>/<path>` where every path
//! segment is non-empty, is not `.` or `..`, and uses letters, digits, `.`, `-` or `_`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// maximum length of a trust domain name.
pub const MAX_TRUST_DOMAIN_LEN: usize = 255;

const SCHEME: &str = "spiffe://";

/// path of the spiffe id issued to an onboarded harvester.
pub const HARVESTER_PATH: &str = "/harvester";

/// a validated spiffe trust domain name such as `example.org`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrustDomainName(String);

impl TrustDomainName {
    /// create a trust domain name, validating the format.
    pub fn new(s: impl Into<String>) -> Result<Self, Error> {
        let s = s.into();
        Self::validate(&s)?;
        Ok(Self(s))
    }

    /// get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// consume the name and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// the `spiffe://<name>` id of the trust domain itself.
    pub fn id(&self) -> SpiffeId {
        SpiffeId {
            trust_domain: self.clone(),
            path: String::new(),
        }
    }

    /// the spiffe id a harvester of this trust domain is identified by.
    pub fn harvester_id(&self) -> SpiffeId {
        SpiffeId {
            trust_domain: self.clone(),
            path: HARVESTER_PATH.to_string(),
        }
    }

    fn validate(s: &str) -> Result<(), Error> {
        if s.is_empty() {
            return Err(Error::InvalidTrustDomain(s.to_string(), "empty"));
        }
        if s.len() > MAX_TRUST_DOMAIN_LEN {
            return Err(Error::InvalidTrustDomain(s.to_string(), "too long"));
        }
        if !s.chars().all(is_trust_domain_char) {
            return Err(Error::InvalidTrustDomain(
                s.to_string(),
                "only lowercase letters, digits, '.', '-' and '_' are allowed",
            ));
        }
        Ok(())
    }
}

fn is_trust_domain_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_')
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

impl fmt::Display for TrustDomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TrustDomainName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TrustDomainName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<TrustDomainName> for String {
    fn from(name: TrustDomainName) -> Self {
        name.0
    }
}

impl AsRef<str> for TrustDomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// a parsed spiffe id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpiffeId {
    trust_domain: TrustDomainName,
    path: String,
}

impl SpiffeId {
    /// parse a `spiffe://` uri.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::InvalidSpiffeId(s.to_string(), "scheme must be spiffe://"))?;

        let (td, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        let trust_domain = TrustDomainName::new(td)
            .map_err(|_| Error::InvalidSpiffeId(s.to_string(), "invalid trust domain"))?;

        if !path.is_empty() {
            for segment in path[1..].split('/') {
                if segment.is_empty() {
                    return Err(Error::InvalidSpiffeId(s.to_string(), "empty path segment"));
                }
                if segment == "." || segment == ".." {
                    return Err(Error::InvalidSpiffeId(
                        s.to_string(),
                        "dot segments are not allowed",
                    ));
                }
                if !segment.chars().all(is_path_char) {
                    return Err(Error::InvalidSpiffeId(
                        s.to_string(),
                        "invalid character in path",
                    ));
                }
            }
        }

        Ok(Self {
            trust_domain,
            path: path.to_string(),
        })
    }

    /// the trust domain this id belongs to.
    pub fn trust_domain(&self) -> &TrustDomainName {
        &self.trust_domain
    }

    /// the path component, empty or starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", SCHEME, self.trust_domain, self.path)
    }
}

impl FromStr for SpiffeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
