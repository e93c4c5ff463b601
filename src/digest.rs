use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error};
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::Visitor;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest as _;

lazy_static! {
    static ref DIGEST_REGEX: Regex =
        Regex::new(r"^(?P<algorithm>[a-z0-9]+):(?P<hash>[a-f0-9]{64})$").unwrap();
}

/// Content address of a manifest or blob. Only sha256 is produced or accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    hex: String,
}

impl Digest {
    pub fn sha256(content: &[u8]) -> Digest {
        let mut hasher = sha2::Sha256::new();
        hasher.update(content);
        Digest {
            hex: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn algorithm(&self) -> &str {
        "sha256"
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = match DIGEST_REGEX.captures(s) {
            Some(c) => c,
            None => bail!("invalid digest {:?}, expected <algorithm>:<64 hex chars>", s),
        };
        match &captures["algorithm"] {
            "sha256" => Ok(Digest {
                hex: captures["hash"].to_string(),
            }),
            other => bail!("unsupported digest algorithm {:?} in {:?}", other, s),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm(), self.hex)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Digest, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DigestVisitor;

        impl Visitor<'_> for DigestVisitor {
            type Value = Digest;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a sha256 digest string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Digest, E>
            where
                E: de::Error,
            {
                value.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(DigestVisitor)
    }
}
