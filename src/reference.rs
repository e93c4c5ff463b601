use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::digest::Digest;
use crate::error::AppendError;

/// Registry used when a reference carries no host, matching the docker CLI.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

pub const DEFAULT_TAG: &str = "latest";

lazy_static! {
    static ref REGISTRY_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9](?:[a-zA-Z0-9.-]*[a-zA-Z0-9])?(?::[0-9]+)?$").unwrap();
    static ref REPOSITORY_COMPONENT_REGEX: Regex =
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap();
    static ref TAG_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Tag(String),
    Digest(Digest),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Tag(t) => write!(f, "{}", t),
            Identifier::Digest(d) => write!(f, "{}", d),
        }
    }
}

/// A parsed registry coordinate. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    registry: String,
    repository: String,
    identifier: Identifier,
}

impl Reference {
    /// Parses `[registry/]repository[:tag][@digest]`.
    ///
    /// - `busybox` → `index.docker.io/library/busybox:latest`
    /// - `localhost:5000/img:test` → registry `localhost:5000`, repository `img`
    /// - `ghcr.io/org/app@sha256:...` → digest reference
    ///
    /// When both a tag and a digest are present the digest wins.
    pub fn parse(reference: &str) -> Result<Reference, AppendError> {
        let invalid = |reason: &str| AppendError::invalid_reference(reference, reason);

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }
        if reference.trim() != reference {
            return Err(invalid("surrounding whitespace"));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest_str)) => {
                let digest = digest_str
                    .parse::<Digest>()
                    .map_err(|e| invalid(&e.to_string()))?;
                (name_tag, Some(digest))
            }
            None => (reference, None),
        };

        let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let colon = last_slash + colon;
                (&name_tag[..colon], Some(&name_tag[colon + 1..]))
            }
            None => (name_tag, None),
        };

        let (registry, repository) = split_registry_repository(name);

        if !REGISTRY_REGEX.is_match(registry) {
            return Err(invalid(&format!("invalid registry host {:?}", registry)));
        }
        if repository.is_empty() {
            return Err(invalid("empty repository"));
        }
        for component in repository.split('/') {
            if !REPOSITORY_COMPONENT_REGEX.is_match(component) {
                return Err(invalid(&format!(
                    "invalid repository component {:?}, must be lowercase alphanumerics and separators",
                    component
                )));
            }
        }

        let (registry, repository) = if registry == "docker.io" || registry == DEFAULT_REGISTRY {
            let repository = if repository.contains('/') {
                repository.to_string()
            } else {
                format!("library/{}", repository)
            };
            (DEFAULT_REGISTRY.to_string(), repository)
        } else {
            (registry.to_string(), repository.to_string())
        };

        let identifier = match (digest, tag) {
            (Some(digest), _) => Identifier::Digest(digest),
            (None, Some(tag)) => {
                if !TAG_REGEX.is_match(tag) {
                    return Err(invalid(&format!("invalid tag {:?}", tag)));
                }
                Identifier::Tag(tag.to_string())
            }
            (None, None) => Identifier::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Reference {
            registry,
            repository,
            identifier,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository_str(&self) -> &str {
        &self.repository
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn is_tag(&self) -> bool {
        matches!(self.identifier, Identifier::Tag(_))
    }

    pub fn digest(&self) -> Option<&Digest> {
        match &self.identifier {
            Identifier::Digest(d) => Some(d),
            Identifier::Tag(_) => None,
        }
    }

    /// Base url of the registry endpoint; plain http is only used for local registries.
    pub fn registry_url(&self) -> String {
        let host = self.registry.split(':').next().unwrap_or_default();
        if host == "localhost" || host == "127.0.0.1" {
            format!("http://{}", self.registry)
        } else {
            format!("https://{}", self.registry)
        }
    }
}

fn split_registry_repository(name: &str) -> (&str, &str) {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first, rest);
        }
    }
    (DEFAULT_REGISTRY, name)
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Tag(t) => write!(f, "{}/{}:{}", self.registry, self.repository, t),
            Identifier::Digest(d) => write!(f, "{}/{}@{}", self.registry, self.repository, d),
        }
    }
}
