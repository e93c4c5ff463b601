use std::collections::BTreeMap;

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

pub const ANNOTATION_BASE_IMAGE_DIGEST: &str = "org.opencontainers.image.base.digest";
pub const ANNOTATION_BASE_IMAGE_NAME: &str = "org.opencontainers.image.base.name";

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub variant: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: Digest,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub platform: Option<Platform>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub annotations: Option<BTreeMap<String, String>>,

    // urls and anything newer than us is carried through as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, size: u64, digest: Digest) -> Descriptor {
        Descriptor {
            media_type: media_type.into(),
            size,
            digest,
            platform: None,
            annotations: None,
            extra: Default::default(),
        }
    }
}

/// A single-platform image manifest, OCI or docker schema 2.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u16,

    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none", default)]
    pub media_type: Option<String>,

    pub config: Descriptor,

    pub layers: Vec<Descriptor>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub annotations: Option<BTreeMap<String, String>>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    pub fn parse(manifest_bytes: &[u8]) -> Result<Manifest, Error> {
        let u: Manifest =
            serde_json::from_slice(manifest_bytes).context("Parsing image manifest")?;
        Ok(u)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(|v| v.as_str())
    }
}

/// OCI image index or docker manifest list.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct ImageIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u16,

    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none", default)]
    pub media_type: Option<String>,

    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    pub fn parse(index_bytes: &[u8]) -> Result<ImageIndex, Error> {
        let u: ImageIndex =
            serde_json::from_slice(index_bytes).context("Parsing image index")?;
        Ok(u)
    }

    pub fn find_platform(&self, os: &str, architecture: &str) -> Option<&Descriptor> {
        self.manifests.iter().find(|d| {
            d.platform
                .as_ref()
                .map(|p| p.os == os && p.architecture == architecture)
                .unwrap_or(false)
        })
    }
}
