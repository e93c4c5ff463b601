use std::fmt;

use anyhow::{bail, Error};

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Everything we are willing to receive when fetching a base manifest.
pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json, application/vnd.oci.image.index.v1+json, application/vnd.docker.distribution.manifest.list.v2+json";

/// Manifest format of a single-platform image.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum MediaType {
    OciManifest,
    DockerManifest,
}

impl MediaType {
    pub fn parse(media_type: &str) -> Result<MediaType, Error> {
        match strip_parameters(media_type) {
            OCI_MANIFEST => Ok(MediaType::OciManifest),
            DOCKER_MANIFEST => Ok(MediaType::DockerManifest),
            other => bail!("Unsupported image manifest media type {:?}", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::OciManifest => OCI_MANIFEST,
            MediaType::DockerManifest => DOCKER_MANIFEST,
        }
    }

    /// The layer media type that must accompany this manifest format.
    pub fn layer_type(&self) -> LayerType {
        match self {
            MediaType::OciManifest => LayerType::OciLayer,
            MediaType::DockerManifest => LayerType::DockerLayer,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum LayerType {
    OciLayer,
    DockerLayer,
}

impl LayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::OciLayer => OCI_LAYER_GZIP,
            LayerType::DockerLayer => DOCKER_LAYER_GZIP,
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_index(media_type: &str) -> bool {
    matches!(strip_parameters(media_type), OCI_INDEX | DOCKER_MANIFEST_LIST)
}

// Content-Type headers may carry parameters such as a charset.
fn strip_parameters(media_type: &str) -> &str {
    media_type.split(';').next().unwrap_or_default().trim()
}
