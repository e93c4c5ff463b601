use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Error};

use crate::container_specs::media_types::is_index;
use crate::container_specs::{ImageIndex, MediaType};
use crate::digest::Digest;
use crate::error::AppendError;
use crate::image::Image;
use crate::reference::Reference;
use crate::registry::{ContentAndContentType, Registry};

/// Platform picked out of a multi-platform base.
pub const DEFAULT_OS: &str = "linux";
pub const DEFAULT_ARCHITECTURE: &str = "amd64";

fn check_digest(content: &ContentAndContentType, expected: &Digest) -> Result<(), Error> {
    let got = Digest::sha256(&content.content);
    if &got != expected {
        bail!("Manifest digest mismatch, expected {} but got {}", expected, got);
    }
    Ok(())
}

// Registries are not required to send a content type; the manifest names its own.
fn content_type(fetched: &ContentAndContentType) -> Option<String> {
    fetched.content_type.clone().or_else(|| {
        serde_json::from_slice::<serde_json::Value>(&fetched.content)
            .ok()
            .and_then(|v| v.get("mediaType")?.as_str().map(|s| s.to_string()))
    })
}

async fn fetch_image_manifest(
    registry: &Arc<dyn Registry>,
    reference: &Reference,
) -> Result<ContentAndContentType, Error> {
    let fetched = registry
        .fetch_manifest(&reference.identifier().to_string())
        .await?;
    if let Some(expected) = reference.digest() {
        check_digest(&fetched, expected)?;
    }

    match content_type(&fetched) {
        Some(ct) if is_index(&ct) => {
            let index = ImageIndex::parse(&fetched.content)?;
            let child = index
                .find_platform(DEFAULT_OS, DEFAULT_ARCHITECTURE)
                .ok_or_else(|| {
                    anyhow!(
                        "{} is a multi-platform image without a {}/{} entry",
                        reference,
                        DEFAULT_OS,
                        DEFAULT_ARCHITECTURE
                    )
                })?;
            tracing::debug!(
                digest = %child.digest,
                platform = %format!("{}/{}", DEFAULT_OS, DEFAULT_ARCHITECTURE),
                "Resolved base index to platform manifest"
            );
            let mut child_manifest = registry.fetch_manifest(&child.digest.to_string()).await?;
            check_digest(&child_manifest, &child.digest)?;
            if child_manifest.content_type.is_none() {
                child_manifest.content_type = Some(child.media_type.clone());
            }
            Ok(child_manifest)
        }
        _ => Ok(fetched),
    }
}

/// Pulls the base manifest and config. The layers stay on the base registry
/// until publish needs them.
pub(super) async fn fetch_base(
    registry: Arc<dyn Registry>,
    reference: &Reference,
) -> Result<Image, AppendError> {
    let pull_error = |source: Error| AppendError::Pull {
        reference: reference.to_string(),
        source,
    };

    let fetched = fetch_image_manifest(&registry, reference)
        .await
        .map_err(pull_error)?;

    let media_type = content_type(&fetched)
        .ok_or_else(|| anyhow!("Base manifest carries no media type"))
        .and_then(|ct| MediaType::parse(&ct))
        .map_err(|source| AppendError::MediaType {
            reference: reference.to_string(),
            source,
        })?;

    let manifest = crate::container_specs::Manifest::parse(&fetched.content).map_err(pull_error)?;
    let config = registry
        .fetch_blob(&manifest.config.digest)
        .await
        .context("Fetching base image config")
        .map_err(pull_error)?;

    Image::from_remote(media_type, fetched.content, config, registry).map_err(pull_error)
}
