use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{bail, Context, Error};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::digest::Digest;
use crate::image::{Image, ImageLayer};
use crate::layer::Layer;
use crate::progress::{ProgressSink, Update};

use super::Registry;

pub const BYTES_IN_MB: u64 = 1024 * 1024;
pub const BYTES_IN_GB: u64 = BYTES_IN_MB * 1024;

/// Blobs made present at the destination at the same time.
pub const UPLOAD_CONCURRENCY: usize = 4;

pub fn size_to_string(size: u64) -> String {
    let gb = size / BYTES_IN_GB;
    let mb = size / BYTES_IN_MB;
    if gb > 0 {
        let gb_flt = (gb as f64) + ((mb % 1024) as f64) / 1024_f64;
        format!("{} GB", gb_flt)
    } else {
        format!("{} MB", mb)
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ActionsTaken {
    already_present: usize,
    already_present_size: u64,

    mounted_from_source_repository: usize,
    mounted_from_source_repository_size: u64,

    uploaded_from_local: usize,
    uploaded_from_local_size: u64,

    uploaded_from_source_repository: usize,
    uploaded_from_source_repository_size: u64,
}

impl std::fmt::Display for ActionsTaken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lines = [
            format!(
                "Already present on remote:                 {} entries, {}",
                self.already_present,
                size_to_string(self.already_present_size)
            ),
            format!(
                "Mounted from base repository:              {} entries, {}",
                self.mounted_from_source_repository,
                size_to_string(self.mounted_from_source_repository_size)
            ),
            format!(
                "Uploaded from local layers:                {} entries, {}",
                self.uploaded_from_local,
                size_to_string(self.uploaded_from_local_size)
            ),
            format!(
                "Downloaded from base and uploaded:         {} entries, {}",
                self.uploaded_from_source_repository,
                size_to_string(self.uploaded_from_source_repository_size)
            ),
        ];
        write!(f, "{}", lines.join("\n"))
    }
}

impl ActionsTaken {
    pub fn merge(&mut self, other: &ActionsTaken) {
        self.already_present += other.already_present;
        self.already_present_size += other.already_present_size;

        self.mounted_from_source_repository += other.mounted_from_source_repository;
        self.mounted_from_source_repository_size += other.mounted_from_source_repository_size;

        self.uploaded_from_local += other.uploaded_from_local;
        self.uploaded_from_local_size += other.uploaded_from_local_size;

        self.uploaded_from_source_repository += other.uploaded_from_source_repository;
        self.uploaded_from_source_repository_size += other.uploaded_from_source_repository_size;
    }

    pub fn blobs_handled(&self) -> usize {
        self.already_present
            + self.mounted_from_source_repository
            + self.uploaded_from_local
            + self.uploaded_from_source_repository
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.uploaded_from_local_size + self.uploaded_from_source_repository_size
    }

    fn already_present(blob: &PendingBlob) -> ActionsTaken {
        ActionsTaken {
            already_present: 1,
            already_present_size: blob.size,
            ..Default::default()
        }
    }

    fn mounted_from_source_repository(blob: &PendingBlob) -> ActionsTaken {
        ActionsTaken {
            mounted_from_source_repository: 1,
            mounted_from_source_repository_size: blob.size,
            ..Default::default()
        }
    }

    fn uploaded_from_local(blob: &PendingBlob) -> ActionsTaken {
        ActionsTaken {
            uploaded_from_local: 1,
            uploaded_from_local_size: blob.size,
            ..Default::default()
        }
    }

    fn uploaded_from_source_repository(blob: &PendingBlob) -> ActionsTaken {
        ActionsTaken {
            uploaded_from_source_repository: 1,
            uploaded_from_source_repository_size: blob.size,
            ..Default::default()
        }
    }
}

enum BlobSource {
    Local(Arc<dyn Layer>),
    Config(Bytes),
    Remote(Arc<dyn Registry>),
}

type BlobFuture<'a> = Pin<Box<dyn Future<Output = Result<ActionsTaken, Error>> + Send + 'a>>;

struct PendingBlob {
    digest: Digest,
    size: u64,
    source: BlobSource,
}

fn pending_blobs(image: &Image) -> Vec<PendingBlob> {
    let mut seen = HashSet::new();
    let mut blobs = Vec::new();
    for layer in image.layers() {
        if !seen.insert(layer.digest()) {
            continue;
        }
        let source = match layer {
            ImageLayer::Base { source, .. } => BlobSource::Remote(Arc::clone(source)),
            ImageLayer::Appended(layer) => BlobSource::Local(Arc::clone(layer)),
        };
        blobs.push(PendingBlob {
            digest: layer.digest(),
            size: layer.size(),
            source,
        });
    }

    let config = image.config_bytes().clone();
    if seen.insert(image.manifest().config.digest.clone()) {
        blobs.push(PendingBlob {
            digest: image.manifest().config.digest.clone(),
            size: config.len() as u64,
            source: BlobSource::Config(config),
        });
    }
    blobs
}

async fn ensure_present(
    blob: &PendingBlob,
    destination: &Arc<dyn Registry>,
    progress: &ProgressSink,
) -> Result<ActionsTaken, Error> {
    if destination.blob_exists(&blob.digest).await? {
        progress.advance(blob.size).await;
        return Ok(ActionsTaken::already_present(blob));
    }

    match &blob.source {
        BlobSource::Local(layer) => {
            tracing::debug!(digest = %blob.digest, "Uploading appended layer");
            destination
                .upload_blob(&blob.digest, layer.compressed()?, Some(progress.clone()))
                .await?;
            Ok(ActionsTaken::uploaded_from_local(blob))
        }
        BlobSource::Config(content) => {
            destination
                .upload_blob(&blob.digest, content.clone(), Some(progress.clone()))
                .await?;
            Ok(ActionsTaken::uploaded_from_local(blob))
        }
        BlobSource::Remote(source) => {
            let source_name = source.registry_name();
            if source.registry_host() == destination.registry_host()
                && source_name != destination.registry_name()
            {
                if let Err(e) = destination.try_copy_from(&source_name, &blob.digest).await {
                    tracing::debug!(
                        digest = %blob.digest,
                        from = %source_name,
                        to = %destination.registry_name(),
                        error = %e,
                        "Failed to mount a missing digest between repositories, will continue"
                    );
                }
                if destination.blob_exists(&blob.digest).await? {
                    progress.advance(blob.size).await;
                    return Ok(ActionsTaken::mounted_from_source_repository(blob));
                }
            }

            tracing::debug!(
                digest = %blob.digest,
                size = %size_to_string(blob.size),
                "Downloading from base registry"
            );
            let content = source
                .fetch_blob(&blob.digest)
                .await
                .with_context(|| format!("Fetching {} from {}", blob.digest, source_name))?;
            if content.len() as u64 != blob.size {
                bail!(
                    "Blob {} from {} is {} bytes, but the manifest says {}",
                    blob.digest,
                    source_name,
                    content.len(),
                    blob.size
                );
            }
            destination
                .upload_blob(&blob.digest, content, Some(progress.clone()))
                .await?;
            Ok(ActionsTaken::uploaded_from_source_repository(blob))
        }
    }
}

/// Writes `image` to `destination` under `reference` (a tag or digest).
///
/// Every blob is made present before the manifest is uploaded. Progress goes
/// out on `updates`; a failure is posted there as well before it is returned.
pub async fn write_image(
    destination: Arc<dyn Registry>,
    image: &Image,
    reference: &str,
    updates: mpsc::Sender<Update>,
) -> Result<ActionsTaken, Error> {
    let blobs = pending_blobs(image);
    let total = blobs.iter().map(|b| b.size).sum();
    let progress = ProgressSink::new(updates, total);

    match write_blobs_then_manifest(&destination, image, reference, &blobs, &progress).await {
        Ok(actions) => Ok(actions),
        Err(e) => {
            progress.fail(&e).await;
            Err(e)
        }
    }
}

async fn write_blobs_then_manifest(
    destination: &Arc<dyn Registry>,
    image: &Image,
    reference: &str,
    blobs: &[PendingBlob],
    progress: &ProgressSink,
) -> Result<ActionsTaken, Error> {
    let pending: Vec<BlobFuture<'_>> = blobs
        .iter()
        .map(|blob| {
            Box::pin(async move {
                ensure_present(blob, destination, progress)
                    .await
                    .with_context(|| format!("Ensuring {} is present", blob.digest))
            }) as BlobFuture<'_>
        })
        .collect();
    let mut results = futures::stream::iter(pending).buffer_unordered(UPLOAD_CONCURRENCY);

    let mut actions_taken = ActionsTaken::default();
    while let Some(result) = results.next().await {
        actions_taken.merge(&result?);
    }
    drop(results);

    let manifest_bytes = image.raw_manifest()?;
    destination
        .upload_manifest(reference, image.media_type().as_str(), manifest_bytes)
        .await
        .context("Uploading manifest")?;

    Ok(actions_taken)
}
