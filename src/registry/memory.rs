//! In-memory registries for exercising the publish path without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Error};
use bytes::Bytes;

use crate::container_specs::media_types::{DOCKER_CONFIG, DOCKER_MANIFEST_LIST, OCI_CONFIG, OCI_INDEX};
use crate::container_specs::MediaType;
use crate::digest::Digest;
use crate::layer::{Layer, StaticLayer};
use crate::progress::ProgressSink;
use crate::reference::Reference;

use super::{
    BlobStore, ContentAndContentType, CopyOperations, Registry, RegistryCore, RegistryName,
    RegistryProvider,
};

#[derive(Default)]
struct Repository {
    blobs: HashMap<Digest, Bytes>,
    manifests: HashMap<String, (String, Bytes)>,
    fail_uploads: Option<String>,
    blob_uploads: usize,
}

// every repository on every host, keyed by (host, repository)
type World = Arc<Mutex<HashMap<(String, String), Repository>>>;

pub(crate) struct MemoryRegistry {
    host: String,
    name: String,
    world: World,
}

impl MemoryRegistry {
    pub(crate) fn new(host: &str, name: &str) -> MemoryRegistry {
        MemoryRegistry {
            host: host.to_string(),
            name: name.to_string(),
            world: Default::default(),
        }
    }

    pub(crate) fn on_same_host(other: &MemoryRegistry, name: &str) -> MemoryRegistry {
        MemoryRegistry {
            host: other.host.clone(),
            name: name.to_string(),
            world: Arc::clone(&other.world),
        }
    }

    fn with_repository<R>(&self, f: impl FnOnce(&mut Repository) -> R) -> R {
        let mut world = self.world.lock().unwrap();
        f(world
            .entry((self.host.clone(), self.name.clone()))
            .or_default())
    }

    pub(crate) fn has_blob(&self, digest: &Digest) -> bool {
        self.with_repository(|r| r.blobs.contains_key(digest))
    }

    pub(crate) fn blob_uploads(&self) -> usize {
        self.with_repository(|r| r.blob_uploads)
    }

    pub(crate) fn fail_uploads(&self, message: &str) {
        self.with_repository(|r| r.fail_uploads = Some(message.to_string()));
    }

    pub(crate) fn put_blob(&self, content: Bytes) -> Digest {
        let digest = Digest::sha256(&content);
        self.with_repository(|r| r.blobs.insert(digest.clone(), content));
        digest
    }

    /// Stores a manifest under its digest and, when given, a tag.
    pub(crate) fn put_manifest(&self, tag: Option<&str>, media_type: &str, content: Bytes) -> Digest {
        let digest = Digest::sha256(&content);
        self.with_repository(|r| {
            let entry = (media_type.to_string(), content);
            if let Some(tag) = tag {
                r.manifests.insert(tag.to_string(), entry.clone());
            }
            r.manifests.insert(digest.to_string(), entry);
        });
        digest
    }
}

#[async_trait::async_trait]
impl RegistryCore for MemoryRegistry {
    fn registry_host(&self) -> String {
        self.host.clone()
    }

    fn registry_name(&self) -> RegistryName {
        RegistryName(self.name.clone())
    }

    async fn fetch_manifest(&self, reference: &str) -> Result<ContentAndContentType, Error> {
        self.with_repository(|r| r.manifests.get(reference).cloned())
            .map(|(content_type, content)| ContentAndContentType {
                content_type: Some(content_type),
                content,
            })
            .ok_or_else(|| anyhow!("MANIFEST_UNKNOWN: {}/{}:{}", self.host, self.name, reference))
    }

    async fn fetch_blob(&self, digest: &Digest) -> Result<Bytes, Error> {
        self.with_repository(|r| r.blobs.get(digest).cloned())
            .ok_or_else(|| anyhow!("BLOB_UNKNOWN: {}", digest))
    }

    async fn upload_manifest(
        &self,
        reference: &str,
        media_type: &str,
        manifest_bytes: Bytes,
    ) -> Result<(), Error> {
        if let Some(message) = self.with_repository(|r| r.fail_uploads.clone()) {
            bail!("{}", message);
        }
        self.put_manifest(Some(reference), media_type, manifest_bytes);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryRegistry {
    async fn blob_exists(&self, digest: &Digest) -> Result<bool, Error> {
        Ok(self.has_blob(digest))
    }

    async fn upload_blob(
        &self,
        digest: &Digest,
        content: Bytes,
        progress: Option<ProgressSink>,
    ) -> Result<(), Error> {
        if let Some(message) = self.with_repository(|r| r.fail_uploads.clone()) {
            bail!("{}", message);
        }
        let got = Digest::sha256(&content);
        if &got != digest {
            bail!("DIGEST_INVALID: expected {}, got {}", digest, got);
        }
        let len = content.len() as u64;
        self.with_repository(|r| {
            r.blob_uploads += 1;
            r.blobs.insert(got, content);
        });
        if let Some(progress) = progress {
            progress.advance(len).await;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CopyOperations for MemoryRegistry {
    async fn try_copy_from(
        &self,
        source_registry_name: &RegistryName,
        digest: &Digest,
    ) -> Result<(), Error> {
        let mut world = self.world.lock().unwrap();
        let content = world
            .get(&(self.host.clone(), source_registry_name.0.clone()))
            .and_then(|r| r.blobs.get(digest).cloned())
            .ok_or_else(|| anyhow!("BLOB_UNKNOWN: {} in {}", digest, source_registry_name))?;
        world
            .entry((self.host.clone(), self.name.clone()))
            .or_default()
            .blobs
            .insert(digest.clone(), content);
        Ok(())
    }
}

/// Hands out registries that all share one world.
#[derive(Default)]
pub(crate) struct MemoryRegistryProvider {
    world: World,
    connects: AtomicUsize,
}

impl MemoryRegistryProvider {
    pub(crate) fn registry(&self, host: &str, name: &str) -> Arc<MemoryRegistry> {
        Arc::new(MemoryRegistry {
            host: host.to_string(),
            name: name.to_string(),
            world: Arc::clone(&self.world),
        })
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RegistryProvider for MemoryRegistryProvider {
    async fn connect(&self, reference: &Reference) -> Result<Arc<dyn Registry>, Error> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.registry(reference.registry(), reference.repository_str()))
    }
}

pub(crate) struct SeededImage {
    pub manifest_bytes: Bytes,
    pub manifest_digest: Digest,
    pub config_bytes: Bytes,
    pub layer: StaticLayer,
}

fn seed_platform_image(
    registry: &MemoryRegistry,
    tag: Option<&str>,
    media_type: MediaType,
    architecture: &str,
) -> SeededImage {
    let layer = StaticLayer::from_tar(
        format!("base layer for {}", architecture).as_bytes(),
        media_type.layer_type(),
    )
    .unwrap();
    let config = serde_json::json!({
        "architecture": architecture,
        "os": "linux",
        "config": { "Env": ["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"] },
        "rootfs": { "type": "layers", "diff_ids": [layer.diff_id().to_string()] },
        "history": [{ "created_by": "ADD rootfs.tar /" }],
    });
    let config_bytes = Bytes::from(serde_json::to_vec(&config).unwrap());
    let config_digest = registry.put_blob(config_bytes.clone());
    registry.put_blob(layer.compressed().unwrap());

    let config_media_type = match media_type {
        MediaType::OciManifest => OCI_CONFIG,
        MediaType::DockerManifest => DOCKER_CONFIG,
    };
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": media_type.as_str(),
        "config": {
            "mediaType": config_media_type,
            "size": config_bytes.len(),
            "digest": config_digest.to_string(),
        },
        "layers": [{
            "mediaType": layer.media_type().as_str(),
            "size": layer.size(),
            "digest": layer.digest().to_string(),
        }],
    });
    let manifest_bytes = Bytes::from(serde_json::to_vec_pretty(&manifest).unwrap());
    let manifest_digest = registry.put_manifest(tag, media_type.as_str(), manifest_bytes.clone());

    SeededImage {
        manifest_bytes,
        manifest_digest,
        config_bytes,
        layer,
    }
}

/// Seeds a single-layer linux/amd64 image tagged `tag`.
pub(crate) fn seed_base_image(
    registry: &MemoryRegistry,
    tag: &str,
    media_type: MediaType,
) -> SeededImage {
    seed_platform_image(registry, Some(tag), media_type, "amd64")
}

/// Seeds an index tagged `tag` with arm64 and amd64 children; returns the amd64 child.
pub(crate) fn seed_index(registry: &MemoryRegistry, tag: &str, media_type: MediaType) -> SeededImage {
    let arm = seed_platform_image(registry, None, media_type, "arm64");
    let amd = seed_platform_image(registry, None, media_type, "amd64");
    let index_media_type = match media_type {
        MediaType::OciManifest => OCI_INDEX,
        MediaType::DockerManifest => DOCKER_MANIFEST_LIST,
    };
    let child = |seeded: &SeededImage, architecture: &str| {
        serde_json::json!({
            "mediaType": media_type.as_str(),
            "size": seeded.manifest_bytes.len(),
            "digest": seeded.manifest_digest.to_string(),
            "platform": { "architecture": architecture, "os": "linux" },
        })
    };
    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": index_media_type,
        "manifests": [child(&arm, "arm64"), child(&amd, "amd64")],
    });
    registry.put_manifest(
        Some(tag),
        index_media_type,
        Bytes::from(serde_json::to_vec(&index).unwrap()),
    );
    amd
}
