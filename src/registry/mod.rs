mod http;
#[cfg(test)]
pub(crate) mod memory;
pub mod ops;

use std::sync::Arc;

use anyhow::Error;
use bytes::Bytes;

use crate::digest::Digest;
use crate::progress::ProgressSink;
use crate::reference::Reference;

#[derive(Debug, Clone)]
pub struct ContentAndContentType {
    pub content_type: Option<String>,
    pub content: Bytes,
}

/// Repository path within a registry, e.g. `library/busybox`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryName(pub String);

impl std::fmt::Display for RegistryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait::async_trait]
pub trait RegistryCore {
    /// Host (and port) of the registry this repository lives on.
    fn registry_host(&self) -> String;

    fn registry_name(&self) -> RegistryName;

    /// `reference` is a tag or a digest string.
    async fn fetch_manifest(&self, reference: &str) -> Result<ContentAndContentType, Error>;

    async fn fetch_blob(&self, digest: &Digest) -> Result<Bytes, Error>;

    async fn upload_manifest(
        &self,
        reference: &str,
        media_type: &str,
        manifest_bytes: Bytes,
    ) -> Result<(), Error>;
}

#[async_trait::async_trait]
pub trait BlobStore {
    async fn blob_exists(&self, digest: &Digest) -> Result<bool, Error>;

    async fn upload_blob(
        &self,
        digest: &Digest,
        content: Bytes,
        progress: Option<ProgressSink>,
    ) -> Result<(), Error>;
}

#[async_trait::async_trait]
pub trait CopyOperations {
    /// Asks the registry to mount `digest` from another repository on the same host.
    async fn try_copy_from(
        &self,
        source_registry_name: &RegistryName,
        digest: &Digest,
    ) -> Result<(), Error>;
}

pub trait Registry: RegistryCore + BlobStore + CopyOperations + Send + Sync {}

impl<T> Registry for T where T: RegistryCore + BlobStore + CopyOperations + Send + Sync {}

/// Opens a registry connection for the repository of a reference.
#[async_trait::async_trait]
pub trait RegistryProvider: Send + Sync {
    async fn connect(&self, reference: &Reference) -> Result<Arc<dyn Registry>, Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HttpRegistryProvider;

#[async_trait::async_trait]
impl RegistryProvider for HttpRegistryProvider {
    async fn connect(&self, reference: &Reference) -> Result<Arc<dyn Registry>, Error> {
        let inner_reg = http::HttpRegistry::from_maybe_domain_and_name(
            reference.registry_url(),
            reference.registry(),
            reference.repository_str(),
        )
        .await?;
        Ok(Arc::new(inner_reg))
    }
}
