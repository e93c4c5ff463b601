use crate::digest::Digest;
use crate::registry::{CopyOperations, RegistryName};
use anyhow::{bail, Error};

use http::StatusCode;

use super::RETRIES;

#[async_trait::async_trait]
impl CopyOperations for super::HttpRegistry {
    async fn try_copy_from(
        &self,
        source_registry_name: &RegistryName,
        digest: &Digest,
    ) -> Result<(), Error> {
        let uri = self.repository_uri_from_path(format!(
            "/blobs/uploads/?mount={}&from={}",
            digest, source_registry_name
        ))?;

        let r = self
            .http_client
            .request_simple(&uri, http::Method::POST, RETRIES)
            .await?;

        // A 202 means the registry opened a regular upload session instead of mounting.
        if r.status() == StatusCode::CREATED {
            Ok(())
        } else {
            bail!("Failed to request {:#?} -- {:#?}", uri, r.status().as_str())
        }
    }
}
