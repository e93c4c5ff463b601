use anyhow::{bail, Context, Error};
use bytes::Bytes;
use http::StatusCode;
use http::Uri;

use crate::digest::Digest;
use crate::progress::ProgressSink;
use crate::registry::BlobStore;

use super::util::{body_to_bytes, dump_body_to_string};
use super::RETRIES;

/// Upload bodies are streamed in chunks of this size, one progress update per chunk.
pub(super) const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[async_trait::async_trait]
impl BlobStore for super::HttpRegistry {
    async fn blob_exists(&self, digest: &Digest) -> Result<bool, Error> {
        let uri = self.repository_uri_from_path(format!("/blobs/{}", digest))?;

        let mut r = self
            .http_client
            .request_simple(&uri, http::Method::HEAD, RETRIES)
            .await
            .context("testing if blob exists")?;

        if r.status() == StatusCode::NOT_FOUND {
            Ok(false)
        } else if r.status() == StatusCode::OK {
            Ok(true)
        } else {
            bail!(
                "Failed call for blob exists {:#?} -- {:#?}, body: {:#?}",
                uri,
                r.status().as_str(),
                dump_body_to_string(&mut r).await?
            )
        }
    }

    async fn upload_blob(
        &self,
        digest: &Digest,
        content: Bytes,
        progress: Option<ProgressSink>,
    ) -> Result<(), Error> {
        let post_target_uri = self.repository_uri_from_path("/blobs/uploads/")?;
        // We expect our POST request to get a location header of where to perform the real upload to.

        let mut r = self
            .http_client
            .request_simple(&post_target_uri, http::Method::POST, RETRIES)
            .await
            .with_context(|| {
                format!(
                    "Trying figure out http location for real upload target, posting to {}",
                    post_target_uri
                )
            })?;

        if r.status() != StatusCode::ACCEPTED {
            bail!(
                "Expected to get a ACCEPTED/202 for upload post request to {:?}, but got {:?}",
                post_target_uri,
                r.status()
            )
        }

        let location_uri = if let Some(location_header) = r.headers().get(http::header::LOCATION) {
            let location_str = location_header.to_str()?;
            let chr = if location_str.contains('?') { '&' } else { '?' };
            format!("{}{}digest={}", location_str, chr, digest).parse::<Uri>().with_context(|| format!("Unable to parse location header response when doing post for new upload, location header was {:?}", location_str))?
        } else {
            let body = dump_body_to_string(&mut r).await?;
            bail!("Missing Location header on upload session response, invalid response from server, body:\n{:#?}", body);
        };

        // Sometimes we can receive new URI's that don't contain hosts
        // we need to supply this information from the last URI we used in that case
        let location_uri = if location_uri.host().is_some() {
            location_uri
        } else {
            let mut parts = post_target_uri.into_parts();
            parts.path_and_query = location_uri.path_and_query().cloned();
            Uri::from_parts(parts).with_context(|| {
                format!(
                    "Constructed an invalid uri from parts, new uri: {:?}",
                    location_uri
                )
            })?
        };

        let length = content.len();
        // shared by every attempt of the PUT below
        let progress = progress.map(|p| p.upload(length as u64));
        let mut r = self
            .http_client
            .request(
                &location_uri,
                (content, progress),
                |(content, progress), builder| async move {
                    let content_length = content.len();
                    let stream = futures::stream::unfold(
                        (progress, content, 0usize),
                        |(progress, content, offset)| async move {
                            if offset >= content.len() {
                                return None;
                            }
                            let end = std::cmp::min(offset + UPLOAD_CHUNK_SIZE, content.len());
                            let chunk = content.slice(offset..end);
                            if let Some(progress) = &progress {
                                progress.reached(end as u64).await;
                            }
                            Some((
                                Ok::<Bytes, std::io::Error>(chunk),
                                (progress, content, end),
                            ))
                        },
                    );

                    builder
                        .method(http::Method::PUT)
                        .header(http::header::CONTENT_LENGTH, content_length)
                        .header(http::header::CONTENT_TYPE, "application/octet-stream")
                        .body(hyper::Body::wrap_stream(stream))
                        .map_err(|e| e.into())
                },
                RETRIES,
            )
            .await
            .context("Performing upload bytes operation")?;

        if r.status() != StatusCode::CREATED && r.status() != StatusCode::OK {
            bail!("Blob Upload: Expected to get status code CREATED, but got {:#?},\nUploading {}\nUploading to: {:#?}\nBody:\n{:#?}\nExpected length: {}", r.status(), digest, &location_uri, dump_body_to_string(&mut r).await?, length)
        }

        if let Some(location_header) = r.headers().get(http::header::LOCATION) {
            tracing::debug!(
                digest = %digest,
                location = location_header.to_str()?,
                "Blob upload complete"
            );
        } else {
            bail!(
                "Invalid server response, expected to get a location header for successful upload"
            );
        }

        Ok(())
    }
}

impl super::HttpRegistry {
    pub(super) async fn download_blob(&self, digest: &Digest) -> Result<Bytes, Error> {
        let uri = self.repository_uri_from_path(format!("/blobs/{}", digest))?;
        let mut response = self
            .http_client
            .request_simple(&uri, http::Method::GET, RETRIES)
            .await
            .context("Requesting blob real path")?;

        if response.status() != StatusCode::OK {
            bail!(
                "Attempted to download blob at uri {:#?}, but got status code {:#?}, body:{:#?}",
                uri,
                response.status(),
                dump_body_to_string(&mut response).await?
            )
        }

        let data = body_to_bytes(&mut response).await?;
        let got = Digest::sha256(&data);

        if &got != digest {
            bail!(
                "Download produced the incorrect sha. Expected {} -- Got {} / {} bytes",
                digest,
                got,
                data.len()
            )
        }
        Ok(data)
    }
}
