mod blob;
mod copy_operations;
mod http_cli;
mod util;

use std::time::Duration;

use anyhow::{bail, Context, Error};
use bytes::Bytes;
use http::Uri;
use http::{Response, StatusCode};
use hyper::{Body, Client};
use hyper_rustls::ConfigBuilderExt;
use tokio::time::timeout;

use crate::container_specs::media_types::MANIFEST_ACCEPT;
use crate::digest::Digest;

use self::http_cli::HttpCli;
use self::util::{dump_body_to_string, request_path_in_repository};

use super::{ContentAndContentType, RegistryName};

const PING_TIMEOUT: Duration = Duration::from_millis(4000);
const RETRIES: usize = 3;

pub struct HttpRegistry {
    registry_uri: Uri,
    host: String,
    name: String,
    http_client: HttpCli,
}

#[async_trait::async_trait]
impl super::RegistryCore for HttpRegistry {
    fn registry_host(&self) -> String {
        self.host.clone()
    }

    fn registry_name(&self) -> RegistryName {
        RegistryName(self.name.clone())
    }

    async fn fetch_manifest(&self, reference: &str) -> Result<ContentAndContentType, Error> {
        let uri = self.repository_uri_from_path(format!("/manifests/{}", reference))?;
        request_path_in_repository(&self.http_client, &uri, MANIFEST_ACCEPT, RETRIES).await
    }

    async fn fetch_blob(&self, digest: &Digest) -> Result<Bytes, Error> {
        self.download_blob(digest).await
    }

    async fn upload_manifest(
        &self,
        reference: &str,
        media_type: &str,
        manifest_bytes: Bytes,
    ) -> Result<(), Error> {
        let put_target_uri = self.repository_uri_from_path(format!("/manifests/{}", reference))?;
        let media_type = media_type.to_string();

        let mut r: Response<Body> = self
            .http_client
            .request(
                &put_target_uri,
                (media_type, manifest_bytes),
                |(media_type, manifest_bytes), builder| async move {
                    builder
                        .method(http::Method::PUT)
                        .header(http::header::CONTENT_TYPE, media_type)
                        .body(Body::from(manifest_bytes))
                        .map_err(|e| e.into())
                },
                RETRIES,
            )
            .await
            .with_context(|| format!("Uploading manifest to {}", put_target_uri))?;

        if r.status() != StatusCode::CREATED {
            bail!(
                "Expected to get status code CREATED, but got {:#?}, hitting url: {:#?}\nResponse:{}",
                r.status(),
                put_target_uri,
                dump_body_to_string(&mut r).await?
            )
        }

        match r.headers().get(http::header::LOCATION) {
            Some(location_header) => {
                tracing::debug!(
                    repository = %self.name,
                    reference = reference,
                    location = location_header.to_str()?,
                    "Uploaded manifest"
                );
                Ok(())
            }
            None => bail!(
                "We got a positive response code: {:#?}, however we are missing the location header which the distribution API requires",
                r.status()
            ),
        }
    }
}

impl HttpRegistry {
    pub(crate) async fn from_maybe_domain_and_name<S: AsRef<str> + Send, S2: AsRef<str> + Send, S3: AsRef<str> + Send>(
        registry_base: S,
        host: S2,
        name: S3,
    ) -> Result<HttpRegistry, Error> {
        let mut uri_parts = registry_base.as_ref().parse::<Uri>()?.into_parts();
        // default to using https
        if uri_parts.scheme.is_none() {
            uri_parts.scheme = Some("https".parse()?);
        }
        uri_parts.path_and_query = Some("/".try_into()?);

        let registry_uri = Uri::from_parts(uri_parts)?;

        // plain http registries never verify a certificate
        let tls = if registry_uri.scheme_str() == Some("http") {
            rustls::ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth()
        } else {
            rustls::ClientConfig::builder()
                .with_safe_defaults()
                .with_native_roots()
                .with_no_client_auth()
        };

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build();

        let inner_client: Client<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>> =
            Client::builder().build::<_, hyper::Body>(https);
        tracing::debug!(registry = %registry_uri, repository = name.as_ref(), "Connecting to registry");
        let reg = HttpRegistry {
            registry_uri: registry_uri.clone(),
            host: host.as_ref().to_string(),
            name: name.as_ref().to_string(),
            http_client: HttpCli::new(inner_client),
        };

        let req_uri = reg.v2_from_path("/")?;
        let request = http::request::Builder::default()
            .method(http::Method::GET)
            .uri(req_uri)
            .body(Body::empty())?;

        let mut resp = match timeout(PING_TIMEOUT, reg.http_client.inner_client.request(request)).await
        {
            Err(_) => bail!(
                "Timed out connecting to registry {:?}, after waiting {} seconds.",
                registry_uri,
                PING_TIMEOUT.as_secs()
            ),
            Ok(e) => e.with_context(|| format!("Connecting to registry {:?}", registry_uri))?,
        };

        if resp
            .headers()
            .get("docker-distribution-api-version")
            .is_none()
        {
            let body = dump_body_to_string(&mut resp).await.unwrap_or_default();
            bail!("Failed to request base url of registry. Registry configuration likely broken: {:#?}, status code: {:?}, body:\n{:?}", registry_uri, resp.status(), body);
        }

        Ok(reg)
    }

    fn v2_from_path<S: AsRef<str>>(&self, path: S) -> Result<Uri, Error> {
        let mut uri_builder = self.registry_uri.clone().into_parts();
        let path_ext = path.as_ref();
        if !path_ext.is_empty() && !path_ext.starts_with('/') {
            bail!("Invalid path reference, should start in a /")
        }
        uri_builder.path_and_query = Some(format!("/v2{}", path_ext).try_into()?);

        let query_uri = Uri::from_parts(uri_builder)?;
        Ok(query_uri)
    }

    fn repository_uri_from_path<S: AsRef<str>>(&self, path: S) -> Result<Uri, Error> {
        let path_ext = path.as_ref();
        if !path_ext.starts_with('/') {
            bail!("Invalid path reference, should start in a /")
        }
        self.v2_from_path(format!("/{}{}", self.name, path_ext))
    }
}
