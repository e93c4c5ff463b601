use anyhow::{bail, Context, Error};
use bytes::Bytes;
use http::Uri;
use http::{Response, StatusCode};

use hyper::Body;

use crate::registry::ContentAndContentType;

use super::http_cli::HttpCli;

pub(super) async fn body_to_bytes(response: &mut Response<Body>) -> Result<Bytes, Error> {
    let body = std::mem::take(response.body_mut());
    hyper::body::to_bytes(body)
        .await
        .context("Reading response body")
}

pub(super) async fn dump_body_to_string(response: &mut Response<Body>) -> Result<String, Error> {
    let buffer = body_to_bytes(response).await?;
    let metadata = std::str::from_utf8(&buffer)?;
    Ok(metadata.to_string())
}

pub(super) async fn request_path_in_repository(
    client: &HttpCli,
    uri: &Uri,
    accept: &'static str,
    retries: usize,
) -> Result<ContentAndContentType, Error> {
    let mut r = client
        .request(
            uri,
            accept,
            |accept, builder| async move {
                builder
                    .method(http::Method::GET)
                    .header(http::header::ACCEPT, accept)
                    .body(Body::empty())
                    .map_err(|e| e.into())
            },
            retries,
        )
        .await?;
    let content = body_to_bytes(&mut r).await?;

    let status = r.status();
    if status != StatusCode::OK {
        bail!(
            "Request to {:#?} failed, code: {:?}; body content:\n{:#?}",
            uri,
            status,
            String::from_utf8_lossy(&content)
        )
    }

    let content_type = match r.headers().get(http::header::CONTENT_TYPE) {
        Some(c) => Some(c.to_str()?.to_string()),
        None => None,
    };
    Ok(ContentAndContentType {
        content_type,
        content,
    })
}
