use std::sync::Arc;

use anyhow::Context;
use http::Uri;
use http::{Response, StatusCode};

use hyper::Body;
use lazy_static::lazy_static;
use regex::Regex;

use super::authentication_flow::AuthResponse;

lazy_static! {
    // challenge params look like key="value",key="value3,e",y=value
    static ref CHALLENGE_PARAM_REGEX: Regex =
        Regex::new(r#"([A-Za-z_]+)=(?:"([^"]*)"|([^",\s]+))"#).unwrap();
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone)]
pub struct BearerConfig {
    pub realm: Uri,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl std::fmt::Display for BearerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ realm: {}, service: {}, scope: {} }}",
            self.realm,
            self.service.as_deref().unwrap_or(""),
            self.scope.as_deref().unwrap_or("")
        )
    }
}

impl BearerConfig {
    pub fn from_auth_header(auth_header: &str) -> anyhow::Result<Self> {
        let params = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| anyhow::anyhow!("Only bearer challenges are supported, got {:?}", auth_header))?;

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for captures in CHALLENGE_PARAM_REGEX.captures_iter(params) {
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match &captures[1] {
                "realm" => {
                    realm = Some(
                        value
                            .parse::<Uri>()
                            .with_context(|| format!("Failed to parse realm from {:?}", value))?,
                    )
                }
                "service" => service = Some(value.to_string()),
                "scope" => scope = Some(value.to_string()),
                _ => (),
            }
        }

        match realm {
            Some(realm) => Ok(Self {
                realm,
                service,
                scope,
            }),
            None => Err(anyhow::anyhow!(
                "Bearer challenge without a realm: {:?}",
                auth_header
            )),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RequestFailType {
    #[error("Failed to connect: '{0}'")]
    ConnectError(hyper::Error),
    #[error("Generic hyper error: '{0}'")]
    HyperError(hyper::Error),
    #[error("Internal error: '{0:?}'")]
    AnyhowError(anyhow::Error),
    #[error("Auth failed: '{1}'")]
    AuthFailure(Response<Body>, BearerConfig),
    #[error("Got a redirection code: '{0}'")]
    Redirection(String),
}

impl From<anyhow::Error> for RequestFailType {
    fn from(e: anyhow::Error) -> Self {
        RequestFailType::AnyhowError(e)
    }
}

pub async fn run_single_request<F, Fut, B>(
    auth_info: Arc<tokio::sync::Mutex<Option<AuthResponse>>>,
    uri: &Uri,
    context: B,
    complete_uri: F,
    inner_client: &super::InnerClient,
) -> Result<Response<Body>, RequestFailType>
where
    F: Fn(B, http::request::Builder) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<http::request::Request<Body>>>,
    B: Send + 'static + Sync,
{
    let req_builder = http::request::Builder::default().uri(uri);

    let auth_token = auth_info.lock().await.as_ref().and_then(|e| e.bearer_token());
    let req_builder = match auth_token {
        Some(token) => req_builder.header(http::header::AUTHORIZATION, format!("Bearer {}", token)),
        None => req_builder,
    };
    let request = complete_uri(context, req_builder).await?;

    let r: Response<Body> = inner_client.request(request).await.map_err(|e| {
        if e.is_connect() {
            RequestFailType::ConnectError(e)
        } else {
            RequestFailType::HyperError(e)
        }
    })?;

    if r.status() == StatusCode::UNAUTHORIZED {
        if let Some(auth_header) = r
            .headers()
            .get(http::header::WWW_AUTHENTICATE)
            .and_then(|e| e.to_str().ok())
        {
            let b = BearerConfig::from_auth_header(auth_header).with_context(|| {
                format!(
                    "unable to parse auth header when issuing request, got header '{}'",
                    auth_header
                )
            })?;
            return Err(RequestFailType::AuthFailure(r, b));
        }
    }
    if r.status().is_redirection() {
        if let Some(location_header) = r.headers().get(http::header::LOCATION) {
            let location_str = location_header.to_str().with_context(|| {
                format!("Unable to parse redirection header {:?}", location_header)
            })?;
            return Err(RequestFailType::Redirection(location_str.to_string()));
        }
    }
    Ok(r)
}
