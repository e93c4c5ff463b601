mod authentication_flow;
mod private_impl;

use std::sync::Arc;

use anyhow::Context;

use http::Response;
use http::Uri;

use hyper::{Body, Client};
use tokio::sync::Mutex;

use self::authentication_flow::AuthResponse;
use self::private_impl::{run_single_request, RequestFailType};

type InnerClient = Client<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

// A registry may challenge again after handing out a token with too narrow a scope.
const MAX_AUTH_ROUNDS: usize = 2;

// https://raw.githubusercontent.com/google/go-containerregistry/main/images/credhelper-basic.svg
pub struct HttpCli {
    pub inner_client: InnerClient,
    auth_info: Arc<Mutex<Option<AuthResponse>>>,
}

impl HttpCli {
    pub fn new(inner_client: InnerClient) -> HttpCli {
        HttpCli {
            inner_client,
            auth_info: Default::default(),
        }
    }

    pub async fn request_simple(
        &self,
        uri: &Uri,
        method: http::Method,
        retries: usize,
    ) -> Result<Response<Body>, anyhow::Error> {
        self.request(
            uri,
            method,
            |method, c| async move { c.method(method).body(Body::empty()).map_err(|e| e.into()) },
            retries,
        )
        .await
    }

    /// Issues a request built by `complete_request`, following redirects,
    /// answering bearer challenges and retrying connection failures up to
    /// `retries` times. The builder is invoked again for every attempt.
    pub async fn request<Fut, F, B>(
        &self,
        uri: &Uri,
        context: B,
        complete_request: F,
        retries: usize,
    ) -> Result<Response<Body>, anyhow::Error>
    where
        F: Fn(B, http::request::Builder) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<http::request::Request<Body>>>,
        B: Send + 'static + Sync + Clone,
    {
        let mut uri = uri.clone();
        let mut attempt = 0;
        let mut auth_rounds = 0;
        let mut last_error: Option<RequestFailType> = None;
        while attempt < retries + 1 {
            attempt += 1;
            let err = match run_single_request(
                self.auth_info.clone(),
                &uri,
                context.clone(),
                &complete_request,
                &self.inner_client,
            )
            .await
            {
                Ok(o) => return Ok(o),
                Err(err) => err,
            };

            let terminal = match &err {
                RequestFailType::Redirection(new_url) => {
                    uri = resolve_location(&uri, new_url)?;
                    tracing::debug!(location = %uri, "Following redirect");
                    false
                }
                RequestFailType::ConnectError(e) => {
                    tracing::debug!(uri = %uri, error = %e, attempt, "Connection failed, retrying");
                    false
                }
                RequestFailType::HyperError(_) | RequestFailType::AnyhowError(_) => true,
                RequestFailType::AuthFailure(_, bearer) => {
                    if auth_rounds >= MAX_AUTH_ROUNDS {
                        true
                    } else {
                        auth_rounds += 1;
                        let auth_info =
                            authentication_flow::authenticate_request(bearer, &self.inner_client)
                                .await?;
                        *self.auth_info.lock().await = Some(auth_info);
                        attempt -= 1;
                        false
                    }
                }
            };
            last_error = Some(err);
            if terminal {
                break;
            }
        }
        match last_error {
            None => anyhow::bail!("We failed in trying to issue http requests, but we have no last error. Unexpected state. Attempting to query: {:?}", uri),
            Some(ex) =>
                Err(ex).with_context(|| format!("Exhausted attempts, or ran into terminal error issuing http requests to URI: {:?}", uri))
        }
    }
}

// Location headers may be relative to the uri that was requested.
fn resolve_location(current: &Uri, location: &str) -> Result<Uri, anyhow::Error> {
    let parsed = location
        .parse::<Uri>()
        .with_context(|| format!("Failed to parse new url {:?}", location))?;
    if parsed.host().is_some() {
        return Ok(parsed);
    }
    let mut parts = current.clone().into_parts();
    parts.path_and_query = parsed.path_and_query().cloned();
    Uri::from_parts(parts).with_context(|| format!("Failed to resolve relative url {:?}", location))
}
