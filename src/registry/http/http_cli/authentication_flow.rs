use crate::registry::http::util::dump_body_to_string;

use anyhow::Context;

use http::Uri;

use hyper::Body;

use serde::{Deserialize, Serialize};

use super::private_impl::{run_single_request, BearerConfig};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: Option<String>,
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
    pub issued_at: Option<String>,
}

impl AuthResponse {
    pub fn bearer_token(&self) -> Option<String> {
        self.token.as_ref().or(self.access_token.as_ref()).cloned()
    }
}

fn token_uri(challenge: &BearerConfig) -> anyhow::Result<Uri> {
    let mut query_items = Vec::new();
    if let Some(service) = &challenge.service {
        query_items.push(format!("service={}", service));
    }
    if let Some(scope) = &challenge.scope {
        query_items.push(format!("scope={}", scope));
    }

    let mut parts = challenge.realm.clone().into_parts();
    let existing_path_and_query = parts
        .path_and_query
        .as_ref()
        .map(|e| e.as_str())
        .unwrap_or("/");
    let new_path_q = match (query_items.is_empty(), existing_path_and_query.contains('?')) {
        (true, _) => existing_path_and_query.to_string(),
        (false, true) => format!("{}&{}", existing_path_and_query, query_items.join("&")),
        (false, false) => format!("{}?{}", existing_path_and_query, query_items.join("&")),
    };
    parts.path_and_query = Some(
        new_path_q
            .as_str()
            .try_into()
            .with_context(|| format!("Failed to parse path and query from {:?}", new_path_q))?,
    );
    Uri::from_parts(parts).with_context(|| {
        format!(
            "Failed to parse uri from installing new path and query of {}",
            new_path_q
        )
    })
}

/// Fetches an anonymous token for the challenge. Credentials are left to the
/// registry's own anonymous access policy.
pub async fn authenticate_request(
    challenge: &BearerConfig,
    inner_client: &super::InnerClient,
) -> anyhow::Result<AuthResponse> {
    let new_uri = token_uri(challenge)?;
    tracing::debug!(realm = %challenge, "Requesting registry token");

    let mut response = run_single_request(
        Default::default(),
        &new_uri,
        (),
        |_, builder| async move {
            builder
                .method(http::Method::GET)
                .body(Body::empty())
                .map_err(|e| e.into())
        },
        inner_client,
    )
    .await
    .with_context(|| {
        format!(
            "Failed to run new request to try authenticate to {:?}",
            new_uri
        )
    })?;

    if response.status().is_success() {
        let response_body = dump_body_to_string(&mut response).await?;
        let response_auth_info: AuthResponse = serde_json::from_str(&response_body)
            .with_context(|| format!("Parsing token response from {:?}", new_uri))?;
        Ok(response_auth_info)
    } else {
        let try_response_body = dump_body_to_string(&mut response)
            .await
            .unwrap_or_default();
        anyhow::bail!(
            "Failed to authenticate to {:?}, got status code: {:?}, body:\n{}",
            new_uri,
            response.status(),
            try_response_body
        );
    }
}
