//! A distribution-API registry served from memory on 127.0.0.1, speaking just
//! enough of the protocol for pulls, pushes and cross-repository mounts.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use contain::container_specs::media_types::{DOCKER_CONFIG, DOCKER_MANIFEST};
use contain::digest::Digest;
use contain::layer::{Layer, StaticLayer};
use contain::container_specs::LayerType;

const TOKEN: &str = "fake-registry-token";

#[derive(Default)]
struct State {
    blobs: HashMap<(String, String), Bytes>,
    manifests: HashMap<(String, String), (String, Bytes)>,
    next_upload: usize,
    requests: Vec<String>,
    challenge_next_blob_put: bool,
}

pub struct FakeRegistry {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl FakeRegistry {
    pub async fn start() -> FakeRegistry {
        FakeRegistry::serve(false).await
    }

    /// Every repository request needs a bearer token from `/token`.
    pub async fn start_with_token() -> FakeRegistry {
        FakeRegistry::serve(true).await
    }

    async fn serve(require_token: bool) -> FakeRegistry {
        let state = Arc::new(Mutex::new(State::default()));
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let service_state = Arc::clone(&state);
        let make_svc = make_service_fn(move |_conn| {
            let state = Arc::clone(&service_state);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle(Arc::clone(&state), addr, require_token, req)
                }))
            }
        });
        let server = Server::from_tcp(listener).unwrap().serve(make_svc);
        tokio::spawn(server);

        FakeRegistry { addr, state }
    }

    /// The next blob upload PUT is read in full and then answered with a
    /// bearer challenge, so the client has to send the body again.
    pub fn challenge_next_blob_put(&self) {
        self.state.lock().unwrap().challenge_next_blob_put = true;
    }

    pub fn host(&self) -> String {
        format!("localhost:{}", self.addr.port())
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn has_blob(&self, repository: &str, digest: &Digest) -> bool {
        self.state
            .lock()
            .unwrap()
            .blobs
            .contains_key(&(repository.to_string(), digest.to_string()))
    }

    pub fn manifest(&self, repository: &str, reference: &str) -> Option<(String, Bytes)> {
        self.state
            .lock()
            .unwrap()
            .manifests
            .get(&(repository.to_string(), reference.to_string()))
            .cloned()
    }

    fn put_blob(&self, repository: &str, content: Bytes) -> Digest {
        let digest = Digest::sha256(&content);
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert((repository.to_string(), digest.to_string()), content);
        digest
    }

    /// Seeds a one-layer docker image and returns its manifest digest.
    pub fn seed_image(&self, repository: &str, tag: &str) -> Digest {
        let layer = StaticLayer::from_tar(b"busybox rootfs", LayerType::DockerLayer).unwrap();
        let config = serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "Cmd": ["sh"] },
            "rootfs": { "type": "layers", "diff_ids": [layer.diff_id().to_string()] },
            "history": [{ "created_by": "ADD file:busybox in /" }],
        });
        let config = Bytes::from(serde_json::to_vec(&config).unwrap());
        let config_digest = self.put_blob(repository, config.clone());
        self.put_blob(repository, layer.compressed().unwrap());

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST,
            "config": {
                "mediaType": DOCKER_CONFIG,
                "size": config.len(),
                "digest": config_digest.to_string(),
            },
            "layers": [{
                "mediaType": layer.media_type().as_str(),
                "size": layer.size(),
                "digest": layer.digest().to_string(),
            }],
        });
        let manifest = Bytes::from(serde_json::to_vec_pretty(&manifest).unwrap());
        let digest = Digest::sha256(&manifest);
        let mut state = self.state.lock().unwrap();
        for reference in [tag.to_string(), digest.to_string()] {
            state.manifests.insert(
                (repository.to_string(), reference),
                (DOCKER_MANIFEST.to_string(), manifest.clone()),
            );
        }
        digest
    }
}

fn response(status: StatusCode) -> hyper::http::response::Builder {
    Response::builder()
        .status(status)
        .header("Docker-Distribution-API-Version", "registry/2.0")
}

fn empty(status: StatusCode) -> Response<Body> {
    response(status).body(Body::empty()).unwrap()
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

async fn handle(
    state: Arc<Mutex<State>>,
    addr: SocketAddr,
    require_token: bool,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let authorized = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false);
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .unwrap_or_default();

    let challenge = {
        let mut state = state.lock().unwrap();
        state.requests.push(format!("{} {}", method, path));
        let is_blob_put = method == Method::PUT && path.contains("/blobs/uploads/");
        let challenge = is_blob_put && state.challenge_next_blob_put;
        if challenge {
            state.challenge_next_blob_put = false;
        }
        challenge
    };

    if path == "/token" {
        let token = serde_json::json!({ "token": TOKEN, "expires_in": 300 });
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(token.to_string()))
            .unwrap());
    }

    if challenge || (require_token && !authorized) {
        return Ok(response(StatusCode::UNAUTHORIZED)
            .header(
                WWW_AUTHENTICATE,
                format!(
                    "Bearer realm=\"http://{}/token\",service=\"fake-registry\"",
                    addr
                ),
            )
            .body(Body::empty())
            .unwrap());
    }

    let mut state = state.lock().unwrap();
    Ok(route(&mut state, &method, &path, &query, content_type, body))
}

fn route(
    state: &mut State,
    method: &Method,
    path: &str,
    query: &str,
    content_type: Option<String>,
    body: Bytes,
) -> Response<Body> {
    if path == "/v2/" {
        return empty(StatusCode::OK);
    }
    let rest = match path.strip_prefix("/v2/") {
        Some(rest) => rest,
        None => return empty(StatusCode::NOT_FOUND),
    };

    if let Some((name, upload)) = rest.split_once("/blobs/uploads/") {
        let name = name.to_string();
        return match (method, upload) {
            (&Method::POST, "") => {
                if let (Some(digest), Some(from)) =
                    (query_param(query, "mount"), query_param(query, "from"))
                {
                    let found = state.blobs.get(&(from.to_string(), digest.to_string())).cloned();
                    if let Some(content) = found {
                        state.blobs.insert((name.clone(), digest.to_string()), content);
                        return response(StatusCode::CREATED)
                            .header(LOCATION, format!("/v2/{}/blobs/{}", name, digest))
                            .body(Body::empty())
                            .unwrap();
                    }
                }
                state.next_upload += 1;
                response(StatusCode::ACCEPTED)
                    .header(
                        LOCATION,
                        format!("/v2/{}/blobs/uploads/{}", name, state.next_upload),
                    )
                    .body(Body::empty())
                    .unwrap()
            }
            (&Method::PUT, _) => {
                let expected = query_param(query, "digest").unwrap_or_default();
                let got = Digest::sha256(&body).to_string();
                if got != expected {
                    return empty(StatusCode::BAD_REQUEST);
                }
                state.blobs.insert((name.clone(), got.clone()), body);
                response(StatusCode::CREATED)
                    .header(LOCATION, format!("/v2/{}/blobs/{}", name, got))
                    .body(Body::empty())
                    .unwrap()
            }
            _ => empty(StatusCode::METHOD_NOT_ALLOWED),
        };
    }

    if let Some((name, digest)) = rest.rsplit_once("/blobs/") {
        let key = (name.to_string(), digest.to_string());
        return match (method, state.blobs.get(&key)) {
            (&Method::HEAD, Some(_)) => empty(StatusCode::OK),
            (&Method::GET, Some(content)) => response(StatusCode::OK)
                .body(Body::from(content.clone()))
                .unwrap(),
            _ => empty(StatusCode::NOT_FOUND),
        };
    }

    if let Some((name, reference)) = rest.rsplit_once("/manifests/") {
        let key = (name.to_string(), reference.to_string());
        return match method {
            &Method::GET | &Method::HEAD => match state.manifests.get(&key) {
                Some((media_type, content)) => response(StatusCode::OK)
                    .header(CONTENT_TYPE, media_type.as_str())
                    .body(if method == Method::GET {
                        Body::from(content.clone())
                    } else {
                        Body::empty()
                    })
                    .unwrap(),
                None => empty(StatusCode::NOT_FOUND),
            },
            &Method::PUT => {
                let media_type = content_type.unwrap_or_default();
                let digest = Digest::sha256(&body).to_string();
                state
                    .manifests
                    .insert(key, (media_type.clone(), body.clone()));
                state
                    .manifests
                    .insert((name.to_string(), digest.clone()), (media_type, body));
                response(StatusCode::CREATED)
                    .header(LOCATION, format!("/v2/{}/manifests/{}", name, digest))
                    .header("Docker-Content-Digest", digest)
                    .body(Body::empty())
                    .unwrap()
            }
            _ => empty(StatusCode::METHOD_NOT_ALLOWED),
        };
    }

    empty(StatusCode::NOT_FOUND)
}
