//! Signed request plumbing: directory, nonces, JWS POSTs.
//!
//! Every CA call goes through the shared [`Forwarder`], so the same header
//! sanitization and transport limits apply as for proxied traffic.

use std::sync::Arc;

use axum::http::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

use crate::acme::error::{AcmeError, AcmeResult};
use crate::acme::jose::AccountKey;
use crate::acme::types::{Directory, Problem};
use crate::proxy::{Forwarder, ProxyMethod};

pub const JOSE_JSON: &str = "application/jose+json";
pub const PEM_CHAIN: &str = "application/pem-certificate-chain";
const REPLAY_NONCE: &str = "replay-nonce";

/// Buffered CA response.
#[derive(Debug, Clone)]
pub struct AcmeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AcmeResponse {
    /// `Location` header, if present and valid UTF-8.
    pub fn location(&self) -> Option<String> {
        self.headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn json<T: DeserializeOwned>(&self, what: &str) -> AcmeResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AcmeError::protocol(&format!("invalid {} body", what), e))
    }
}

fn replay_nonce(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REPLAY_NONCE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Low-level ACME client bound to one directory and one account key.
pub struct AcmeClient {
    forwarder: Forwarder,
    directory_url: String,
    directory: OnceCell<Directory>,
    nonce: Mutex<Option<String>>,
    key: Arc<AccountKey>,
}

impl AcmeClient {
    pub fn new(forwarder: Forwarder, directory_url: impl Into<String>, key: Arc<AccountKey>) -> Self {
        Self {
            forwarder,
            directory_url: directory_url.into(),
            directory: OnceCell::new(),
            nonce: Mutex::new(None),
            key,
        }
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    /// The CA directory, fetched on first use.
    pub async fn directory(&self) -> AcmeResult<&Directory> {
        self.directory
            .get_or_try_init(|| async {
                let response = self
                    .forwarder
                    .send(ProxyMethod::Get, &self.directory_url, &HeaderMap::new(), Bytes::new())
                    .await?;
                if !response.status.is_success() {
                    return Err(AcmeError::Ca {
                        status: response.status.as_u16(),
                        problem: Problem::from_body(response.status, &response.body),
                    });
                }
                let directory: Directory = serde_json::from_slice(&response.body)
                    .map_err(|e| AcmeError::protocol("invalid directory body", e))?;
                tracing::debug!(
                    new_account = %directory.new_account,
                    new_order = %directory.new_order,
                    "ACME directory fetched"
                );
                Ok(directory)
            })
            .await
    }

    async fn fresh_nonce(&self) -> AcmeResult<String> {
        let new_nonce = self.directory().await?.new_nonce.clone();
        let response = self
            .forwarder
            .send(ProxyMethod::Get, &new_nonce, &HeaderMap::new(), Bytes::new())
            .await?;
        if !response.status.is_success() {
            return Err(AcmeError::Ca {
                status: response.status.as_u16(),
                problem: Problem::from_body(response.status, &response.body),
            });
        }
        replay_nonce(&response.headers)
            .ok_or_else(|| AcmeError::Protocol("newNonce response has no Replay-Nonce".to_string()))
    }

    async fn take_nonce(&self) -> AcmeResult<String> {
        let cached = self.nonce.lock().await.take();
        match cached {
            Some(nonce) => Ok(nonce),
            None => self.fresh_nonce().await,
        }
    }

    /// One signed POST, no status interpretation.
    ///
    /// `payload: None` is a POST-as-GET.
    pub async fn post_raw(
        &self,
        url: &str,
        kid: Option<&str>,
        payload: Option<&Value>,
        accept: Option<&'static str>,
    ) -> AcmeResult<AcmeResponse> {
        let nonce = self.take_nonce().await?;
        let jws = self.key.sign_jws(url, &nonce, kid, payload)?;
        let body = serde_json::to_vec(&jws).map_err(|e| AcmeError::protocol("encode JWS", e))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JOSE_JSON));
        if let Some(accept) = accept {
            headers.insert(ACCEPT, HeaderValue::from_static(accept));
        }

        let response = self
            .forwarder
            .send(ProxyMethod::Post, url, &headers, Bytes::from(body))
            .await?;

        if let Some(next) = replay_nonce(&response.headers) {
            *self.nonce.lock().await = Some(next);
        }

        Ok(AcmeResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }

    /// Signed POST that must come back with a 2xx status.
    pub async fn post(
        &self,
        url: &str,
        kid: Option<&str>,
        payload: Option<&Value>,
    ) -> AcmeResult<AcmeResponse> {
        self.post_checked(url, kid, payload, None, |r| r.status.is_success())
            .await
    }

    /// Signed POST with a caller-defined success test.
    ///
    /// A `badNonce` rejection is re-signed with a fresh nonce once; any other
    /// unaccepted response becomes [`AcmeError::Ca`].
    pub async fn post_checked(
        &self,
        url: &str,
        kid: Option<&str>,
        payload: Option<&Value>,
        accept: Option<&'static str>,
        accepted: impl Fn(&AcmeResponse) -> bool,
    ) -> AcmeResult<AcmeResponse> {
        let mut retried = false;
        loop {
            let response = self.post_raw(url, kid, payload, accept).await?;
            if accepted(&response) {
                return Ok(response);
            }

            let problem = Problem::from_body(response.status, &response.body);
            if problem.is_bad_nonce() && !retried {
                tracing::warn!(url = %url, "CA rejected nonce, retrying with a fresh one");
                retried = true;
                continue;
            }

            tracing::warn!(
                url = %url,
                status = response.status.as_u16(),
                problem = %problem,
                "CA rejected request"
            );
            return Err(AcmeError::Ca {
                status: response.status.as_u16(),
                problem,
            });
        }
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("directory_url", &self.directory_url)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{OutboundRequest, Transport, TransportError, UpstreamResponse};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Serves a fixed directory and nonce endpoint; every POST answers with
    /// the next scripted (status, body) pair.
    struct ScriptedCa {
        posts: StdMutex<Vec<(StatusCode, &'static str)>>,
        seen: StdMutex<Vec<OutboundRequest>>,
        nonce_fetches: StdMutex<u32>,
    }

    impl ScriptedCa {
        fn new(posts: Vec<(StatusCode, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                posts: StdMutex::new(posts),
                seen: StdMutex::new(Vec::new()),
                nonce_fetches: StdMutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedCa {
        async fn execute(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            let mut headers = HeaderMap::new();
            let (status, body) = if request.url.ends_with("/directory") {
                (
                    StatusCode::OK,
                    r#"{"newNonce":"https://ca/nonce","newAccount":"https://ca/acct","newOrder":"https://ca/order"}"#,
                )
            } else if request.url.ends_with("/nonce") {
                let mut n = self.nonce_fetches.lock().unwrap();
                *n += 1;
                headers.insert(REPLAY_NONCE, HeaderValue::from_str(&format!("fresh-{}", n)).unwrap());
                (StatusCode::OK, "")
            } else {
                headers.insert(REPLAY_NONCE, HeaderValue::from_static("chained"));
                self.posts.lock().unwrap().remove(0)
            };
            Ok(UpstreamResponse {
                status,
                headers,
                body: Bytes::from_static(body.as_bytes()),
            })
        }
    }

    fn client_for(ca: Arc<ScriptedCa>) -> AcmeClient {
        AcmeClient::new(
            Forwarder::new(ca),
            "https://ca/directory",
            Arc::new(AccountKey::generate().unwrap()),
        )
    }

    fn sent_nonce(request: &OutboundRequest) -> String {
        use base64::Engine;
        let jws: Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
        let protected = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(jws["protected"].as_str().unwrap())
            .unwrap();
        let header: Value = serde_json::from_slice(&protected).unwrap();
        header["nonce"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_directory_cached() {
        let ca = ScriptedCa::new(vec![]);
        let client = client_for(ca.clone());
        let first = client.directory().await.unwrap().clone();
        let second = client.directory().await.unwrap();
        assert_eq!(&first, second);
        assert_eq!(ca.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_nonce_reused_for_next_post() {
        let ca = ScriptedCa::new(vec![(StatusCode::OK, "{}"), (StatusCode::OK, "{}")]);
        let client = client_for(ca.clone());
        client.post("https://ca/a", Some("kid"), None).await.unwrap();
        client.post("https://ca/b", Some("kid"), None).await.unwrap();

        let seen = ca.seen.lock().unwrap();
        let posts: Vec<_> = seen.iter().filter(|r| r.method == ProxyMethod::Post).collect();
        assert_eq!(sent_nonce(posts[0]), "fresh-1");
        assert_eq!(sent_nonce(posts[1]), "chained");
        assert_eq!(posts[0].headers.get(CONTENT_TYPE).unwrap(), JOSE_JSON);
        assert_eq!(*ca.nonce_fetches.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bad_nonce_retried_once() {
        let bad = r#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"stale"}"#;
        let ca = ScriptedCa::new(vec![(StatusCode::BAD_REQUEST, bad), (StatusCode::CREATED, "{}")]);
        let client = client_for(ca.clone());
        let response = client.post("https://ca/a", Some("kid"), None).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);

        let ca = ScriptedCa::new(vec![(StatusCode::BAD_REQUEST, bad), (StatusCode::BAD_REQUEST, bad)]);
        let client = client_for(ca);
        let err = client.post("https://ca/a", Some("kid"), None).await.unwrap_err();
        assert!(matches!(err, AcmeError::Ca { status: 400, ref problem } if problem.is_bad_nonce()));
    }

    #[tokio::test]
    async fn test_ca_error_body_captured() {
        let ca = ScriptedCa::new(vec![(
            StatusCode::FORBIDDEN,
            r#"{"type":"urn:ietf:params:acme:error:unauthorized","detail":"no"}"#,
        )]);
        let client = client_for(ca);
        let err = client.post("https://ca/a", None, None).await.unwrap_err();
        match err {
            AcmeError::Ca { status, problem } => {
                assert_eq!(status, 403);
                assert_eq!(problem.kind, "urn:ietf:params:acme:error:unauthorized");
                assert_eq!(problem.detail.as_deref(), Some("no"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
