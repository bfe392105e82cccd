//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acme_proxy::acme::{AccountKey, ChallengeStore, SessionClient, SessionSettings};
use acme_proxy::proxy::ProxyMethod;
use acme_proxy::resilience::PollPolicy;
use acme_proxy::transport::{OutboundRequest, Transport, TransportError, UpstreamResponse};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use rcgen::{CertificateParams, KeyPair, SerialNumber};
use serde_json::{json, Value};

pub const CA: &str = "https://ca.test";
pub const DIRECTORY_URL: &str = "https://ca.test/acme/acme/directory";
pub const DOMAIN: &str = "example.com";
pub const TOKEN: &str = "tok-1";
pub const LEAF_SERIAL: &str = "0a1b";
pub const UNAUTHORIZED: &str = "urn:ietf:params:acme:error:unauthorized";

const ACCOUNT: &str = "/acme/acme/account/1";
pub const ORDER: &str = "/acme/acme/order/1";
pub const FINALIZE: &str = "/acme/acme/order/1/finalize";
pub const AUTHZ: &str = "/acme/acme/authz/1";
pub const CHALLENGE: &str = "/acme/acme/challenge/1";
pub const CERTIFICATE: &str = "/acme/acme/certificate/1";
pub const REVOKE: &str = "/acme/acme/revoke-cert";
pub const NEW_ACCOUNT: &str = "/acme/acme/new-account";
pub const NEW_ORDER: &str = "/acme/acme/new-order";

pub fn authz_path(n: usize) -> String {
    format!("/acme/acme/authz/{}", n)
}

pub fn challenge_path(n: usize) -> String {
    format!("/acme/acme/challenge/{}", n)
}

pub fn token(n: usize) -> String {
    format!("tok-{}", n)
}

pub fn url(path: &str) -> String {
    format!("{}{}", CA, path)
}

/// One request as the fake CA saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: ProxyMethod,
    pub path: String,
    /// Decoded JWS payload; `None` for GET and POST-as-GET.
    pub payload: Option<Value>,
    pub headers: HeaderMap,
    /// Whether the order had been finalized when the call arrived.
    pub finalized: bool,
}

impl Call {
    pub fn is_post_as_get(&self) -> bool {
        self.method == ProxyMethod::Post && self.payload.is_none()
    }
}

type Script = VecDeque<&'static str>;

/// Scripted step-ca stand-in implementing the ACME resource flow for a
/// single order.
///
/// The order carries one authorization per domain, numbered from 1. Each
/// challenge poll pops a status from that challenge's script; order polls
/// pop from the ready script until finalize and from the order script
/// after it. The last entry of a script repeats once it is drained. The
/// order reports `pending` while any authorization is not yet valid.
pub struct FakeCa {
    account_status: StatusCode,
    offer_http01: bool,
    initial_order_status: &'static str,
    domains: Vec<String>,
    valid_from_start: HashSet<usize>,
    default_challenge_polls: Mutex<Script>,
    challenge_polls: Mutex<HashMap<usize, Script>>,
    ready_polls: Mutex<Script>,
    order_polls: Mutex<Script>,
    validated: Mutex<HashSet<usize>>,
    finalized: AtomicBool,
    responder: Option<ChallengeStore>,
    challenge_server: Option<SocketAddr>,
    served: Mutex<HashMap<String, Option<String>>>,
    chain: String,
    nonces: AtomicU32,
    calls: Mutex<Vec<Call>>,
}

impl FakeCa {
    pub fn new() -> Self {
        Self {
            account_status: StatusCode::CREATED,
            offer_http01: true,
            initial_order_status: "pending",
            domains: vec![DOMAIN.to_string()],
            valid_from_start: HashSet::new(),
            default_challenge_polls: Mutex::new(Script::from(vec!["valid"])),
            challenge_polls: Mutex::new(HashMap::new()),
            ready_polls: Mutex::new(Script::from(vec!["ready"])),
            order_polls: Mutex::new(Script::from(vec!["valid"])),
            validated: Mutex::new(HashSet::new()),
            finalized: AtomicBool::new(false),
            responder: None,
            challenge_server: None,
            served: Mutex::new(HashMap::new()),
            chain: mint_chain(),
            nonces: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn account_status(mut self, status: StatusCode) -> Self {
        self.account_status = status;
        self
    }

    pub fn without_http01(mut self) -> Self {
        self.offer_http01 = false;
        self
    }

    pub fn initial_order_status(mut self, status: &'static str) -> Self {
        self.initial_order_status = status;
        self
    }

    /// One authorization per domain, in order.
    pub fn domains(mut self, domains: &[&str]) -> Self {
        self.domains = domains.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Authorization `n` is already valid when the order is created.
    pub fn valid_authorization(mut self, n: usize) -> Self {
        self.valid_from_start.insert(n);
        self
    }

    /// Script for every challenge without its own.
    pub fn challenge_polls(self, statuses: Vec<&'static str>) -> Self {
        *self.default_challenge_polls.lock().unwrap() = statuses.into();
        self
    }

    pub fn challenge_polls_for(self, n: usize, statuses: Vec<&'static str>) -> Self {
        self.set_challenge_polls(n, statuses);
        self
    }

    /// Order statuses once every authorization is valid, before finalize.
    pub fn ready_polls(self, statuses: Vec<&'static str>) -> Self {
        *self.ready_polls.lock().unwrap() = statuses.into();
        self
    }

    /// Order statuses after finalize.
    pub fn order_polls(self, statuses: Vec<&'static str>) -> Self {
        self.set_order_polls(statuses);
        self
    }

    /// Look the token up here when the challenge is triggered.
    pub fn fetching_from(mut self, responder: ChallengeStore) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Fetch `/.well-known/acme-challenge/{token}` from `addr` over HTTP
    /// when the challenge is triggered, the way a real CA validates.
    pub fn validating_against(mut self, addr: SocketAddr) -> Self {
        self.challenge_server = Some(addr);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_challenge_polls(&self, n: usize, statuses: Vec<&'static str>) {
        self.challenge_polls.lock().unwrap().insert(n, statuses.into());
    }

    pub fn set_order_polls(&self, statuses: Vec<&'static str>) {
        *self.order_polls.lock().unwrap() = statuses.into();
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.path == path).count()
    }

    /// POST-as-GET requests to `path`.
    pub fn polls(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == path && c.is_post_as_get())
            .count()
    }

    /// Order polls before finalize.
    pub fn ready_polls_seen(&self) -> usize {
        self.order_polls_where(false)
    }

    /// Order polls after finalize.
    pub fn order_polls_seen(&self) -> usize {
        self.order_polls_where(true)
    }

    fn order_polls_where(&self, finalized: bool) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == ORDER && c.is_post_as_get() && c.finalized == finalized)
            .count()
    }

    /// Key authorization the CA found for the first challenge token.
    pub fn served_key_authorization(&self) -> Option<String> {
        self.served_for(TOKEN)
    }

    pub fn served_for(&self, token: &str) -> Option<String> {
        self.served.lock().unwrap().get(token).cloned().flatten()
    }

    fn next(script: &mut Script) -> &'static str {
        if script.len() > 1 {
            script.pop_front().unwrap_or("pending")
        } else {
            script.front().copied().unwrap_or("pending")
        }
    }

    fn next_challenge_status(&self, n: usize) -> &'static str {
        let default = self.default_challenge_polls.lock().unwrap().clone();
        let mut scripts = self.challenge_polls.lock().unwrap();
        let status = Self::next(scripts.entry(n).or_insert(default));
        if status == "valid" {
            self.validated.lock().unwrap().insert(n);
        }
        status
    }

    fn authorization_valid(&self, n: usize) -> bool {
        self.valid_from_start.contains(&n) || self.validated.lock().unwrap().contains(&n)
    }

    fn next_order_status(&self) -> &'static str {
        if self.finalized.load(Ordering::SeqCst) {
            return Self::next(&mut self.order_polls.lock().unwrap());
        }
        if (1..=self.domains.len()).all(|n| self.authorization_valid(n)) {
            Self::next(&mut self.ready_polls.lock().unwrap())
        } else {
            "pending"
        }
    }

    fn order(&self, status: &str) -> Value {
        let identifiers: Vec<Value> = self
            .domains
            .iter()
            .map(|d| json!({ "type": "dns", "value": d }))
            .collect();
        let authorizations: Vec<String> = (1..=self.domains.len()).map(|n| url(&authz_path(n))).collect();
        let mut order = json!({
            "status": status,
            "identifiers": identifiers,
            "authorizations": authorizations,
            "finalize": url(FINALIZE),
        });
        if status == "valid" {
            order["certificate"] = json!(url(CERTIFICATE));
        }
        if status == "invalid" {
            order["error"] = json!({ "type": "urn:ietf:params:acme:error:rejectedIdentifier", "detail": "policy forbids" });
        }
        order
    }

    fn challenge(n: usize, status: &str) -> Value {
        let mut challenge = json!({
            "type": "http-01",
            "url": url(&challenge_path(n)),
            "token": token(n),
            "status": status,
        });
        if status == "invalid" {
            challenge["error"] = json!({ "type": UNAUTHORIZED, "detail": "key authorization mismatch", "status": 403 });
        }
        challenge
    }

    fn authorization(&self, n: usize) -> Value {
        let status = if self.authorization_valid(n) { "valid" } else { "pending" };
        let challenges = if !self.offer_http01 {
            json!([{ "type": "dns-01", "url": url("/acme/acme/challenge/dns"), "token": "dns", "status": "pending" }])
        } else {
            json!([Self::challenge(n, status)])
        };
        json!({
            "identifier": { "type": "dns", "value": self.domains[n - 1] },
            "status": status,
            "challenges": challenges,
        })
    }

    /// Resource number for `/acme/acme/{kind}/{n}`.
    fn numbered(&self, path: &str, kind: &str) -> Option<usize> {
        let n: usize = path.strip_prefix(&format!("/acme/acme/{}/", kind))?.parse().ok()?;
        (1..=self.domains.len()).contains(&n).then_some(n)
    }

    async fn fetch_token(&self, token: &str) -> Option<String> {
        if let Some(responder) = &self.responder {
            return responder.get(token);
        }
        let addr = self.challenge_server?;
        let response = reqwest::get(format!("http://{}/.well-known/acme-challenge/{}", addr, token))
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }

    fn respond(&self, call: &Call) -> (StatusCode, Vec<(&'static str, String)>, Vec<u8>) {
        let json_body = |v: Value| v.to_string().into_bytes();
        let path = call.path.as_str();

        if call.method == ProxyMethod::Post {
            if let Some(n) = self.numbered(path, "authz") {
                return (StatusCode::OK, vec![], json_body(self.authorization(n)));
            }
            if let Some(n) = self.numbered(path, "challenge") {
                let status = if call.payload.is_some() {
                    "processing"
                } else {
                    self.next_challenge_status(n)
                };
                return (StatusCode::OK, vec![], json_body(Self::challenge(n, status)));
            }
        }

        match (call.method, path) {
            (ProxyMethod::Get, "/acme/acme/directory") => (
                StatusCode::OK,
                vec![],
                json_body(json!({
                    "newNonce": url("/acme/acme/new-nonce"),
                    "newAccount": url(NEW_ACCOUNT),
                    "newOrder": url(NEW_ORDER),
                    "revokeCert": url(REVOKE),
                    "keyChange": url("/acme/acme/key-change"),
                })),
            ),
            (ProxyMethod::Get, "/acme/acme/new-nonce") => (StatusCode::NO_CONTENT, vec![], vec![]),
            (ProxyMethod::Post, NEW_ACCOUNT) => (
                self.account_status,
                vec![("location", url(ACCOUNT))],
                json_body(json!({ "status": "valid" })),
            ),
            (ProxyMethod::Post, NEW_ORDER) => (
                StatusCode::CREATED,
                vec![("location", url(ORDER))],
                json_body(self.order(self.initial_order_status)),
            ),
            (ProxyMethod::Post, FINALIZE) => {
                self.finalized.store(true, Ordering::SeqCst);
                (StatusCode::OK, vec![], json_body(self.order("processing")))
            }
            (ProxyMethod::Post, ORDER) => {
                let status = self.next_order_status();
                (StatusCode::OK, vec![], json_body(self.order(status)))
            }
            (ProxyMethod::Post, CERTIFICATE) => (
                StatusCode::OK,
                vec![("content-type", "application/pem-certificate-chain".to_string())],
                self.chain.clone().into_bytes(),
            ),
            (ProxyMethod::Post, REVOKE) => (StatusCode::OK, vec![], vec![]),
            _ => (
                StatusCode::NOT_FOUND,
                vec![("content-type", "application/problem+json".to_string())],
                json_body(json!({ "type": "urn:ietf:params:acme:error:malformed", "detail": "no such resource" })),
            ),
        }
    }
}

#[async_trait]
impl Transport for FakeCa {
    async fn execute(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError> {
        let path = request
            .url
            .strip_prefix(CA)
            .unwrap_or(&request.url)
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        let call = Call {
            method: request.method,
            path,
            payload: request.body.as_deref().and_then(jws_payload),
            headers: request.headers.clone(),
            finalized: self.finalized.load(Ordering::SeqCst),
        };

        // A triggered challenge is validated by fetching its token.
        if let Some(n) = self.numbered(&call.path, "challenge").filter(|_| call.payload.is_some()) {
            let token = token(n);
            let served = self.fetch_token(&token).await;
            self.served.lock().unwrap().insert(token, served);
        }

        let (status, extra, body) = self.respond(&call);
        self.calls.lock().unwrap().push(call);

        let mut headers = HeaderMap::new();
        let nonce = self.nonces.fetch_add(1, Ordering::SeqCst);
        headers.insert("replay-nonce", HeaderValue::from_str(&format!("nonce-{}", nonce)).unwrap());
        for (name, value) in extra {
            headers.insert(name, HeaderValue::from_str(&value).unwrap());
        }
        Ok(UpstreamResponse {
            status,
            headers,
            body: Bytes::from(body),
        })
    }
}

fn jws_payload(body: &[u8]) -> Option<Value> {
    let jws: Value = serde_json::from_slice(body).ok()?;
    let payload = jws["payload"].as_str()?;
    if payload.is_empty() {
        return None;
    }
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()
}

fn mint(serial: &[u8], name: &str) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec![name.to_string()]).unwrap();
    params.serial_number = Some(SerialNumber::from_slice(serial));
    params.self_signed(&key).unwrap().pem()
}

/// Leaf for `example.com` with serial `0a1b`, followed by a stand-in root.
fn mint_chain() -> String {
    format!("{}{}", mint(&[0x0a, 0x1b], DOMAIN), mint(&[0x01], "Fake Root"))
}

/// Zero-interval polling: challenge 5 attempts, order 10.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        contact_email: "ops@example.com".to_string(),
        challenge_polling: PollPolicy::new(Duration::ZERO, 5),
        order_polling: PollPolicy::new(Duration::ZERO, 10),
    }
}

pub fn session(ca: Arc<FakeCa>, responder: ChallengeStore) -> SessionClient {
    SessionClient::new(
        ca,
        DIRECTORY_URL,
        AccountKey::generate().unwrap(),
        fast_settings(),
        Arc::new(responder),
    )
}

/// Records every outbound request and answers with a fixed response.
pub struct RecordingTransport {
    pub status: StatusCode,
    pub headers: Vec<(&'static str, &'static str)>,
    pub body: &'static str,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl RecordingTransport {
    pub fn new(status: StatusCode, headers: Vec<(&'static str, &'static str)>, body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            status,
            headers,
            body,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            headers.append(*name, HeaderValue::from_static(value));
        }
        Ok(UpstreamResponse {
            status: self.status,
            headers,
            body: Bytes::from_static(self.body.as_bytes()),
        })
    }
}
