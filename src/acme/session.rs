//! Issuance state machine.
//!
//! ```text
//! account ─▶ order ─▶ authorizations ─▶ challenge trigger ─▶ challenge poll
//!                                                                  │
//!        certificate ◀─ download ◀─ order poll ◀─ finalize (CSR) ◀─┘
//! ```
//!
//! Each `issue` call is independent. Shared state is the account binding,
//! written once, and the certificate keys of orders that timed out after
//! finalize, kept so `resume_order` can still download them.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use rcgen::KeyPair;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::Instrument;
use uuid::Uuid;

use crate::acme::certificate::{self, Certificate, CertificateError};
use crate::acme::client::{AcmeClient, PEM_CHAIN};
use crate::acme::csr::{CsrBuilder, RcgenCsrBuilder};
use crate::acme::error::{AcmeError, AcmeResult, PollStage};
use crate::acme::jose::AccountKey;
use crate::acme::responder::ChallengeResponder;
use crate::acme::store::{CertificateStore, DirStore};
use crate::acme::types::{
    Account, Authorization, AuthorizationStatus, Challenge, ChallengeStatus, Directory,
    Identifier, Order, OrderStatus, Problem, RevocationReason,
};
use crate::config::{AcmeConfig, ProxyConfig};
use crate::observability::metrics;
use crate::proxy::Forwarder;
use crate::resilience::{poll_until, PollError, PollPolicy, Polled};
use crate::transport::Transport;

/// Per-session knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub contact_email: String,
    pub challenge_polling: PollPolicy,
    pub order_polling: PollPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            contact_email: "admin@example.com".to_string(),
            challenge_polling: PollPolicy::challenge_default(),
            order_polling: PollPolicy::order_default(),
        }
    }
}

impl From<&AcmeConfig> for SessionSettings {
    fn from(config: &AcmeConfig) -> Self {
        Self {
            contact_email: config.contact_email.clone(),
            challenge_polling: config.challenge_polling,
            order_polling: config.order_polling,
        }
    }
}

/// Authenticated ACME session driving certificate issuance.
pub struct SessionClient {
    client: AcmeClient,
    account: OnceCell<Account>,
    settings: SessionSettings,
    csr_builder: Arc<dyn CsrBuilder>,
    responder: Arc<dyn ChallengeResponder>,
    store: Option<Arc<dyn CertificateStore>>,
    /// Certificate key PEM per finalized order URL, held until the order
    /// completes or fails for good.
    certificate_keys: DashMap<String, String>,
}

impl SessionClient {
    /// Create a session with the default rcgen CSR builder and no store.
    pub fn new(
        transport: Arc<dyn Transport>,
        directory_url: impl Into<String>,
        key: AccountKey,
        settings: SessionSettings,
        responder: Arc<dyn ChallengeResponder>,
    ) -> Self {
        Self {
            client: AcmeClient::new(Forwarder::new(transport), directory_url, Arc::new(key)),
            account: OnceCell::new(),
            settings,
            csr_builder: Arc::new(RcgenCsrBuilder),
            responder,
            store: None,
            certificate_keys: DashMap::new(),
        }
    }

    /// Session wired from configuration: account key file, certificate
    /// directory and polling policies.
    pub fn from_config(
        config: &ProxyConfig,
        transport: Arc<dyn Transport>,
        responder: Arc<dyn ChallengeResponder>,
    ) -> AcmeResult<Self> {
        let key = AccountKey::load_or_create(config.acme.account_key_path.as_deref())?;
        let mut session = Self::new(
            transport,
            config.directory_url(),
            key,
            SessionSettings::from(&config.acme),
            responder,
        );
        if let Some(dir) = &config.acme.certificate_dir {
            session = session.with_store(Arc::new(DirStore::new(dir)));
        }
        Ok(session)
    }

    /// Replace the CSR builder.
    pub fn with_csr_builder(mut self, csr_builder: Arc<dyn CsrBuilder>) -> Self {
        self.csr_builder = csr_builder;
        self
    }

    /// Persist every issued certificate through `store`.
    pub fn with_store(mut self, store: Arc<dyn CertificateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn directory(&self) -> AcmeResult<&Directory> {
        self.client.directory().await
    }

    /// The account binding, registering it with the CA on first use.
    pub async fn account(&self) -> AcmeResult<&Account> {
        self.account.get_or_try_init(|| self.register()).await
    }

    async fn register(&self) -> AcmeResult<Account> {
        let new_account = self.client.directory().await?.new_account.clone();
        let payload = json!({
            "termsOfServiceAgreed": true,
            "contact": [format!("mailto:{}", self.settings.contact_email)],
        });

        // 409 with a Location means the key is already registered.
        let response = self
            .client
            .post_checked(&new_account, None, Some(&payload), None, |r| {
                r.status.is_success() || (r.status == StatusCode::CONFLICT && r.location().is_some())
            })
            .await?;

        let location = response.location().ok_or_else(|| {
            AcmeError::Protocol("account response has no Location header".to_string())
        })?;

        tracing::info!(
            account = %location,
            status = response.status.as_u16(),
            "ACME account ready"
        );
        Ok(Account {
            location,
            contact_email: self.settings.contact_email.clone(),
        })
    }

    /// Run one full issuance for `identifiers`.
    ///
    /// Either returns the issued certificate or the first error hit; there
    /// is no partial result. A [`AcmeError::PollingTimeout`] carries the
    /// order URL for [`SessionClient::resume_order`].
    pub async fn issue(&self, identifiers: &[String]) -> AcmeResult<Certificate> {
        if identifiers.is_empty() {
            return Err(AcmeError::NoIdentifiers);
        }

        let span = tracing::info_span!("issuance", id = %Uuid::new_v4(), domains = ?identifiers);
        let result = self.run_issuance(identifiers).instrument(span.clone()).await;
        report(&span, &result);
        result
    }

    /// Pick up an existing order where the CA has it, with fresh polling
    /// attempts.
    ///
    /// Pending authorizations are validated again, a ready order is
    /// finalized and a processing order is awaited. An order finalized by
    /// this session downloads with the certificate key generated then; one
    /// finalized elsewhere cannot be completed here.
    pub async fn resume_order(&self, order_url: &str) -> AcmeResult<Certificate> {
        let span = tracing::info_span!("issuance", id = %Uuid::new_v4(), order = %order_url);
        let result = self.run_resume(order_url).instrument(span.clone()).await;
        report(&span, &result);
        result
    }

    async fn run_issuance(&self, identifiers: &[String]) -> AcmeResult<Certificate> {
        let kid = self.account().await?.location.clone();
        let order = self.create_order(identifiers, &kid).await?;
        self.complete_order(order, &kid, identifiers).await
    }

    async fn run_resume(&self, order_url: &str) -> AcmeResult<Certificate> {
        let kid = self.account().await?.location.clone();
        let order = self.fetch_order(order_url, &kid).await?;
        tracing::info!(order = %order_url, status = %order.status, "Resuming order");

        let identifiers: Vec<String> = order.identifiers.iter().map(|i| i.value.clone()).collect();
        self.complete_order(order, &kid, &identifiers).await
    }

    /// Drive `order` to a certificate, tagging timeouts with the order URL.
    async fn complete_order(
        &self,
        order: Order,
        kid: &str,
        identifiers: &[String],
    ) -> AcmeResult<Certificate> {
        let order_url = order.location.clone();
        match self.drive_order(order, kid, identifiers).await {
            Err(AcmeError::PollingTimeout {
                stage,
                attempts,
                last_status,
                challenge_url,
                ..
            }) => Err(AcmeError::PollingTimeout {
                stage,
                attempts,
                last_status,
                order_url: Some(order_url),
                challenge_url,
            }),
            other => {
                self.certificate_keys.remove(&order_url);
                other
            }
        }
    }

    async fn drive_order(
        &self,
        mut order: Order,
        kid: &str,
        identifiers: &[String],
    ) -> AcmeResult<Certificate> {
        if order.status == OrderStatus::Invalid {
            return Err(order_failed(order.error));
        }

        if matches!(order.status, OrderStatus::Pending | OrderStatus::Ready) {
            for authz_url in &order.authorizations {
                self.authorize(authz_url, kid).await?;
            }
        }
        if order.status == OrderStatus::Pending {
            order = self.await_ready(order, kid).await?;
        }

        if order.status == OrderStatus::Ready {
            let certificate_key = KeyPair::generate()?;
            let csr = self
                .csr_builder
                .build(identifiers, &certificate_key)
                .map_err(AcmeError::Csr)?;
            self.certificate_keys
                .insert(order.location.clone(), certificate_key.serialize_pem());
            order = self.finalize(&order, kid, &csr).await?;
        }

        let order = self.await_order(order, kid).await?;

        let certificate_url = order.certificate.clone().ok_or_else(|| {
            AcmeError::Protocol("valid order has no certificate URL".to_string())
        })?;
        let private_key_pem = self
            .certificate_keys
            .get(&order.location)
            .map(|key| key.value().clone())
            .ok_or_else(|| {
                AcmeError::Protocol(format!(
                    "no certificate key held for order {}",
                    order.location
                ))
            })?;
        let certificate = self
            .download(&certificate_url, kid, private_key_pem, identifiers)
            .await?;

        if let Some(store) = &self.store {
            store.store(&certificate).await.map_err(AcmeError::Store)?;
        }
        Ok(certificate)
    }

    async fn create_order(&self, identifiers: &[String], kid: &str) -> AcmeResult<Order> {
        let new_order = self.client.directory().await?.new_order.clone();
        let payload = json!({
            "identifiers": identifiers.iter().map(Identifier::dns).collect::<Vec<_>>(),
        });

        let response = self.client.post(&new_order, Some(kid), Some(&payload)).await?;
        let location = response
            .location()
            .ok_or_else(|| AcmeError::Protocol("order response has no Location header".to_string()))?;
        let mut order: Order = response.json("order")?;
        order.location = location;

        tracing::info!(
            order = %order.location,
            status = %order.status,
            authorizations = order.authorizations.len(),
            "Order created"
        );
        if order.status == OrderStatus::Invalid {
            return Err(order_failed(order.error));
        }
        Ok(order)
    }

    async fn authorize(&self, url: &str, kid: &str) -> AcmeResult<()> {
        let authz: Authorization = self.client.post(url, Some(kid), None).await?.json("authorization")?;
        let domain = authz.identifier.value.clone();

        match authz.status {
            AuthorizationStatus::Valid => {
                tracing::debug!(domain = %domain, "Authorization already valid");
                return Ok(());
            }
            AuthorizationStatus::Pending => {}
            other => {
                let ca_error = authz
                    .challenges
                    .iter()
                    .find_map(|c| c.error.clone())
                    .unwrap_or_else(|| Problem::untyped(format!("authorization is {}", other)));
                return Err(AcmeError::ChallengeFailed { domain, ca_error });
            }
        }

        let challenge = authz
            .http01()
            .cloned()
            .ok_or_else(|| AcmeError::NoSupportedChallenge {
                domain: domain.clone(),
            })?;

        let key_authorization = self.client.key().key_authorization(&challenge.token);
        self.responder
            .publish(&challenge.token, &key_authorization)
            .await
            .map_err(AcmeError::Responder)?;

        let outcome = self.validate(&domain, &challenge, kid).await;

        if let Err(e) = self.responder.withdraw(&challenge.token).await {
            tracing::warn!(domain = %domain, error = %e, "Failed to withdraw challenge token");
        }
        outcome
    }

    async fn validate(&self, domain: &str, challenge: &Challenge, kid: &str) -> AcmeResult<()> {
        match challenge.status {
            ChallengeStatus::Valid => return Ok(()),
            ChallengeStatus::Invalid => {
                return Err(AcmeError::ChallengeFailed {
                    domain: domain.to_string(),
                    ca_error: challenge
                        .error
                        .clone()
                        .unwrap_or_else(|| Problem::untyped("challenge is invalid")),
                })
            }
            ChallengeStatus::Pending | ChallengeStatus::Processing => {}
        }

        tracing::info!(domain = %domain, url = %challenge.url, "Triggering http-01 challenge");
        self.client
            .post(&challenge.url, Some(kid), Some(&json!({})))
            .await?;

        let url = challenge.url.as_str();
        let polled = poll_until(
            || async move {
                self.client
                    .post(url, Some(kid), None)
                    .await?
                    .json::<Challenge>("challenge")
            },
            |c: &Challenge| c.status.is_terminal(),
            |c: &Challenge| c.status == ChallengeStatus::Valid,
            &self.settings.challenge_polling,
        )
        .await;

        match polled {
            Ok(Polled::Succeeded(_)) => {
                tracing::info!(domain = %domain, "Challenge validated");
                Ok(())
            }
            Ok(Polled::Failed(c)) => Err(AcmeError::ChallengeFailed {
                domain: domain.to_string(),
                ca_error: c
                    .error
                    .unwrap_or_else(|| Problem::untyped("challenge is invalid")),
            }),
            Err(PollError::Timeout {
                last_status,
                attempts,
            }) => Err(polling_timeout(
                PollStage::Challenge,
                attempts,
                last_status.map(|c| c.status.to_string()),
                Some(challenge.url.clone()),
            )),
            Err(PollError::Fetch(e)) => Err(e),
        }
    }

    async fn finalize(&self, order: &Order, kid: &str, csr_der: &[u8]) -> AcmeResult<Order> {
        let payload = json!({ "csr": URL_SAFE_NO_PAD.encode(csr_der) });
        let response = self
            .client
            .post(&order.finalize, Some(kid), Some(&payload))
            .await?;
        let mut finalized: Order = response.json("order")?;
        finalized.location = order.location.clone();

        tracing::info!(order = %finalized.location, status = %finalized.status, "Order finalized");
        Ok(finalized)
    }

    async fn fetch_order(&self, url: &str, kid: &str) -> AcmeResult<Order> {
        let mut order: Order = self.client.post(url, Some(kid), None).await?.json("order")?;
        order.location = url.to_string();
        Ok(order)
    }

    /// Wait for a pending order to leave `pending` once its authorizations
    /// are valid. Finalizing before `ready` earns an orderNotReady.
    async fn await_ready(&self, order: Order, kid: &str) -> AcmeResult<Order> {
        let url = order.location.as_str();
        let polled = poll_until(
            || self.fetch_order(url, kid),
            |o: &Order| o.status != OrderStatus::Pending,
            |o: &Order| o.status != OrderStatus::Invalid,
            &self.settings.order_polling,
        )
        .await;

        match polled {
            Ok(Polled::Succeeded(ready)) => Ok(ready),
            Ok(Polled::Failed(invalid)) => Err(order_failed(invalid.error)),
            Err(PollError::Timeout {
                last_status,
                attempts,
            }) => Err(polling_timeout(
                PollStage::Order,
                attempts,
                last_status.map(|o| o.status.to_string()),
                None,
            )),
            Err(PollError::Fetch(e)) => Err(e),
        }
    }

    async fn await_order(&self, order: Order, kid: &str) -> AcmeResult<Order> {
        match order.status {
            OrderStatus::Valid => return Ok(order),
            OrderStatus::Invalid => return Err(order_failed(order.error)),
            _ => {}
        }

        let url = order.location.as_str();
        let highest = &AtomicU8::new(order.status.rank());
        let polled = poll_until(
            || async move {
                let fetched = self.fetch_order(url, kid).await?;
                let previous = highest.fetch_max(fetched.status.rank(), Ordering::SeqCst);
                if fetched.status.rank() < previous {
                    tracing::warn!(
                        order = %url,
                        status = %fetched.status,
                        "Order status moved backwards, still waiting"
                    );
                }
                Ok(fetched)
            },
            |o: &Order| o.status.is_terminal(),
            |o: &Order| o.status == OrderStatus::Valid,
            &self.settings.order_polling,
        )
        .await;

        match polled {
            Ok(Polled::Succeeded(valid)) => Ok(valid),
            Ok(Polled::Failed(invalid)) => Err(order_failed(invalid.error)),
            Err(PollError::Timeout {
                last_status,
                attempts,
            }) => Err(polling_timeout(
                PollStage::Order,
                attempts,
                last_status.map(|o| o.status.to_string()),
                None,
            )),
            Err(PollError::Fetch(e)) => Err(e),
        }
    }

    async fn download(
        &self,
        url: &str,
        kid: &str,
        private_key_pem: String,
        identifiers: &[String],
    ) -> AcmeResult<Certificate> {
        let response = self
            .client
            .post_checked(url, Some(kid), None, Some(PEM_CHAIN), |r| r.status.is_success())
            .await?;
        let pem_chain = String::from_utf8(response.body.to_vec()).map_err(|_| CertificateError::Encoding)?;
        Ok(Certificate::from_pem_chain(
            pem_chain,
            private_key_pem,
            identifiers.to_vec(),
        )?)
    }

    /// Revoke a certificate issued under this account.
    pub async fn revoke(&self, certificate_pem: &str, reason: RevocationReason) -> AcmeResult<()> {
        let der = certificate::leaf_der(certificate_pem)?;
        let revoke_url = self
            .client
            .directory()
            .await?
            .revoke_cert
            .clone()
            .ok_or_else(|| AcmeError::Protocol("CA does not advertise revokeCert".to_string()))?;
        let kid = self.account().await?.location.clone();

        let payload = json!({
            "certificate": URL_SAFE_NO_PAD.encode(der),
            "reason": reason.code(),
        });
        self.client.post(&revoke_url, Some(&kid), Some(&payload)).await?;

        tracing::info!(reason = reason.code(), "Certificate revoked");
        Ok(())
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("client", &self.client)
            .field("account", &self.account.get())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn order_failed(error: Option<Problem>) -> AcmeError {
    AcmeError::OrderFailed {
        ca_error: error.unwrap_or_else(|| Problem::untyped("order is invalid")),
    }
}

/// The order URL is filled in by `complete_order`.
fn polling_timeout(
    stage: PollStage,
    attempts: u32,
    last_status: Option<String>,
    challenge_url: Option<String>,
) -> AcmeError {
    metrics::record_poll_timeout(stage.as_str());
    AcmeError::PollingTimeout {
        stage,
        attempts,
        last_status: last_status.unwrap_or_else(|| "unknown".to_string()),
        order_url: None,
        challenge_url,
    }
}

fn report(span: &tracing::Span, result: &AcmeResult<Certificate>) {
    span.in_scope(|| match result {
        Ok(certificate) => {
            metrics::record_issuance("success");
            tracing::info!(
                serial = %certificate.serial_number,
                not_after = %certificate.not_after,
                "Certificate issued"
            );
        }
        Err(e) => {
            metrics::record_issuance(e.kind().as_str());
            tracing::error!(
                kind = e.kind().as_str(),
                retryable = e.is_retryable(),
                error = %e,
                "Issuance failed"
            );
        }
    });
}
