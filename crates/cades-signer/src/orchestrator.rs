use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CadesError;
use crate::provider::{Certificate, CertificateStore, Provider, close_store};

/// Content signed when the request carries no payload.
pub const DEFAULT_PAYLOAD: &str = "Hello World";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    #[serde(default)]
    pub payload: Option<String>,
    /// Subject-name fragment narrowing the candidate certificates.
    #[serde(default)]
    pub certificate_filter: Option<String>,
}

impl SigningRequest {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
            certificate_filter: None,
        }
    }

    pub fn with_certificate_filter(mut self, filter: impl Into<String>) -> Self {
        self.certificate_filter = Some(filter.into());
        self
    }

    pub fn payload(&self) -> &str {
        self.payload.as_deref().unwrap_or(DEFAULT_PAYLOAD)
    }

    /// The subject-name filter, if one was given and is not empty.
    pub fn certificate_filter(&self) -> Option<&str> {
        self.certificate_filter
            .as_deref()
            .filter(|filter| !filter.is_empty())
    }
}

/// Provider-encoded CAdES-BES signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stages of a signing run, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Idle,
    StoreOpened,
    CandidatesResolved,
    CertificateSelected,
    SignerCreated,
    ContentAttached,
    OptionsSet,
    Signed,
    StoreClosed,
}

/// Drives the provider handshake that turns a [`SigningRequest`] into a
/// [`Signature`].
#[derive(Clone)]
pub struct SigningOrchestrator {
    provider: Provider,
}

impl SigningOrchestrator {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }

    /// Sign the request payload with the single certificate it resolves to.
    ///
    /// The store is closed on every path once it has been opened.
    pub async fn sign(&self, request: &SigningRequest) -> Result<Signature, CadesError> {
        enter(SigningState::Idle);
        let store = self.provider.open_store().await?;
        enter(SigningState::StoreOpened);

        let outcome = self.handshake(store.as_ref(), request).await;
        let signature = close_store(store, outcome).await?;
        enter(SigningState::StoreClosed);

        info!(filter = ?request.certificate_filter(), "payload signed");
        Ok(signature)
    }

    async fn handshake(
        &self,
        store: &dyn CertificateStore,
        request: &SigningRequest,
    ) -> Result<Signature, CadesError> {
        let constants = self.provider.constants();

        let certificate = self.select(store, request.certificate_filter()).await?;
        enter(SigningState::CertificateSelected);

        let mut signer = self.provider.create_signer().await?;
        signer.set_certificate(certificate).await?;
        enter(SigningState::SignerCreated);

        let mut signed_data = self.provider.create_signed_data().await?;
        signed_data.set_content(request.payload()).await?;
        enter(SigningState::ContentAttached);

        signer.set_options(constants.include_whole_chain).await?;
        enter(SigningState::OptionsSet);

        let signature = signed_data
            .sign_cades(signer.as_ref(), constants.cades_bes)
            .await?;
        enter(SigningState::Signed);

        Ok(Signature(signature))
    }

    /// Resolve the candidate pool and take its only member.
    async fn select(
        &self,
        store: &dyn CertificateStore,
        filter: Option<&str>,
    ) -> Result<Arc<dyn Certificate>, CadesError> {
        let certificates = store.certificates().await?;
        let candidates = match filter {
            Some(subject) => {
                certificates
                    .find(self.provider.constants().find_subject_name, subject)
                    .await?
            }
            None => certificates,
        };

        match candidates.count().await? {
            0 => return Err(CadesError::NoCertificatesFound),
            1 => {}
            count => return Err(CadesError::AmbiguousCertificate(count)),
        }
        enter(SigningState::CandidatesResolved);

        Ok(candidates.item(1).await?)
    }
}

fn enter(state: SigningState) {
    debug!(?state, "signing state");
}
