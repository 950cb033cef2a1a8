//! Capability interface to the certificate/signing provider.
//!
//! The orchestrator never performs cryptography itself. Everything it needs
//! (stores, certificate properties, signers, signed-data containers) comes
//! from a [`ProviderGateway`], whose objects are driven through the traits
//! below. All calls are asynchronous; the provider may round-trip to a
//! plugin or a separate process for each of them.

mod credential;
mod software;

pub use software::{
    CertificateRecord, KeyAlgorithm, KeySpec, SignedEnvelope, SoftwareProvider, StoreDocument,
};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::CadesError;

/// Provider object type for a certificate store.
pub const STORE_OBJECT: &str = "CAPICOM.Store";
/// Provider object type for a CAdES signer.
pub const SIGNER_OBJECT: &str = "CAdESCOM.CPSigner";
/// Provider object type for a CAdES signed-data container.
pub const SIGNED_DATA_OBJECT: &str = "CAdESCOM.CadesSignedData";

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Rejections raised by a provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown provider object type: {0}")]
    UnknownObject(String),
    #[error("provider returned {actual} where {expected} was requested")]
    UnexpectedObject {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("certificate store is not open")]
    StoreNotOpen,
    #[error("certificate index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("signer has no certificate")]
    NoCertificate,
    #[error("certificate has no private key")]
    NoPrivateKey,
    #[error("signed data has no content")]
    NoContent,
    #[error("unsupported {name}: {value}")]
    Unsupported { name: &'static str, value: String },
    #[error("provider call rejected: {0}")]
    Rejected(String),
}

/// Provider-defined codes used while opening stores and signing.
///
/// Read once from the gateway when a [`Provider`] is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConstants {
    pub current_user_store: i32,
    pub my_store: String,
    pub store_open_maximum_allowed: i32,
    pub find_subject_name: i32,
    pub cades_bes: i32,
    pub include_whole_chain: i32,
}

impl Default for ProviderConstants {
    /// The CAPICOM/CAdESCOM values.
    fn default() -> Self {
        Self {
            current_user_store: 2,
            my_store: "My".to_string(),
            store_open_maximum_allowed: 2,
            find_subject_name: 1,
            cades_bes: 1,
            include_whole_chain: 1,
        }
    }
}

/// Result of a certificate validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub result: bool,
}

/// An object instantiated by [`ProviderGateway::create_object`].
pub enum ProviderObject {
    Store(Box<dyn CertificateStore>),
    Signer(Box<dyn CadesSigner>),
    SignedData(Box<dyn SignedData>),
}

impl ProviderObject {
    fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => STORE_OBJECT,
            Self::Signer(_) => SIGNER_OBJECT,
            Self::SignedData(_) => SIGNED_DATA_OBJECT,
        }
    }
}

#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Instantiate a named provider object.
    async fn create_object(&self, type_name: &str) -> ProviderResult<ProviderObject>;

    async fn constants(&self) -> ProviderResult<ProviderConstants>;
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn open(&mut self, location: i32, name: &str, access_mode: i32) -> ProviderResult<()>;

    async fn certificates(&self) -> ProviderResult<Box<dyn Certificates>>;

    async fn close(&mut self) -> ProviderResult<()>;
}

/// A collection of certificate handles. Indexing is 1-based.
#[async_trait]
pub trait Certificates: Send + Sync {
    async fn count(&self) -> ProviderResult<usize>;

    /// Narrow the collection. Matching semantics belong to the provider.
    async fn find(&self, criterion: i32, value: &str) -> ProviderResult<Box<dyn Certificates>>;

    async fn item(&self, index: usize) -> ProviderResult<Arc<dyn Certificate>>;
}

/// A certificate inside an opened store. Invalid once the store is closed.
#[async_trait]
pub trait Certificate: Send + Sync {
    async fn subject_name(&self) -> ProviderResult<String>;

    async fn valid_to_date(&self) -> ProviderResult<DateTime<Utc>>;

    async fn is_valid(&self) -> ProviderResult<Validation>;

    async fn has_private_key(&self) -> ProviderResult<bool>;

    async fn thumbprint(&self) -> ProviderResult<String>;
}

#[async_trait]
pub trait CadesSigner: Send + Sync {
    async fn set_certificate(&mut self, certificate: Arc<dyn Certificate>) -> ProviderResult<()>;

    async fn certificate(&self) -> ProviderResult<Option<Arc<dyn Certificate>>>;

    async fn set_options(&mut self, options: i32) -> ProviderResult<()>;

    async fn options(&self) -> ProviderResult<i32>;
}

#[async_trait]
pub trait SignedData: Send + Sync {
    async fn set_content(&mut self, content: &str) -> ProviderResult<()>;

    async fn sign_cades(
        &self,
        signer: &dyn CadesSigner,
        signature_type: i32,
    ) -> ProviderResult<String>;
}

/// A gateway paired with the constants it reported when it was attached.
#[derive(Clone)]
pub struct Provider {
    gateway: Arc<dyn ProviderGateway>,
    constants: ProviderConstants,
}

impl Provider {
    pub async fn attach(gateway: Arc<dyn ProviderGateway>) -> ProviderResult<Self> {
        let constants = gateway.constants().await?;
        Ok(Self { gateway, constants })
    }

    pub fn constants(&self) -> &ProviderConstants {
        &self.constants
    }

    /// Create a store and open the current user's personal store with the
    /// widest access the provider grants.
    pub async fn open_store(&self) -> ProviderResult<Box<dyn CertificateStore>> {
        let mut store = match self.gateway.create_object(STORE_OBJECT).await? {
            ProviderObject::Store(store) => store,
            other => return Err(unexpected(STORE_OBJECT, &other)),
        };
        store
            .open(
                self.constants.current_user_store,
                &self.constants.my_store,
                self.constants.store_open_maximum_allowed,
            )
            .await?;
        Ok(store)
    }

    pub async fn create_signer(&self) -> ProviderResult<Box<dyn CadesSigner>> {
        match self.gateway.create_object(SIGNER_OBJECT).await? {
            ProviderObject::Signer(signer) => Ok(signer),
            other => Err(unexpected(SIGNER_OBJECT, &other)),
        }
    }

    pub async fn create_signed_data(&self) -> ProviderResult<Box<dyn SignedData>> {
        match self.gateway.create_object(SIGNED_DATA_OBJECT).await? {
            ProviderObject::SignedData(data) => Ok(data),
            other => Err(unexpected(SIGNED_DATA_OBJECT, &other)),
        }
    }
}

fn unexpected(expected: &'static str, actual: &ProviderObject) -> ProviderError {
    ProviderError::UnexpectedObject {
        expected,
        actual: actual.kind(),
    }
}

/// Close an opened store and hand back the outcome of the work done with it.
///
/// A close failure only replaces a successful outcome; if the work already
/// failed, that error is kept and the close failure is logged.
pub(crate) async fn close_store<T>(
    mut store: Box<dyn CertificateStore>,
    outcome: Result<T, CadesError>,
) -> Result<T, CadesError> {
    let closed = store.close().await;
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(error)) => Err(error.into()),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(close_error)) => {
            warn!(%close_error, "failed to close certificate store after error");
            Err(error)
        }
    }
}
