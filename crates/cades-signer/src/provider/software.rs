//! In-process provider backed by a JSON certificate-store document.
//!
//! Each record may carry a seed-derived private key. `sign_cades` produces a
//! base64-encoded JSON [`SignedEnvelope`] rather than a DER CMS structure;
//! the orchestrator treats signatures as opaque, so any provider may pick
//! its own encoding.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{
    CadesSigner, Certificate, CertificateStore, Certificates, ProviderConstants, ProviderError,
    ProviderGateway, ProviderObject, ProviderResult, SIGNED_DATA_OBJECT, SIGNER_OBJECT,
    STORE_OBJECT, SignedData, Validation,
};
use super::credential::CertificateKey;

const ENVELOPE_FORMAT: &str = "cades-bes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Secp256k1,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub algorithm: KeyAlgorithm,
    pub seed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub subject_name: String,
    pub valid_to: DateTime<Utc>,
    #[serde(default = "default_valid")]
    pub valid: bool,
    #[serde(default)]
    pub key: Option<KeySpec>,
    /// Issuer subjects, nearest first.
    #[serde(default)]
    pub chain: Vec<String>,
}

fn default_valid() -> bool {
    true
}

/// Contents of the current user's personal store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub certificates: Vec<CertificateRecord>,
}

/// Decoded form of a software-provider signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub format: String,
    pub content: String,
    pub signer: String,
    pub algorithm: String,
    pub signature: String,
    pub public_key: String,
    pub chain: Vec<String>,
}

impl SignedEnvelope {
    pub fn decode(signature: &str) -> anyhow::Result<Self> {
        let bytes = STANDARD
            .decode(signature)
            .context("decoding signature base64")?;
        serde_json::from_slice(&bytes).context("deserializing signed envelope")
    }
}

struct StoredCertificate {
    position: usize,
    record: CertificateRecord,
    key: Option<CertificateKey>,
}

impl StoredCertificate {
    fn load(position: usize, record: CertificateRecord) -> anyhow::Result<Self> {
        let key = record
            .key
            .as_ref()
            .map(|spec| CertificateKey::derive(spec.algorithm, &spec.seed))
            .transpose()
            .with_context(|| format!("loading key for {}", record.subject_name))?;
        Ok(Self {
            position,
            record,
            key,
        })
    }

    fn thumbprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.position.to_be_bytes());
        hasher.update(self.record.subject_name.as_bytes());
        hasher.update(self.record.valid_to.to_rfc3339().as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub struct SoftwareProvider {
    certificates: Arc<Vec<Arc<StoredCertificate>>>,
    constants: ProviderConstants,
}

impl SoftwareProvider {
    /// Build a provider over `document`, deriving every record's key.
    ///
    /// Fails if any key seed is blank or cannot produce a key. RSA
    /// derivation is CPU-bound; async callers should prefer [`Self::from_path`]
    /// or run this on a blocking thread.
    pub fn new(document: StoreDocument) -> anyhow::Result<Self> {
        let certificates = document
            .certificates
            .into_iter()
            .enumerate()
            .map(|(position, record)| StoredCertificate::load(position, record).map(Arc::new))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            certificates: Arc::new(certificates),
            constants: ProviderConstants::default(),
        })
    }

    pub async fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading certificate store {}", path.display()))?;
        let document: StoreDocument = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing certificate store {}", path.display()))?;
        debug!(
            path = %path.display(),
            certificates = document.certificates.len(),
            "loaded software certificate store"
        );
        let path = path.display().to_string();
        tokio::task::spawn_blocking(move || Self::new(document))
            .await
            .context("deriving certificate keys")?
            .with_context(|| format!("loading certificate store {path}"))
    }

    fn lookup(&self, thumbprint: &str) -> Option<Arc<StoredCertificate>> {
        self.certificates
            .iter()
            .find(|stored| stored.thumbprint() == thumbprint)
            .cloned()
    }
}

#[async_trait]
impl ProviderGateway for SoftwareProvider {
    async fn create_object(&self, type_name: &str) -> ProviderResult<ProviderObject> {
        match type_name {
            STORE_OBJECT => Ok(ProviderObject::Store(Box::new(SoftwareStore {
                certificates: self.certificates.clone(),
                constants: self.constants.clone(),
                open: Arc::new(AtomicBool::new(false)),
                closed: false,
            }))),
            SIGNER_OBJECT => Ok(ProviderObject::Signer(Box::new(SoftwareSigner::default()))),
            SIGNED_DATA_OBJECT => Ok(ProviderObject::SignedData(Box::new(SoftwareSignedData {
                provider: SoftwareProvider {
                    certificates: self.certificates.clone(),
                    constants: self.constants.clone(),
                },
                content: None,
            }))),
            other => Err(ProviderError::UnknownObject(other.to_string())),
        }
    }

    async fn constants(&self) -> ProviderResult<ProviderConstants> {
        Ok(self.constants.clone())
    }
}

struct SoftwareStore {
    certificates: Arc<Vec<Arc<StoredCertificate>>>,
    constants: ProviderConstants,
    /// Shared with every handle issued from this store.
    open: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl CertificateStore for SoftwareStore {
    async fn open(&mut self, location: i32, name: &str, access_mode: i32) -> ProviderResult<()> {
        if location != self.constants.current_user_store {
            return Err(ProviderError::Unsupported {
                name: "store location",
                value: location.to_string(),
            });
        }
        if name != self.constants.my_store {
            return Err(ProviderError::Unsupported {
                name: "store name",
                value: name.to_string(),
            });
        }
        // Every access mode collapses to read-only here.
        debug!(access_mode, "opened software certificate store");
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn certificates(&self) -> ProviderResult<Box<dyn Certificates>> {
        ensure_open(&self.open)?;
        Ok(Box::new(SoftwareCertificates {
            entries: self.certificates.as_ref().clone(),
            find_subject_name: self.constants.find_subject_name,
            open: self.open.clone(),
        }))
    }

    async fn close(&mut self) -> ProviderResult<()> {
        if self.closed || !self.open.load(Ordering::SeqCst) {
            return Err(ProviderError::StoreNotOpen);
        }
        self.open.store(false, Ordering::SeqCst);
        self.closed = true;
        Ok(())
    }
}

fn ensure_open(open: &AtomicBool) -> ProviderResult<()> {
    if open.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(ProviderError::StoreNotOpen)
    }
}

struct SoftwareCertificates {
    entries: Vec<Arc<StoredCertificate>>,
    find_subject_name: i32,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Certificates for SoftwareCertificates {
    async fn count(&self) -> ProviderResult<usize> {
        ensure_open(&self.open)?;
        Ok(self.entries.len())
    }

    /// Subject-name search is a case-insensitive substring match.
    async fn find(&self, criterion: i32, value: &str) -> ProviderResult<Box<dyn Certificates>> {
        ensure_open(&self.open)?;
        if criterion != self.find_subject_name {
            return Err(ProviderError::Unsupported {
                name: "find criterion",
                value: criterion.to_string(),
            });
        }
        let needle = value.to_lowercase();
        let entries = self
            .entries
            .iter()
            .filter(|stored| stored.record.subject_name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        Ok(Box::new(SoftwareCertificates {
            entries,
            find_subject_name: self.find_subject_name,
            open: self.open.clone(),
        }))
    }

    async fn item(&self, index: usize) -> ProviderResult<Arc<dyn Certificate>> {
        ensure_open(&self.open)?;
        let count = self.entries.len();
        let stored = index
            .checked_sub(1)
            .and_then(|position| self.entries.get(position))
            .ok_or(ProviderError::IndexOutOfRange { index, count })?;
        Ok(Arc::new(SoftwareCertificate {
            stored: stored.clone(),
            open: self.open.clone(),
        }))
    }
}

struct SoftwareCertificate {
    stored: Arc<StoredCertificate>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Certificate for SoftwareCertificate {
    async fn subject_name(&self) -> ProviderResult<String> {
        ensure_open(&self.open)?;
        Ok(self.stored.record.subject_name.clone())
    }

    async fn valid_to_date(&self) -> ProviderResult<DateTime<Utc>> {
        ensure_open(&self.open)?;
        Ok(self.stored.record.valid_to)
    }

    async fn is_valid(&self) -> ProviderResult<Validation> {
        ensure_open(&self.open)?;
        Ok(Validation {
            result: self.stored.record.valid,
        })
    }

    async fn has_private_key(&self) -> ProviderResult<bool> {
        ensure_open(&self.open)?;
        Ok(self.stored.key.is_some())
    }

    async fn thumbprint(&self) -> ProviderResult<String> {
        ensure_open(&self.open)?;
        Ok(self.stored.thumbprint())
    }
}

#[derive(Default)]
struct SoftwareSigner {
    certificate: Option<Arc<dyn Certificate>>,
    options: i32,
}

#[async_trait]
impl CadesSigner for SoftwareSigner {
    async fn set_certificate(&mut self, certificate: Arc<dyn Certificate>) -> ProviderResult<()> {
        self.certificate = Some(certificate);
        Ok(())
    }

    async fn certificate(&self) -> ProviderResult<Option<Arc<dyn Certificate>>> {
        Ok(self.certificate.clone())
    }

    async fn set_options(&mut self, options: i32) -> ProviderResult<()> {
        self.options = options;
        Ok(())
    }

    async fn options(&self) -> ProviderResult<i32> {
        Ok(self.options)
    }
}

struct SoftwareSignedData {
    provider: SoftwareProvider,
    content: Option<String>,
}

#[async_trait]
impl SignedData for SoftwareSignedData {
    async fn set_content(&mut self, content: &str) -> ProviderResult<()> {
        self.content = Some(content.to_string());
        Ok(())
    }

    async fn sign_cades(
        &self,
        signer: &dyn CadesSigner,
        signature_type: i32,
    ) -> ProviderResult<String> {
        let constants = &self.provider.constants;
        if signature_type != constants.cades_bes {
            return Err(ProviderError::Unsupported {
                name: "signature type",
                value: signature_type.to_string(),
            });
        }
        let content = self.content.as_deref().ok_or(ProviderError::NoContent)?;
        let certificate = signer.certificate().await?.ok_or(ProviderError::NoCertificate)?;
        let thumbprint = certificate.thumbprint().await?;
        let stored = self
            .provider
            .lookup(&thumbprint)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown certificate {thumbprint}")))?;
        let key = stored.key.as_ref().ok_or(ProviderError::NoPrivateKey)?;
        let signature = key.sign_content(content).map_err(rejected)?;

        let mut chain = vec![stored.record.subject_name.clone()];
        if signer.options().await? == constants.include_whole_chain {
            chain.extend(stored.record.chain.iter().cloned());
        }

        let envelope = SignedEnvelope {
            format: ENVELOPE_FORMAT.to_string(),
            content: content.to_string(),
            signer: stored.record.subject_name.clone(),
            algorithm: key.algorithm().to_string(),
            signature: hex::encode(signature),
            public_key: hex::encode(key.public_key()),
            chain,
        };
        let encoded = serde_json::to_vec(&envelope).map_err(|e| rejected(e.into()))?;
        Ok(STANDARD.encode(encoded))
    }
}

fn rejected(error: anyhow::Error) -> ProviderError {
    ProviderError::Rejected(format!("{error:#}"))
}
