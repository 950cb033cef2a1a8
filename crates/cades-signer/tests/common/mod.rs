//! Scripted provider that records every call it receives.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use cades_signer::Provider;
use cades_signer::provider::{
    CadesSigner, Certificate, CertificateStore, Certificates, ProviderConstants, ProviderError,
    ProviderGateway, ProviderObject, ProviderResult, SIGNED_DATA_OBJECT, SIGNER_OBJECT,
    STORE_OBJECT, SignedData, Validation,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateObject(String),
    Open { location: i32, name: String, access_mode: i32 },
    Certificates,
    Count,
    Find { criterion: i32, value: String },
    Item(usize),
    SubjectName(usize),
    ValidToDate(usize),
    IsValid(usize),
    HasPrivateKey(usize),
    SetCertificate(usize),
    SetOptions(i32),
    SetContent(String),
    SignCades(i32),
    Close,
}

#[derive(Debug, Clone)]
pub struct StubCertificate {
    pub subject_name: String,
    pub valid_to: DateTime<Utc>,
    pub valid: bool,
    pub private_key: bool,
    /// Scheduler yields before each property read completes.
    pub delay: usize,
}

impl StubCertificate {
    pub fn usable(subject_name: &str) -> Self {
        Self {
            subject_name: subject_name.to_string(),
            valid_to: Utc::now() + Duration::days(365),
            valid: true,
            private_key: true,
            delay: 0,
        }
    }

    pub fn expired(mut self) -> Self {
        self.valid_to = Utc::now() - Duration::days(1);
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn without_key(mut self) -> Self {
        self.private_key = false;
        self
    }

    pub fn delayed(mut self, delay: usize) -> Self {
        self.delay = delay;
        self
    }
}

type FailWhen = Box<dyn Fn(&Call) -> bool + Send + Sync>;

struct Ledger {
    calls: Mutex<Vec<Call>>,
    fail_when: Option<FailWhen>,
}

impl Ledger {
    fn record(&self, call: Call) -> ProviderResult<()> {
        let fail = self.fail_when.as_ref().is_some_and(|fail| fail(&call));
        let description = format!("{call:?}");
        self.calls.lock().unwrap().push(call);
        if fail {
            Err(ProviderError::Rejected(format!("stub failure at {description}")))
        } else {
            Ok(())
        }
    }
}

pub struct StubGateway {
    certificates: Vec<StubCertificate>,
    ledger: Arc<Ledger>,
}

impl StubGateway {
    pub fn new(certificates: Vec<StubCertificate>) -> Self {
        Self {
            certificates,
            ledger: Arc::new(Ledger {
                calls: Mutex::new(Vec::new()),
                fail_when: None,
            }),
        }
    }

    /// Reject the first and every later call matching `predicate`.
    pub fn failing_when(
        certificates: Vec<StubCertificate>,
        predicate: impl Fn(&Call) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            certificates,
            ledger: Arc::new(Ledger {
                calls: Mutex::new(Vec::new()),
                fail_when: Some(Box::new(predicate)),
            }),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.ledger.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|recorded| *recorded == call).count()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|recorded| recorded == call)
    }
}

/// Attach `gateway` and keep a handle for inspecting its call log.
pub async fn attach(gateway: StubGateway) -> (Provider, Arc<StubGateway>) {
    let gateway = Arc::new(gateway);
    let provider = Provider::attach(gateway.clone()).await.unwrap();
    (provider, gateway)
}

#[async_trait]
impl ProviderGateway for StubGateway {
    async fn create_object(&self, type_name: &str) -> ProviderResult<ProviderObject> {
        self.ledger.record(Call::CreateObject(type_name.to_string()))?;
        let entries = self
            .certificates
            .iter()
            .cloned()
            .enumerate()
            .map(|(position, certificate)| (position + 1, certificate))
            .collect();
        match type_name {
            STORE_OBJECT => Ok(ProviderObject::Store(Box::new(StubStore {
                entries,
                ledger: self.ledger.clone(),
            }))),
            SIGNER_OBJECT => Ok(ProviderObject::Signer(Box::new(StubSigner {
                ledger: self.ledger.clone(),
                certificate: None,
                options: 0,
            }))),
            SIGNED_DATA_OBJECT => Ok(ProviderObject::SignedData(Box::new(StubSignedData {
                ledger: self.ledger.clone(),
                content: None,
            }))),
            other => Err(ProviderError::UnknownObject(other.to_string())),
        }
    }

    async fn constants(&self) -> ProviderResult<ProviderConstants> {
        Ok(ProviderConstants::default())
    }
}

/// Entries keep their 1-based position in the full store.
struct StubStore {
    entries: Vec<(usize, StubCertificate)>,
    ledger: Arc<Ledger>,
}

#[async_trait]
impl CertificateStore for StubStore {
    async fn open(&mut self, location: i32, name: &str, access_mode: i32) -> ProviderResult<()> {
        self.ledger.record(Call::Open {
            location,
            name: name.to_string(),
            access_mode,
        })
    }

    async fn certificates(&self) -> ProviderResult<Box<dyn Certificates>> {
        self.ledger.record(Call::Certificates)?;
        Ok(Box::new(StubCollection {
            entries: self.entries.clone(),
            ledger: self.ledger.clone(),
        }))
    }

    async fn close(&mut self) -> ProviderResult<()> {
        self.ledger.record(Call::Close)
    }
}

struct StubCollection {
    entries: Vec<(usize, StubCertificate)>,
    ledger: Arc<Ledger>,
}

#[async_trait]
impl Certificates for StubCollection {
    async fn count(&self) -> ProviderResult<usize> {
        self.ledger.record(Call::Count)?;
        Ok(self.entries.len())
    }

    async fn find(&self, criterion: i32, value: &str) -> ProviderResult<Box<dyn Certificates>> {
        self.ledger.record(Call::Find {
            criterion,
            value: value.to_string(),
        })?;
        let entries = self
            .entries
            .iter()
            .filter(|(_, certificate)| certificate.subject_name.contains(value))
            .cloned()
            .collect();
        Ok(Box::new(StubCollection {
            entries,
            ledger: self.ledger.clone(),
        }))
    }

    async fn item(&self, index: usize) -> ProviderResult<Arc<dyn Certificate>> {
        let (position, certificate) = index
            .checked_sub(1)
            .and_then(|offset| self.entries.get(offset))
            .cloned()
            .ok_or(ProviderError::IndexOutOfRange {
                index,
                count: self.entries.len(),
            })?;
        jitter(certificate.delay).await;
        self.ledger.record(Call::Item(position))?;
        Ok(Arc::new(StubHandle {
            position,
            certificate,
            ledger: self.ledger.clone(),
        }))
    }
}

struct StubHandle {
    position: usize,
    certificate: StubCertificate,
    ledger: Arc<Ledger>,
}

#[async_trait]
impl Certificate for StubHandle {
    async fn subject_name(&self) -> ProviderResult<String> {
        jitter(self.certificate.delay).await;
        self.ledger.record(Call::SubjectName(self.position))?;
        Ok(self.certificate.subject_name.clone())
    }

    async fn valid_to_date(&self) -> ProviderResult<DateTime<Utc>> {
        jitter(self.certificate.delay).await;
        self.ledger.record(Call::ValidToDate(self.position))?;
        Ok(self.certificate.valid_to)
    }

    async fn is_valid(&self) -> ProviderResult<Validation> {
        jitter(self.certificate.delay).await;
        self.ledger.record(Call::IsValid(self.position))?;
        Ok(Validation {
            result: self.certificate.valid,
        })
    }

    async fn has_private_key(&self) -> ProviderResult<bool> {
        jitter(self.certificate.delay).await;
        self.ledger.record(Call::HasPrivateKey(self.position))?;
        Ok(self.certificate.private_key)
    }

    async fn thumbprint(&self) -> ProviderResult<String> {
        Ok(format!("stub-{}", self.position))
    }
}

struct StubSigner {
    ledger: Arc<Ledger>,
    certificate: Option<Arc<dyn Certificate>>,
    options: i32,
}

#[async_trait]
impl CadesSigner for StubSigner {
    async fn set_certificate(&mut self, certificate: Arc<dyn Certificate>) -> ProviderResult<()> {
        let thumbprint = certificate.thumbprint().await?;
        let position = thumbprint
            .trim_start_matches("stub-")
            .parse()
            .unwrap_or_default();
        self.ledger.record(Call::SetCertificate(position))?;
        self.certificate = Some(certificate);
        Ok(())
    }

    async fn certificate(&self) -> ProviderResult<Option<Arc<dyn Certificate>>> {
        Ok(self.certificate.clone())
    }

    async fn set_options(&mut self, options: i32) -> ProviderResult<()> {
        self.ledger.record(Call::SetOptions(options))?;
        self.options = options;
        Ok(())
    }

    async fn options(&self) -> ProviderResult<i32> {
        Ok(self.options)
    }
}

struct StubSignedData {
    ledger: Arc<Ledger>,
    content: Option<String>,
}

#[async_trait]
impl SignedData for StubSignedData {
    async fn set_content(&mut self, content: &str) -> ProviderResult<()> {
        self.ledger.record(Call::SetContent(content.to_string()))?;
        self.content = Some(content.to_string());
        Ok(())
    }

    async fn sign_cades(
        &self,
        signer: &dyn CadesSigner,
        signature_type: i32,
    ) -> ProviderResult<String> {
        self.ledger.record(Call::SignCades(signature_type))?;
        let certificate = signer.certificate().await?.ok_or(ProviderError::NoCertificate)?;
        let content = self.content.as_deref().ok_or(ProviderError::NoContent)?;
        Ok(format!(
            "sig({content})[{}]/{}",
            certificate.thumbprint().await?,
            signer.options().await?
        ))
    }
}

async fn jitter(delay: usize) {
    for _ in 0..delay {
        tokio::task::yield_now().await;
    }
}
