//! Presentability rules and display formatting for store certificates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CadesError;
use crate::provider::{Certificate, ProviderResult};

const CN_MARKER: &str = "CN=";
const ISSUED_DATE_FORMAT: &str = "%d.%m.%Y";

/// A certificate as shown to the user when picking one to sign with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDescription {
    /// Common name and expiry date, e.g. `Jane Doe; Issued 01.02.2030`.
    /// The date is the UTC calendar day of the validity end.
    pub title: String,
    /// Full subject name, usable as a signing filter.
    pub cn: String,
}

/// The properties that decide whether a certificate is offered at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateStatus {
    pub valid_to: DateTime<Utc>,
    pub is_valid: bool,
    pub has_private_key: bool,
}

impl CertificateStatus {
    /// Fetch expiry, validity and key presence, in that order.
    pub async fn fetch(certificate: &dyn Certificate) -> ProviderResult<Self> {
        let valid_to = certificate.valid_to_date().await?;
        let is_valid = certificate.is_valid().await?.result;
        let has_private_key = certificate.has_private_key().await?;
        Ok(Self {
            valid_to,
            is_valid,
            has_private_key,
        })
    }

    pub fn is_presentable(&self, now: DateTime<Utc>) -> bool {
        self.has_private_key && self.is_valid && now < self.valid_to
    }
}

/// Build the description of a certificate from its subject name and expiry.
pub fn describe(
    subject_name: &str,
    valid_to: DateTime<Utc>,
) -> Result<CertificateDescription, CadesError> {
    let malformed = || CadesError::MalformedSubjectName(subject_name.to_string());
    let start = subject_name.find(CN_MARKER).ok_or_else(malformed)? + CN_MARKER.len();
    let len = subject_name[start..].find(',').ok_or_else(malformed)?;
    let cn = &subject_name[start..start + len];

    Ok(CertificateDescription {
        title: format!("{cn}; Issued {}", valid_to.format(ISSUED_DATE_FORMAT)),
        cn: subject_name.to_string(),
    })
}

/// Describe `certificate` if it is presentable at `now`.
///
/// The subject name is only fetched for presentable certificates.
pub async fn inspect(
    certificate: &dyn Certificate,
    now: DateTime<Utc>,
) -> Result<Option<CertificateDescription>, CadesError> {
    let status = CertificateStatus::fetch(certificate).await?;
    if !status.is_presentable(now) {
        return Ok(None);
    }
    let subject_name = certificate.subject_name().await?;
    describe(&subject_name, status.valid_to).map(Some)
}
