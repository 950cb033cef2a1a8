use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tracing::{debug, info};

use crate::error::CadesError;
use crate::filter::{CertificateDescription, inspect};
use crate::provider::{CertificateStore, Certificates, Provider, close_store};

/// Lists the certificates in the user's personal store that can sign.
#[derive(Clone)]
pub struct CertificateCatalog {
    provider: Provider,
}

impl CertificateCatalog {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }

    /// Describe every presentable certificate, in store order.
    ///
    /// Fails with [`CadesError::NoCertificatesFound`] only when the store is
    /// empty; a store whose certificates are all filtered out yields an
    /// empty list.
    pub async fn list_certificates(&self) -> Result<Vec<CertificateDescription>, CadesError> {
        let store = self.provider.open_store().await?;
        let outcome = collect(store.as_ref(), Utc::now()).await;
        let descriptions = close_store(store, outcome).await?;
        info!(count = descriptions.len(), "listed presentable certificates");
        Ok(descriptions)
    }
}

async fn collect(
    store: &dyn CertificateStore,
    now: DateTime<Utc>,
) -> Result<Vec<CertificateDescription>, CadesError> {
    let certificates = store.certificates().await?;
    let count = certificates.count().await?;
    if count == 0 {
        return Err(CadesError::NoCertificatesFound);
    }
    debug!(count, "evaluating store certificates");

    // try_join_all yields results in input order, whatever order they finish in.
    let evaluations = (1..=count).map(|index| evaluate(certificates.as_ref(), index, now));
    let evaluated = try_join_all(evaluations).await?;

    Ok(evaluated.into_iter().flatten().collect())
}

async fn evaluate(
    certificates: &dyn Certificates,
    index: usize,
    now: DateTime<Utc>,
) -> Result<Option<CertificateDescription>, CadesError> {
    let certificate = certificates.item(index).await?;
    let description = inspect(certificate.as_ref(), now).await?;
    if description.is_none() {
        debug!(index, "skipping certificate that cannot sign");
    }
    Ok(description)
}
