use axum::http::StatusCode;
use axum_core::response::{IntoResponse as AxumCoreIntoResponse, Response};

use crate::provider::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum CadesError {
    #[error("No certificates found")]
    NoCertificatesFound,
    #[error("Specify certificate name. Found: {0} certificates")]
    AmbiguousCertificate(usize),
    #[error("Malformed certificate subject name: {0:?}")]
    MalformedSubjectName(String),
    #[error(transparent)]
    ProviderFailure(#[from] ProviderError),
}

/// Trait implementation to convert this error into an axum http response
impl AxumCoreIntoResponse for CadesError {
    fn into_response(self) -> Response {
        match self {
            not_found @ CadesError::NoCertificatesFound => {
                (StatusCode::NOT_FOUND, not_found.to_string()).into_response()
            }
            ambiguous @ CadesError::AmbiguousCertificate(_) => {
                (StatusCode::CONFLICT, ambiguous.to_string()).into_response()
            }
            malformed @ CadesError::MalformedSubjectName(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, malformed.to_string()).into_response()
            }
            CadesError::ProviderFailure(error) => {
                tracing::error!(%error, "certificate provider call failed");
                (StatusCode::BAD_GATEWAY, "Certificate provider failure.").into_response()
            }
        }
    }
}
