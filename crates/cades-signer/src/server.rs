use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::CertificateCatalog;
use crate::error::CadesError;
use crate::filter::CertificateDescription;
use crate::orchestrator::{Signature, SigningOrchestrator, SigningRequest};
use crate::provider::Provider;

#[derive(Clone)]
pub struct AppState {
    pub catalog: CertificateCatalog,
    pub orchestrator: SigningOrchestrator,
}

impl AppState {
    pub fn new(provider: Provider) -> Self {
        Self {
            catalog: CertificateCatalog::new(provider.clone()),
            orchestrator: SigningOrchestrator::new(provider),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    pub signature: Signature,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(|| async move { (StatusCode::OK, "Ok").into_response() }))
        .route("/certificates", get(certificates_handler))
        .route("/sign", post(sign_handler))
        .with_state(state)
}

pub async fn run(host: String, port: u16, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    info!(address = %listener.local_addr()?, "listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serving http")?;

    Ok(())
}

async fn certificates_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<CertificateDescription>>, CadesError> {
    state.catalog.list_certificates().await.map(Json)
}

async fn sign_handler(
    State(state): State<AppState>,
    Json(request): Json<SigningRequest>,
) -> Result<Json<SignResponse>, CadesError> {
    let signature = state.orchestrator.sign(&request).await?;
    Ok(Json(SignResponse { signature }))
}
