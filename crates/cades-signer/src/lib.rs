pub mod catalog;
pub mod error;
pub mod filter;
pub mod orchestrator;
pub mod provider;
pub mod server;

pub use catalog::CertificateCatalog;
pub use error::CadesError;
pub use filter::{CertificateDescription, CertificateStatus, describe};
pub use orchestrator::{DEFAULT_PAYLOAD, Signature, SigningOrchestrator, SigningRequest, SigningState};
pub use provider::{Provider, ProviderError, ProviderGateway, SoftwareProvider};
pub use server::{AppState, router, run};
