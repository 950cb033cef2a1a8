use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cades_signer::{
    AppState, CertificateCatalog, Provider, SigningOrchestrator, SigningRequest,
    SoftwareProvider, run,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Certificate store document for the software provider.
    #[clap(long, env = "CADES_STORE")]
    store: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the certificate list and signing over HTTP.
    Serve {
        #[clap(long, env = "HOST", default_value = "127.0.0.1")]
        host: String,
        #[clap(long, env = "PORT", default_value = "3000")]
        port: u16,
    },
    /// Print the certificates that can sign, as JSON.
    List,
    /// Sign a payload and print the signature.
    Sign {
        #[clap(long)]
        payload: Option<String>,
        /// Subject-name fragment selecting the certificate.
        #[clap(long)]
        certificate: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let gateway = SoftwareProvider::from_path(&args.store).await?;
    let provider = Provider::attach(Arc::new(gateway))
        .await
        .context("attaching certificate provider")?;

    match args.command {
        Command::Serve { host, port } => run(host, port, AppState::new(provider)).await?,
        Command::List => {
            let certificates = CertificateCatalog::new(provider)
                .list_certificates()
                .await
                .context("listing certificates")?;
            println!("{}", serde_json::to_string_pretty(&certificates)?);
        }
        Command::Sign {
            payload,
            certificate,
        } => {
            let request = SigningRequest {
                payload,
                certificate_filter: certificate,
            };
            let signature = SigningOrchestrator::new(provider)
                .sign(&request)
                .await
                .context("signing payload")?;
            println!("{signature}");
        }
    }

    Ok(())
}
