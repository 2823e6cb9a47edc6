//! Satchel - encrypted sessions and bearer credentials for a school portal
//!
//! Usage:
//! - `satchel keygen` prints fresh key material for the configuration
//! - `satchel check` loads the configuration, connects the session backend
//!   and runs a login/validate/logout round trip

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use satchel::{
    config::Config,
    models::SessionPayload,
    services::{create_credential_service, Cipher},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "satchel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match std::env::args().nth(1).as_deref() {
        Some("keygen") => {
            keygen();
            Ok(())
        }
        None | Some("check") => check().await,
        Some(other) => anyhow::bail!("Unknown command '{}', expected 'check' or 'keygen'", other),
    }
}

fn keygen() {
    let mut secret = [0u8; 48];
    OsRng.fill_bytes(&mut secret);

    println!("security:");
    println!("  signing_secret: \"{}\"", URL_SAFE_NO_PAD.encode(secret));
    println!("  encryption_key: \"{}\"", Cipher::generate_key());
}

async fn check() -> Result<()> {
    let path = std::env::var("SATCHEL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.yml"));

    let config = Config::load_with_env(&path)?;
    config.validate()?;
    tracing::info!(
        path = %path.display(),
        driver = ?config.session.driver,
        "Configuration loaded"
    );

    let service = create_credential_service(&config).await?;
    if !service.health().await {
        anyhow::bail!("Session backend is not answering");
    }
    tracing::info!("Session backend connected");

    // Round trip through the store and the issuer
    let grant = service.login("satchel-check", &SessionPayload::new()).await?;
    let validated = service.validate(&grant.access_credential).await?;
    service.logout(&grant.access_credential).await?;
    if validated.is_none() {
        anyhow::bail!("Check credential did not validate");
    }

    tracing::info!("Credential round trip succeeded");
    Ok(())
}
