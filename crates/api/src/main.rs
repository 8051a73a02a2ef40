use std::sync::Arc;

use anyhow::Context;

use certdrop_infra::config::{EngineConfig, SmtpSettings};
use certdrop_infra::delivery::SmtpChannelProvider;
use certdrop_infra::jobs::{BatchEngine, InMemoryJobStore};
use certdrop_infra::render::PdfTemplateEngine;

const PORT_ENV: &str = "PORT";
const DEFAULT_PORT: u16 = 3000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    certdrop_observability::init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;

    let smtp = SmtpSettings::from_env();
    if !smtp.has_client() {
        tracing::warn!("CLIENT_ID/CLIENT_SECRET not set; mail channels will fail to authenticate");
    }

    tracing::info!(
        group_size = config.group_size,
        cooldown_ms = config.cooldown.as_millis() as u64,
        storage_root = %config.storage_root.display(),
        smtp_host = %smtp.host,
        "engine configured"
    );

    let engine = BatchEngine::new(
        config,
        PdfTemplateEngine::new(),
        SmtpChannelProvider::new(smtp),
        InMemoryJobStore::arc(),
    );
    let app = certdrop_api::app::build_app(Arc::new(engine));

    let port = match std::env::var(PORT_ENV) {
        Ok(raw) => raw
            .trim()
            .parse::<u16>()
            .with_context(|| format!("{PORT_ENV}: cannot parse {raw:?}"))?,
        Err(_) => DEFAULT_PORT,
    };
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind 0.0.0.0:{port}"))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
