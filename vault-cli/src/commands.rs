//! Command handlers for the CLI

use vault_api::{run_server, ApiConfig, AppState};
use vault_core::ledger::BillingEventLedger;
use vault_core::types::RequestContext;
use vault_db::{open_store, StorageBackend, VaultConfig, VaultServices};

pub type CmdResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const CLI_ACTOR: &str = "cli";

fn build_services(config: &VaultConfig) -> Result<VaultServices, vault_db::VaultDbError> {
    let store = open_store(&config.storage)?;
    Ok(VaultServices::new(store, config))
}

fn warn_if_ephemeral(config: &VaultConfig) {
    if config.storage.backend == StorageBackend::Memory {
        tracing::warn!("Memory storage backend selected; nothing persists past this process");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

/// Run the API server with the background sweeper
pub async fn handle_start_command(config: VaultConfig, host: String, port: u16, enable_cors: bool) -> CmdResult {
    println!("Starting vault API server on {}:{}...", host, port);
    warn_if_ephemeral(&config);

    let services = build_services(&config)?;
    let sweeper = config.sweep.enabled.then(|| services.expiration.start());

    let api_config = ApiConfig {
        host,
        port,
        enable_cors,
    };
    let state = AppState::new(services, &config.webhook);
    let served = run_server(&api_config, state, shutdown_signal()).await;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    served
}

/// One expiration sweep
pub async fn handle_sweep_command(config: VaultConfig) -> CmdResult {
    warn_if_ephemeral(&config);
    let services = build_services(&config)?;

    let report = services.expiration.sweep_once().await?;
    println!("Sweep complete");
    println!("  Scanned: {}", report.scanned);
    println!("  Expired: {}", report.expired);
    println!("  Skipped: {}", report.skipped);
    println!("  Errors:  {}", report.errors);
    Ok(())
}

/// Re-apply a failed billing event, locally or through a running server
pub async fn handle_redrive_command(config: VaultConfig, event_id: String, api_url: Option<String>) -> CmdResult {
    if let Some(api_url) = api_url {
        let response = reqwest::Client::new()
            .post(format!("{}/billing-events/{}/redrive", api_url.trim_end_matches('/'), event_id))
            .header("x-actor-id", CLI_ACTOR)
            .send()
            .await?;
        let status = response.status();
        let body = response.json::<serde_json::Value>().await?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        if !status.is_success() {
            return Err(format!("Redrive failed with HTTP {}", status).into());
        }
        return Ok(());
    }

    warn_if_ephemeral(&config);
    let services = build_services(&config)?;
    let record = services
        .billing
        .redrive(&RequestContext::system(CLI_ACTOR), &event_id)
        .await?;

    println!("Event {} re-driven", record.external_event_id);
    println!("  Status: {}", record.status);
    println!("  Retries: {}", record.retry_count);
    if let Some(message) = &record.error_message {
        println!("  Error: {}", message);
    }
    Ok(())
}

/// Health and readiness of a running server
pub async fn handle_status_command(api_url: &str) -> CmdResult {
    let base = api_url.trim_end_matches('/');
    println!("Checking vault status at {}...", base);

    let client = reqwest::Client::new();
    for path in ["health", "ready"] {
        let response = client
            .get(format!("{}/{}", base, path))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;
        println!("{}: {}", path, serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}
