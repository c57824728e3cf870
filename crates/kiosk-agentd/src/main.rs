mod config;
mod convert;
mod service;

use std::sync::Arc;

use config::{AgentConfig, CONFIG_FILE_NAME};
use kiosk_adb::AdbProvider;
use kiosk_core::{CapabilityProvider, KioskAgent, NullProvider};
use kiosk_proto::kiosk::v1::kiosk_service_server::KioskServiceServer;
use service::Svc;
use tracing::{info, warn};

async fn select_provider(config: &AgentConfig) -> Arc<dyn CapabilityProvider> {
    match AdbProvider::connect(config.provider_config(), config.device_wait_attempts).await {
        Ok(provider) => {
            info!(serial = provider.serial(), "using adb capability provider");
            kiosk_telemetry::event("provider.selected", &[("provider", "adb")]);
            Arc::new(provider)
        }
        Err(err) => {
            warn!("no capability provider ({err}); serving degraded defaults");
            kiosk_telemetry::event("provider.selected", &[("provider", "null")]);
            Arc::new(NullProvider)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    kiosk_util::init_tracing()?;
    kiosk_util::init_service_telemetry("kiosk-agentd", env!("CARGO_PKG_VERSION"), "kiosk");

    let config_path = kiosk_util::state_file_path(CONFIG_FILE_NAME);
    let config = AgentConfig::load(&config_path);
    if !config_path.exists() {
        if let Err(err) = config.save(&config_path) {
            warn!("Failed to write {}: {}", config_path.display(), err);
        }
    }

    let provider = select_provider(&config).await;
    let agent = Arc::new(KioskAgent::new(provider, config.agent_options()));
    let svc = Svc::new(Arc::clone(&agent));

    let shutdown = {
        let agent = Arc::clone(&agent);
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {err}");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
            agent.shutdown();
        }
    };

    kiosk_util::serve_grpc(
        "kiosk-agentd",
        "KIOSK_AGENT_ADDR",
        kiosk_util::DEFAULT_AGENT_ADDR,
        |server| server.add_service(KioskServiceServer::new(svc)),
        shutdown,
    )
    .await
}
