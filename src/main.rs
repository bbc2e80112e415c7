//! Forge admission webhook binary

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kube::Client;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use forge_webhook::config::WebhookOptions;
use forge_webhook::crd;
use forge_webhook::webhook::AdmissionController;
use forge_webhook::DEFAULT_WEBHOOK_PORT;

/// Mutating admission webhook for Forge build resources
#[derive(Debug, Parser)]
#[command(name = "forge-webhook", version, about)]
struct Cli {
    /// Port the HTTPS listener binds to
    #[arg(long, env = "FORGE_WEBHOOK_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    port: u16,

    /// Namespace holding the certificate secret, service, and deployment
    #[arg(long, env = "FORGE_WEBHOOK_NAMESPACE", default_value = "forge-system")]
    namespace: String,

    /// Name of the secret storing the webhook's TLS material
    #[arg(long, env = "FORGE_WEBHOOK_SECRET", default_value = "forge-webhook-certs")]
    secret_name: String,

    /// Name of the MutatingWebhookConfiguration object
    #[arg(long, env = "FORGE_WEBHOOK_NAME", default_value = "webhook.forge.dev")]
    webhook_name: String,

    /// Name of the service the API server routes admission requests to
    #[arg(long, env = "FORGE_WEBHOOK_SERVICE", default_value = "forge-webhook")]
    service_name: String,

    /// Name of the deployment running this webhook
    #[arg(long, env = "FORGE_WEBHOOK_DEPLOYMENT", default_value = "forge-webhook")]
    deployment_name: String,

    /// Seconds to wait after startup before registering with the API server
    #[arg(long, env = "FORGE_WEBHOOK_REGISTRATION_DELAY", default_value_t = 2)]
    registration_delay_secs: u64,

    /// Require and verify client certificates against the API server CA
    #[arg(long, env = "FORGE_WEBHOOK_REQUIRE_CLIENT_CERTS")]
    require_client_certs: bool,
}

impl From<Cli> for WebhookOptions {
    fn from(cli: Cli) -> Self {
        Self {
            port: cli.port,
            namespace: cli.namespace,
            secret_name: cli.secret_name,
            webhook_name: cli.webhook_name,
            service_name: cli.service_name,
            deployment_name: cli.deployment_name,
            registration_delay: Duration::from_secs(cli.registration_delay_secs),
            require_client_certs: cli.require_client_certs,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let options = WebhookOptions::from(cli);
    info!(
        namespace = %options.namespace,
        webhook = %options.webhook_name,
        port = options.port,
        "starting forge webhook"
    );

    let client = Client::try_default()
        .await
        .context("failed to build kubernetes client")?;

    let controller = AdmissionController::new(client, options, crd::registry());
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    controller.run(shutdown).await?;

    info!("forge webhook stopped");
    Ok(())
}
