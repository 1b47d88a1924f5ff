//! imc-operator - InMemoryChannel controller and conversion webhook

use clap::Parser;

use imc_common::kube_utils::create_client;
use imc_common::telemetry::{init_telemetry, TelemetryConfig};
use imc_operator::config::{Cli, OperatorConfig};
use imc_operator::controller_runner::build_channel_controller;
use imc_operator::crds::{channel_crd_yaml, ensure_crds_installed};
use imc_operator::webhook;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The webhook and the kube client both use rustls with aws-lc-rs
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install crypto provider: {:?}. \
             The operator cannot serve TLS or reach the API server without it.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        println!("{}", channel_crd_yaml()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "imc-operator".to_string(),
        ..Default::default()
    })?;

    run(cli.config).await
}

async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    let client = create_client(None).await?;

    ensure_crds_installed(&client).await?;

    if let Some((cert, key)) = config.webhook_tls() {
        let (addr, cert, key) = (config.webhook_addr, cert.to_path_buf(), key.to_path_buf());
        tokio::spawn(async move {
            if let Err(e) = webhook::serve(addr, &cert, &key).await {
                tracing::error!(error = %e, "conversion webhook stopped");
            }
        });
    } else {
        tracing::info!("no webhook certificate configured, conversion webhook disabled");
    }

    tracing::info!("Starting InMemoryChannel controller");
    build_channel_controller(client, &config).await;

    tracing::info!("InMemoryChannel controller shut down");
    Ok(())
}
