//! Command-line and environment configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Args, Parser};

use imc_controller::DispatcherConfig;

/// InMemoryChannel operator
#[derive(Parser, Debug)]
#[command(name = "imc-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the InMemoryChannel CRD manifest and exit
    #[arg(long)]
    pub crd: bool,

    // doc comments are not used on flattened args
    #[allow(missing_docs)]
    #[command(flatten)]
    pub config: OperatorConfig,
}

/// Settings for one operator process, parsed once at startup
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace of the shared dispatcher
    #[arg(long, env = "DISPATCHER_NAMESPACE", default_value = "knative-eventing")]
    pub dispatcher_namespace: String,

    /// Name of the dispatcher Deployment
    #[arg(long, env = "DISPATCHER_DEPLOYMENT", default_value = "imc-dispatcher")]
    pub dispatcher_deployment: String,

    /// Name of the dispatcher Service and its Endpoints
    #[arg(long, env = "DISPATCHER_SERVICE", default_value = "imc-dispatcher")]
    pub dispatcher_service: String,

    /// Maximum number of channels reconciled at once
    #[arg(long, env = "IMC_WORKERS", default_value_t = 2, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// Listen address of the conversion webhook
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    pub webhook_addr: SocketAddr,

    /// PEM certificate for the conversion webhook
    #[arg(long, env = "WEBHOOK_CERT", requires = "webhook_key")]
    pub webhook_cert: Option<PathBuf>,

    /// PEM private key for the conversion webhook
    #[arg(long, env = "WEBHOOK_KEY", requires = "webhook_cert")]
    pub webhook_key: Option<PathBuf>,
}

impl OperatorConfig {
    /// Where the dispatcher lives
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig::new(
            &self.dispatcher_namespace,
            &self.dispatcher_deployment,
            &self.dispatcher_service,
        )
    }

    /// Certificate and key paths, present only when the webhook should run
    pub fn webhook_tls(&self) -> Option<(&Path, &Path)> {
        match (&self.webhook_cert, &self.webhook_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}
