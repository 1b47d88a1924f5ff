//! Controller runner - wires the InMemoryChannel reconciler into kube-runtime

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use imc_common::crd::v1::InMemoryChannel;
use imc_common::events::KubeEventPublisher;
use imc_controller::{error_policy, reconcile, BackoffConfig, Context};

use crate::config::OperatorConfig;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Reporting component on emitted Events
pub const CONTROLLER_NAME: &str = "inmemorychannel-controller";

/// Build the InMemoryChannel controller future
///
/// Channels are watched cluster-wide. The dispatcher Deployment, Service and
/// Endpoints are watched by name in the dispatcher namespace; any change to
/// one of them requeues every known channel.
pub fn build_channel_controller(
    client: Client,
    config: &OperatorConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let dispatcher = config.dispatcher();
    let events = Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));
    let ctx = Arc::new(Context::new(
        client.clone(),
        events,
        dispatcher.clone(),
        BackoffConfig::default(),
    ));

    let channels: Api<InMemoryChannel> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &dispatcher.namespace);
    let services: Api<Service> = Api::namespaced(client.clone(), &dispatcher.namespace);
    let endpoints: Api<Endpoints> = Api::namespaced(client, &dispatcher.namespace);

    let controller = Controller::new(
        channels,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );
    let store = controller.store();

    tracing::info!(
        namespace = %dispatcher.namespace,
        deployment = %dispatcher.deployment_name,
        service = %dispatcher.service_name,
        workers = config.workers,
        "- InMemoryChannel controller"
    );

    Box::pin(
        controller
            .watches(
                deployments,
                by_name(&dispatcher.deployment_name),
                resync_all(store.clone(), "Deployment"),
            )
            .watches(
                services,
                by_name(&dispatcher.service_name),
                resync_all(store.clone(), "Service"),
            )
            .watches(
                endpoints,
                by_name(&dispatcher.service_name),
                resync_all(store, "Endpoints"),
            )
            .with_config(ControllerConfig::default().concurrency(config.workers))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("InMemoryChannel")),
    )
}

fn by_name(name: &str) -> WatcherConfig {
    WatcherConfig::default()
        .fields(&format!("metadata.name={}", name))
        .timeout(WATCH_TIMEOUT_SECS)
}

/// Mapper that requeues every cached channel when a dispatcher object changes
fn resync_all<T>(
    store: Store<InMemoryChannel>,
    kind: &'static str,
) -> impl Fn(T) -> Vec<ObjectRef<InMemoryChannel>> + Send + Sync + 'static {
    move |_| {
        let refs = channel_refs(&store);
        tracing::debug!(
            kind,
            affected_count = refs.len(),
            "dispatcher changed, requeueing all channels"
        );
        refs
    }
}

fn channel_refs(store: &Store<InMemoryChannel>) -> Vec<ObjectRef<InMemoryChannel>> {
    store
        .state()
        .iter()
        .map(|channel| ObjectRef::from_obj(channel.as_ref()))
        .collect()
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
