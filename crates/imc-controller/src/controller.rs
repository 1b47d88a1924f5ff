//! InMemoryChannel reconcile loop
//!
//! One pass per work-queue key: read the channel, probe the dispatcher,
//! aggregate a new status, and write it back only if it changed. A channel
//! whose dispatcher is not ready is a steady state, not a failure; only
//! failed reads and writes are reported as errors.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use imc_common::crd::v1::{InMemoryChannel, CONDITION_READY};
use imc_common::events::{actions, reasons, EventPublisher};
use imc_common::kube_utils::{object_key, object_ref};
use imc_common::{Error, FIELD_MANAGER};

use crate::backoff::{BackoffConfig, KeyedBackoff};
use crate::config::DispatcherConfig;
use crate::prober::{DependencyLister, DependencyProber, KubeDependencyLister};
use crate::status::aggregate_status;

const KIND: &str = "InMemoryChannel";

const RECONCILED_NOTE: &str = "InMemoryChannel reconciled";

/// Trait abstracting Kubernetes client operations for InMemoryChannel
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Get a channel by namespace and name; `Ok(None)` if it does not exist
    async fn get_channel(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InMemoryChannel>, Error>;

    /// Write the channel's status.
    ///
    /// The write is conditional on the channel's `resourceVersion`; a
    /// concurrent change fails with [`Error::Conflict`].
    async fn update_status(&self, channel: &InMemoryChannel) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct ChannelClientImpl {
    client: Client,
}

impl ChannelClientImpl {
    /// Create a new ChannelClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelClient for ChannelClientImpl {
    async fn get_channel(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InMemoryChannel>, Error> {
        let api: Api<InMemoryChannel> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_status(&self, channel: &InMemoryChannel) -> Result<(), Error> {
        let namespace = channel.namespace().unwrap_or_default();
        let api: Api<InMemoryChannel> = Api::namespaced(self.client.clone(), &namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match api
            .replace_status(&channel.name_any(), &params, status_body(channel)?)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::conflict(KIND, object_key(channel)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Body of a status replace.
///
/// The whole status is sent so that cleared fields (such as the address of
/// a channel that lost its dispatcher) are removed on the server. The
/// object's `resourceVersion` makes the write conditional.
fn status_body(channel: &InMemoryChannel) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(channel)?)
}

/// Shared context for the InMemoryChannel controller
pub struct Context {
    /// Channel reads and status writes
    pub channels: Arc<dyn ChannelClient>,
    /// Reads the dispatcher's dependencies
    pub prober: DependencyProber,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Where the dispatcher lives
    pub dispatcher: DispatcherConfig,
    /// Per-key retry delays
    pub backoff: KeyedBackoff,
}

impl Context {
    /// Create a context backed by the Kubernetes API
    pub fn new(
        client: Client,
        events: Arc<dyn EventPublisher>,
        dispatcher: DispatcherConfig,
        backoff: BackoffConfig,
    ) -> Self {
        Self::from_parts(
            Arc::new(ChannelClientImpl::new(client.clone())),
            Arc::new(KubeDependencyLister::new(client)),
            events,
            dispatcher,
            backoff,
        )
    }

    /// Create a context from explicit collaborators
    pub fn from_parts(
        channels: Arc<dyn ChannelClient>,
        lister: Arc<dyn DependencyLister>,
        events: Arc<dyn EventPublisher>,
        dispatcher: DispatcherConfig,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            channels,
            prober: DependencyProber::new(lister),
            events,
            dispatcher,
            backoff: KeyedBackoff::new(backoff),
        }
    }
}

// =============================================================================
// Work-queue keys
// =============================================================================

/// A `namespace/name` work-queue key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelKey {
    /// Namespace of the channel
    pub namespace: String,
    /// Name of the channel
    pub name: String,
}

impl FromStr for ChannelKey {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        match key.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::malformed_key(key)),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Reconcile
// =============================================================================

/// What a successful reconcile pass did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The channel no longer exists
    NotFound,
    /// The channel is being deleted; no dependency was read and no status written
    Deleting,
    /// The computed status equals the stored one; nothing was written
    Unchanged {
        /// Whether the channel is Ready
        ready: bool,
    },
    /// A new status was written and an event emitted
    Updated {
        /// Whether the channel is Ready
        ready: bool,
    },
}

/// Reconcile the channel named by a `namespace/name` work-queue key
#[instrument(skip(ctx))]
pub async fn reconcile_key(key: &str, ctx: &Context) -> Result<ReconcileOutcome, Error> {
    let key: ChannelKey = key.parse()?;

    let Some(channel) = ctx.channels.get_channel(&key.namespace, &key.name).await? else {
        debug!("channel no longer exists");
        return Ok(ReconcileOutcome::NotFound);
    };

    if channel.metadata.deletion_timestamp.is_some() {
        debug!("channel is being deleted");
        publish(
            &channel,
            ctx,
            EventType::Normal,
            reasons::CHANNEL_RECONCILED,
            RECONCILED_NOTE.to_string(),
        )
        .await;
        return Ok(ReconcileOutcome::Deleting);
    }

    let snapshot = ctx.prober.fetch(&ctx.dispatcher).await;
    let status = aggregate_status(
        channel.status.as_ref(),
        channel.metadata.generation,
        snapshot,
        &ctx.dispatcher,
    )?;
    let ready = status.is_ready();

    if channel.status.as_ref() == Some(&status) {
        debug!(ready, "status unchanged");
        return Ok(ReconcileOutcome::Unchanged { ready });
    }

    let mut updated = channel;
    updated.status = Some(status);
    ctx.channels.update_status(&updated).await?;
    publish_outcome(&updated, ctx).await;

    info!(ready, "status updated");
    Ok(ReconcileOutcome::Updated { ready })
}

async fn publish_outcome(channel: &InMemoryChannel, ctx: &Context) {
    let ready = channel
        .status
        .as_ref()
        .and_then(|s| s.condition(CONDITION_READY));
    let (type_, reason, note) = match ready {
        Some(c) if c.is_true() => (
            EventType::Normal,
            reasons::CHANNEL_RECONCILED,
            RECONCILED_NOTE.to_string(),
        ),
        other => (
            EventType::Warning,
            reasons::CHANNEL_RECONCILE_FAILED,
            format!(
                "InMemoryChannel reconciliation failed: {}",
                lowercase_first(other.map(|c| c.message.as_str()).unwrap_or_default())
            ),
        ),
    };
    publish(channel, ctx, type_, reason, note).await;
}

async fn publish(
    channel: &InMemoryChannel,
    ctx: &Context,
    type_: EventType,
    reason: &str,
    note: String,
) {
    ctx.events
        .publish(
            &object_ref(channel),
            type_,
            reason,
            actions::RECONCILE,
            Some(note),
        )
        .await;
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Controller entry point: reconcile one channel delivered by the watcher
#[instrument(skip(channel, ctx), fields(channel = %channel.name_any()))]
pub async fn reconcile(channel: Arc<InMemoryChannel>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = object_key(channel.as_ref());
    reconcile_key(&key, &ctx).await?;
    ctx.backoff.reset(&key);
    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Retryable errors requeue with per-key exponential backoff; everything
/// else waits for the channel to change.
pub fn error_policy(channel: Arc<InMemoryChannel>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = object_key(channel.as_ref());
    if error.is_retryable() {
        let delay = ctx.backoff.next_delay(&key);
        warn!(
            ?error,
            channel = %key,
            failures = ctx.backoff.failures(&key),
            delay_ms = delay.as_millis() as u64,
            "reconciliation failed, requeueing"
        );
        Action::requeue(delay)
    } else {
        error!(?error, channel = %key, "reconciliation failed, not retrying");
        Action::await_change()
    }
}
