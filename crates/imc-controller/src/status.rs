//! Status Aggregator: folds dependency verdicts into the channel status
//!
//! Dependencies are evaluated Deployment, then Service, then Endpoints. The
//! first one that is not ready decides the reported reason and the rest are
//! not evaluated, so a broken dispatcher always surfaces a single cause.

use imc_common::crd::v1::{
    InMemoryChannelStatus, CONDITION_DISPATCHER_READY, CONDITION_ENDPOINTS_READY,
    CONDITION_SERVICE_READY,
};
use imc_common::crd::Addressable;
use imc_common::Error;
use tracing::warn;

use crate::config::DispatcherConfig;
use crate::prober::DependencySnapshot;
use crate::readiness::{deployment_readiness, endpoints_readiness, service_readiness, Readiness};

/// Compute the channel status for one reconcile pass.
///
/// Starts from `current` so that untouched conditions keep their transition
/// times. A failed read of a dependency that is reached in the evaluation
/// order is returned as an error; failed reads past the first not-ready
/// dependency are only logged.
pub fn aggregate_status(
    current: Option<&InMemoryChannelStatus>,
    generation: Option<i64>,
    snapshot: DependencySnapshot,
    config: &DispatcherConfig,
) -> Result<InMemoryChannelStatus, Error> {
    let mut status = current.cloned().unwrap_or_default();
    status.initialize_conditions();
    status.observed_generation = generation;

    evaluate(&mut status, snapshot, config)?;
    status.recompute_ready();
    Ok(status)
}

fn evaluate(
    status: &mut InMemoryChannelStatus,
    snapshot: DependencySnapshot,
    config: &DispatcherConfig,
) -> Result<(), Error> {
    let DependencySnapshot {
        deployment,
        service,
        endpoints,
    } = snapshot;

    let verdict = deployment_readiness(deployment?.as_ref());
    if !apply(status, CONDITION_DISPATCHER_READY, &verdict) {
        log_unreached("Service", &service);
        log_unreached("Endpoints", &endpoints);
        return Ok(());
    }

    let verdict = service_readiness(service?.as_ref());
    if !apply(status, CONDITION_SERVICE_READY, &verdict) {
        log_unreached("Endpoints", &endpoints);
        return Ok(());
    }

    let verdict = endpoints_readiness(endpoints?.as_ref());
    if !apply(status, CONDITION_ENDPOINTS_READY, &verdict) {
        return Ok(());
    }

    status.set_address(Some(Addressable::http(config.service_host())));
    Ok(())
}

/// Write one verdict into its condition. Returns whether evaluation continues.
fn apply(status: &mut InMemoryChannelStatus, condition: &str, verdict: &Readiness) -> bool {
    match verdict.failure() {
        None => {
            status.mark_true(condition);
            true
        }
        Some((reason, message)) => {
            status.mark_false(condition, reason, message);
            status.set_address(None);
            false
        }
    }
}

fn log_unreached<T>(kind: &str, read: &Result<T, Error>) {
    if let Err(e) = read {
        warn!(kind, error = %e, "ignoring failed read of dependency past the first not-ready one");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imc_common::crd::v1::{CONDITION_ADDRESSABLE, CONDITION_READY};
    use imc_common::crd::ConditionStatus;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset, Endpoints, Service};

    fn config() -> DispatcherConfig {
        DispatcherConfig::new("test-namespace", "test-deployment", "test-service")
    }

    fn available_deployment() -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                conditions: Some(vec![DeploymentCondition {
                    type_: "Available".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn ready_endpoints() -> Endpoints {
        Endpoints {
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "1.1.1.1".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    fn all_ready() -> DependencySnapshot {
        DependencySnapshot {
            deployment: Ok(Some(available_deployment())),
            service: Ok(Some(Service::default())),
            endpoints: Ok(Some(ready_endpoints())),
        }
    }

    fn ready_reason(status: &InMemoryChannelStatus) -> (ConditionStatus, String) {
        let c = status.condition(CONDITION_READY).unwrap();
        (c.status, c.reason.clone())
    }

    /// Story: a healthy dispatcher makes the channel addressable
    #[test]
    fn story_all_ready_sets_address() {
        let status = aggregate_status(None, Some(1), all_ready(), &config()).unwrap();

        assert!(status.is_ready());
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(
            status.address.as_ref().and_then(Addressable::host),
            Some("test-service.test-namespace.svc.cluster.local")
        );
    }

    /// Story: the Deployment is checked first, so its reason wins
    #[test]
    fn story_deployment_reason_wins_over_service() {
        let snapshot = DependencySnapshot {
            deployment: Ok(Some(Deployment::default())),
            service: Ok(None),
            endpoints: Ok(None),
        };
        let status = aggregate_status(None, None, snapshot, &config()).unwrap();

        assert_eq!(
            ready_reason(&status),
            (ConditionStatus::False, "DeploymentNotReady".to_string())
        );
        // later dependencies were not evaluated
        assert_eq!(
            status.condition(CONDITION_SERVICE_READY).unwrap().status,
            ConditionStatus::Unknown
        );
        assert!(status.address.is_none());
    }

    #[test]
    fn test_missing_service_after_ready_deployment() {
        let snapshot = DependencySnapshot {
            deployment: Ok(Some(available_deployment())),
            service: Ok(None),
            endpoints: Ok(None),
        };
        let status = aggregate_status(None, None, snapshot, &config()).unwrap();

        let ready = status.condition(CONDITION_READY).unwrap();
        assert_eq!(ready.reason, "DispatcherServiceDoesNotExist");
        assert_eq!(ready.message, "Dispatcher Service does not exist");
        assert!(status
            .condition(CONDITION_DISPATCHER_READY)
            .unwrap()
            .is_true());
    }

    #[test]
    fn test_empty_endpoints() {
        let snapshot = DependencySnapshot {
            endpoints: Ok(Some(Endpoints::default())),
            ..all_ready()
        };
        let status = aggregate_status(None, None, snapshot, &config()).unwrap();
        assert_eq!(
            ready_reason(&status),
            (ConditionStatus::False, "DispatcherEndpointsNotReady".to_string())
        );
    }

    #[test]
    fn test_failed_read_of_reached_dependency_is_an_error() {
        let snapshot = DependencySnapshot {
            endpoints: Err(Error::internal_with_context("prober", "timeout")),
            ..all_ready()
        };
        let err = aggregate_status(None, None, snapshot, &config()).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_failed_read_past_first_not_ready_is_ignored() {
        let snapshot = DependencySnapshot {
            deployment: Ok(None),
            service: Err(Error::internal_with_context("prober", "timeout")),
            endpoints: Err(Error::internal_with_context("prober", "timeout")),
        };
        let status = aggregate_status(None, None, snapshot, &config()).unwrap();
        assert_eq!(
            ready_reason(&status),
            (
                ConditionStatus::False,
                "DispatcherDeploymentDoesNotExist".to_string()
            )
        );
    }

    /// Story: losing the dispatcher clears a previously resolved address
    #[test]
    fn story_regression_clears_address() {
        let ready = aggregate_status(None, None, all_ready(), &config()).unwrap();
        let snapshot = DependencySnapshot {
            deployment: Ok(None),
            ..all_ready()
        };
        let status = aggregate_status(Some(&ready), None, snapshot, &config()).unwrap();

        assert!(!status.is_ready());
        assert!(status.address.is_none());
        assert_eq!(
            status.condition(CONDITION_ADDRESSABLE).unwrap().status,
            ConditionStatus::Unknown
        );
    }

    /// Story: recomputing an unchanged world yields an identical status
    #[test]
    fn story_steady_state_is_idempotent() {
        let first = aggregate_status(None, Some(2), all_ready(), &config()).unwrap();
        let second = aggregate_status(Some(&first), Some(2), all_ready(), &config()).unwrap();
        assert_eq!(first, second);
    }
}
