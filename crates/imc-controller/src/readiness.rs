//! Readiness Evaluator: one verdict per dependency kind
//!
//! Absence and "present but not ready" always carry different reasons.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Endpoints, Service};

use imc_common::kube_utils::{has_condition, CONDITION_AVAILABLE};

/// Dispatcher Deployment was not found
pub const REASON_DEPLOYMENT_DOES_NOT_EXIST: &str = "DispatcherDeploymentDoesNotExist";
/// Dispatcher Deployment exists but is not Available
pub const REASON_DEPLOYMENT_NOT_READY: &str = "DeploymentNotReady";
/// Dispatcher Service was not found
pub const REASON_SERVICE_DOES_NOT_EXIST: &str = "DispatcherServiceDoesNotExist";
/// Dispatcher Endpoints were not found
pub const REASON_ENDPOINTS_DOES_NOT_EXIST: &str = "DispatcherEndpointsDoesNotExist";
/// Dispatcher Endpoints exist but have no addresses
pub const REASON_ENDPOINTS_NOT_READY: &str = "DispatcherEndpointsNotReady";

const MESSAGE_DEPLOYMENT_DOES_NOT_EXIST: &str = "Dispatcher Deployment does not exist";
const MESSAGE_DEPLOYMENT_NOT_READY: &str = "Dispatcher Deployment is not ready";
const MESSAGE_SERVICE_DOES_NOT_EXIST: &str = "Dispatcher Service does not exist";
const MESSAGE_ENDPOINTS_DOES_NOT_EXIST: &str = "Dispatcher Endpoints does not exist";
const MESSAGE_ENDPOINTS_NOT_READY: &str = "There are no endpoints ready for Dispatcher service";

/// Verdict on a single dependency
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// The dependency is usable
    Ready,
    /// The dependency exists but is not usable yet
    NotReady {
        /// PascalCase reason
        reason: &'static str,
        /// Sentence-case message
        message: &'static str,
    },
    /// The dependency does not exist
    Absent {
        /// PascalCase reason
        reason: &'static str,
        /// Sentence-case message
        message: &'static str,
    },
}

impl Readiness {
    /// True for [`Readiness::Ready`]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Reason and message of a non-ready verdict
    pub fn failure(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Ready => None,
            Self::NotReady { reason, message } | Self::Absent { reason, message } => {
                Some((*reason, *message))
            }
        }
    }
}

/// Ready iff the Deployment reports `Available=True`
pub fn deployment_readiness(deployment: Option<&Deployment>) -> Readiness {
    let Some(deployment) = deployment else {
        return Readiness::Absent {
            reason: REASON_DEPLOYMENT_DOES_NOT_EXIST,
            message: MESSAGE_DEPLOYMENT_DOES_NOT_EXIST,
        };
    };
    let conditions = deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref());
    if has_condition(conditions, CONDITION_AVAILABLE) {
        Readiness::Ready
    } else {
        Readiness::NotReady {
            reason: REASON_DEPLOYMENT_NOT_READY,
            message: MESSAGE_DEPLOYMENT_NOT_READY,
        }
    }
}

/// Ready iff the Service exists
pub fn service_readiness(service: Option<&Service>) -> Readiness {
    match service {
        Some(_) => Readiness::Ready,
        None => Readiness::Absent {
            reason: REASON_SERVICE_DOES_NOT_EXIST,
            message: MESSAGE_SERVICE_DOES_NOT_EXIST,
        },
    }
}

/// Ready iff some subset carries at least one address
pub fn endpoints_readiness(endpoints: Option<&Endpoints>) -> Readiness {
    let Some(endpoints) = endpoints else {
        return Readiness::Absent {
            reason: REASON_ENDPOINTS_DOES_NOT_EXIST,
            message: MESSAGE_ENDPOINTS_DOES_NOT_EXIST,
        };
    };
    let has_address = endpoints
        .subsets
        .iter()
        .flatten()
        .any(|subset| subset.addresses.as_ref().is_some_and(|a| !a.is_empty()));
    if has_address {
        Readiness::Ready
    } else {
        Readiness::NotReady {
            reason: REASON_ENDPOINTS_NOT_READY,
            message: MESSAGE_ENDPOINTS_NOT_READY,
        }
    }
}
