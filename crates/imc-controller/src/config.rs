//! Process-wide dispatcher configuration

use imc_common::CLUSTER_DOMAIN;

/// Where the shared dispatcher lives.
///
/// Set once at startup and read by reference for the life of the process;
/// every channel depends on the same dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Namespace holding the dispatcher Deployment, Service and Endpoints
    pub namespace: String,
    /// Name of the dispatcher Deployment
    pub deployment_name: String,
    /// Name of the dispatcher Service (and its Endpoints)
    pub service_name: String,
}

impl DispatcherConfig {
    /// Create a config for the given namespace and object names
    pub fn new(
        namespace: impl Into<String>,
        deployment_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            deployment_name: deployment_name.into(),
            service_name: service_name.into(),
        }
    }

    /// Cluster-local DNS name of the dispatcher Service
    pub fn service_host(&self) -> String {
        format!("{}.{}.{}", self.service_name, self.namespace, CLUSTER_DOMAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_host() {
        let config = DispatcherConfig::new("test-namespace", "test-deployment", "test-service");
        assert_eq!(
            config.service_host(),
            "test-service.test-namespace.svc.cluster.local"
        );
    }
}
