//! Dependency Prober: reads the dispatcher's Deployment, Service and Endpoints

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::api::Api;
use kube::Client;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use imc_common::Error;

use crate::config::DispatcherConfig;

/// Read access to the objects a channel depends on.
///
/// `Ok(None)` means the object does not exist. That is an expected outcome
/// and distinct from a failed read.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyLister: Send + Sync {
    /// Get a Deployment by namespace and name
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Get a Service by namespace and name
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Get Endpoints by namespace and name
    async fn get_endpoints(&self, namespace: &str, name: &str)
        -> Result<Option<Endpoints>, Error>;
}

/// Real lister backed by the Kubernetes API
pub struct KubeDependencyLister {
    client: Client,
}

impl KubeDependencyLister {
    /// Create a lister using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DependencyLister for KubeDependencyLister {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_endpoints(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoints>, Error> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Result of probing all three dependencies.
///
/// Each read succeeds or fails on its own.
#[derive(Debug)]
pub struct DependencySnapshot {
    /// The dispatcher Deployment
    pub deployment: Result<Option<Deployment>, Error>,
    /// The dispatcher Service
    pub service: Result<Option<Service>, Error>,
    /// The dispatcher Service's Endpoints
    pub endpoints: Result<Option<Endpoints>, Error>,
}

/// Fetches the dispatcher's dependencies for one reconcile pass
#[derive(Clone)]
pub struct DependencyProber {
    lister: Arc<dyn DependencyLister>,
}

impl DependencyProber {
    /// Create a prober on top of the given lister
    pub fn new(lister: Arc<dyn DependencyLister>) -> Self {
        Self { lister }
    }

    /// Read the Deployment, Service and Endpoints named by `config`.
    ///
    /// The reads run concurrently and a failure of one does not stop the others.
    #[instrument(skip(self, config), fields(namespace = %config.namespace))]
    pub async fn fetch(&self, config: &DispatcherConfig) -> DependencySnapshot {
        let ns = config.namespace.as_str();
        let (deployment, service, endpoints) = futures::join!(
            self.lister.get_deployment(ns, &config.deployment_name),
            self.lister.get_service(ns, &config.service_name),
            self.lister.get_endpoints(ns, &config.service_name),
        );
        debug!(
            deployment_found = matches!(deployment, Ok(Some(_))),
            service_found = matches!(service, Ok(Some(_))),
            endpoints_found = matches!(endpoints, Ok(Some(_))),
            "probed dispatcher dependencies"
        );
        DependencySnapshot {
            deployment,
            service,
            endpoints,
        }
    }
}
