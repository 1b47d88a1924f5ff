//! InMemoryChannel CRD generation and installation
//!
//! Both schema versions are served from one CustomResourceDefinition with
//! `v1` as the storage version. The conversion strategy is left to the
//! deployment manifests, which know the webhook Service and CA bundle; the
//! server-side apply here never claims that field.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::core::crd::merge_crds;
use kube::{Client, CustomResourceExt};
use tracing::info;

use imc_common::crd::{v1, v1beta1};
use imc_common::FIELD_MANAGER;

/// Name of the InMemoryChannel CRD object
pub const CRD_NAME: &str = "inmemorychannels.messaging.knative.dev";

/// Version persisted in etcd
pub const STORAGE_VERSION: &str = "v1";

/// The merged multi-version InMemoryChannel CRD
pub fn channel_crd() -> anyhow::Result<CustomResourceDefinition> {
    merge_crds(
        vec![v1beta1::InMemoryChannel::crd(), v1::InMemoryChannel::crd()],
        STORAGE_VERSION,
    )
    .map_err(|e| anyhow::anyhow!("failed to merge InMemoryChannel CRD versions: {}", e))
}

/// Render the merged CRD as YAML
pub fn channel_crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&channel_crd()?)
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))
}

/// Install or update the InMemoryChannel CRD with server-side apply
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    info!(crd = CRD_NAME, "installing CRD");
    crds.patch(CRD_NAME, &params, &Patch::Apply(&channel_crd()?))
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", CRD_NAME, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_crd_serves_both_versions() {
        let crd = channel_crd().unwrap();
        assert_eq!(crd.metadata.name.as_deref(), Some(CRD_NAME));
        assert_eq!(crd.spec.group, "messaging.knative.dev");
        assert_eq!(crd.spec.scope, "Namespaced");

        let versions: Vec<(&str, bool, bool)> = crd
            .spec
            .versions
            .iter()
            .map(|v| (v.name.as_str(), v.served, v.storage))
            .collect();
        assert_eq!(versions.len(), 2);
        assert!(versions.contains(&("v1beta1", true, false)));
        assert!(versions.contains(&("v1", true, true)));
    }

    #[test]
    fn test_crd_has_status_subresource() {
        let crd = channel_crd().unwrap();
        for version in &crd.spec.versions {
            let subresources = version.subresources.as_ref().unwrap();
            assert!(subresources.status.is_some(), "{} lacks status", version.name);
        }
    }

    #[test]
    fn test_crd_leaves_conversion_unset() {
        let crd = channel_crd().unwrap();
        assert!(crd.spec.conversion.is_none());

        let yaml = channel_crd_yaml().unwrap();
        assert!(yaml.contains("kind: CustomResourceDefinition"));
        assert!(yaml.contains("shortNames:"));
        assert!(!yaml.contains("conversion:"));
    }
}
