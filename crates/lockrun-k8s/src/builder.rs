//! Builder for the Kubernetes-backed locking system.

use std::path::{Path, PathBuf};

use k8s_openapi::api::coordination::v1::Lease;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use lockrun_core::config::LockConfig;
use lockrun_core::error::{LockError, LockResult};
use tracing::{info, instrument};

use crate::election::{ElectionConfig, LeaderElector};
use crate::lock::K8sLockingSystem;

/// Builder for [`K8sLockingSystem`].
pub struct K8sLockingSystemBuilder {
    kubeconfig: PathBuf,
    in_cluster: bool,
    namespace: String,
    lease_object: String,
}

impl K8sLockingSystemBuilder {
    /// Creates a builder using `~/.kube/config`, namespace `default` and
    /// Lease object `lock`.
    pub fn new() -> Self {
        Self {
            kubeconfig: PathBuf::from("~/.kube/config"),
            in_cluster: false,
            namespace: "default".to_string(),
            lease_object: "lock".to_string(),
        }
    }

    /// Reads API credentials from this kubeconfig file. A leading `~/` is
    /// expanded to the home directory.
    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = path.into();
        self
    }

    /// Uses the service account of the pod we run in instead of a
    /// kubeconfig file.
    pub fn in_cluster(mut self, in_cluster: bool) -> Self {
        self.in_cluster = in_cluster;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn lease_object(mut self, name: impl Into<String>) -> Self {
        self.lease_object = name.into();
        self
    }

    pub fn validate(&self) -> LockResult<()> {
        if self.namespace.is_empty() {
            return Err(LockError::InvalidConfig("namespace must not be empty".to_string()));
        }
        if self.lease_object.is_empty() {
            return Err(LockError::InvalidConfig(
                "lease object name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the API configuration and builds the locking system.
    #[instrument(skip_all, fields(backend = "k8s-coordinator", namespace = %self.namespace))]
    pub async fn build(self, config: LockConfig) -> LockResult<K8sLockingSystem> {
        self.validate()?;

        let kube_config = self.load_config().await?;
        let client = Client::try_from(kube_config).map_err(|e| {
            LockError::Connection(format!("can't create Kubernetes client: {e}").into())
        })?;
        info!(lease = %self.lease_object, "Kubernetes client ready");

        let election = ElectionConfig::for_lock(self.lease_object, &config);
        let elector = LeaderElector::new(Api::namespaced(client, &self.namespace), election);
        Ok(K8sLockingSystem::new(elector, self.namespace, config))
    }

    async fn load_config(&self) -> LockResult<Config> {
        if self.in_cluster {
            return Config::incluster().map_err(|e| {
                LockError::Connection(format!("can't load in-cluster config: {e}").into())
            });
        }

        let path = expand_home(&self.kubeconfig);
        let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
            LockError::Connection(
                format!("can't load Kubernetes config from '{}': {e}", path.display()).into(),
            )
        })?;
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                LockError::Connection(format!("invalid Kubernetes config: {e}").into())
            })
    }
}

impl Default for K8sLockingSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        let Some(home) = std::env::var_os("HOME") else {
            return;
        };
        assert_eq!(
            expand_home(Path::new("~/.kube/config")),
            PathBuf::from(home).join(".kube/config")
        );
        assert_eq!(expand_home(Path::new("/etc/kube")), PathBuf::from("/etc/kube"));
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let builder = K8sLockingSystemBuilder::new().namespace("");
        assert!(matches!(builder.validate(), Err(LockError::InvalidConfig(_))));
        let builder = K8sLockingSystemBuilder::new().lease_object("");
        assert!(matches!(builder.validate(), Err(LockError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_is_a_connection_error() {
        let builder = K8sLockingSystemBuilder::new().kubeconfig("/nonexistent/kubeconfig");
        let config = LockConfig::new(lockrun_core::Identity::new("test"));
        assert!(matches!(
            builder.build(config).await,
            Err(LockError::Connection(_))
        ));
    }
}
