//! Builder for the etcd-backed locking system.

use std::path::{Path, PathBuf};
use std::time::Duration;

use etcd_client::{Certificate, Client, ConnectOptions, Identity as TlsIdentity, TlsOptions};
use lockrun_core::config::LockConfig;
use lockrun_core::error::{LockError, LockResult};
use tracing::{info, instrument};

use crate::etcd::{EtcdClient, map_etcd_error};
use crate::lock::KvLockingSystem;

/// Builder for [`KvLockingSystem`] over etcd.
pub struct EtcdLockingSystemBuilder {
    endpoints: Vec<String>,
    key: String,
    ca_cert: Option<PathBuf>,
    client_cert: Option<PathBuf>,
    client_key: Option<PathBuf>,
    username: Option<String>,
    password: Option<String>,
    connect_timeout: Duration,
}

impl EtcdLockingSystemBuilder {
    /// Creates a builder targeting a local etcd with key `lock`.
    pub fn new() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            key: "lock".to_string(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Replaces the endpoint list.
    pub fn endpoints(mut self, endpoints: &[impl AsRef<str>]) -> Self {
        self.endpoints = endpoints
            .iter()
            .map(|e| e.as_ref().trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Sets the key that holds the lock.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Trusts the CA certificate in this PEM file.
    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Authenticates with this client certificate and key (PEM files).
    pub fn client_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Authenticates with a user name and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Checks the parameters without touching the network.
    pub fn validate(&self) -> LockResult<()> {
        if self.endpoints.is_empty() {
            return Err(LockError::InvalidConfig(
                "at least one etcd endpoint is required".to_string(),
            ));
        }
        if self.key.is_empty() {
            return Err(LockError::InvalidConfig("lease key must not be empty".to_string()));
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(LockError::InvalidConfig(
                "client certificate and key must be given together".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads credentials, connects, and builds the locking system.
    #[instrument(skip_all, fields(backend = "kv-transaction", endpoints = ?self.endpoints))]
    pub async fn build(self, config: LockConfig) -> LockResult<KvLockingSystem<EtcdClient>> {
        self.validate()?;

        let mut options = ConnectOptions::new().with_connect_timeout(self.connect_timeout);
        if let Some(tls) = self.tls_options().await? {
            options = options.with_tls(tls);
        }
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            options = options.with_user(username, self.password.clone().unwrap_or_default());
        }

        let client = Client::connect(&self.endpoints, Some(options))
            .await
            .map_err(map_etcd_error)?;
        info!(key = %self.key, "connected to etcd");

        Ok(KvLockingSystem::new(EtcdClient::new(client), self.key, config))
    }

    async fn tls_options(&self) -> LockResult<Option<TlsOptions>> {
        if self.ca_cert.is_none() && self.client_cert.is_none() {
            return Ok(None);
        }

        let mut tls = TlsOptions::new();
        if let Some(path) = &self.ca_cert {
            tls = tls.ca_certificate(Certificate::from_pem(read_pem(path).await?));
        }
        if let (Some(cert), Some(key)) = (&self.client_cert, &self.client_key) {
            tls = tls.identity(TlsIdentity::from_pem(
                read_pem(cert).await?,
                read_pem(key).await?,
            ));
        }
        Ok(Some(tls))
    }
}

impl Default for EtcdLockingSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_pem(path: &Path) -> LockResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        LockError::Connection(Box::new(std::io::Error::new(
            e.kind(),
            format!("can't load certificates from '{}': {}", path.display(), e),
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_are_trimmed() {
        let builder = EtcdLockingSystemBuilder::new().endpoints(&["a:2379", " b:2379 ", ""]);
        assert_eq!(builder.endpoints, vec!["a:2379", "b:2379"]);
    }

    #[test]
    fn test_validate_rejects_missing_endpoints() {
        let builder = EtcdLockingSystemBuilder::new().endpoints(&[""]);
        assert!(matches!(builder.validate(), Err(LockError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_half_client_identity() {
        let mut builder = EtcdLockingSystemBuilder::new();
        builder.client_cert = Some(PathBuf::from("cert.pem"));
        assert!(matches!(builder.validate(), Err(LockError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unreadable_certificate_is_a_connection_error() {
        let builder = EtcdLockingSystemBuilder::new().ca_cert("/nonexistent/ca.pem");
        let config = LockConfig::new(lockrun_core::Identity::new("test"));
        assert!(matches!(
            builder.build(config).await,
            Err(LockError::Connection(_))
        ));
    }
}
