//! `lockrun`: run a command only while holding a distributed lock.

pub mod cli;
pub mod logging;
pub mod supervisor;

use anyhow::{Context, Result};
use lockrun::{CommandRunner, EtcdLockingSystemBuilder, K8sLockingSystemBuilder, ObjectStoreLockingSystemBuilder};
use tracing::info;

use crate::cli::{Backend, CliArgs};
use crate::supervisor::supervise;

/// Builds the selected backend and supervises the command under it.
pub async fn run(args: CliArgs) -> Result<()> {
    let common = args.backend.common();
    let config = common.lock_config().context("invalid lock configuration")?;
    info!(identity = %config.identity(), "using identity");
    let runner = CommandRunner::new(common.command.clone(), config.grace())?;

    let exit = match args.backend {
        Backend::K8sCoordinator(k8s) => {
            let system = K8sLockingSystemBuilder::new()
                .kubeconfig(k8s.kubeconfig)
                .in_cluster(k8s.in_cluster)
                .namespace(k8s.namespace)
                .lease_object(k8s.lease_object)
                .build(config)
                .await
                .context("can't set up the k8s-coordinator backend")?;
            supervise(system, runner).await?
        }
        Backend::KvTransaction(etcd) => {
            let mut builder = EtcdLockingSystemBuilder::new()
                .endpoints(&etcd.endpoints)
                .key(etcd.lease_key);
            if let Some(ca) = etcd.cacert {
                builder = builder.ca_cert(ca);
            }
            if let (Some(cert), Some(key)) = (etcd.cert, etcd.key) {
                builder = builder.client_identity(cert, key);
            }
            if let Some(username) = etcd.username {
                builder = builder.credentials(username, etcd.password.unwrap_or_default());
            }
            let system = builder
                .build(config)
                .await
                .context("can't set up the kv-transaction backend")?;
            supervise(system, runner).await?
        }
        Backend::ObjectStore(s3) => {
            let system = ObjectStoreLockingSystemBuilder::new()
                .bucket(s3.bucket)
                .object(s3.object)
                .build(config)
                .context("can't set up the object-store backend")?;
            supervise(system, runner).await?
        }
    };

    match exit {
        Some(status) => info!(%status, "done"),
        None => info!("done without running the command"),
    }
    Ok(())
}
