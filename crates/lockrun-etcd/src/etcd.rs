//! etcd v3 implementation of [`KvClient`].

use std::time::Duration;

use etcd_client::{
    Client, Compare, CompareOp, LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn, TxnOp,
    TxnOpResponse,
};
use lockrun_core::error::{LockError, LockResult};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::{CreateOutcome, KvClient, LeaseId};

/// gRPC status codes that mean our credentials were refused.
const GRPC_PERMISSION_DENIED: i32 = 7;
const GRPC_UNAUTHENTICATED: i32 = 16;

/// etcd client used by the key-value lock.
///
/// The underlying client is cheap to clone and safe to share; each call
/// works on its own clone. The keep-alive stream of the lease being renewed
/// is cached between calls.
pub struct EtcdClient {
    client: Client,
    keep_alive: Mutex<Option<KeepAliveStream>>,
}

struct KeepAliveStream {
    lease: LeaseId,
    keeper: LeaseKeeper,
    stream: LeaseKeepAliveStream,
}

impl EtcdClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            keep_alive: Mutex::new(None),
        }
    }
}

impl KvClient for EtcdClient {
    async fn grant(&self, ttl: Duration) -> LockResult<LeaseId> {
        // etcd leases have whole-second granularity.
        let seconds = ttl.as_secs_f64().ceil().max(1.0) as i64;
        let response = self
            .client
            .clone()
            .lease_grant(seconds, None)
            .await
            .map_err(map_etcd_error)?;
        debug!(lease = response.id(), ttl = response.ttl(), "granted etcd lease");
        Ok(response.id())
    }

    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> LockResult<CreateOutcome> {
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                value,
                Some(PutOptions::new().with_lease(lease)),
            )])
            .or_else(vec![TxnOp::get(key, None)]);

        let response = self.client.clone().txn(txn).await.map_err(map_etcd_error)?;
        if response.succeeded() {
            return Ok(CreateOutcome::Created);
        }

        for op in response.op_responses() {
            if let TxnOpResponse::Get(get) = op
                && let Some(kv) = get.kvs().first()
            {
                return Ok(CreateOutcome::Held {
                    holder: kv.value_str().unwrap_or("<non-utf8>").to_string(),
                    lease: kv.lease(),
                });
            }
        }

        // The key vanished between the compare and the read.
        Ok(CreateOutcome::Held {
            holder: String::new(),
            lease: 0,
        })
    }

    async fn keep_alive(&self, lease: LeaseId) -> LockResult<Option<Duration>> {
        let mut cached = self.keep_alive.lock().await;
        if cached.as_ref().is_none_or(|stream| stream.lease != lease) {
            let (keeper, stream) = self
                .client
                .clone()
                .lease_keep_alive(lease)
                .await
                .map_err(map_etcd_error)?;
            *cached = Some(KeepAliveStream {
                lease,
                keeper,
                stream,
            });
        }

        let result = match cached.as_mut() {
            Some(stream) => renew_once(stream).await,
            None => Ok(None),
        };
        if !matches!(result, Ok(Some(_))) {
            // Reopen the stream on the next attempt.
            *cached = None;
        }
        result
    }

    async fn revoke(&self, lease: LeaseId) -> LockResult<()> {
        {
            let mut cached = self.keep_alive.lock().await;
            if cached.as_ref().is_some_and(|stream| stream.lease == lease) {
                *cached = None;
            }
        }
        self.client
            .clone()
            .lease_revoke(lease)
            .await
            .map_err(map_etcd_error)?;
        Ok(())
    }
}

async fn renew_once(stream: &mut KeepAliveStream) -> LockResult<Option<Duration>> {
    stream.keeper.keep_alive().await.map_err(map_etcd_error)?;
    match stream.stream.message().await.map_err(map_etcd_error)? {
        Some(response) if response.ttl() > 0 => {
            Ok(Some(Duration::from_secs(response.ttl() as u64)))
        }
        Some(_) => Ok(None),
        None => Err(LockError::connection("etcd keep-alive stream closed")),
    }
}

/// Sorts etcd failures into the lock error taxonomy.
pub(crate) fn map_etcd_error(error: etcd_client::Error) -> LockError {
    match error {
        etcd_client::Error::GRpcStatus(status) => {
            let code = i32::from(status.code());
            if code == GRPC_UNAUTHENTICATED || code == GRPC_PERMISSION_DENIED {
                LockError::Authentication(status.message().to_string())
            } else {
                LockError::Backend(Box::new(etcd_client::Error::GRpcStatus(status)))
            }
        }
        etcd_client::Error::InvalidArgs(message) => LockError::InvalidConfig(message),
        etcd_client::Error::InvalidUri(e) => LockError::InvalidConfig(e.to_string()),
        other @ (etcd_client::Error::TransportError(_) | etcd_client::Error::IoError(_)) => {
            LockError::Connection(Box::new(other))
        }
        other => LockError::Backend(Box::new(other)),
    }
}
