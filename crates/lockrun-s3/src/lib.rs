//! Object store backend for lockrun.
//!
//! The lock is meant to be a single object in a bucket, created with a
//! conditional write. Only the configuration surface exists so far;
//! [`run`](lockrun_core::LockingSystem::run) reports the backend as
//! unsupported.

use lockrun_core::cancel::Cancellation;
use lockrun_core::config::LockConfig;
use lockrun_core::error::{LockError, LockResult};
use lockrun_core::event::LockEvents;
use lockrun_core::traits::LockingSystem;
use tracing::{debug, instrument};

/// Builder for [`ObjectStoreLockingSystem`].
pub struct ObjectStoreLockingSystemBuilder {
    bucket: String,
    object: String,
}

impl ObjectStoreLockingSystemBuilder {
    /// Creates a builder with no bucket and object name `lock`.
    pub fn new() -> Self {
        Self {
            bucket: String::new(),
            object: "lock".to_string(),
        }
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = object.into();
        self
    }

    pub fn build(self, config: LockConfig) -> LockResult<ObjectStoreLockingSystem> {
        if self.bucket.is_empty() {
            return Err(LockError::InvalidConfig("a bucket name is required".to_string()));
        }
        if self.object.is_empty() {
            return Err(LockError::InvalidConfig("object name must not be empty".to_string()));
        }
        Ok(ObjectStoreLockingSystem {
            bucket: self.bucket,
            object: self.object,
            config,
            stopping: Cancellation::new(),
        })
    }
}

impl Default for ObjectStoreLockingSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock over one object in a bucket.
pub struct ObjectStoreLockingSystem {
    bucket: String,
    object: String,
    config: LockConfig,
    stopping: Cancellation,
}

impl ObjectStoreLockingSystem {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }
}

impl LockingSystem for ObjectStoreLockingSystem {
    fn backend(&self) -> &'static str {
        "object-store"
    }

    #[instrument(skip_all, fields(backend = "object-store", bucket = %self.bucket, object = %self.object, identity = %self.config.identity()))]
    async fn run(&self, _cancel: Cancellation, _events: LockEvents) -> LockResult<()> {
        Err(LockError::Unsupported(
            "the object-store backend is not implemented yet".to_string(),
        ))
    }

    fn stop(&self) {
        self.stopping.cancel();
    }

    async fn close(self) -> LockResult<()> {
        debug!(bucket = %self.bucket, "closing object-store backend");
        Ok(())
    }
}
