//! Command-line interface.
//!
//! `lockrun <backend> [flags] -- <command> [args...]`

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use lockrun::config::{LockConfig, parse_duration};
use lockrun::{Identity, LockResult};

/// Command-line arguments for `lockrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lockrun",
    version,
    about = "Run a command only while holding a distributed lock.",
    long_about = None,
    arg_required_else_help = true
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub backend: Backend,
}

/// Which locking backend to use.
#[derive(Debug, Clone, Subcommand)]
pub enum Backend {
    /// Leader election over a Kubernetes Lease object.
    #[command(name = "k8s-coordinator", alias = "k8s")]
    K8sCoordinator(K8sArgs),

    /// A key bound to a lease, created by an etcd transaction.
    #[command(name = "kv-transaction", alias = "etcd")]
    KvTransaction(EtcdArgs),

    /// A single object in a bucket (not implemented yet).
    #[command(name = "object-store", alias = "s3")]
    ObjectStore(ObjectStoreArgs),
}

impl Backend {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Backend::K8sCoordinator(args) => &args.common,
            Backend::KvTransaction(args) => &args.common,
            Backend::ObjectStore(args) => &args.common,
        }
    }
}

/// Flags shared by every backend.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Interval between lease renewals (e.g. 500ms, 15s, 1m30s).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, default_value = "15s")]
    pub lease_interval: Duration,

    /// How long the lease stays valid without renewal.
    ///
    /// Default: twice the lease interval.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub lease_duration: Option<Duration>,

    /// Time between interrupting the command and killing it.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, default_value = "5s")]
    pub grace_period: Duration,

    /// Identity written into the lock. Default: random 20-byte hex string.
    #[arg(long, value_name = "ID")]
    pub identity: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LOCKRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Command to run while holding the lock, after `--`.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl CommonArgs {
    /// Builds the run configuration, resolving the identity.
    pub fn lock_config(&self) -> LockResult<LockConfig> {
        LockConfig::new(Identity::resolve(self.identity.clone()))
            .lease_interval(self.lease_interval)
            .lease_duration(self.lease_duration)
            .grace_period(self.grace_period)
            .validate()
    }
}

#[derive(Debug, Clone, Args)]
pub struct K8sArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Path to the kubeconfig file.
    #[arg(long, value_name = "PATH", default_value = "~/.kube/config")]
    pub kubeconfig: PathBuf,

    /// Use the pod's service account instead of a kubeconfig file.
    #[arg(long)]
    pub in_cluster: bool,

    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Name of the Lease object.
    #[arg(long, value_name = "NAME", default_value = "lock")]
    pub lease_object: String,
}

#[derive(Debug, Clone, Args)]
pub struct EtcdArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Comma-separated etcd endpoints.
    #[arg(long, value_delimiter = ',', default_value = "127.0.0.1:2379")]
    pub endpoints: Vec<String>,

    /// CA certificate (PEM) used to verify the servers.
    #[arg(long, value_name = "PATH")]
    pub cacert: Option<PathBuf>,

    /// Client certificate (PEM).
    #[arg(long, value_name = "PATH", requires = "key")]
    pub cert: Option<PathBuf>,

    /// Client certificate key (PEM).
    #[arg(long, value_name = "PATH", requires = "cert")]
    pub key: Option<PathBuf>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    /// Key holding the lock.
    #[arg(long, value_name = "KEY", default_value = "lock")]
    pub lease_key: String,
}

#[derive(Debug, Clone, Args)]
pub struct ObjectStoreArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub bucket: String,

    /// Name of the lock object.
    #[arg(long, value_name = "NAME", default_value = "lock")]
    pub object: String,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Parses the process arguments.
///
/// `help` and `-help` are accepted as spellings of `--help`.
pub fn parse() -> CliArgs {
    CliArgs::parse_from(normalize_help(std::env::args_os()))
}

fn normalize_help<I>(args: I) -> Vec<std::ffi::OsString>
where
    I: IntoIterator<Item = std::ffi::OsString>,
{
    let mut args: Vec<_> = args.into_iter().collect();
    if let Some(first) = args.get_mut(1)
        && first.as_os_str() == "-help"
    {
        *first = "--help".into();
    }
    args
}
