//! Node configuration loaded from environment variables.

use std::env::VarError;
use std::path::PathBuf;
use std::time::Duration;

use midpoint_provisioning::task::TaskRuntimeConfig;
use midpoint_provisioning::NodeId;

/// Configuration of one provisioning node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identity written into task leases. Random when unset, which is fine
    /// unless the node must pick up its own leases after a restart.
    pub node_id: NodeId,

    /// Log filter directive (e.g. "info,midpoint_provisioning=debug").
    pub log_filter: String,

    /// JSON file with resources, users and tasks to load at startup.
    pub bootstrap_file: Option<PathBuf>,

    pub scan_interval: Duration,
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,

    /// Upper bound on waiting for running tasks on shutdown.
    pub shutdown_timeout: Duration,
}

impl NodeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let node_id = match reader("MIDPOINT_NODE_ID") {
            Ok(value) => NodeId::parse(&value)
                .map_err(|e| ConfigError::InvalidValue("MIDPOINT_NODE_ID".into(), e.to_string()))?,
            Err(_) => NodeId::new(),
        };

        let log_filter = reader("MIDPOINT_LOG_FILTER").unwrap_or_else(|_| "info".to_string());

        let bootstrap_file = reader("MIDPOINT_BOOTSTRAP_FILE")
            .ok()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let scan_interval =
            Duration::from_millis(parse_u64(&reader, "MIDPOINT_SCAN_INTERVAL_MS", 1000)?);
        let lease_duration =
            Duration::from_secs(parse_u64(&reader, "MIDPOINT_LEASE_DURATION_SECS", 30)?);
        let heartbeat_interval =
            Duration::from_secs(parse_u64(&reader, "MIDPOINT_HEARTBEAT_INTERVAL_SECS", 10)?);
        let shutdown_timeout =
            Duration::from_secs(parse_u64(&reader, "MIDPOINT_SHUTDOWN_TIMEOUT_SECS", 10)?);

        if scan_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "MIDPOINT_SCAN_INTERVAL_MS".into(),
                "must be greater than zero".into(),
            ));
        }
        if heartbeat_interval.is_zero() || heartbeat_interval >= lease_duration {
            return Err(ConfigError::InvalidValue(
                "MIDPOINT_HEARTBEAT_INTERVAL_SECS".into(),
                format!(
                    "must be positive and shorter than the lease duration ({}s)",
                    lease_duration.as_secs()
                ),
            ));
        }

        Ok(Self {
            node_id,
            log_filter,
            bootstrap_file,
            scan_interval,
            lease_duration,
            heartbeat_interval,
            shutdown_timeout,
        })
    }

    pub fn runtime_config(&self) -> TaskRuntimeConfig {
        TaskRuntimeConfig {
            node_id: self.node_id,
            scan_interval: self.scan_interval,
            lease_duration: self.lease_duration,
            heartbeat_interval: self.heartbeat_interval,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

fn parse_u64<F>(reader: &F, var: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match reader(var) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(var.into(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
