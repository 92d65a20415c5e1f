use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Zookeeper client configuration options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ZookeeperConfig {
    /// Zookeeper ensemble connection string (`host1:port,host2:port[/chroot]`).
    #[serde(default = "ZookeeperConfig::default_ensemble")]
    pub ensemble: String,

    /// Zookeeper session and connection timeout (in seconds).
    #[serde(default = "ZookeeperConfig::default_timeout")]
    pub timeout: u64,

    /// Minimum delay between attempts to replace an expired session (in milliseconds).
    #[serde(default = "ZookeeperConfig::default_retry_interval")]
    pub retry_interval: u64,
}

impl Default for ZookeeperConfig {
    fn default() -> ZookeeperConfig {
        ZookeeperConfig {
            ensemble: ZookeeperConfig::default_ensemble(),
            timeout: ZookeeperConfig::default_timeout(),
            retry_interval: ZookeeperConfig::default_retry_interval(),
        }
    }
}

impl ZookeeperConfig {
    /// Default configuration for the given connection string.
    pub fn with_ensemble<S: Into<String>>(ensemble: S) -> ZookeeperConfig {
        ZookeeperConfig {
            ensemble: ensemble.into(),
            ..ZookeeperConfig::default()
        }
    }

    pub(crate) fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval)
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl ZookeeperConfig {
    fn default_ensemble() -> String {
        "localhost:2181".into()
    }
    fn default_timeout() -> u64 {
        5
    }
    fn default_retry_interval() -> u64 {
        1000
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ZookeeperConfig;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: ZookeeperConfig =
            serde_json::from_str(r#"{"ensemble": "zoo1:2181,zoo2:2181/jobs"}"#)
                .expect("config to decode");
        assert_eq!(config.ensemble, "zoo1:2181,zoo2:2181/jobs");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.retry_interval(), Duration::from_secs(1));
    }

    #[test]
    fn with_ensemble_keeps_defaults() {
        let config = ZookeeperConfig::with_ensemble("zoo:2181");
        let expected = ZookeeperConfig {
            ensemble: "zoo:2181".into(),
            ..ZookeeperConfig::default()
        };
        assert_eq!(config, expected);
    }
}
