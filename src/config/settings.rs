use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the HTTP server, the broadcast broker and the
/// per-session event queues.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub queue: QueueSettings,
}

/// Configuration settings for the server.
///
/// The address is well-known so producers can reach the broker without
/// discovery.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

/// Configuration settings for the broadcast broker.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_payload_bytes: usize,
    pub subscribe_timeout_secs: u64,
    /// Grace period before the single redelivery pass of a zero-listener publish.
    pub publish_retry_delay_ms: u64,
    /// `0` disables the idle watchdog.
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
    pub shutdown_grace_ms: u64,
}

/// Configuration settings for the queued (per-session) variant.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueSettings {
    pub default_session: String,
    pub wait_default_secs: u64,
    pub wait_min_secs: u64,
    pub wait_max_secs: u64,
    /// `0` disables eviction of idle session queues.
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl BrokerSettings {
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_secs)
    }

    pub fn publish_retry_delay(&self) -> Duration {
        Duration::from_millis(self.publish_retry_delay_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl QueueSettings {
    /// Resolve a requested wait timeout, falling back to the default and
    /// clamping into `[wait_min_secs, wait_max_secs]`.
    pub fn clamp_wait(&self, requested_secs: Option<u64>) -> Duration {
        let secs = requested_secs.unwrap_or(self.wait_default_secs);
        let max = self.wait_max_secs.max(self.wait_min_secs);
        Duration::from_secs(secs.clamp(self.wait_min_secs, max))
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        (self.session_ttl_secs > 0).then(|| Duration::from_secs(self.session_ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub queue: Option<PartialQueueSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_payload_bytes: Option<usize>,
    pub subscribe_timeout_secs: Option<u64>,
    pub publish_retry_delay_ms: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub idle_check_interval_secs: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialQueueSettings {
    pub default_session: Option<String>,
    pub wait_default_secs: Option<u64>,
    pub wait_min_secs: Option<u64>,
    pub wait_max_secs: Option<u64>,
    pub session_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

impl PartialServerSettings {
    pub fn merge(self, default: ServerSettings) -> ServerSettings {
        ServerSettings {
            host: self.host.unwrap_or(default.host),
            port: self.port.unwrap_or(default.port),
            log_level: self.log_level.unwrap_or(default.log_level),
        }
    }
}

impl PartialBrokerSettings {
    pub fn merge(self, default: BrokerSettings) -> BrokerSettings {
        BrokerSettings {
            max_payload_bytes: self.max_payload_bytes.unwrap_or(default.max_payload_bytes),
            subscribe_timeout_secs: self
                .subscribe_timeout_secs
                .unwrap_or(default.subscribe_timeout_secs),
            publish_retry_delay_ms: self
                .publish_retry_delay_ms
                .unwrap_or(default.publish_retry_delay_ms),
            idle_timeout_secs: self.idle_timeout_secs.unwrap_or(default.idle_timeout_secs),
            idle_check_interval_secs: self
                .idle_check_interval_secs
                .unwrap_or(default.idle_check_interval_secs),
            shutdown_grace_ms: self.shutdown_grace_ms.unwrap_or(default.shutdown_grace_ms),
        }
    }
}

impl PartialQueueSettings {
    pub fn merge(self, default: QueueSettings) -> QueueSettings {
        QueueSettings {
            default_session: self.default_session.unwrap_or(default.default_session),
            wait_default_secs: self.wait_default_secs.unwrap_or(default.wait_default_secs),
            wait_min_secs: self.wait_min_secs.unwrap_or(default.wait_min_secs),
            wait_max_secs: self.wait_max_secs.unwrap_or(default.wait_max_secs),
            session_ttl_secs: self.session_ttl_secs.unwrap_or(default.session_ttl_secs),
            sweep_interval_secs: self
                .sweep_interval_secs
                .unwrap_or(default.sweep_interval_secs),
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8765,
                log_level: "info".to_string(),
            },
            broker: BrokerSettings {
                max_payload_bytes: 1024 * 1024,
                subscribe_timeout_secs: 60,
                publish_retry_delay_ms: 500,
                idle_timeout_secs: 300,
                idle_check_interval_secs: 10,
                shutdown_grace_ms: 2000,
            },
            queue: QueueSettings {
                default_session: "default".to_string(),
                wait_default_secs: 30,
                wait_min_secs: 1,
                wait_max_secs: 120,
                session_ttl_secs: 3600,
                sweep_interval_secs: 60,
            },
        }
    }
}
