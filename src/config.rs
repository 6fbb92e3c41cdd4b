use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{Error, InternalResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Capacity of each broadcast channel
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Correlation deadline; zero disables eviction
    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,

    /// Max in-flight handler invocations per dispatcher
    #[serde(default = "default_listener_concurrency")]
    pub listener_concurrency: usize,

    /// Envelope `source` of outgoing requests
    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default)]
    pub binding: BindingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Search whole source trees when a schema does not say otherwise
    #[serde(default)]
    pub deep_search: bool,
}

impl SystemConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        let config: Self = from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> InternalResult<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::internal("event_buffer_size must be greater than zero"));
        }
        if self.listener_concurrency == 0 {
            return Err(Error::internal("listener_concurrency must be greater than zero"));
        }
        Ok(())
    }

    /// `None` when the deadline is disabled.
    pub fn correlation_timeout(&self) -> Option<Duration> {
        (!self.request_timeout.is_zero()).then_some(self.request_timeout)
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            request_timeout: default_request_timeout(),
            listener_concurrency: default_listener_concurrency(),
            node_name: default_node_name(),
            binding: BindingConfig::default(),
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        Error::internal(format!("Failed to open config file {}: {}", path.display(), e))
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_event_buffer_size() -> usize {
    1000
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_listener_concurrency() -> usize {
    16
}
fn default_node_name() -> String {
    "promptbus".to_string()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
