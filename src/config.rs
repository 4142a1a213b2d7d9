use crate::{
    annunciator::Levels,
    condition::{Classifier, Range},
    net::{Credentials, Endpoint},
    sensor::{Quantity, MAX_QUANTITIES},
    telemetry::DeviceInfo,
};
use anyhow::Context;
use serde::Deserialize;
use std::{fmt, time::Duration};

/// Controller configuration.
///
/// Every field has a default, so a configuration file only needs to list
/// what it changes.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceInfo,
    pub sensor: SensorConfig,
    pub annunciator: AnnunciatorConfig,
    pub network: NetworkConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub interval_ms: u64,
    /// Consecutive failed reads before the system restarts.
    pub max_retries: usize,
    pub ranges: Vec<QuantityRange>,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
pub struct QuantityRange {
    pub quantity: Quantity,
    pub min: f32,
    pub max: f32,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AnnunciatorConfig {
    pub blink_interval_ms: u64,
    pub led_duty: u16,
    pub buzzer_duty: u16,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    /// Host to ping after joining the network. The result is only logged.
    pub ping_host: Option<String>,
    /// Consecutive failed connection attempts before the system restarts.
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
    pub endpoint: Endpoint,
    pub credentials: Credentials,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_ms: u64,
}

// === impl Config ===

impl Config {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.device.device_id.is_empty(), "device ID must not be empty");
        anyhow::ensure!(self.sensor.interval_ms > 0, "sensor interval must be non-zero");
        anyhow::ensure!(self.sensor.max_retries > 0, "sensor max_retries must be non-zero");
        anyhow::ensure!(
            self.annunciator.blink_interval_ms > 0,
            "blink interval must be non-zero"
        );
        anyhow::ensure!(
            self.network.max_attempts > 0,
            "network max_attempts must be non-zero"
        );
        anyhow::ensure!(self.telemetry.interval_ms > 0, "telemetry interval must be non-zero");
        anyhow::ensure!(
            self.sensor.ranges.len() <= MAX_QUANTITIES,
            "at most {MAX_QUANTITIES} ranges may be configured, got {}",
            self.sensor.ranges.len()
        );
        for (i, range) in self.sensor.ranges.iter().enumerate() {
            anyhow::ensure!(
                !self.sensor.ranges[..i]
                    .iter()
                    .any(|other| other.quantity == range.quantity),
                "{} range is configured more than once",
                range.quantity
            );
            anyhow::ensure!(
                range.min <= range.max,
                "{} range is empty: min {} > max {}",
                range.quantity,
                range.min,
                range.max
            );
        }
        Ok(())
    }
}

// === impl SensorConfig ===

impl SensorConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn classifier(&self) -> Classifier {
        self.ranges
            .iter()
            .fold(Classifier::new(), |classifier, range| {
                classifier.with_range(range.quantity, Range::new(range.min, range.max))
            })
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            max_retries: 3,
            ranges: vec![
                QuantityRange {
                    quantity: Quantity::Temperature,
                    min: 10.0,
                    max: 25.0,
                },
                QuantityRange {
                    quantity: Quantity::Humidity,
                    min: 10.0,
                    max: 80.0,
                },
            ],
        }
    }
}

// === impl AnnunciatorConfig ===

impl AnnunciatorConfig {
    #[must_use]
    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms)
    }

    #[must_use]
    pub fn levels(&self) -> Levels {
        Levels {
            led: self.led_duty,
            buzzer: self.buzzer_duty,
        }
    }
}

impl Default for AnnunciatorConfig {
    fn default() -> Self {
        Self {
            blink_interval_ms: 100,
            led_duty: Levels::DEFAULT.led,
            buzzer_duty: Levels::DEFAULT.buzzer,
        }
    }
}

// === impl NetworkConfig ===

impl NetworkConfig {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            ping_host: None,
            max_attempts: 3,
            retry_delay_ms: 5000,
            endpoint: Endpoint::default(),
            credentials: Credentials::default(),
        }
    }
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("ssid", &self.ssid)
            .field("ping_host", &self.ping_host)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

// === impl TelemetryConfig ===

impl TelemetryConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { interval_ms: 3000 }
    }
}
