use crate::{
    clock::{Instant, Interval},
    condition::Condition,
    escalate::Restart,
    net::{ConnectivityManager, LinkInfo, Transport},
    sensor::{Quantity, Reading},
    units,
};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::time::Duration;

/// Identifies the device in telemetry messages.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_type: String,
    pub device_function: String,
    pub device_model: String,
}

/// A telemetry message.
///
/// Serializes to a flat JSON object:
///
/// ```json
/// {
///   "deviceId": "a1b2c3", "deviceType": "Sensor",
///   "deviceFunction": "Temperature and Humidity", "deviceModel": "DHT11",
///   "temperature_C": 22.0, "temperature_F": 72, "humidity_pct": 50.0,
///   "status": "Normal", "ssid": "lab", "ip": "10.0.0.7", "rssi": -61
/// }
/// ```
#[derive(Debug)]
pub struct Message<'a> {
    pub device: &'a DeviceInfo,
    pub reading: &'a Reading,
    pub condition: Condition,
    pub link: &'a LinkInfo,
}

/// What happened on a call to [`TelemetryPublisher::publish_if_due`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The publish interval has not elapsed yet.
    NotDue,
    /// The interval has elapsed, but there is no valid reading to send.
    NoValidReading,
    Published,
    /// Connecting to the broker failed; this cycle was skipped.
    ConnectFailed,
    /// Connected, but the publish itself failed.
    PublishFailed,
    /// Connecting failed with no retries remaining and a restart was
    /// requested.
    Restarting,
}

/// Periodically publishes the current condition and reading.
#[derive(Debug)]
pub struct TelemetryPublisher {
    device: DeviceInfo,
    topic: String,
    interval: Interval,
    published: usize,
}

const TARGET: &str = "envmon::telemetry";

// === impl DeviceInfo ===

impl DeviceInfo {
    /// Formats a factory MAC address as a device ID.
    ///
    /// The MAC is read as a little-endian integer and printed in lowercase
    /// hex without leading zeros, so IDs match those already provisioned on
    /// the broker for older firmware.
    #[must_use]
    pub fn id_from_mac(mac: [u8; 6]) -> String {
        let mut bytes = [0u8; 8];
        bytes[..6].copy_from_slice(&mac);
        format!("{:x}", u64::from_le_bytes(bytes))
    }

    /// The topic telemetry is published to.
    #[must_use]
    pub fn topic(&self) -> String {
        format!("{}/pub", self.device_id)
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_id: "envmon".into(),
            device_type: "Sensor".into(),
            device_function: "Temperature and Humidity".into(),
            device_model: "DHT11".into(),
        }
    }
}

// === impl Message ===

impl Serialize for Message<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("deviceId", &self.device.device_id)?;
        map.serialize_entry("deviceType", &self.device.device_type)?;
        map.serialize_entry("deviceFunction", &self.device.device_function)?;
        map.serialize_entry("deviceModel", &self.device.device_model)?;
        for m in self.reading.iter() {
            map.serialize_entry(m.quantity.key(), &m.value)?;
            if m.quantity == Quantity::Temperature {
                let fahrenheit = units::celsius_to_fahrenheit(m.value).round() as i32;
                map.serialize_entry("temperature_F", &fahrenheit)?;
            }
        }
        map.serialize_entry("status", &self.condition)?;
        map.serialize_entry("ssid", &self.link.ssid)?;
        map.serialize_entry("ip", &self.link.ip)?;
        map.serialize_entry("rssi", &self.link.rssi)?;
        map.end()
    }
}

// === impl Outcome ===

impl Outcome {
    #[must_use]
    pub fn is_restarting(self) -> bool {
        self == Self::Restarting
    }
}

// === impl TelemetryPublisher ===

impl TelemetryPublisher {
    pub fn new(device: DeviceInfo, interval: Duration) -> Self {
        let topic = device.topic();
        Self {
            device,
            topic,
            interval: Interval::new(interval),
            published: 0,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the number of messages published successfully.
    #[must_use]
    pub fn published(&self) -> usize {
        self.published
    }

    /// Publishes `condition` and `reading` if the publish interval has
    /// elapsed and `reading` is valid.
    ///
    /// If the connection is down, one connection attempt is made first. A
    /// failed attempt skips this cycle; it is logged but not escalated here,
    /// since the connectivity manager keeps its own retry budget.
    pub fn publish_if_due<T: Transport>(
        &mut self,
        now: Instant,
        condition: Condition,
        reading: Option<&Reading>,
        connectivity: &mut ConnectivityManager<T>,
        restart: &mut impl Restart,
    ) -> Outcome {
        if !self.interval.is_due(now) {
            return Outcome::NotDue;
        }

        let Some(reading) = reading.filter(|r| r.is_usable()) else {
            return Outcome::NoValidReading;
        };
        self.interval.reset(now);

        if let Err(error) = connectivity.connect(now, restart) {
            if error.is_exhausted() {
                return Outcome::Restarting;
            }
            log::info!(target: TARGET, "skipping publish: {error}");
            return Outcome::ConnectFailed;
        }

        let link = connectivity.link_info();
        let message = Message {
            device: &self.device,
            reading,
            condition,
            link: &link,
        };
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(error) => {
                log::warn!(target: TARGET, "failed to serialize telemetry: {error}");
                return Outcome::PublishFailed;
            }
        };

        log::info!(
            target: TARGET,
            "publishing to {}: {}",
            self.topic,
            String::from_utf8_lossy(&payload)
        );
        match connectivity.publish(&self.topic, &payload) {
            Ok(()) => {
                self.published += 1;
                log::info!(target: TARGET, "publish succeeded");
                Outcome::Published
            }
            Err(error) => {
                log::warn!(target: TARGET, "{error}");
                Outcome::PublishFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::NetworkConfig,
        test_util::{CountingRestart, MockTransport},
    };
    use serde_json::json;

    fn dht(temp: f32, humidity: f32) -> Reading {
        Reading::new()
            .with(Quantity::Temperature, temp)
            .with(Quantity::Humidity, humidity)
    }

    fn device() -> DeviceInfo {
        DeviceInfo {
            device_id: "a1b2c3".into(),
            ..DeviceInfo::default()
        }
    }

    fn connectivity(transport: MockTransport) -> ConnectivityManager<MockTransport> {
        ConnectivityManager::new(transport, &NetworkConfig::default(), "a1b2c3")
    }

    #[test]
    fn device_id_from_mac() {
        let id = DeviceInfo::id_from_mac([0x24, 0x0a, 0xc4, 0x12, 0x34, 0x56]);
        assert_eq!(id, "563412c40a24");
        // leading zeros of the integer are dropped.
        assert_eq!(DeviceInfo::id_from_mac([0xab, 0, 0, 0, 0, 0]), "ab");

        let other = DeviceInfo::id_from_mac([0x24, 0x0a, 0xc4, 0x12, 0x34, 0x57]);
        assert_ne!(id, other);
        let device = DeviceInfo {
            device_id: other,
            ..DeviceInfo::default()
        };
        assert_eq!(device.topic(), "573412c40a24/pub");
    }

    #[test]
    fn message_schema() {
        let device = device();
        let reading = dht(22.0, 50.0);
        let link = LinkInfo {
            ssid: "lab".into(),
            ip: Some([10, 0, 0, 7].into()),
            rssi: -61,
        };
        let message = Message {
            device: &device,
            reading: &reading,
            condition: Condition::Normal,
            link: &link,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "deviceId": "a1b2c3",
                "deviceType": "Sensor",
                "deviceFunction": "Temperature and Humidity",
                "deviceModel": "DHT11",
                "temperature_C": 22.0,
                "temperature_F": 72,
                "humidity_pct": 50.0,
                "status": "Normal",
                "ssid": "lab",
                "ip": "10.0.0.7",
                "rssi": -61,
            })
        );
    }

    #[test]
    fn topic_is_derived_from_device_id() {
        let publisher = TelemetryPublisher::new(device(), Duration::from_secs(3));
        assert_eq!(publisher.topic(), "a1b2c3/pub");
    }

    #[test]
    fn connects_then_publishes_when_due() {
        let mut restart = CountingRestart::default();
        let mut conn = connectivity(MockTransport::default());
        let mut publisher = TelemetryPublisher::new(device(), Duration::from_secs(3));
        let reading = dht(5.0, 50.0);

        let outcome = publisher.publish_if_due(
            Instant::from_millis(1000),
            Condition::BelowRange,
            Some(&reading),
            &mut conn,
            &mut restart,
        );
        assert_eq!(outcome, Outcome::NotDue);
        assert!(!conn.is_connected());

        let outcome = publisher.publish_if_due(
            Instant::from_millis(3000),
            Condition::BelowRange,
            Some(&reading),
            &mut conn,
            &mut restart,
        );
        assert_eq!(outcome, Outcome::Published);
        assert!(conn.is_connected());

        let (topic, payload) = &conn.transport().published[0];
        assert_eq!(topic, "a1b2c3/pub");
        let payload: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(payload["status"], "Below Normal");
        assert_eq!(payload["temperature_C"], 5.0);
        assert_eq!(payload["ssid"], MockTransport::SSID);
    }

    #[test]
    fn invalid_reading_is_not_published() {
        let mut restart = CountingRestart::default();
        let mut conn = connectivity(MockTransport::default());
        let mut publisher = TelemetryPublisher::new(device(), Duration::from_secs(3));

        let now = Instant::from_millis(3000);
        let invalid = Reading::invalid();
        let outcome = publisher.publish_if_due(now, Condition::SensorError, Some(&invalid), &mut conn, &mut restart);
        assert_eq!(outcome, Outcome::NoValidReading);
        let outcome = publisher.publish_if_due(now, Condition::SensorError, None, &mut conn, &mut restart);
        assert_eq!(outcome, Outcome::NoValidReading);
        assert!(conn.transport().calls.is_empty());

        // the interval was not consumed, so the next valid reading goes out
        // right away.
        let reading = dht(22.0, 50.0);
        let outcome = publisher.publish_if_due(
            Instant::from_millis(3100),
            Condition::Normal,
            Some(&reading),
            &mut conn,
            &mut restart,
        );
        assert_eq!(outcome, Outcome::Published);
    }

    #[test]
    fn failed_connect_skips_cycle_without_escalating() {
        let mut restart = CountingRestart::default();
        let mut conn = connectivity(MockTransport {
            fail_broker: 1,
            ..MockTransport::default()
        });
        let mut publisher = TelemetryPublisher::new(device(), Duration::from_secs(3));
        let reading = dht(22.0, 50.0);

        let outcome = publisher.publish_if_due(
            Instant::from_millis(3000),
            Condition::Normal,
            Some(&reading),
            &mut conn,
            &mut restart,
        );
        assert_eq!(outcome, Outcome::ConnectFailed);
        assert_eq!(restart.count, 0);
        assert!(conn.transport().published.is_empty());

        // next cycle is past the retry delay (5s) and the broker recovers
        let outcome = publisher.publish_if_due(
            Instant::from_millis(9000),
            Condition::Normal,
            Some(&reading),
            &mut conn,
            &mut restart,
        );
        assert_eq!(outcome, Outcome::Published);
    }

    #[test]
    fn publish_failure_drops_connection_and_reconnects_next_cycle() {
        let mut restart = CountingRestart::default();
        let mut conn = connectivity(MockTransport {
            fail_publish: 1,
            ..MockTransport::default()
        });
        let mut publisher = TelemetryPublisher::new(device(), Duration::from_secs(3));
        let reading = dht(22.0, 50.0);

        let outcome = publisher.publish_if_due(
            Instant::from_millis(3000),
            Condition::Normal,
            Some(&reading),
            &mut conn,
            &mut restart,
        );
        assert_eq!(outcome, Outcome::PublishFailed);
        assert!(!conn.is_connected());

        let outcome = publisher.publish_if_due(
            Instant::from_millis(6000),
            Condition::Normal,
            Some(&reading),
            &mut conn,
            &mut restart,
        );
        assert_eq!(outcome, Outcome::Published);
        assert_eq!(publisher.published(), 1);
        assert_eq!(conn.attempts(), 2);
    }
}
