use crate::clock::{Instant, Interval};
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt, time::Duration};

pub mod sim;

/// The maximum number of quantities a single [`Reading`] can carry: one of
/// each [`Quantity`].
pub const MAX_QUANTITIES: usize = Quantity::ALL.len();

/// A sensor read primitive.
///
/// This is the narrow interface to the physical sensor driver. A read is
/// synchronous and is expected to complete within one controller tick.
pub trait Sensor {
    const NAME: &'static str;

    fn read(&mut self) -> anyhow::Result<Reading>;
}

/// A physical quantity measured by a sensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    /// Temperature in degrees Celsius.
    Temperature,
    /// Relative humidity percentage.
    Humidity,
    /// Distance to an obstacle, in centimeters.
    Distance,
    /// Barometric pressure, in hectopascals.
    Pressure,
    /// Soil moisture percentage.
    Moisture,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Measurement {
    pub quantity: Quantity,
    pub value: f32,
}

/// One sample from a sensor: a handful of measurements plus a validity flag.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    measurements: heapless::Vec<Measurement, MAX_QUANTITIES>,
    valid: bool,
}

#[derive(Debug)]
pub enum ReadError {
    /// The driver produced a reading, but it was flagged invalid or one of
    /// its values was NaN or infinite.
    Invalid,
    /// The read primitive itself failed (bus error, timeout, ...).
    Driver(anyhow::Error),
}

/// Invokes a [`Sensor`] at most once per sampling interval.
#[derive(Debug)]
pub struct Sampler<S> {
    sensor: S,
    interval: Interval,
}

// === impl Quantity ===

impl Quantity {
    pub const ALL: [Self; 5] = [
        Self::Temperature,
        Self::Humidity,
        Self::Distance,
        Self::Pressure,
        Self::Moisture,
    ];

    /// The field name used for this quantity in telemetry messages.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Temperature => "temperature_C",
            Self::Humidity => "humidity_pct",
            Self::Distance => "distance_cm",
            Self::Pressure => "pressure_hPa",
            Self::Moisture => "moisture_pct",
        }
    }

    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "\u{00B0}C",
            Self::Humidity | Self::Moisture => "%",
            Self::Distance => "cm",
            Self::Pressure => "hPa",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
            Self::Distance => "Distance",
            Self::Pressure => "Pressure",
            Self::Moisture => "Moisture",
        })
    }
}

// === impl Reading ===

impl Reading {
    /// Returns a new, empty, valid reading.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            measurements: heapless::Vec::new(),
            valid: true,
        }
    }

    /// Returns a reading that the driver has flagged as invalid.
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            measurements: heapless::Vec::new(),
            valid: false,
        }
    }

    /// Sets the value of `quantity`, replacing any previous value for it.
    #[must_use]
    pub fn with(mut self, quantity: Quantity, value: f32) -> Self {
        self.set(quantity, value);
        self
    }

    pub fn set(&mut self, quantity: Quantity, value: f32) {
        if let Some(m) = self.measurements.iter_mut().find(|m| m.quantity == quantity) {
            m.value = value;
            return;
        }

        if self.measurements.push(Measurement { quantity, value }).is_err() {
            log::warn!(
                target: "envmon::sensor",
                "reading is full ({MAX_QUANTITIES} quantities); dropping {quantity}"
            );
        }
    }

    #[must_use]
    pub fn get(&self, quantity: Quantity) -> Option<f32> {
        self.measurements
            .iter()
            .find(|m| m.quantity == quantity)
            .map(|m| m.value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Measurement> {
        self.measurements.iter()
    }

    /// Returns `true` if the driver considered this reading valid.
    ///
    /// This does *not* check the values themselves; see
    /// [`Reading::is_usable`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns `true` if the reading is flagged valid, has at least one
    /// measurement, and every measurement is a finite number.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.valid && !self.measurements.is_empty() && self.iter().all(|m| m.value.is_finite())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return f.write_str("<invalid>");
        }

        let mut first = true;
        for Measurement { quantity, value } in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{quantity}: {value:.2} {}", quantity.unit())?;
        }
        Ok(())
    }
}

// === impl ReadError ===

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => f.write_str("sensor returned an invalid reading"),
            Self::Driver(error) => write!(f, "sensor read failed: {error}"),
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Invalid => None,
            Self::Driver(error) => Some(&**error),
        }
    }
}

// === impl Sampler ===

impl<S: Sensor> Sampler<S> {
    pub fn new(sensor: S, interval: Duration) -> Self {
        Self {
            sensor,
            interval: Interval::new(interval),
        }
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.interval.is_due(now)
    }

    /// Reads the sensor if the sampling interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Result<Reading, ReadError>> {
        if !self.is_due(now) {
            return None;
        }
        Some(self.sample(now))
    }

    /// Reads the sensor now.
    ///
    /// The sampling interval restarts whether or not the read succeeds, so a
    /// failing sensor is never polled faster than the interval.
    pub fn sample(&mut self, now: Instant) -> Result<Reading, ReadError> {
        self.interval.reset(now);
        match self.sensor.read() {
            Ok(reading) if reading.is_usable() => {
                log::info!(target: "envmon::sensor", "{reading}");
                Ok(reading)
            }
            Ok(reading) => {
                log::warn!(target: "envmon::sensor", "failed to read from {}: {reading:?}", S::NAME);
                Err(ReadError::Invalid)
            }
            Err(error) => {
                log::warn!(target: "envmon::sensor", "failed to read from {}: {error:#}", S::NAME);
                Err(ReadError::Driver(error))
            }
        }
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}

#[cfg(test)]
mod tests {
    use super::{sim::Scripted, *};

    fn dht(temp: f32, humidity: f32) -> Reading {
        Reading::new()
            .with(Quantity::Temperature, temp)
            .with(Quantity::Humidity, humidity)
    }

    #[test]
    fn samples_only_when_due() {
        let sensor = Scripted::new([Ok(dht(22.0, 50.0))]);
        let mut sampler = Sampler::new(sensor, Duration::from_millis(3000));

        assert!(sampler.poll(Instant::from_millis(1000)).is_none());
        let reading = sampler.poll(Instant::from_millis(3000)).unwrap().unwrap();
        assert_eq!(reading.get(Quantity::Temperature), Some(22.0));
        assert!(sampler.poll(Instant::from_millis(4000)).is_none());
        assert!(sampler.poll(Instant::from_millis(6000)).is_some());
        assert_eq!(sampler.sensor().reads(), 2);
    }

    #[test]
    fn failed_read_still_restarts_interval() {
        let sensor = Scripted::new([Ok(dht(f32::NAN, 50.0)), Ok(dht(22.0, 50.0))]);
        let mut sampler = Sampler::new(sensor, Duration::from_millis(3000));

        let result = sampler.poll(Instant::from_millis(3000)).unwrap();
        assert!(matches!(result, Err(ReadError::Invalid)));
        // the failed attempt does not make the next read come sooner
        assert!(sampler.poll(Instant::from_millis(3100)).is_none());
        assert!(sampler.poll(Instant::from_millis(6000)).unwrap().is_ok());
    }

    #[test]
    fn driver_errors_are_reported() {
        let sensor = Scripted::new([Err(anyhow::anyhow!("checksum mismatch"))]);
        let mut sampler = Sampler::new(sensor, Duration::from_millis(10));
        let err = sampler.sample(Instant::from_millis(10)).unwrap_err();
        assert!(matches!(err, ReadError::Driver(_)));
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn invalid_and_empty_readings_are_unusable() {
        assert!(!Reading::invalid().with(Quantity::Temperature, 20.0).is_usable());
        assert!(!Reading::new().is_usable());
        assert!(!dht(20.0, f32::INFINITY).is_usable());
        assert!(dht(20.0, 40.0).is_usable());
    }

    #[test]
    fn set_replaces_existing_quantity() {
        let reading = dht(20.0, 40.0).with(Quantity::Temperature, 21.5);
        assert_eq!(reading.iter().count(), 2);
        assert_eq!(reading.get(Quantity::Temperature), Some(21.5));
    }

    #[test]
    fn status_line_format() {
        assert_eq!(
            dht(22.0, 50.0).to_string(),
            "Temperature: 22.00 \u{00B0}C, Humidity: 50.00 %"
        );
        assert_eq!(Reading::invalid().to_string(), "<invalid>");
    }
}
