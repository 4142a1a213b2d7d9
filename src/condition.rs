use crate::sensor::{Quantity, Reading, MAX_QUANTITIES};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The classified operating state of the monitored quantities.
///
/// Exactly one condition is active at any time.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// Every measured quantity is within its configured range.
    #[default]
    #[serde(rename = "Normal")]
    Normal,

    /// At least one quantity is below its configured minimum.
    #[serde(rename = "Below Normal")]
    BelowRange,

    /// At least one quantity is above its configured maximum, and none are
    /// below their minimum.
    #[serde(rename = "Above Normal")]
    AboveRange,

    /// The sensor could not be read, or returned garbage.
    #[serde(rename = "Error")]
    SensorError,
}

/// An inclusive range of acceptable values.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f32,
    pub max: f32,
}

/// Maps readings to [`Condition`]s.
#[derive(Clone, Debug, Default)]
pub struct Classifier {
    ranges: heapless::Vec<(Quantity, Range), MAX_QUANTITIES>,
}

// === impl Condition ===

impl Condition {
    /// Normal < BelowRange = AboveRange < SensorError.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::BelowRange | Self::AboveRange => 1,
            Self::SensorError => 2,
        }
    }

    /// The label published in telemetry messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::BelowRange => "Below Normal",
            Self::AboveRange => "Above Normal",
            Self::SensorError => "Error",
        }
    }

    #[must_use]
    pub const fn is_out_of_range(self) -> bool {
        matches!(self, Self::BelowRange | Self::AboveRange)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// === impl Range ===

impl Range {
    #[must_use]
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

// === impl Classifier ===

impl Classifier {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ranges: heapless::Vec::new(),
        }
    }

    /// Sets the acceptable range for `quantity`.
    ///
    /// Quantities with no configured range never affect classification.
    #[must_use]
    pub fn with_range(mut self, quantity: Quantity, range: Range) -> Self {
        if let Some((_, r)) = self.ranges.iter_mut().find(|(q, _)| *q == quantity) {
            *r = range;
        } else if self.ranges.push((quantity, range)).is_err() {
            log::warn!(
                target: "envmon::condition",
                "too many ranges configured; ignoring range for {quantity}"
            );
        }
        self
    }

    #[must_use]
    pub fn range(&self, quantity: Quantity) -> Option<Range> {
        self.ranges
            .iter()
            .find(|(q, _)| *q == quantity)
            .map(|&(_, range)| range)
    }

    /// Classifies `reading`.
    ///
    /// The checks are applied in a fixed order, so a reading with one
    /// quantity below range and another above range is always `BelowRange`:
    ///
    /// 1. invalid (or non-finite) reading: `SensorError`
    /// 2. any quantity below its minimum: `BelowRange`
    /// 3. any quantity above its maximum: `AboveRange`
    /// 4. otherwise: `Normal`
    ///
    /// Values equal to a range boundary are `Normal`.
    #[must_use]
    pub fn classify(&self, reading: &Reading) -> Condition {
        if !reading.is_valid() || reading.iter().any(|m| !m.value.is_finite()) {
            return Condition::SensorError;
        }

        let mut bounded = reading
            .iter()
            .filter_map(|m| Some((m.value, self.range(m.quantity)?)));

        if bounded.clone().any(|(value, range)| value < range.min) {
            return Condition::BelowRange;
        }

        if bounded.any(|(value, range)| value > range.max) {
            return Condition::AboveRange;
        }

        Condition::Normal
    }
}
