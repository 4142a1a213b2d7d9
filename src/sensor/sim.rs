//! Simulated sensors, for running the controller on a host.
use super::{Quantity, Reading, Sensor};
use std::collections::VecDeque;

/// Plays back a fixed sequence of read results.
///
/// Once the script runs out, every further read fails.
#[derive(Debug, Default)]
pub struct Scripted {
    script: VecDeque<anyhow::Result<Reading>>,
    reads: usize,
}

/// A temperature/humidity sensor whose values swing slowly back and forth
/// through the normal range, dropping out every so often.
#[derive(Clone, Debug)]
pub struct Drift {
    reads: u32,
    temp: Swing,
    humidity: Swing,
    dropout_every: Option<u32>,
}

#[derive(Copy, Clone, Debug)]
struct Swing {
    center: f32,
    amplitude: f32,
    period: u32,
}

impl Scripted {
    pub fn new(script: impl IntoIterator<Item = anyhow::Result<Reading>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            reads: 0,
        }
    }

    pub fn push(&mut self, result: anyhow::Result<Reading>) {
        self.script.push_back(result);
    }

    /// Returns the number of times the sensor has been read.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl Sensor for Scripted {
    const NAME: &'static str = "scripted";

    fn read(&mut self) -> anyhow::Result<Reading> {
        self.reads += 1;
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted after {} reads", self.reads - 1)))
    }
}

impl Drift {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reads: 0,
            temp: Swing {
                center: 18.0,
                amplitude: 12.0,
                period: 40,
            },
            humidity: Swing {
                center: 45.0,
                amplitude: 20.0,
                period: 55,
            },
            dropout_every: None,
        }
    }

    /// Makes every `n`th read come back invalid.
    #[must_use]
    pub const fn with_dropouts(self, n: u32) -> Self {
        Self {
            dropout_every: Some(n),
            ..self
        }
    }
}

impl Default for Drift {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for Drift {
    const NAME: &'static str = "DRIFT";

    fn read(&mut self) -> anyhow::Result<Reading> {
        self.reads = self.reads.wrapping_add(1);
        if matches!(self.dropout_every, Some(n) if n > 0 && self.reads % n == 0) {
            return Ok(Reading::invalid());
        }

        Ok(Reading::new()
            .with(Quantity::Temperature, self.temp.at(self.reads))
            .with(Quantity::Humidity, self.humidity.at(self.reads)))
    }
}

impl Swing {
    fn at(&self, step: u32) -> f32 {
        let phase = (step % self.period) as f32 / self.period as f32;
        self.center + self.amplitude * (phase * std::f32::consts::TAU).sin()
    }
}
