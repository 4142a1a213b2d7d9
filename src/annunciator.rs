//! Lights and sound.
//!
//! The [`Annunciator`] turns the active [`Condition`] into LED and buzzer
//! output. Blinking is driven entirely by [`Annunciator::tick`]: nothing in
//! here ever sleeps.
use crate::{clock::Instant, condition::Condition};
use std::time::Duration;

/// An output channel on the board.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Channel {
    /// Red component of the data RGB LED.
    Red,
    /// Green component of the data RGB LED.
    Green,
    /// Blue component of the data RGB LED.
    Blue,
    /// System LED lit while the network connection is failing.
    LinkFault,
    /// System LED lit while the sensor is failing.
    SensorFault,
    /// Piezo buzzer.
    Buzzer,
}

/// The digital/PWM output primitive.
///
/// Values are PWM duty cycles; `0` is always off. The annunciator is the
/// only caller.
pub trait Outputs {
    fn set_output(&mut self, channel: Channel, value: u16);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Color {
    Off,
    Red,
    Green,
    Blue,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tone {
    Silent,
    /// Beeps in time with the LED.
    Alert,
    /// Held on continuously.
    Error,
}

/// How a condition is annunciated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pattern {
    pub color: Color,
    pub tone: Tone,
    /// Whether the sensor-fault LED is lit.
    pub fault_led: bool,
    pub on: Duration,
    pub off: Duration,
    pub repeat: bool,
}

/// PWM duty cycles used when an output is "on".
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Levels {
    pub led: u16,
    pub buzzer: u16,
}

pub struct Annunciator<O> {
    outputs: O,
    levels: Levels,
    blink_interval: Duration,
    condition: Condition,
    pattern: Pattern,
    /// Current blink phase. Always `false` for steady patterns.
    phase_on: bool,
    last_toggle: Instant,
    link_fault: bool,
}

// === impl Pattern ===

impl Pattern {
    /// Returns the pattern bound to `condition`.
    #[must_use]
    pub fn for_condition(condition: Condition, blink_interval: Duration) -> Self {
        let steady = |color, tone, fault_led| Self {
            color,
            tone,
            fault_led,
            on: Duration::ZERO,
            off: Duration::ZERO,
            repeat: false,
        };
        let blinking = |color| Self {
            color,
            tone: Tone::Alert,
            fault_led: false,
            on: blink_interval,
            off: blink_interval,
            repeat: true,
        };

        match condition {
            Condition::Normal => steady(Color::Green, Tone::Silent, false),
            Condition::BelowRange => blinking(Color::Blue),
            Condition::AboveRange => blinking(Color::Red),
            Condition::SensorError => steady(Color::Off, Tone::Error, true),
        }
    }

    #[must_use]
    pub fn blinks(&self) -> bool {
        self.repeat && !self.on.is_zero() && !self.off.is_zero()
    }
}

// === impl Levels ===

impl Levels {
    /// 8-bit LED duty, 10-bit buzzer duty at half volume.
    pub const DEFAULT: Self = Self {
        led: 255,
        buzzer: 512,
    };
}

impl Default for Levels {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// === impl Annunciator ===

impl<O: Outputs> Annunciator<O> {
    /// Returns a new annunciator showing [`Condition::Normal`].
    ///
    /// All outputs are written immediately, so the board's initial pin state
    /// doesn't matter.
    pub fn new(outputs: O, levels: Levels, blink_interval: Duration) -> Self {
        let condition = Condition::Normal;
        let mut this = Self {
            outputs,
            levels,
            blink_interval,
            condition,
            pattern: Pattern::for_condition(condition, blink_interval),
            phase_on: false,
            last_toggle: Instant::ZERO,
            link_fault: false,
        };
        this.write_pattern();
        this.outputs.set_output(Channel::LinkFault, 0);
        this
    }

    /// Switches to the pattern for `condition`.
    ///
    /// Setting the condition that is already active does nothing; in
    /// particular it does not restart the blink phase. Returns `true` if the
    /// condition changed.
    pub fn set_condition(&mut self, condition: Condition, now: Instant) -> bool {
        if condition == self.condition {
            return false;
        }

        log::debug!(
            target: "envmon::annunciator",
            "pattern: {:?} -> {:?}",
            self.condition,
            condition
        );
        self.condition = condition;
        self.pattern = Pattern::for_condition(condition, self.blink_interval);
        // blinking patterns start in the "on" phase so the change is visible
        // right away.
        self.phase_on = self.pattern.blinks();
        self.last_toggle = now;
        self.write_pattern();
        true
    }

    /// Advances the blink pattern.
    ///
    /// Toggles at most once per call, and only if the current phase has run
    /// its course. Returns `true` if the outputs were toggled.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.pattern.blinks() {
            return false;
        }

        let phase_len = if self.phase_on {
            self.pattern.on
        } else {
            self.pattern.off
        };
        if now.saturating_duration_since(self.last_toggle) < phase_len {
            return false;
        }

        self.phase_on = !self.phase_on;
        self.last_toggle = now;
        self.write_pattern();
        true
    }

    /// Lights or clears the link-fault LED.
    pub fn set_link_fault(&mut self, fault: bool) {
        if fault == self.link_fault {
            return;
        }
        self.link_fault = fault;
        let value = if fault { self.levels.led } else { 0 };
        self.outputs.set_output(Channel::LinkFault, value);
    }

    #[must_use]
    pub fn condition(&self) -> Condition {
        self.condition
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    #[must_use]
    pub fn is_phase_on(&self) -> bool {
        self.phase_on
    }

    #[must_use]
    pub fn last_toggle(&self) -> Instant {
        self.last_toggle
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    fn write_pattern(&mut self) {
        let Pattern {
            color,
            tone,
            fault_led,
            ..
        } = self.pattern;
        let lit = !self.pattern.blinks() || self.phase_on;
        let led = |on: bool| if on && lit { self.levels.led } else { 0 };
        let (red, green, blue) = (
            led(color == Color::Red),
            led(color == Color::Green),
            led(color == Color::Blue),
        );
        let fault = if fault_led { self.levels.led } else { 0 };
        let buzzer = match tone {
            Tone::Silent => 0,
            Tone::Alert if lit => self.levels.buzzer,
            Tone::Alert => 0,
            Tone::Error => self.levels.buzzer,
        };

        self.outputs.set_output(Channel::Red, red);
        self.outputs.set_output(Channel::Green, green);
        self.outputs.set_output(Channel::Blue, blue);
        self.outputs.set_output(Channel::SensorFault, fault);
        self.outputs.set_output(Channel::Buzzer, buzzer);
    }
}

impl<O> std::fmt::Debug for Annunciator<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annunciator")
            .field("condition", &self.condition)
            .field("phase_on", &self.phase_on)
            .field("last_toggle", &self.last_toggle)
            .field("link_fault", &self.link_fault)
            .finish_non_exhaustive()
    }
}
