//! The cooperative control loop.
//!
//! A [`Controller`] owns every component and advances all of them on each
//! [`tick`](Controller::tick). It never sleeps; the caller decides how often
//! to tick and supplies the current time.
use crate::{
    annunciator::{Annunciator, Outputs},
    clock::Instant,
    condition::{Classifier, Condition},
    config::Config,
    escalate::{Escalation, FailureEscalator, Restart},
    net::{ConnectivityManager, Transport},
    sensor::{Reading, Sampler, Sensor},
    telemetry::TelemetryPublisher,
};
use std::fmt;

pub struct Controller<S, O, T, R> {
    sampler: Sampler<S>,
    classifier: Classifier,
    annunciator: Annunciator<O>,
    escalator: FailureEscalator,
    connectivity: ConnectivityManager<T>,
    telemetry: TelemetryPublisher,
    restart: R,
    condition: Condition,
    last_reading: Option<Reading>,
    last_good: Option<Reading>,
    halted: bool,
}

const TARGET: &str = "envmon::controller";

impl<S, O, T, R> Controller<S, O, T, R>
where
    S: Sensor,
    O: Outputs,
    T: Transport,
    R: Restart,
{
    pub fn new(config: &Config, sensor: S, outputs: O, transport: T, restart: R) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            sampler: Sampler::new(sensor, config.sensor.interval()),
            classifier: config.sensor.classifier(),
            annunciator: Annunciator::new(
                outputs,
                config.annunciator.levels(),
                config.annunciator.blink_interval(),
            ),
            escalator: FailureEscalator::new(config.sensor.max_retries),
            connectivity: ConnectivityManager::new(
                transport,
                &config.network,
                config.device.device_id.clone(),
            ),
            telemetry: TelemetryPublisher::new(config.device.clone(), config.telemetry.interval()),
            restart,
            condition: Condition::Normal,
            last_reading: None,
            last_good: None,
            halted: false,
        })
    }

    /// Brings up the network connection.
    ///
    /// A failure here is not fatal: telemetry retries the connection on its
    /// own schedule.
    pub fn start(&mut self, now: Instant) -> Escalation {
        if self.halted {
            return Escalation::Restart;
        }

        log::info!(target: TARGET, "{} monitoring started", S::NAME);
        let result = self.connectivity.connect(now, &mut self.restart);
        self.update_link_indicator();
        match result {
            Ok(()) => Escalation::Continue,
            Err(error) if error.is_exhausted() => self.halt(),
            Err(error) => {
                log::warn!(target: TARGET, "starting without a connection: {error}");
                Escalation::Continue
            }
        }
    }

    /// Runs one scheduler step.
    ///
    /// Once a restart has been requested, this does nothing and keeps
    /// returning [`Escalation::Restart`].
    pub fn tick(&mut self, now: Instant) -> Escalation {
        if self.halted {
            return Escalation::Restart;
        }

        if let Some(result) = self.sampler.poll(now) {
            if self.handle_sample(now, result).is_restart() {
                return self.halt();
            }
        }

        self.annunciator.tick(now);

        let outcome = self.telemetry.publish_if_due(
            now,
            self.condition,
            self.last_reading.as_ref(),
            &mut self.connectivity,
            &mut self.restart,
        );
        self.update_link_indicator();
        if outcome.is_restarting() {
            return self.halt();
        }

        Escalation::Continue
    }

    #[must_use]
    pub fn condition(&self) -> Condition {
        self.condition
    }

    /// The most recent reading that passed validation.
    #[must_use]
    pub fn last_good(&self) -> Option<&Reading> {
        self.last_good.as_ref()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn annunciator(&self) -> &Annunciator<O> {
        &self.annunciator
    }

    pub fn connectivity(&self) -> &ConnectivityManager<T> {
        &self.connectivity
    }

    pub fn connectivity_mut(&mut self) -> &mut ConnectivityManager<T> {
        &mut self.connectivity
    }

    pub fn telemetry(&self) -> &TelemetryPublisher {
        &self.telemetry
    }

    pub fn escalator(&self) -> &FailureEscalator {
        &self.escalator
    }

    pub fn sampler(&self) -> &Sampler<S> {
        &self.sampler
    }

    pub fn restart(&self) -> &R {
        &self.restart
    }

    fn handle_sample(&mut self, now: Instant, result: Result<Reading, crate::sensor::ReadError>) -> Escalation {
        let (condition, success) = match result {
            Ok(reading) => {
                let condition = self.classifier.classify(&reading);
                self.last_good = Some(reading.clone());
                self.last_reading = Some(reading);
                (condition, true)
            }
            Err(error) => {
                log::warn!(target: TARGET, "{error}");
                self.last_reading = None;
                (Condition::SensorError, false)
            }
        };

        if condition != self.condition {
            log::info!(target: TARGET, "condition: {} -> {condition}", self.condition);
            self.condition = condition;
        }
        self.annunciator.set_condition(condition, now);

        self.escalator.record_result(success, &mut self.restart)
    }

    fn update_link_indicator(&mut self) {
        let fault = !self.connectivity.is_connected() && self.connectivity.consecutive_failures() > 0;
        self.annunciator.set_link_fault(fault);
    }

    fn halt(&mut self) -> Escalation {
        self.halted = true;
        Escalation::Restart
    }
}

impl<S, O, T, R> fmt::Debug for Controller<S, O, T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("condition", &self.condition)
            .field("annunciator", &self.annunciator)
            .field("escalator", &self.escalator)
            .field("connectivity", &self.connectivity)
            .field("telemetry", &self.telemetry)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        annunciator::Channel,
        net::{ConnectError, ConnectionState},
        sensor::{sim::Scripted, Quantity},
        test_util::{CountingRestart, MockTransport, RecordingOutputs},
    };
    use std::time::Duration;

    type TestController = Controller<Scripted, RecordingOutputs, MockTransport, CountingRestart>;

    fn dht(temp: f32, humidity: f32) -> anyhow::Result<Reading> {
        Ok(Reading::new()
            .with(Quantity::Temperature, temp)
            .with(Quantity::Humidity, humidity))
    }

    fn controller(script: Vec<anyhow::Result<Reading>>, transport: MockTransport) -> TestController {
        Controller::new(
            &Config::default(),
            Scripted::new(script),
            RecordingOutputs::default(),
            transport,
            CountingRestart::default(),
        )
        .unwrap()
    }

    /// Ticks every 10ms from `from` up to and including `to`.
    fn run(controller: &mut TestController, from: u64, to: u64) -> Escalation {
        for ms in (from..=to).step_by(10) {
            if controller.tick(Instant::from_millis(ms)).is_restart() {
                return Escalation::Restart;
            }
        }
        Escalation::Continue
    }

    #[test]
    fn scenario_a_normal_then_below_range() {
        let mut c = controller(
            vec![dht(22.0, 50.0), dht(22.0, 50.0), dht(5.0, 50.0)],
            MockTransport::default(),
        );
        let mut conditions = Vec::new();

        // first sample at 3s
        assert_eq!(run(&mut c, 0, 3000), Escalation::Continue);
        conditions.push(c.condition());
        let out = c.annunciator().outputs();
        assert_eq!(out.level(Channel::Green), 255);
        assert_eq!(out.level(Channel::Blue), 0);
        let writes = out.writes();

        // second sample: no change to the outputs at all
        assert_eq!(run(&mut c, 3010, 6000), Escalation::Continue);
        conditions.push(c.condition());
        assert_eq!(c.annunciator().outputs().writes(), writes);

        // third sample: blinking blue
        assert_eq!(run(&mut c, 6010, 9000), Escalation::Continue);
        conditions.push(c.condition());
        assert_eq!(
            conditions,
            [Condition::Normal, Condition::Normal, Condition::BelowRange]
        );
        let out = c.annunciator().outputs();
        assert_eq!(out.level(Channel::Green), 0);
        assert_eq!(out.level(Channel::Blue), 255);
        assert!(c.annunciator().pattern().blinks());

        assert_eq!(run(&mut c, 9010, 9100), Escalation::Continue);
        assert_eq!(c.annunciator().outputs().level(Channel::Blue), 0);

        // every sample was valid, so every one was published
        assert_eq!(c.telemetry().published(), 3);
        let statuses: Vec<String> = c
            .connectivity()
            .transport()
            .published
            .iter()
            .map(|(_, payload)| {
                let v: serde_json::Value = serde_json::from_slice(payload).unwrap();
                v["status"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(statuses, ["Normal", "Normal", "Below Normal"]);
    }

    #[test]
    fn scenario_b_three_invalid_reads_restart() {
        let mut c = controller(
            vec![
                Ok(Reading::invalid()),
                Ok(Reading::invalid()),
                Ok(Reading::invalid()),
                dht(22.0, 50.0),
            ],
            MockTransport::default(),
        );

        assert_eq!(c.start(Instant::ZERO), Escalation::Continue);
        assert!(c.connectivity().is_connected());

        assert_eq!(run(&mut c, 10, 8990), Escalation::Continue);
        assert_eq!(c.condition(), Condition::SensorError);
        assert_eq!(c.escalator().consecutive_failures(), 2);
        let out = c.annunciator().outputs();
        assert_eq!(out.level(Channel::SensorFault), 255);
        assert_eq!(out.level(Channel::Buzzer), 512);
        assert_eq!(c.restart().count, 0);

        assert_eq!(run(&mut c, 9000, 9000), Escalation::Restart);
        assert_eq!(c.restart().count, 1);
        assert!(c.is_halted());

        // nothing runs after the restart was requested
        assert_eq!(run(&mut c, 9010, 30_000), Escalation::Restart);
        assert_eq!(c.restart().count, 1);
        assert_eq!(c.sampler().sensor().reads(), 3);
        let transport = c.connectivity().transport();
        assert!(transport.published.is_empty());
        assert!(!transport.calls.iter().any(|call| call.starts_with("publish")));
    }

    #[test]
    fn scenario_c_broker_failure_after_network_and_time() {
        let mut c = controller(
            Vec::new(),
            MockTransport {
                fail_broker: 1,
                ..MockTransport::default()
            },
        );

        let before = c.connectivity().consecutive_failures();
        assert_eq!(c.start(Instant::ZERO), Escalation::Continue);
        let conn = c.connectivity();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.consecutive_failures(), before + 1);
        assert_eq!(conn.attempts(), 1);
        assert_eq!(
            conn.transport().calls,
            ["join", "sync", "connect_secure", "connect_broker:envmon"]
        );
        assert_eq!(c.annunciator().outputs().level(Channel::LinkFault), 255);
    }

    #[test]
    fn link_fault_clears_on_reconnect() {
        let mut c = controller(
            vec![dht(22.0, 50.0), dht(22.0, 50.0)],
            MockTransport {
                fail_join: 1,
                ..MockTransport::default()
            },
        );

        assert_eq!(c.start(Instant::ZERO), Escalation::Continue);
        assert_eq!(c.annunciator().outputs().level(Channel::LinkFault), 255);

        // the first publish at 3s is still inside the 5s retry delay
        assert_eq!(run(&mut c, 10, 3000), Escalation::Continue);
        assert_eq!(c.telemetry().published(), 0);
        assert_eq!(c.connectivity().attempts(), 1);

        // the reading at 6s is published after a successful reconnect
        assert_eq!(run(&mut c, 3010, 6000), Escalation::Continue);
        assert!(c.connectivity().is_connected());
        assert_eq!(c.telemetry().published(), 1);
        assert_eq!(c.annunciator().outputs().level(Channel::LinkFault), 0);
    }

    #[test]
    fn connection_exhaustion_restarts_and_halts() {
        let mut c = controller(
            (0..10).map(|_| dht(22.0, 50.0)).collect(),
            MockTransport {
                fail_join: usize::MAX,
                ..MockTransport::default()
            },
        );

        // attempt 1 at boot, then one per publish once the delay has passed:
        // 6s (attempt 2) and 12s (attempt 3).
        assert_eq!(c.start(Instant::ZERO), Escalation::Continue);
        assert_eq!(run(&mut c, 10, 11_990), Escalation::Continue);
        assert_eq!(c.connectivity().attempts(), 2);
        assert_eq!(c.restart().count, 0);

        assert_eq!(run(&mut c, 12_000, 12_000), Escalation::Restart);
        assert_eq!(c.connectivity().attempts(), 3);
        assert_eq!(c.restart().count, 1);
        let last = c.connectivity().transport().calls.last().cloned();
        assert_eq!(last.as_deref(), Some("join"));

        assert_eq!(c.tick(Instant::from_millis(20_000)), Escalation::Restart);
        assert_eq!(c.restart().count, 1);
    }

    #[test]
    fn recovering_sensor_resets_escalation() {
        let mut c = controller(
            vec![
                Ok(Reading::invalid()),
                Ok(Reading::invalid()),
                dht(22.0, 50.0),
                Ok(Reading::invalid()),
                Ok(Reading::invalid()),
                Ok(Reading::invalid()),
            ],
            MockTransport::default(),
        );

        // samples at 3, 6, 9, 12, 15s: no restart yet
        assert_eq!(run(&mut c, 0, 15_000), Escalation::Continue);
        assert_eq!(c.restart().count, 0);
        assert_eq!(
            c.last_good().and_then(|r| r.get(Quantity::Temperature)),
            Some(22.0)
        );

        // sixth read is the third failure since the last success
        assert_eq!(run(&mut c, 15_010, 18_000), Escalation::Restart);
        assert_eq!(c.restart().count, 1);
    }

    #[test]
    fn start_connects_before_first_sample() {
        let mut c = controller(vec![dht(30.0, 50.0)], MockTransport::default());
        assert_eq!(c.start(Instant::ZERO), Escalation::Continue);
        assert!(c.connectivity().is_connected());
        // already connected, so this is a no-op
        let result = c.connectivity_mut().connect(Instant::ZERO, &mut CountingRestart::default());
        assert!(result.is_ok());
        assert_eq!(c.connectivity().attempts(), 1);

        assert_eq!(run(&mut c, 10, 3000), Escalation::Continue);
        assert_eq!(c.condition(), Condition::AboveRange);
        assert_eq!(c.annunciator().outputs().level(Channel::Red), 255);
    }

    #[test]
    fn reconnect_waits_for_retry_delay() {
        let mut c = controller(
            Vec::new(),
            MockTransport {
                fail_secure: 1,
                ..MockTransport::default()
            },
        );
        assert_eq!(c.start(Instant::ZERO), Escalation::Continue);

        let mut restart = CountingRestart::default();
        let err = c
            .connectivity_mut()
            .connect(Instant::from_millis(1), &mut restart)
            .unwrap_err();
        assert!(matches!(err, ConnectError::RetryPending { .. }));
        assert_eq!(err.step(), None);
        assert_eq!(c.connectivity().attempts(), 1);

        c.connectivity_mut()
            .connect(Instant::ZERO + Duration::from_secs(5), &mut restart)
            .unwrap();
        // the network was already up and the clock already synced
        assert_eq!(
            c.connectivity().transport().calls,
            [
                "join",
                "sync",
                "connect_secure",
                "connect_secure",
                "connect_broker:envmon"
            ]
        );
        assert_eq!(restart.count, 0);
    }
}
