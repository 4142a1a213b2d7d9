//! Host simulator.
//!
//! Runs the controller against a drifting simulated sensor, console outputs,
//! and a loopback broker. A restart request exits the process with status 3
//! so a supervisor can start it again.
use anyhow::Context;
use envmon::{
    annunciator::{Channel, Outputs},
    clock::{Clock, MonotonicClock},
    net::{Credentials, Endpoint, LinkInfo, Transport},
    sensor::sim::Drift,
    Config, Controller, Restart,
};
use std::{collections::HashMap, net::Ipv4Addr, time::Duration};

const TICK: Duration = Duration::from_millis(10);
const RESTART_EXIT_CODE: i32 = 3;

fn main() -> anyhow::Result<()> {
    envmon::logger::init().context("failed to install logger")?;

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config from {path}"))?;
            Config::from_json(&json).with_context(|| format!("invalid config in {path}"))?
        }
        None => Config::default(),
    };
    log::debug!(target: "envmon", "{config:#?}");

    let transport = Loopback::new(config.network.ssid.clone());
    let sensor = Drift::new().with_dropouts(7);
    let mut controller = Controller::new(&config, sensor, Console::default(), transport, ExitOnRestart)?;

    log::info!(target: "envmon", "envmon simulator is go!");
    let clock = MonotonicClock::new();
    let mut escalation = controller.start(clock.now());
    while !escalation.is_restart() {
        std::thread::sleep(TICK);
        escalation = controller.tick(clock.now());
    }

    // `ExitOnRestart` exits the process before we get here.
    Ok(())
}

/// Prints output changes instead of driving pins.
#[derive(Debug, Default)]
struct Console {
    levels: HashMap<Channel, u16>,
}

impl Outputs for Console {
    fn set_output(&mut self, channel: Channel, value: u16) {
        if self.levels.insert(channel, value) != Some(value) {
            log::debug!(target: "envmon::outputs", "{channel:?} = {value}");
        }
    }
}

/// A broker that is always reachable and logs what it receives.
#[derive(Debug)]
struct Loopback {
    ssid: String,
    up: bool,
    connected: bool,
}

impl Loopback {
    fn new(ssid: String) -> Self {
        let ssid = if ssid.is_empty() { "loopback".into() } else { ssid };
        Self {
            ssid,
            up: false,
            connected: false,
        }
    }
}

impl Transport for Loopback {
    fn network_up(&self) -> bool {
        self.up
    }

    fn join_network(&mut self) -> anyhow::Result<()> {
        self.up = true;
        Ok(())
    }

    fn ping(&mut self, _: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn sync_clock(&mut self) -> anyhow::Result<u64> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .context("system clock is before the Unix epoch")?;
        Ok(now.as_secs())
    }

    fn connect_secure(&mut self, endpoint: &Endpoint, _: &Credentials) -> anyhow::Result<()> {
        log::debug!(target: "envmon::loopback", "pretending to open a TLS session to {endpoint}");
        Ok(())
    }

    fn connect_broker(&mut self, client_id: &str) -> anyhow::Result<()> {
        log::debug!(target: "envmon::loopback", "client {client_id} connected");
        self.connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        anyhow::ensure!(self.connected, "broker connection is closed");
        log::debug!(target: "envmon::loopback", "{topic} <- {} bytes", payload.len());
        Ok(())
    }

    fn link_info(&self) -> LinkInfo {
        LinkInfo {
            ssid: self.ssid.clone(),
            ip: self.up.then_some(Ipv4Addr::LOCALHOST),
            rssi: 0,
        }
    }
}

struct ExitOnRestart;

impl Restart for ExitOnRestart {
    fn restart(&mut self) {
        log::error!(target: "envmon", "restarting...");
        std::process::exit(RESTART_EXIT_CODE);
    }
}
