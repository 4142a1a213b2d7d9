use anyhow::Context;
use embedded_svc::{
    mqtt::client::{Event, QoS},
    wifi::{ClientConfiguration, Configuration, Wifi},
};
use envmon::net::{Credentials, Endpoint, LinkInfo, Transport};
use esp_idf_hal::{modem::Modem, peripheral::Peripheral};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    mqtt::client::{EspMqttClient, MqttClientConfiguration},
    netif::{EspNetif, EspNetifWait},
    nvs::EspDefaultNvsPartition,
    ping,
    sntp::{EspSntp, SyncStatus},
    tls::X509,
    wifi::{EspWifi, WifiWait},
};
use std::{
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Every blocking step gives up after this long.
const STEP_TIMEOUT: Duration = Duration::from_secs(10);
const TARGET: &str = "envmon::esp32::net";

/// The board's [`Transport`]: WiFi station, SNTP, and a TLS MQTT client.
pub struct EspTransport {
    wifi: Box<EspWifi<'static>>,
    sysloop: EspSystemEventLoop,
    ssid: String,
    password: String,
    sntp: Option<EspSntp>,
    tls: Option<TlsConfig>,
    mqtt: Option<EspMqttClient>,
    connected: Arc<AtomicBool>,
}

/// PEM blobs for the broker session, NUL-terminated as ESP-TLS expects.
struct TlsConfig {
    url: String,
    ca_cert: &'static [u8],
    device_cert: &'static [u8],
    private_key: &'static [u8],
}

impl EspTransport {
    pub fn new(
        modem: impl Peripheral<P = Modem> + 'static,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: &str,
        password: &str,
    ) -> anyhow::Result<Self> {
        log::info!(target: TARGET, "bringing up WiFi...");
        let wifi = Box::new(EspWifi::new(modem, sysloop.clone(), Some(nvs))?);
        Ok(Self {
            wifi,
            sysloop,
            ssid: ssid.into(),
            password: password.into(),
            sntp: None,
            tls: None,
            mqtt: None,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ip(&self) -> Option<Ipv4Addr> {
        let ip = self.wifi.sta_netif().get_ip_info().ok()?.ip;
        (ip != Ipv4Addr::UNSPECIFIED).then_some(ip)
    }

    fn gateway(&self) -> anyhow::Result<Ipv4Addr> {
        Ok(self.wifi.sta_netif().get_ip_info()?.subnet.gateway)
    }
}

impl Transport for EspTransport {
    fn network_up(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.ip().is_some()
    }

    fn join_network(&mut self) -> anyhow::Result<()> {
        self.wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: self.ssid.as_str().into(),
            password: self.password.as_str().into(),
            ..Default::default()
        }))?;

        if !self.wifi.is_started()? {
            self.wifi.start().context("failed to start WiFi")?;
            let wifi = &self.wifi;
            if !WifiWait::new(&self.sysloop)?
                .wait_with_timeout(STEP_TIMEOUT, || wifi.is_started().unwrap_or(false))
            {
                anyhow::bail!("WiFi did not start");
            }
        }

        log::info!(target: TARGET, "connecting to {}...", self.ssid);
        self.wifi.connect()?;

        let wifi = &self.wifi;
        let up = EspNetifWait::new::<EspNetif>(wifi.sta_netif(), &self.sysloop)?.wait_with_timeout(
            STEP_TIMEOUT,
            || {
                wifi.is_connected().unwrap_or(false)
                    && wifi
                        .sta_netif()
                        .get_ip_info()
                        .map(|info| info.ip != Ipv4Addr::UNSPECIFIED)
                        .unwrap_or(false)
            },
        );
        if !up {
            anyhow::bail!("WiFi did not connect or did not receive a DHCP lease");
        }

        let ip_info = self.wifi.sta_netif().get_ip_info()?;
        log::info!(target: TARGET, "WiFi DHCP info: {ip_info:?}");
        Ok(())
    }

    fn ping(&mut self, host: &str) -> anyhow::Result<()> {
        let ip = match host {
            "gateway" => self.gateway()?,
            host => host
                .parse::<Ipv4Addr>()
                .with_context(|| format!("can only ping IPv4 addresses, not {host:?}"))?,
        };

        let summary = ping::EspPing::default().ping(ip, &Default::default())?;
        if summary.transmitted != summary.received {
            anyhow::bail!("pinging IP {ip} timed out");
        }
        Ok(())
    }

    fn sync_clock(&mut self) -> anyhow::Result<u64> {
        let sntp = match self.sntp.take() {
            Some(sntp) => sntp,
            None => EspSntp::new_default().context("failed to initialize SNTP")?,
        };

        let deadline = Instant::now() + STEP_TIMEOUT;
        while sntp.get_sync_status() != SyncStatus::Completed {
            if Instant::now() >= deadline {
                // keep the SNTP service so the next attempt can pick up where
                // this one left off.
                self.sntp = Some(sntp);
                anyhow::bail!("SNTP did not complete within {STEP_TIMEOUT:?}");
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        self.sntp = Some(sntp);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("clock is before the Unix epoch")?;
        Ok(now.as_secs())
    }

    fn connect_secure(&mut self, endpoint: &Endpoint, credentials: &Credentials) -> anyhow::Result<()> {
        // ESP-TLS runs the handshake as part of the MQTT connection, so this
        // only drops any stale session and checks the credentials.
        self.mqtt = None;
        self.connected.store(false, Ordering::Release);

        let pem = |name: &str, pem: &str| -> anyhow::Result<&'static [u8]> {
            anyhow::ensure!(!pem.is_empty(), "no {name} configured");
            let mut bytes = pem.as_bytes().to_vec();
            bytes.push(0);
            Ok(Box::leak(bytes.into_boxed_slice()))
        };
        if self.tls.is_none() {
            self.tls = Some(TlsConfig {
                url: format!("mqtts://{endpoint}"),
                ca_cert: pem("CA certificate", &credentials.ca_cert)?,
                device_cert: pem("device certificate", &credentials.device_cert)?,
                private_key: pem("private key", &credentials.private_key)?,
            });
        }
        Ok(())
    }

    fn connect_broker(&mut self, client_id: &str) -> anyhow::Result<()> {
        let tls = self
            .tls
            .as_ref()
            .context("TLS session must be configured before connecting to the broker")?;

        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            server_certificate: Some(X509::pem_until_nul(tls.ca_cert)),
            client_certificate: Some(X509::pem_until_nul(tls.device_cert)),
            private_key: Some(X509::pem_until_nul(tls.private_key)),
            ..Default::default()
        };

        let connected = self.connected.clone();
        let client = EspMqttClient::new(&tls.url, &conf, move |event| match event {
            Ok(Event::Connected(_)) => connected.store(true, Ordering::Release),
            Ok(Event::Disconnected) => {
                log::warn!(target: TARGET, "MQTT broker disconnected");
                connected.store(false, Ordering::Release);
            }
            Ok(event) => log::debug!(target: TARGET, "MQTT event: {event:?}"),
            Err(error) => log::warn!(target: TARGET, "MQTT error: {error}"),
        })
        .with_context(|| format!("failed to create MQTT client for {}", tls.url))?;

        let deadline = Instant::now() + STEP_TIMEOUT;
        while !self.connected.load(Ordering::Acquire) {
            anyhow::ensure!(
                Instant::now() < deadline,
                "broker did not accept the connection within {STEP_TIMEOUT:?}"
            );
            std::thread::sleep(Duration::from_millis(50));
        }
        self.mqtt = Some(client);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.connected.load(Ordering::Acquire),
            "broker connection was lost"
        );
        let mqtt = self.mqtt.as_mut().context("not connected to broker")?;
        mqtt.publish(topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("failed to publish to {topic}"))?;
        Ok(())
    }

    fn link_info(&self) -> LinkInfo {
        LinkInfo {
            ssid: self.ssid.clone(),
            ip: self.ip(),
            rssi: rssi().unwrap_or(0),
        }
    }
}

fn rssi() -> Option<i8> {
    let mut info = esp_idf_sys::wifi_ap_record_t::default();
    // SAFETY: `info` is a valid, writable AP record.
    let err = unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut info) };
    (err == esp_idf_sys::ESP_OK).then_some(info.rssi)
}
