// If using the `binstart` feature of `esp-idf-sys`, always keep this module
// imported
use anyhow::Context;
use envmon::{
    clock::{Clock, MonotonicClock},
    net::{Credentials, Endpoint},
    telemetry::DeviceInfo,
    Config, Controller, Restart,
};
use esp_idf_hal::{
    i2c::{I2cConfig, I2cDriver},
    ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution},
    peripherals::Peripherals,
    prelude::*,
    reset::WakeupReason,
};
use esp_idf_svc::{eventloop::EspSystemEventLoop, log::EspLogger, nvs::EspDefaultNvsPartition};
use esp_idf_sys::{self as sys, esp};
use std::time::Duration;

mod bme680;
mod net;
mod outputs;

const SSID: &str = env!("WIFI_SSID");
const PASS: &str = env!("WIFI_PASS");
const MQTT_ENDPOINT: &str = env!("MQTT_ENDPOINT");
const MQTT_CA_CERT: &str = env!("MQTT_CA_CERT");
const MQTT_DEVICE_CERT: &str = env!("MQTT_DEVICE_CERT");
const MQTT_PRIVATE_KEY: &str = env!("MQTT_PRIVATE_KEY");

const TICK: Duration = Duration::from_millis(10);

// Make sure that the firmware will contain
// up-to-date build time and package info coming from the binary crate
sys::esp_app_desc!();

fn main() -> anyhow::Result<()> {
    // It is necessary to call this function once. Otherwise, some patches to the
    // runtime implemented by esp-idf-sys might not link properly. See
    // https://github.com/esp-rs/esp-idf-template/issues/71
    sys::link_patches();
    EspLogger::initialize_default();

    let wakeup = WakeupReason::get();
    log::info!("Wakeup reason: {wakeup:?}");
    log_chip_info();
    log::info!("envmon is go!");

    let config = config().context("invalid build-time configuration")?;
    let peripherals = Peripherals::take().context("peripherals already taken")?;
    let pins = peripherals.pins;

    // LEDs share an 8-bit timer; the buzzer gets its own 10-bit timer at an
    // audible frequency, so the default duty of 512 is half volume.
    let led_timer = LedcTimerDriver::new(
        peripherals.ledc.timer0,
        &TimerConfig::new()
            .frequency(5.kHz().into())
            .resolution(Resolution::Bits8),
    )?;
    let buzzer_timer = LedcTimerDriver::new(
        peripherals.ledc.timer1,
        &TimerConfig::new()
            .frequency(2.kHz().into())
            .resolution(Resolution::Bits10),
    )?;
    let outputs = outputs::Pwm {
        red: LedcDriver::new(peripherals.ledc.channel0, &led_timer, pins.gpio25)?,
        green: LedcDriver::new(peripherals.ledc.channel1, &led_timer, pins.gpio26)?,
        blue: LedcDriver::new(peripherals.ledc.channel2, &led_timer, pins.gpio27)?,
        // D4 and D5 on the board
        link_fault: LedcDriver::new(peripherals.ledc.channel3, &led_timer, pins.gpio4)?,
        sensor_fault: LedcDriver::new(peripherals.ledc.channel4, &led_timer, pins.gpio5)?,
        buzzer: LedcDriver::new(peripherals.ledc.channel5, &buzzer_timer, pins.gpio18)?,
    };

    let i2c = I2cDriver::new(
        peripherals.i2c0,
        pins.gpio21,
        pins.gpio22,
        &I2cConfig::new().baudrate(100u32.kHz().into()),
    )
    .context("constructing I2C driver")?;
    let bus: &'static bme680::I2cBus = shared_bus::new_std!(I2cDriver = i2c)
        .context("bus manager is only initialized once")?;
    let sensor = bme680::Bme680::bringup(bus).context("bringing up BME680")?;

    let sysloop = EspSystemEventLoop::take().context("failed to initialize system event loop")?;
    let nvs = EspDefaultNvsPartition::take().context("failed to initialize non-volatile storage")?;
    let transport = net::EspTransport::new(peripherals.modem, sysloop, nvs, SSID, PASS)?;

    let mut controller = Controller::new(&config, sensor, outputs, transport, Reset)?;
    let clock = MonotonicClock::new();
    let mut escalation = controller.start(clock.now());
    while !escalation.is_restart() {
        // don't get killed by the doggy timer
        std::thread::sleep(TICK);
        escalation = controller.tick(clock.now());
    }

    // `Reset` does not return.
    Ok(())
}

fn config() -> anyhow::Result<Config> {
    let (host, port) = MQTT_ENDPOINT
        .rsplit_once(':')
        .unwrap_or((MQTT_ENDPOINT, "8883"));
    let port = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {MQTT_ENDPOINT:?}"))?;

    let mut config = Config::default();
    config.device.device_id = match option_env!("DEVICE_ID") {
        Some(device_id) => device_id.into(),
        None => DeviceInfo::id_from_mac(efuse_mac()?),
    };
    log::info!("device ID: {}", config.device.device_id);
    config.device.device_model = "BME680".into();
    config.network.ssid = SSID.into();
    config.network.password = PASS.into();
    config.network.ping_host = Some("gateway".into());
    config.network.endpoint = Endpoint {
        host: host.into(),
        port,
    };
    config.network.credentials = Credentials {
        ca_cert: MQTT_CA_CERT.into(),
        device_cert: MQTT_DEVICE_CERT.into(),
        private_key: MQTT_PRIVATE_KEY.into(),
    };
    config.validate()?;
    Ok(config)
}

fn efuse_mac() -> anyhow::Result<[u8; 6]> {
    let mut mac = [0u8; 6];
    // SAFETY: `mac` is a valid, writable 6-byte buffer.
    esp!(unsafe { sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) })
        .context("failed to read factory MAC address")?;
    Ok(mac)
}

fn log_chip_info() {
    let mut info = sys::esp_chip_info_t::default();
    // SAFETY: `info` is a valid, writable chip info struct.
    unsafe { sys::esp_chip_info(&mut info) };
    let model = match info.model {
        sys::esp_chip_model_t_CHIP_ESP32 => "ESP32",
        sys::esp_chip_model_t_CHIP_ESP32S2 => "ESP32-S2",
        sys::esp_chip_model_t_CHIP_ESP32S3 => "ESP32-S3",
        sys::esp_chip_model_t_CHIP_ESP32C3 => "ESP32-C3",
        _ => "unknown",
    };

    let mut flash_size = 0u32;
    // SAFETY: a null chip selects the default flash chip.
    let flash = esp!(unsafe { sys::esp_flash_get_size(std::ptr::null_mut(), &mut flash_size) })
        .map(|()| format!("{} MB", flash_size / (1024 * 1024)))
        .unwrap_or_else(|error| format!("unknown ({error})"));

    log::info!(
        "chip: {model} rev {}, {} core(s), {flash} flash",
        info.revision,
        info.cores
    );
}

struct Reset;

impl Restart for Reset {
    fn restart(&mut self) {
        log::error!("restarting...");
        // give the log line a chance to make it out of the UART.
        std::thread::sleep(Duration::from_millis(100));
        esp_idf_hal::reset::restart();
    }
}
