use envmon::{
    retry::RetryBudget,
    sensor::{Quantity, Reading, Sensor},
    units::pascals_to_hectopascals,
};
use esp_idf_hal::{delay::Ets, i2c::I2cDriver};
use std::sync::Mutex;

pub type I2cBus = shared_bus::BusManager<Mutex<I2cDriver<'static>>>;
pub type I2cRef<'bus> = shared_bus::I2cProxy<'bus, Mutex<I2cDriver<'static>>>;

pub struct Bme680 {
    sensor: bosch_bme680::Bme680<I2cRef<'static>, Ets>,
}

const TARGET: &str = "envmon::bme680";

impl Bme680 {
    pub fn bringup(busman: &'static I2cBus) -> anyhow::Result<Self> {
        let config = bosch_bme680::Configuration::default();
        log::info!(target: TARGET, "connecting to BME680 with config {config:#?}");

        let sensor = RetryBudget::new(10)
            .with_target(TARGET)
            .run(|| {
                bosch_bme680::Bme680::new(
                    busman.acquire_i2c(),
                    // the default I2C address of the Adafruit BME680 breakout
                    // board is the "secondary" address, 0x77.
                    bosch_bme680::DeviceAddress::Secondary,
                    Ets,
                    &config,
                    20,
                )
                .map_err(|error| {
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    error
                })
            })
            .map_err(|error| anyhow::anyhow!("failed to connect to BME680: {error:?}"))?;
        Ok(Self { sensor })
    }
}

impl Sensor for Bme680 {
    const NAME: &'static str = "BME680";

    fn read(&mut self) -> anyhow::Result<Reading> {
        let bosch_bme680::MeasurmentData {
            temperature,
            pressure,
            humidity,
            ..
        } = self
            .sensor
            .measure()
            .map_err(|error| anyhow::anyhow!("error reading from BME680: {error:?}"))?;
        // the driver reports pressure in pascals.
        let pressure = pascals_to_hectopascals(pressure);
        Ok(Reading::new()
            .with(Quantity::Temperature, temperature)
            .with(Quantity::Humidity, humidity)
            .with(Quantity::Pressure, pressure))
    }
}
