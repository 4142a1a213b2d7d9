use envmon::annunciator::{Channel, Outputs};
use esp_idf_hal::ledc::LedcDriver;

/// LEDC PWM outputs for the RGB LED, the two status LEDs, and the buzzer.
pub struct Pwm {
    pub red: LedcDriver<'static>,
    pub green: LedcDriver<'static>,
    pub blue: LedcDriver<'static>,
    pub link_fault: LedcDriver<'static>,
    pub sensor_fault: LedcDriver<'static>,
    pub buzzer: LedcDriver<'static>,
}

impl Pwm {
    fn driver(&mut self, channel: Channel) -> &mut LedcDriver<'static> {
        match channel {
            Channel::Red => &mut self.red,
            Channel::Green => &mut self.green,
            Channel::Blue => &mut self.blue,
            Channel::LinkFault => &mut self.link_fault,
            Channel::SensorFault => &mut self.sensor_fault,
            Channel::Buzzer => &mut self.buzzer,
        }
    }
}

impl Outputs for Pwm {
    fn set_output(&mut self, channel: Channel, value: u16) {
        let driver = self.driver(channel);
        let duty = u32::from(value).min(driver.get_max_duty());
        if let Err(error) = driver.set_duty(duty) {
            log::warn!(target: "envmon::outputs", "failed to set {channel:?} duty to {duty}: {error}");
        }
    }
}
