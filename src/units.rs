/// Converts a temperature in degrees Celsius to degrees Fahrenheit.
pub fn celsius_to_fahrenheit(temp_c: f32) -> f32 {
    temp_c * 9.0 / 5.0 + 32.0
}

/// Converts a pressure in pascals to hectopascals.
pub fn pascals_to_hectopascals(pressure_pa: f32) -> f32 {
    pressure_pa / 100.0
}
