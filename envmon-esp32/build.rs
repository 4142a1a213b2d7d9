fn main() -> anyhow::Result<()> {
    // secrets are baked in with `env!`, so rebuild when they change.
    for var in [
        "WIFI_SSID",
        "WIFI_PASS",
        "MQTT_ENDPOINT",
        "MQTT_CA_CERT",
        "MQTT_DEVICE_CERT",
        "MQTT_PRIVATE_KEY",
        "DEVICE_ID",
    ] {
        println!("cargo:rerun-if-env-changed={var}");
    }

    embuild::build::CfgArgs::output_propagated("ESP_IDF")?;
    embuild::build::LinkArgs::output_propagated("ESP_IDF")?;
    Ok(())
}
