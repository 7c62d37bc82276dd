//! Build script - passes the esp-hal linker scripts to the firmware binary.
//!
//! Host builds (`cargo test`) do not enable the `embedded` feature and get
//! no extra link arguments.

use std::env;

fn main() {
    // Only the firmware image needs the ESP32 memory layout.
    if env::var_os("CARGO_FEATURE_EMBEDDED").is_some() {
        println!("cargo:rustc-link-arg-bins=-Tlinkall.x");
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }

    // Site settings are baked in with option_env!, so rebuild when they change.
    for key in [
        "WIFI_SSID",
        "WIFI_PASSWORD",
        "MQTT_HOST",
        "MQTT_PORT",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
        "ESP_NAME",
        "GATT_PEER",
    ] {
        println!("cargo:rerun-if-env-changed={}", key);
    }
    println!("cargo:rerun-if-changed=build.rs");
}
