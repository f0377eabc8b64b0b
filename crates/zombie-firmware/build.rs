//! Bakes the fallback Wi-Fi credentials into the firmware.
//!
//! They are read from the environment or a `.env` file and only used when
//! the SD card holds no `config.bin`.

fn main() {
    dotenvy::dotenv().ok();

    for key in ["WIFI_SSID", "WIFI_PASSWORD"] {
        let value = std::env::var(key).unwrap_or_default();
        println!("cargo:rustc-env={key}={value}");
        println!("cargo:rerun-if-env-changed={key}");
    }
    println!("cargo:rerun-if-changed=.env");

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
