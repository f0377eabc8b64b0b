//! ESP32-S3 firmware-specific modules for the zombie sensor node
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: ADC and I2C sensor wiring, the SD card, RTC memory, Wi-Fi, SNTP
//! and deep sleep. Everything here implements a collaborator trait of
//! `zombie_core`; the wake cycle itself lives in the core crate.

#![no_std]

extern crate alloc;

pub mod board;
pub mod clock;
pub mod rtc_state;
pub mod sleep;
pub mod sntp;
pub mod uplink;
pub mod wifi_secrets;
