//! Wall clock backed by the RTC timer
//!
//! The RTC keeps counting through deep sleep, so timestamps stay monotonic
//! across wake cycles. It is set from the telemetry server over SNTP every
//! time the uplink connects, see [`crate::sntp`]. Until the first sync it
//! counts from the first power-up.

use chrono::{DateTime, Datelike, Timelike};
use embedded_sdmmc::{TimeSource, Timestamp};
use esp_hal::rtc_cntl::Rtc;
use sntpc::NtpTimestampGenerator;
use zombie_core::Clock;

/// Earliest date a FAT directory entry can hold
const FAT_EPOCH: Timestamp = Timestamp {
    year_since_1970: 10,
    zero_indexed_month: 0,
    zero_indexed_day: 0,
    hours: 0,
    minutes: 0,
    seconds: 0,
};

#[derive(Clone, Copy)]
pub struct RtcClock<'a> {
    rtc: &'a Rtc<'static>,
}

impl<'a> RtcClock<'a> {
    pub fn new(rtc: &'a Rtc<'static>) -> Self {
        Self { rtc }
    }

    /// Seconds since the Unix epoch according to the RTC.
    pub fn unix_seconds(&self) -> i64 {
        (self.rtc.current_time_us() / 1_000_000) as i64
    }

    /// Set the RTC to a Unix time.
    pub fn set_unix_time(&self, seconds: u64, micros: u32) {
        self.rtc
            .set_current_time_us(seconds * 1_000_000 + u64::from(micros));
    }
}

impl Clock for RtcClock<'_> {
    fn now(&mut self) -> i64 {
        self.unix_seconds()
    }
}

impl TimeSource for RtcClock<'_> {
    fn get_timestamp(&self) -> Timestamp {
        fat_timestamp(self.unix_seconds())
    }
}

impl NtpTimestampGenerator for RtcClock<'_> {
    fn init(&mut self) {}

    fn timestamp_sec(&self) -> u64 {
        self.rtc.current_time_us() / 1_000_000
    }

    fn timestamp_subsec_micros(&self) -> u32 {
        (self.rtc.current_time_us() % 1_000_000) as u32
    }
}

/// Converts Unix seconds to a FAT timestamp. Dates FAT cannot represent are
/// clamped to its epoch.
fn fat_timestamp(unix_seconds: i64) -> Timestamp {
    let Some(time) = DateTime::from_timestamp(unix_seconds, 0) else {
        return FAT_EPOCH;
    };

    let year_since_1970 = time.year() - 1970;
    if !(10..=u8::MAX as i32).contains(&year_since_1970) {
        return FAT_EPOCH;
    }

    Timestamp {
        year_since_1970: year_since_1970 as u8,
        zero_indexed_month: time.month0() as u8,
        zero_indexed_day: time.day0() as u8,
        hours: time.hour() as u8,
        minutes: time.minute() as u8,
        seconds: time.second() as u8,
    }
}
