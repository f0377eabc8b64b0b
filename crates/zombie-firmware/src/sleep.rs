//! Deep sleep between wake cycles

use core::time::Duration;

use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use log::info;
use zombie_core::PowerControl;

pub struct DeepSleep {
    rtc: Rtc<'static>,
}

impl DeepSleep {
    pub fn new(rtc: Rtc<'static>) -> Self {
        Self { rtc }
    }

    /// Enter deep sleep with a timer wake-up. The next cycle starts from
    /// reset.
    pub fn sleep(&mut self, duration: Duration) -> ! {
        info!("Deep sleep for {} s", duration.as_secs());
        let timer = TimerWakeupSource::new(duration);
        self.rtc.sleep_deep(&[&timer])
    }
}

impl PowerControl for DeepSleep {
    async fn enter_low_power(&mut self, duration: Duration) {
        self.sleep(duration)
    }
}
