//! Supply-voltage based power policy

use core::future::Future;
use core::time::Duration;

use crate::config::PowerThresholds;

/// Amount of work a wake cycle may do at the current supply voltage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// Measure, predict, connect and deliver
    Normal,
    /// Measure and predict, buffer the record without powering the radio
    Offline,
    /// Skip the cycle and go straight back to sleep
    Dormant,
}

impl PowerMode {
    pub fn for_voltage(voltage: f32, thresholds: &PowerThresholds) -> Self {
        if voltage >= thresholds.wifi_down_voltage {
            PowerMode::Normal
        } else if voltage >= thresholds.stop_measuring_voltage {
            PowerMode::Offline
        } else {
            PowerMode::Dormant
        }
    }

    pub fn measures(self) -> bool {
        !matches!(self, PowerMode::Dormant)
    }

    pub fn uses_radio(self) -> bool {
        matches!(self, PowerMode::Normal)
    }
}

/// Puts the node into its lowest power state until the next wake cycle
pub trait PowerControl {
    /// Enter low power for `duration`.
    ///
    /// On hardware this does not return; the next cycle starts from reset.
    fn enter_low_power(&mut self, duration: Duration) -> impl Future<Output = ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_thresholds() {
        let thresholds = PowerThresholds::default();

        assert_eq!(PowerMode::for_voltage(4.2, &thresholds), PowerMode::Normal);
        assert_eq!(PowerMode::for_voltage(3.3, &thresholds), PowerMode::Normal);
        assert_eq!(PowerMode::for_voltage(3.29, &thresholds), PowerMode::Offline);
        assert_eq!(PowerMode::for_voltage(2.9, &thresholds), PowerMode::Offline);
        assert_eq!(PowerMode::for_voltage(2.89, &thresholds), PowerMode::Dormant);
        assert_eq!(PowerMode::for_voltage(0.0, &thresholds), PowerMode::Dormant);
    }

    #[test]
    fn test_mode_capabilities() {
        assert!(PowerMode::Normal.measures() && PowerMode::Normal.uses_radio());
        assert!(PowerMode::Offline.measures() && !PowerMode::Offline.uses_radio());
        assert!(!PowerMode::Dormant.measures() && !PowerMode::Dormant.uses_radio());
    }

    #[test]
    fn test_nan_voltage_is_dormant() {
        let thresholds = PowerThresholds::default();
        assert_eq!(PowerMode::for_voltage(f32::NAN, &thresholds), PowerMode::Dormant);
    }
}
