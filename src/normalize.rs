use crate::decode::Measurement;

/// "No data" stand-in for temperature. 0 degrees is a perfectly reasonable
/// reading, -100 is not.
pub const TEMPERATURE_SENTINEL: f64 = -100.0;
/// "No data" stand-in for humidity, battery percent and battery voltage.
pub const ZERO_SENTINEL: f64 = 0.0;

/// A measurement with absent fields replaced by sentinel values.
///
/// The sentinels signal "this reading did not include this quantity" to the
/// reconciler; they are never forwarded downstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedReading {
    pub temperature: f64,
    pub humidity: f64,
    pub battery_percent: f64,
    pub battery_voltage: f64,
}

impl NormalizedReading {
    pub fn has_temperature(&self) -> bool {
        self.temperature != TEMPERATURE_SENTINEL
    }

    pub fn has_humidity(&self) -> bool {
        self.humidity != ZERO_SENTINEL
    }

    /// Battery is all or nothing: both percent and voltage must be present.
    pub fn has_battery(&self) -> bool {
        self.battery_percent != ZERO_SENTINEL && self.battery_voltage != ZERO_SENTINEL
    }
}

impl From<&Measurement> for NormalizedReading {
    fn from(m: &Measurement) -> Self {
        NormalizedReading {
            temperature: m.temperature.unwrap_or(TEMPERATURE_SENTINEL),
            humidity: m.humidity.map_or(ZERO_SENTINEL, f64::from),
            battery_percent: m.battery_percent.map_or(ZERO_SENTINEL, f64::from),
            battery_voltage: m.battery_voltage.unwrap_or(ZERO_SENTINEL),
        }
    }
}
