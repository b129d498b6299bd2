use std::fmt;

/// Topic namespace every outbound message lives under
pub const TOPIC_ROOT: &str = "mqweather";

/// A snapshot of current conditions for one station
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temperature_c: f64,
    pub dewpoint_c: f64,
    pub wind_speed_kph: f64,
    /// Provider-formatted millibars, may be a sentinel such as `-9999.00`
    pub pressure_mb: String,
    /// Provider-formatted, usually with a trailing `%`
    pub relative_humidity: String,
}

/// The measurements republished for every reading, in publish order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Dewpoint,
    Wind,
    Pressure,
    Humidity,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Temperature,
        Metric::Dewpoint,
        Metric::Wind,
        Metric::Pressure,
        Metric::Humidity,
    ];

    /// Last topic segment for this metric
    pub fn suffix(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Dewpoint => "dewpoint",
            Metric::Wind => "wind",
            Metric::Pressure => "pressure",
            Metric::Humidity => "humidity",
        }
    }

    pub fn topic(self, station: &str) -> String {
        format!("{TOPIC_ROOT}/{station}/{}", self.suffix())
    }

    fn payload(self, reading: &Reading) -> String {
        match self {
            Metric::Temperature => scale_milli(reading.temperature_c).to_string(),
            Metric::Dewpoint => scale_milli(reading.dewpoint_c).to_string(),
            Metric::Wind => scale_milli(reading.wind_speed_kph).to_string(),
            Metric::Pressure => reading.pressure_mb.clone(),
            Metric::Humidity => reading.relative_humidity.replacen('%', "", 1),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// A topic/payload pair ready to hand to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub metric: Metric,
    pub topic: String,
    pub payload: String,
}

/// Derives the five outbound messages for a reading
pub fn derive_targets(station: &str, reading: &Reading) -> Vec<PublishTarget> {
    Metric::ALL
        .iter()
        .map(|&metric| PublishTarget {
            metric,
            topic: metric.topic(station),
            payload: metric.payload(reading),
        })
        .collect()
}

/// Scales by 1000 and truncates toward zero.
/// `as` saturates at the i64 bounds and maps NaN to 0.
pub fn scale_milli(value: f64) -> i64 {
    (value * 1000.0) as i64
}
