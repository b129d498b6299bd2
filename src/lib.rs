//! mqweather
//!
//! Polls current weather conditions for a single station from Weather Underground
//! and republishes temperature, dewpoint, wind, pressure and humidity to an MQTT
//! broker under `mqweather/<station>/<metric>`.

pub mod broker;
pub mod config;
pub mod publish_loop;
pub mod reading;
pub mod shutdown;
pub mod wunderground;

// Re-export commonly used types for easier access
pub use broker::{MqttBroker, MqttPublisher, PublishError, Publisher};
pub use config::Config;
pub use publish_loop::{CycleOutcome, PublishLoop};
pub use reading::{derive_targets, Metric, PublishTarget, Reading};
pub use wunderground::{FetchError, ReadingFetcher, WundergroundClient};
