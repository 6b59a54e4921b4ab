//! Drivers for a DHT11 temperature/humidity sensor and an MQ-2 gas sensor.
//!
//! Both drivers are written against the small capability traits in [`hal`],
//! so the same code runs on an ESP32 (see `esp`, built only for ESP-IDF
//! targets) and against the deterministic adapters in [`scripted`].

pub mod config;
pub mod dht11;
pub mod hal;
pub mod mq2;
pub mod schedule;
pub mod scripted;

#[cfg(target_os = "espidf")]
pub mod esp;

pub use config::{ConfigError, DhtConfig, GasConfig};
pub use dht11::{ClimateReading, Dht11, DhtError, DhtStatus};
pub use mq2::{GasError, GasLevel, GasReading, GasStatus, Mq2};
pub use schedule::{Interval, Tally};
