// Rates, topics, defaults and command-line arguments
use clap::Parser;
use std::time::Duration;

use crate::astro::{AtmosphericParams, Body, LocationError, ObserverLocation};
use crate::link::DEFAULT_BAUDRATE;

// Tracking tick and status publication rates
pub const TRACK_INTERVAL_MS: u64 = 100;
pub const STATUS_INTERVAL_MS: u64 = 1000;

// Zenoh topics
pub const TOPIC_CMD_OPERATOR: &str = "altaz/cmd/operator"; // operator commands
pub const TOPIC_STATUS: &str = "altaz/state/status"; // periodic mount status
pub const TOPIC_EVENTS: &str = "altaz/state/events"; // runtime events and firmware lines

// Default site
pub const DEFAULT_LATITUDE: f64 = -26.259963;
pub const DEFAULT_LONGITUDE: f64 = -52.675883;
pub const DEFAULT_ELEVATION_M: f64 = 800.0;

// Default atmosphere, as text the operator would type
pub const DEFAULT_TEMPERATURE_C: &str = "10";
pub const DEFAULT_PRESSURE_MBAR: &str = "1013";

/// Alt-azimuth mount pointing and tracking runtime
#[derive(Debug, Clone, Parser)]
#[command(name = "altaz-runtime", version, about)]
pub struct Args {
    /// Serial port to open at startup (e.g. /dev/rfcomm0)
    #[arg(long)]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    pub baud: u32,

    /// Observer latitude, degrees (north positive)
    #[arg(long, default_value_t = DEFAULT_LATITUDE, allow_negative_numbers = true)]
    pub latitude: f64,

    /// Observer longitude, degrees (east positive)
    #[arg(long, default_value_t = DEFAULT_LONGITUDE, allow_negative_numbers = true)]
    pub longitude: f64,

    /// Observer elevation, metres
    #[arg(long, default_value_t = DEFAULT_ELEVATION_M, allow_negative_numbers = true)]
    pub elevation: f64,

    /// Initial target ("Moon", "jupiter_barycenter", ...)
    #[arg(long, default_value = "Sun")]
    pub body: Body,

    /// Air temperature for refraction, °C
    #[arg(long, default_value = DEFAULT_TEMPERATURE_C, allow_hyphen_values = true)]
    pub temperature: String,

    /// Air pressure for refraction, mbar
    #[arg(long, default_value = DEFAULT_PRESSURE_MBAR)]
    pub pressure: String,

    /// Compute positions without refraction
    #[arg(long)]
    pub no_refraction: bool,

    /// Tracking tick period, milliseconds
    #[arg(long, default_value_t = TRACK_INTERVAL_MS)]
    pub track_interval_ms: u64,

    /// Status publication period, milliseconds
    #[arg(long, default_value_t = STATUS_INTERVAL_MS)]
    pub status_interval_ms: u64,
}

impl Args {
    pub fn location(&self) -> Result<ObserverLocation, LocationError> {
        ObserverLocation::new(self.latitude, self.longitude, self.elevation)
    }

    /// Malformed temperature/pressure falls back to no refraction
    pub fn atmosphere(&self) -> Option<AtmosphericParams> {
        if self.no_refraction {
            return None;
        }
        AtmosphericParams::parse_or_none(&self.temperature, &self.pressure)
    }

    pub fn track_interval(&self) -> Duration {
        Duration::from_millis(self.track_interval_ms.max(1))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }
}
