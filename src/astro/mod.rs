// Ephemeris adapter for the alt-az mount
//
// Provides:
// - Observer location and atmospheric parameters (with lenient parsing)
// - The `Ephemeris` trait the control core consumes
// - A built-in low-precision analytic ephemeris for the supported bodies

mod ephemeris;
pub mod refraction;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub use ephemeris::AnalyticEphemeris;

/// Bodies the mount can be pointed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    Sun,
    Moon,
    Mercury,
    Venus,
    Mars,
    JupiterBarycenter,
    SaturnBarycenter,
}

impl Body {
    pub const ALL: [Body; 7] = [
        Body::Sun,
        Body::Moon,
        Body::Mercury,
        Body::Venus,
        Body::Mars,
        Body::JupiterBarycenter,
        Body::SaturnBarycenter,
    ];

    /// Human-readable name, as shown to the operator
    pub fn display_name(&self) -> &'static str {
        match self {
            Body::Sun => "Sun",
            Body::Moon => "Moon",
            Body::Mercury => "Mercury",
            Body::Venus => "Venus",
            Body::Mars => "Mars",
            Body::JupiterBarycenter => "Jupiter Barycenter",
            Body::SaturnBarycenter => "Saturn Barycenter",
        }
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Body {
    type Err = EphemerisError;

    /// Accepts display names ("Jupiter Barycenter") and identifiers ("jupiter_barycenter")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        Body::ALL
            .into_iter()
            .find(|body| {
                let name: String = body
                    .display_name()
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .flat_map(char::to_lowercase)
                    .collect();
                name == normalized
            })
            .ok_or_else(|| EphemerisError::UnknownBody(s.to_string()))
    }
}

/// Errors raised while resolving an apparent position
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EphemerisError {
    #[error("instant {0} is outside the supported ephemeris range")]
    UnsupportedInstant(DateTime<Utc>),

    #[error("unknown body: {0}")]
    UnknownBody(String),
}

/// Errors raised when building an observer location
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("location contains a non-finite value")]
    NonFinite,
}

/// Geodetic position of the observer
///
/// Only constructible through `new`, which enforces coordinate ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObserverLocation {
    latitude_deg: f64,
    longitude_deg: f64,
    elevation_m: f64,
}

impl ObserverLocation {
    pub fn new(
        latitude_deg: f64,
        longitude_deg: f64,
        elevation_m: f64,
    ) -> Result<Self, LocationError> {
        if !(latitude_deg.is_finite() && longitude_deg.is_finite() && elevation_m.is_finite()) {
            return Err(LocationError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&latitude_deg) {
            return Err(LocationError::LatitudeOutOfRange(latitude_deg));
        }
        if !(-180.0..=180.0).contains(&longitude_deg) {
            return Err(LocationError::LongitudeOutOfRange(longitude_deg));
        }
        Ok(Self {
            latitude_deg,
            longitude_deg,
            elevation_m,
        })
    }

    pub fn latitude_deg(&self) -> f64 {
        self.latitude_deg
    }

    pub fn longitude_deg(&self) -> f64 {
        self.longitude_deg
    }

    pub fn elevation_m(&self) -> f64 {
        self.elevation_m
    }

    /// Earth-fixed position in kilometres (WGS-84)
    pub fn position_ecef_km(&self) -> [f64; 3] {
        let a = 6378.137;
        let e2 = 0.006_694_379_990_14;
        let lat = self.latitude_deg.to_radians();
        let lon = self.longitude_deg.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let h = self.elevation_m / 1000.0;
        [
            (n + h) * cos_lat * cos_lon,
            (n + h) * cos_lat * sin_lon,
            (n * (1.0 - e2) + h) * sin_lat,
        ]
    }
}

/// Raised when operator-entered atmosphere text cannot be parsed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AtmosphereError {
    #[error("malformed atmosphere input (temperature={temperature:?}, pressure={pressure:?})")]
    Malformed { temperature: String, pressure: String },
}

/// Surface conditions used for refraction correction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtmosphericParams {
    pub temperature_c: f64,
    pub pressure_mbar: f64,
}

impl AtmosphericParams {
    /// Strict parse of operator-entered text
    pub fn parse(temperature: &str, pressure: &str) -> Result<Self, AtmosphereError> {
        let malformed = || AtmosphereError::Malformed {
            temperature: temperature.to_string(),
            pressure: pressure.to_string(),
        };
        let temperature_c: f64 = temperature.trim().parse().map_err(|_| malformed())?;
        let pressure_mbar: f64 = pressure.trim().parse().map_err(|_| malformed())?;
        let params = Self {
            temperature_c,
            pressure_mbar,
        };
        if !params.is_physical() {
            return Err(malformed());
        }
        Ok(params)
    }

    /// Finite, above -273 °C, non-negative pressure
    pub fn is_physical(&self) -> bool {
        self.temperature_c.is_finite()
            && self.pressure_mbar.is_finite()
            && self.temperature_c > -273.0
            && self.pressure_mbar >= 0.0
    }

    /// Lenient parse: malformed input degrades to "no refraction correction"
    pub fn parse_or_none(temperature: &str, pressure: &str) -> Option<Self> {
        match Self::parse(temperature, pressure) {
            Ok(params) => Some(params),
            Err(e) => {
                warn!("{}, computing positions without refraction", e);
                None
            }
        }
    }
}

/// Azimuth/altitude of a body as seen by the observer at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApparentPosition {
    /// Degrees east of north, in [0, 360)
    pub azimuth_deg: f64,
    /// Degrees above the horizon, in [-90, 90]
    pub altitude_deg: f64,
}

/// Source of apparent positions
///
/// Implementations must be deterministic for identical inputs.
pub trait Ephemeris {
    fn position_of(
        &self,
        body: Body,
        instant: DateTime<Utc>,
        location: &ObserverLocation,
        atmosphere: Option<&AtmosphericParams>,
    ) -> Result<ApparentPosition, EphemerisError>;
}
