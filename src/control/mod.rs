// Pointing and tracking control core
//
// Provides:
// - GOTO planning with horizon guard and shortest-path azimuth
// - Tracking velocity estimation from successive positions
// - The session context that owns all mutable control state

pub mod pointing;
mod session;
pub mod tracking;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::astro::{
    ApparentPosition, AtmosphericParams, Body, Ephemeris, EphemerisError, ObserverLocation,
};

pub use pointing::{GotoPlan, MountState, PointingError};
pub use session::{Session, SessionError};
pub use tracking::{TrackOutcome, TrackSample, TrackingEstimator};

/// Which instant positions are computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimeSelection {
    /// The wall clock at each tick
    #[default]
    Now,
    /// A fixed operator-supplied instant
    Manual { at: DateTime<Utc> },
}

impl TimeSelection {
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeSelection::Now => now,
            TimeSelection::Manual { at } => *at,
        }
    }
}

/// What to point at, and when
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub body: Body,
    pub time: TimeSelection,
}

impl TargetSpec {
    pub fn now(body: Body) -> Self {
        Self {
            body,
            time: TimeSelection::Now,
        }
    }
}

/// Observer geometry: where we are and what the air is doing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    pub location: ObserverLocation,
    pub atmosphere: Option<AtmosphericParams>,
}

impl Site {
    /// Apparent position of the target for the tick at `now`
    pub fn observe(
        &self,
        ephemeris: &dyn Ephemeris,
        target: &TargetSpec,
        now: DateTime<Utc>,
    ) -> Result<ApparentPosition, EphemerisError> {
        ephemeris.position_of(
            target.body,
            target.time.resolve(now),
            &self.location,
            self.atmosphere.as_ref(),
        )
    }
}
