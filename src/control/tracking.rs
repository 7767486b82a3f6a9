// Tracking velocity estimation
//
// Two states: Idle (no baseline) and Armed (one baseline sample).
// Each tick compares the fresh position against the baseline and derives
// an angular velocity in degrees/second. A velocity sample is only staged;
// it becomes the baseline once the caller has sent the frame (`commit`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::pointing::shortest_delta_az;
use super::{Site, TargetSpec};
use crate::astro::{ApparentPosition, Ephemeris, EphemerisError};
use crate::link::TrackVelocity;

/// Tracking pauses below this altitude
pub const TRACK_MIN_ALTITUDE_DEG: f64 = 1.0;

/// Velocities below this on both axes are treated as jitter (deg/s).
/// The Moon near transit moves ~0.008 deg/s, far above it.
pub const NOISE_THRESHOLD_DPS: f64 = 1e-4;

/// One observation kept as the velocity baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackSample {
    pub timestamp: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub altitude_deg: f64,
}

/// Result of one estimator tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackOutcome {
    /// Tracking is switched off; nothing was computed
    Disabled,
    /// First sample stored, no command yet
    Armed,
    /// Target too low; baseline kept so tracking resumes cleanly
    BelowHorizon { altitude: f64 },
    /// Tick not after the baseline (duplicate tick or clock jitter)
    ClockStall,
    /// Motion under threshold; baseline replaced, nothing sent
    Noise(TrackVelocity),
    /// Send this velocity, then `commit` to move the baseline
    Velocity(TrackVelocity),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
enum TrackState {
    #[default]
    Idle,
    Armed(TrackSample),
}

/// Derives tracking velocity from successive positions
#[derive(Debug, Clone, Default)]
pub struct TrackingEstimator {
    state: TrackState,
    staged: Option<TrackSample>,
}

impl TrackingEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the baseline (tracking turned off)
    pub fn reset(&mut self) {
        self.state = TrackState::Idle;
        self.staged = None;
    }

    /// Accept the sample behind the last `Velocity` outcome as the new baseline
    pub fn commit(&mut self) {
        if let Some(sample) = self.staged.take() {
            self.state = TrackState::Armed(sample);
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, TrackState::Armed(_))
    }

    pub fn baseline(&self) -> Option<&TrackSample> {
        match &self.state {
            TrackState::Idle => None,
            TrackState::Armed(sample) => Some(sample),
        }
    }

    /// Query the target position and advance the estimator
    pub fn step(
        &mut self,
        ephemeris: &dyn Ephemeris,
        target: &TargetSpec,
        site: &Site,
        now: DateTime<Utc>,
    ) -> Result<TrackOutcome, EphemerisError> {
        let position = site.observe(ephemeris, target, now)?;
        Ok(self.advance(now, position))
    }

    /// Advance with a position observed at `now`
    pub fn advance(&mut self, now: DateTime<Utc>, position: ApparentPosition) -> TrackOutcome {
        let sample = TrackSample {
            timestamp: now,
            azimuth_deg: position.azimuth_deg,
            altitude_deg: position.altitude_deg,
        };
        // A velocity that was never sent must not leak into this tick
        self.staged = None;

        let baseline = match self.state {
            TrackState::Idle => {
                debug!(
                    "Tracking armed at az {:.4}° alt {:.4}°",
                    sample.azimuth_deg, sample.altitude_deg
                );
                self.state = TrackState::Armed(sample);
                return TrackOutcome::Armed;
            }
            TrackState::Armed(baseline) => baseline,
        };

        if position.altitude_deg < TRACK_MIN_ALTITUDE_DEG {
            return TrackOutcome::BelowHorizon {
                altitude: position.altitude_deg,
            };
        }

        let dt = seconds_between(baseline.timestamp, now);
        if dt <= 0.0 {
            return TrackOutcome::ClockStall;
        }

        let velocity = TrackVelocity {
            azimuth_dps: shortest_delta_az(position.azimuth_deg, baseline.azimuth_deg) / dt,
            altitude_dps: (position.altitude_deg - baseline.altitude_deg) / dt,
        };

        let quiet = velocity.azimuth_dps.abs() < NOISE_THRESHOLD_DPS
            && velocity.altitude_dps.abs() < NOISE_THRESHOLD_DPS;
        if quiet {
            self.state = TrackState::Armed(sample);
            TrackOutcome::Noise(velocity)
        } else {
            self.staged = Some(sample);
            TrackOutcome::Velocity(velocity)
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let elapsed = to - from;
    match elapsed.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => elapsed.num_milliseconds() as f64 / 1e3,
    }
}
