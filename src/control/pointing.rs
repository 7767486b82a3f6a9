// One-shot GOTO planning
//
// The mount is never asked to turn more than 180° in azimuth: the command
// carries `mount.az + delta`, which may leave [0, 360) so the firmware
// keeps counting in the same direction instead of snapping through north.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Site, TargetSpec};
use crate::astro::{ApparentPosition, Ephemeris, EphemerisError};
use crate::link::TextCommand;

/// Targets below this altitude are refused. Slightly negative because
/// refraction correction may be disabled.
pub const HORIZON_LIMIT_DEG: f64 = -0.5;

/// Last commanded mount position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MountState {
    pub azimuth_deg: f64,
    pub altitude_deg: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PointingError {
    #[error("target is below the horizon (altitude {altitude:.2}°)")]
    BelowHorizon { altitude: f64 },

    #[error("no position available: {0}")]
    Ephemeris(#[from] EphemerisError),
}

/// A GOTO ready to be sent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GotoPlan {
    /// Where the target actually is (azimuth in [0, 360))
    pub apparent: ApparentPosition,
    /// Commanded azimuth, unwrapped relative to the mount
    pub azimuth_deg: f64,
    pub altitude_deg: f64,
}

impl GotoPlan {
    pub fn command(&self) -> TextCommand {
        TextCommand::Goto {
            azimuth_deg: self.azimuth_deg,
            altitude_deg: self.altitude_deg,
        }
    }

    /// Record the plan as commanded.
    ///
    /// The state keeps the wrapped apparent azimuth, not the unwrapped
    /// command, so the next delta is always taken against the true position.
    pub fn commit(&self, mount: &mut MountState) {
        mount.azimuth_deg = self.apparent.azimuth_deg;
        mount.altitude_deg = self.apparent.altitude_deg;
    }
}

/// Signed azimuth change in [-180, 180] taking the mount to the target
pub fn shortest_delta_az(target_az: f64, mount_az: f64) -> f64 {
    (target_az - mount_az + 180.0).rem_euclid(360.0) - 180.0
}

/// Plan a GOTO toward an already-known apparent position
pub fn plan_goto(
    apparent: ApparentPosition,
    mount: &MountState,
) -> Result<GotoPlan, PointingError> {
    if apparent.altitude_deg < HORIZON_LIMIT_DEG {
        return Err(PointingError::BelowHorizon {
            altitude: apparent.altitude_deg,
        });
    }

    let delta = shortest_delta_az(apparent.azimuth_deg, mount.azimuth_deg);
    debug!(
        "GOTO delta az {:+.2}° from mount az {:.2}°",
        delta, mount.azimuth_deg
    );

    Ok(GotoPlan {
        apparent,
        azimuth_deg: mount.azimuth_deg + delta,
        altitude_deg: apparent.altitude_deg,
    })
}

/// Query the ephemeris and plan a GOTO. Leaves `mount` untouched.
pub fn compute_goto(
    ephemeris: &dyn Ephemeris,
    target: &TargetSpec,
    site: &Site,
    mount: &MountState,
    now: DateTime<Utc>,
) -> Result<GotoPlan, PointingError> {
    let apparent = site.observe(ephemeris, target, now)?;
    let plan = plan_goto(apparent, mount)?;
    info!(
        "{} at az {:.2}° alt {:.2}°, commanding az {:.2}°",
        target.body, apparent.azimuth_deg, apparent.altitude_deg, plan.azimuth_deg
    );
    Ok(plan)
}
