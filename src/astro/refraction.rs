// Atmospheric refraction near the horizon
//
// Bennett-style formula scaled for surface pressure and temperature.
// Refraction is only applied between -1° and 89.9° of true altitude.

use super::AtmosphericParams;

const MIN_ALTITUDE_DEG: f64 = -1.0;
const MAX_ALTITUDE_DEG: f64 = 89.9;

/// Convergence tolerance when inverting the formula (degrees)
const TOLERANCE_DEG: f64 = 3.0e-5;
const MAX_ITERATIONS: usize = 10;

/// Refraction (degrees) for an observed altitude
pub fn refraction(altitude_deg: f64, params: &AtmosphericParams) -> f64 {
    if !(MIN_ALTITUDE_DEG..=MAX_ALTITUDE_DEG).contains(&altitude_deg) || !params.is_physical() {
        return 0.0;
    }
    let r = 0.016_667 / (altitude_deg + 7.31 / (altitude_deg + 4.4)).to_radians().tan();
    r * (0.28 * params.pressure_mbar / (params.temperature_c + 273.0))
}

/// Convert a true (geometric) altitude into the apparent altitude
pub fn refract(true_altitude_deg: f64, params: &AtmosphericParams) -> f64 {
    let mut apparent = true_altitude_deg;
    for _ in 0..MAX_ITERATIONS {
        let next = true_altitude_deg + refraction(apparent, params);
        let converged = (next - apparent).abs() < TOLERANCE_DEG;
        apparent = next;
        if converged {
            break;
        }
    }
    apparent
}
