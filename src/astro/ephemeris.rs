// Low-precision analytic ephemeris
//
// Planets and the Earth-Moon barycenter use Keplerian mean elements
// (valid 1800-2050, arcminute-level accuracy). The Moon uses a truncated
// lunar theory. Positions are made topocentric against a WGS-84 observer,
// which matters for the Moon (parallax up to ~1°).

use chrono::{DateTime, Datelike, Utc};

use super::refraction::refract;
use super::{ApparentPosition, AtmosphericParams, Body, Ephemeris, EphemerisError, ObserverLocation};

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const DAYS_PER_CENTURY: f64 = 36_525.0;
const TT_MINUS_UTC_S: f64 = 69.184;

const AU_KM: f64 = 149_597_870.7;
const LIGHT_AU_PER_DAY: f64 = 173.144_6;

/// General precession in ecliptic longitude, degrees per Julian century
const PRECESSION_DEG_PER_CENTURY: f64 = 1.396_971;

/// Supported span, matching the reference ephemeris file
const FIRST_YEAR: i32 = 1900;
const LAST_YEAR: i32 = 2050;

/// Mean orbital elements: (value at J2000, rate per century)
struct Elements {
    a: (f64, f64),
    e: (f64, f64),
    i: (f64, f64),
    mean_longitude: (f64, f64),
    perihelion: (f64, f64),
    node: (f64, f64),
}

const MERCURY: Elements = Elements {
    a: (0.387_099_27, 0.000_000_37),
    e: (0.205_635_93, 0.000_019_06),
    i: (7.004_979_02, -0.005_947_49),
    mean_longitude: (252.250_323_50, 149_472.674_111_75),
    perihelion: (77.457_796_28, 0.160_476_89),
    node: (48.330_765_93, -0.125_340_81),
};

const VENUS: Elements = Elements {
    a: (0.723_335_66, 0.000_003_90),
    e: (0.006_776_72, -0.000_041_07),
    i: (3.394_676_05, -0.000_788_90),
    mean_longitude: (181.979_099_50, 58_517.815_387_29),
    perihelion: (131.602_467_18, 0.002_683_29),
    node: (76.679_842_55, -0.277_694_18),
};

const EARTH_MOON: Elements = Elements {
    a: (1.000_002_61, 0.000_005_62),
    e: (0.016_711_23, -0.000_043_92),
    i: (-0.000_015_31, -0.012_946_68),
    mean_longitude: (100.464_571_66, 35_999.372_449_81),
    perihelion: (102.937_681_93, 0.323_273_64),
    node: (0.0, 0.0),
};

const MARS: Elements = Elements {
    a: (1.523_710_34, 0.000_018_47),
    e: (0.093_394_10, 0.000_078_82),
    i: (1.849_691_42, -0.008_131_31),
    mean_longitude: (-4.553_432_05, 19_140.302_684_99),
    perihelion: (-23.943_629_59, 0.444_410_88),
    node: (49.559_538_91, -0.292_573_43),
};

const JUPITER: Elements = Elements {
    a: (5.202_887_00, -0.000_116_07),
    e: (0.048_386_24, -0.000_132_53),
    i: (1.304_396_95, -0.001_837_14),
    mean_longitude: (34.396_440_51, 3_034.746_127_75),
    perihelion: (14.728_479_83, 0.212_526_68),
    node: (100.473_909_09, 0.204_691_06),
};

const SATURN: Elements = Elements {
    a: (9.536_675_94, -0.001_250_60),
    e: (0.053_861_79, -0.000_509_91),
    i: (2.485_991_87, 0.001_936_09),
    mean_longitude: (49.954_244_23, 1_221.551_475_33),
    perihelion: (92.598_878_31, -0.418_972_16),
    node: (113.662_424_48, -0.288_677_94),
};

/// Built-in ephemeris, no data files required
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticEphemeris;

impl AnalyticEphemeris {
    pub fn new() -> Self {
        Self
    }
}

impl Ephemeris for AnalyticEphemeris {
    fn position_of(
        &self,
        body: Body,
        instant: DateTime<Utc>,
        location: &ObserverLocation,
        atmosphere: Option<&AtmosphericParams>,
    ) -> Result<ApparentPosition, EphemerisError> {
        if !(FIRST_YEAR..=LAST_YEAR).contains(&instant.year()) {
            return Err(EphemerisError::UnsupportedInstant(instant));
        }

        let jd_ut = instant.timestamp_millis() as f64 / 86_400_000.0 + UNIX_EPOCH_JD;
        let t = (jd_ut + TT_MINUS_UTC_S / 86_400.0 - J2000) / DAYS_PER_CENTURY;

        let ecliptic_km = geocentric_ecliptic_km(body, t);
        let equatorial_km = ecliptic_to_equatorial(ecliptic_km, mean_obliquity_deg(t).to_radians());
        let earth_fixed_km = rotate_z(equatorial_km, gmst_deg(jd_ut).to_radians());

        let station = location.position_ecef_km();
        let dr = [
            earth_fixed_km[0] - station[0],
            earth_fixed_km[1] - station[1],
            earth_fixed_km[2] - station[2],
        ];
        let range_km = (dr[0] * dr[0] + dr[1] * dr[1] + dr[2] * dr[2]).sqrt();

        let (east, north, up) = ecef_to_enu(
            dr,
            location.latitude_deg().to_radians(),
            location.longitude_deg().to_radians(),
        );

        let mut azimuth = east.atan2(north).to_degrees().rem_euclid(360.0);
        if azimuth >= 360.0 {
            azimuth = 0.0;
        }
        let mut altitude = (up / range_km).clamp(-1.0, 1.0).asin().to_degrees();
        if let Some(params) = atmosphere {
            altitude = refract(altitude, params).clamp(-90.0, 90.0);
        }

        Ok(ApparentPosition {
            azimuth_deg: azimuth,
            altitude_deg: altitude,
        })
    }
}

/// Geocentric position in the mean ecliptic of date, kilometres
fn geocentric_ecliptic_km(body: Body, t: f64) -> [f64; 3] {
    let planet = match body {
        Body::Moon => return moon_ecliptic_km(t),
        Body::Sun => None,
        Body::Mercury => Some(&MERCURY),
        Body::Venus => Some(&VENUS),
        Body::Mars => Some(&MARS),
        Body::JupiterBarycenter => Some(&JUPITER),
        Body::SaturnBarycenter => Some(&SATURN),
    };

    let earth = heliocentric_au(&EARTH_MOON, t);
    let j2000_au = match planet {
        None => scale(earth, -1.0),
        Some(elements) => {
            // One light-time iteration is enough at this accuracy
            let distance = norm(sub(heliocentric_au(elements, t), earth));
            let light_time = distance / LIGHT_AU_PER_DAY / DAYS_PER_CENTURY;
            sub(heliocentric_au(elements, t - light_time), earth)
        }
    };

    let of_date = rotate_z(j2000_au, -(PRECESSION_DEG_PER_CENTURY * t).to_radians());
    scale(of_date, AU_KM)
}

/// Heliocentric J2000 ecliptic position from mean elements, AU
fn heliocentric_au(el: &Elements, t: f64) -> [f64; 3] {
    let at = |(base, rate): (f64, f64)| base + rate * t;

    let a = at(el.a);
    let e = at(el.e);
    let i = at(el.i).to_radians();
    let node = at(el.node);
    let perihelion = at(el.perihelion);
    let mean_anomaly =
        ((at(el.mean_longitude) - perihelion + 180.0).rem_euclid(360.0) - 180.0).to_radians();
    let arg_perihelion = (perihelion - node).to_radians();
    let node = node.to_radians();

    let ecc_anomaly = solve_kepler(mean_anomaly, e);
    let xp = a * (ecc_anomaly.cos() - e);
    let yp = a * (1.0 - e * e).sqrt() * ecc_anomaly.sin();

    let (sin_w, cos_w) = arg_perihelion.sin_cos();
    let (sin_o, cos_o) = node.sin_cos();
    let (sin_i, cos_i) = i.sin_cos();

    [
        (cos_w * cos_o - sin_w * sin_o * cos_i) * xp
            + (-sin_w * cos_o - cos_w * sin_o * cos_i) * yp,
        (cos_w * sin_o + sin_w * cos_o * cos_i) * xp
            + (-sin_w * sin_o + cos_w * cos_o * cos_i) * yp,
        (sin_w * sin_i) * xp + (cos_w * sin_i) * yp,
    ]
}

/// Newton iteration on Kepler's equation, radians
fn solve_kepler(mean_anomaly: f64, e: f64) -> f64 {
    let mut ecc_anomaly = mean_anomaly + e * mean_anomaly.sin();
    for _ in 0..30 {
        let delta = (mean_anomaly - (ecc_anomaly - e * ecc_anomaly.sin()))
            / (1.0 - e * ecc_anomaly.cos());
        ecc_anomaly += delta;
        if delta.abs() < 1e-12 {
            break;
        }
    }
    ecc_anomaly
}

/// Truncated lunar theory: main periodic terms in longitude, latitude and distance
fn moon_ecliptic_km(t: f64) -> [f64; 3] {
    let mean_longitude = 218.316_447_7 + 481_267.881_234_21 * t;
    let d = 297.850_192_1 + 445_267.111_403_4 * t;
    let m = 357.529_109_2 + 35_999.050_290_9 * t;
    let mp = 134.963_396_4 + 477_198.867_505_5 * t;
    let f = 93.272_095_0 + 483_202.017_523_3 * t;

    let s = |deg: f64| deg.to_radians().sin();
    let c = |deg: f64| deg.to_radians().cos();

    let longitude = mean_longitude
        + 6.288_774 * s(mp)
        + 1.274_027 * s(2.0 * d - mp)
        + 0.658_314 * s(2.0 * d)
        + 0.213_618 * s(2.0 * mp)
        - 0.185_116 * s(m)
        - 0.114_332 * s(2.0 * f)
        + 0.058_793 * s(2.0 * d - 2.0 * mp)
        + 0.057_066 * s(2.0 * d - m - mp)
        + 0.053_322 * s(2.0 * d + mp)
        + 0.045_758 * s(2.0 * d - m)
        - 0.040_923 * s(m - mp)
        - 0.034_720 * s(d)
        - 0.030_383 * s(m + mp);

    let latitude = 5.128_122 * s(f)
        + 0.280_602 * s(mp + f)
        + 0.277_693 * s(mp - f)
        + 0.173_237 * s(2.0 * d - f)
        + 0.055_413 * s(2.0 * d - mp + f)
        + 0.046_271 * s(2.0 * d - mp - f);

    let distance = 385_000.56
        - 20_905.355 * c(mp)
        - 3_699.111 * c(2.0 * d - mp)
        - 2_955.968 * c(2.0 * d)
        - 569.925 * c(2.0 * mp);

    [
        distance * c(latitude) * c(longitude),
        distance * c(latitude) * s(longitude),
        distance * s(latitude),
    ]
}

fn mean_obliquity_deg(t: f64) -> f64 {
    23.439_291 - 0.013_004_2 * t
}

/// Greenwich mean sidereal time, degrees
fn gmst_deg(jd_ut: f64) -> f64 {
    (280.460_618_37 + 360.985_647_366_29 * (jd_ut - J2000)).rem_euclid(360.0)
}

fn ecliptic_to_equatorial(v: [f64; 3], obliquity_rad: f64) -> [f64; 3] {
    let (sin_e, cos_e) = obliquity_rad.sin_cos();
    [v[0], v[1] * cos_e - v[2] * sin_e, v[1] * sin_e + v[2] * cos_e]
}

/// Frame rotation about +z by `angle` (coordinates expressed in the rotated frame)
fn rotate_z(v: [f64; 3], angle_rad: f64) -> [f64; 3] {
    let (sin_a, cos_a) = angle_rad.sin_cos();
    [v[0] * cos_a + v[1] * sin_a, -v[0] * sin_a + v[1] * cos_a, v[2]]
}

fn ecef_to_enu(dr: [f64; 3], lat_rad: f64, lon_rad: f64) -> (f64, f64, f64) {
    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    let (sin_lon, cos_lon) = lon_rad.sin_cos();

    let east = -sin_lon * dr[0] + cos_lon * dr[1];
    let north = -sin_lat * cos_lon * dr[0] - sin_lat * sin_lon * dr[1] + cos_lat * dr[2];
    let up = cos_lat * cos_lon * dr[0] + cos_lat * sin_lon * dr[1] + sin_lat * dr[2];
    (east, north, up)
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(v: [f64; 3], k: f64) -> [f64; 3] {
    [v[0] * k, v[1] * k, v[2] * k]
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn origin() -> ObserverLocation {
        ObserverLocation::new(0.0, 0.0, 0.0).unwrap()
    }

    fn position(body: Body, instant: DateTime<Utc>, loc: &ObserverLocation) -> ApparentPosition {
        AnalyticEphemeris::new()
            .position_of(body, instant, loc, None)
            .unwrap()
    }

    /// Angular distance between two az/alt directions, degrees
    fn separation(a: ApparentPosition, b: ApparentPosition) -> f64 {
        let unit = |p: ApparentPosition| {
            let (az, alt) = (p.azimuth_deg.to_radians(), p.altitude_deg.to_radians());
            [alt.cos() * az.cos(), alt.cos() * az.sin(), alt.sin()]
        };
        let (u, v) = (unit(a), unit(b));
        let dot = (u[0] * v[0] + u[1] * v[1] + u[2] * v[2]).clamp(-1.0, 1.0);
        dot.acos().to_degrees()
    }

    #[test]
    fn test_sun_near_zenith_at_equinox_noon() {
        let sun = position(Body::Sun, at(2024, 3, 20, 12, 0), &origin());
        assert!(sun.altitude_deg > 85.0, "sun altitude {}", sun.altitude_deg);

        let night = position(Body::Sun, at(2024, 3, 20, 0, 0), &origin());
        assert!(night.altitude_deg < -85.0, "sun altitude {}", night.altitude_deg);
    }

    #[test]
    fn test_jupiter_high_at_opposition_midnight() {
        let jupiter = position(Body::JupiterBarycenter, at(2023, 11, 3, 0, 0), &origin());
        assert!(jupiter.altitude_deg > 65.0, "jupiter altitude {}", jupiter.altitude_deg);
    }

    #[test]
    fn test_full_moon_opposite_the_sun() {
        let instant = at(2024, 1, 25, 17, 54);
        let moon = position(Body::Moon, instant, &origin());
        let sun = position(Body::Sun, instant, &origin());
        assert!(separation(moon, sun) > 170.0);
    }

    #[test]
    fn test_inner_planets_stay_close_to_the_sun() {
        let loc = ObserverLocation::new(-26.259963, -52.675883, 800.0).unwrap();
        for year in (2000..2050).step_by(3) {
            let instant = at(year, 5, 17, 3, 0);
            let sun = position(Body::Sun, instant, &loc);
            let mercury = position(Body::Mercury, instant, &loc);
            let venus = position(Body::Venus, instant, &loc);
            assert!(separation(mercury, sun) < 29.0, "mercury elongation in {}", year);
            assert!(separation(venus, sun) < 48.0, "venus elongation in {}", year);
        }
    }

    #[test]
    fn test_positions_within_domain() {
        let loc = ObserverLocation::new(45.0, 120.0, 100.0).unwrap();
        for body in Body::ALL {
            for hour in [0, 6, 12, 18] {
                let p = position(body, at(2026, 10, 19, hour, 0), &loc);
                assert!((0.0..360.0).contains(&p.azimuth_deg), "{} az {}", body, p.azimuth_deg);
                assert!(
                    (-90.0..=90.0).contains(&p.altitude_deg),
                    "{} alt {}",
                    body,
                    p.altitude_deg
                );
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let instant = at(2026, 1, 15, 23, 0);
        let loc = origin();
        assert_eq!(position(Body::Mars, instant, &loc), position(Body::Mars, instant, &loc));
    }

    #[test]
    fn test_refraction_raises_altitude() {
        let instant = at(2024, 3, 20, 6, 30);
        let loc = origin();
        let params = AtmosphericParams {
            temperature_c: 10.0,
            pressure_mbar: 1013.0,
        };
        let eph = AnalyticEphemeris::new();
        let plain = eph.position_of(Body::Sun, instant, &loc, None).unwrap();
        let refracted = eph.position_of(Body::Sun, instant, &loc, Some(&params)).unwrap();
        assert_eq!(plain.azimuth_deg, refracted.azimuth_deg);
        assert!(refracted.altitude_deg >= plain.altitude_deg);
    }

    #[test]
    fn test_instant_outside_range_rejected() {
        let err = AnalyticEphemeris::new()
            .position_of(Body::Sun, at(1850, 1, 1, 0, 0), &origin(), None)
            .unwrap_err();
        assert_eq!(err, EphemerisError::UnsupportedInstant(at(1850, 1, 1, 0, 0)));
    }
}
