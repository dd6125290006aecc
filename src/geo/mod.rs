//! Geodesy primitives shared by the physics, logging and server modules:
//! positions, true-bearing polar vectors, compass arithmetic and the
//! approximate "land visible nearby" sampler.

use crate::env::Environment;

/// Mean metres per degree of latitude (one nautical mile per minute).
pub const METRES_PER_GEO_DEG: f64 = 60.0 * 1852.0;

/// Earth radius consistent with `METRES_PER_GEO_DEG`.
const EARTH_RADIUS_M: f64 = METRES_PER_GEO_DEG * 180.0 / std::f64::consts::PI;

/// A geographic position in degrees.
///
/// Latitude stays in [-90, +90] and longitude in [-180, +180); both are
/// normalized on construction and after every advance step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPos {
    pub fn new(lat: f64, lon: f64) -> Self {
        let mut pos = GeoPos { lat, lon };
        pos.normalize();
        pos
    }

    fn normalize(&mut self) {
        self.lat = self.lat.clamp(-90.0, 90.0);
        self.lon = wrap_longitude(self.lon);
    }

    /// Advances this position by `v.mag` metres along the great circle with
    /// initial bearing `v.angle`.
    pub fn advance(&mut self, v: &GeoVec) {
        if v.mag == 0.0 {
            return;
        }

        let delta = v.mag.abs() / EARTH_RADIUS_M;
        let bearing = if v.mag < 0.0 { v.angle + 180.0 } else { v.angle }.to_radians();

        let lat1 = self.lat.to_radians();
        let lon1 = self.lon.to_radians();

        let lat2 =
            (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * bearing.cos()).asin();
        let lon2 = lon1
            + (bearing.sin() * delta.sin() * lat1.cos())
                .atan2(delta.cos() - lat1.sin() * lat2.sin());

        self.lat = lat2.to_degrees();
        self.lon = lon2.to_degrees();
        self.normalize();
    }
}

/// A polar vector: true compass bearing in degrees and magnitude in m/s
/// (or metres, when used as a displacement).
///
/// Construction normalizes to `mag >= 0` by reflecting the bearing, and
/// wraps the bearing into [0, 360).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoVec {
    pub angle: f64,
    pub mag: f64,
}

impl GeoVec {
    pub fn new(angle: f64, mag: f64) -> Self {
        let (angle, mag) = if mag < 0.0 {
            (wrap_bearing(angle + 180.0), -mag)
        } else {
            (wrap_bearing(angle), mag)
        };
        GeoVec { angle, mag }
    }

    pub fn zero() -> Self {
        GeoVec { angle: 0.0, mag: 0.0 }
    }

    /// North/east velocity components. A negative stored magnitude points
    /// the components backwards, which is what the vector sum needs.
    fn components(&self) -> (f64, f64) {
        let a = self.angle.to_radians();
        (self.mag * a.cos(), self.mag * a.sin())
    }

    /// Componentwise vector sum; the result always has a non-negative
    /// magnitude and a bearing in [0, 360).
    pub fn add(&mut self, other: &GeoVec) {
        let (n1, e1) = self.components();
        let (n2, e2) = other.components();
        let n = n1 + n2;
        let e = e1 + e2;

        self.mag = (n * n + e * e).sqrt();
        self.angle = if self.mag > 0.0 {
            wrap_bearing(e.atan2(n).to_degrees())
        } else {
            0.0
        };
    }

    /// The same vector with a guaranteed non-negative magnitude.
    pub fn normalized(&self) -> GeoVec {
        GeoVec::new(self.angle, self.mag)
    }
}

/// Signed difference from bearing `from` to bearing `to`, in (-180, +180].
/// Positive means `to` lies clockwise of `from`.
pub fn compass_diff(from: f64, to: f64) -> f64 {
    let mut d = (to - from) % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d <= -180.0 {
        d += 360.0;
    }
    d
}

/// Wraps a bearing into [0, 360).
pub fn wrap_bearing(angle: f64) -> f64 {
    let a = angle % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    let mut l = lon;
    while l >= 180.0 {
        l -= 360.0;
    }
    while l < -180.0 {
        l += 360.0;
    }
    l
}

// Land-visibility sampling: concentric approximate circles out to the
// visibility limit, with the sample count doubling as the radius grows.
const MIN_SAMPLE_RADIUS_M: f64 = 30.0;
const MAX_SAMPLE_RADIUS_M: f64 = 31_000.0;
const MAX_SAMPLE_POINTS_ON_CIRCLE: u32 = 32;

/// Whether land is visible within `visibility` metres of `pos`, determined
/// by sampling rings of points rather than exact coastline geometry.
///
/// A position already on land short-circuits to `true`.
pub fn is_approximately_near_visible_land(
    env: &dyn Environment,
    pos: &GeoPos,
    visibility: f64,
) -> bool {
    if !env.is_water(pos) {
        return true;
    }

    let mut n = 4;
    let mut r = MIN_SAMPLE_RADIUS_M;
    while r <= visibility && r <= MAX_SAMPLE_RADIUS_M {
        if is_land_found_on_circle(env, pos, r, n) {
            return true;
        }

        if n < MAX_SAMPLE_POINTS_ON_CIRCLE {
            n *= 2;
        }
        r *= 2.0;
    }

    if visibility > MIN_SAMPLE_RADIUS_M {
        // One last ring at the outer limit of visibility.
        if is_land_found_on_circle(env, pos, visibility, n) {
            return true;
        }
    }

    false
}

/// Looks around at `n` roughly uniform points on an approximate circle of
/// radius `r` metres. An equirectangular approximation is accurate enough
/// here and much cheaper than proper small-circle geometry.
fn is_land_found_on_circle(env: &dyn Environment, pos: &GeoPos, r: f64, n: u32) -> bool {
    let cos_lat = pos.lat.to_radians().cos();
    let r_deg = r / METRES_PER_GEO_DEG;
    let r_deg_lon = r / (METRES_PER_GEO_DEG * cos_lat);
    let rads_per_point = 2.0 * std::f64::consts::PI / f64::from(n);

    for i in 0..n {
        let theta = f64::from(i) * rads_per_point;

        let mut lat = pos.lat + r_deg * theta.cos();
        let mut lon = pos.lon + r_deg_lon * theta.sin();

        lat = lat.clamp(-90.0, 90.0);

        let mut lon_wrapped = false;
        if lon >= 180.0 {
            lon -= 360.0;
            lon_wrapped = true;
        } else if lon < -180.0 {
            lon += 360.0;
            lon_wrapped = true;
        }

        if lon_wrapped && !(-180.0..180.0).contains(&lon) {
            // Very near a pole the computed longitude can be arbitrarily far
            // out of range. Deliberately coarse fallback: the high Arctic is
            // open water, the far south is the Antarctic land mass.
            return pos.lat < 0.0;
        }

        let sample = GeoPos { lat, lon };
        if !env.is_water(&sample) {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StaticEnvironment;

    #[test]
    fn compass_diff_stays_in_half_open_range() {
        assert_eq!(compass_diff(0.0, 90.0), 90.0);
        assert_eq!(compass_diff(90.0, 0.0), -90.0);
        assert_eq!(compass_diff(350.0, 10.0), 20.0);
        assert_eq!(compass_diff(10.0, 350.0), -20.0);
        assert_eq!(compass_diff(0.0, 180.0), 180.0);
        assert_eq!(compass_diff(180.0, 0.0), 180.0);
    }

    #[test]
    fn geovec_new_reflects_negative_magnitude() {
        let v = GeoVec::new(45.0, -2.0);
        assert_eq!(v.mag, 2.0);
        assert_eq!(v.angle, 225.0);
    }

    #[test]
    fn geovec_add_of_opposing_vectors_cancels() {
        let mut v = GeoVec::new(0.0, 3.0);
        v.add(&GeoVec::new(180.0, 3.0));
        assert!(v.mag < 1e-9);
    }

    #[test]
    fn geovec_add_perpendicular() {
        let mut v = GeoVec::new(0.0, 3.0);
        v.add(&GeoVec::new(90.0, 4.0));
        assert!((v.mag - 5.0).abs() < 1e-9);
        assert!((v.angle - 53.130_102_354).abs() < 1e-6);
    }

    #[test]
    fn advance_north_increases_latitude() {
        let mut pos = GeoPos::new(10.0, 20.0);
        pos.advance(&GeoVec::new(0.0, METRES_PER_GEO_DEG));
        assert!((pos.lat - 11.0).abs() < 1e-6);
        assert!((pos.lon - 20.0).abs() < 1e-6);
    }

    #[test]
    fn advance_with_negative_magnitude_moves_backwards() {
        let mut pos = GeoPos::new(0.0, 0.0);
        pos.advance(&GeoVec { angle: 0.0, mag: -METRES_PER_GEO_DEG });
        assert!((pos.lat + 1.0).abs() < 1e-6);
    }

    #[test]
    fn position_normalizes_longitude() {
        let pos = GeoPos::new(0.0, 185.0);
        assert_eq!(pos.lon, -175.0);
        let pos = GeoPos::new(0.0, -181.0);
        assert_eq!(pos.lon, 179.0);
    }

    #[test]
    fn open_water_sees_no_land() {
        let env = StaticEnvironment::calm();
        let pos = GeoPos::new(0.0, -30.0);
        assert!(!is_approximately_near_visible_land(&env, &pos, 20_000.0));
    }

    #[test]
    fn on_land_short_circuits() {
        let env = StaticEnvironment::calm().with_land_everywhere();
        let pos = GeoPos::new(0.0, -30.0);
        assert!(is_approximately_near_visible_land(&env, &pos, 10.0));
    }

    #[test]
    fn small_visibility_checks_no_ring_beyond_start() {
        // Visibility below the minimum ring radius: only the centre point
        // decides the outcome.
        let env = StaticEnvironment::calm();
        let pos = GeoPos::new(45.0, 45.0);
        assert!(!is_approximately_near_visible_land(&env, &pos, 10.0));
    }
}
