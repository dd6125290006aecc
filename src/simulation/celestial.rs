//! Per-tick celestial sight attempts for celestial-navigation vessels:
//! cloud obscuration, Sun sights, twilight star sights and the optional
//! wave-motion perturbation of the measured coordinates.

use rand::rngs::StdRng;
use rand::Rng;

use crate::env::{Environment, HorizontalCoord, CELESTIAL_OBJ_POLARIS, CELESTIAL_OBJ_SUN};
use crate::geo::{wrap_bearing, GeoPos};

/// How many random stars to try before giving up on a twilight sight.
const STAR_ATTEMPTS: u32 = 20;

/// One successful sight: which object, and where it appeared.
#[derive(Debug, Clone, Copy)]
pub struct Sight {
    pub object: i32,
    pub coord: HorizontalCoord,
}

/// Attempts a sight at `now` from `pos`. Returns `None` when clouds obscure
/// the sky, the light is wrong for both Sun and stars, or the provider
/// cannot resolve an object.
pub fn shoot(
    env: &dyn Environment,
    rng: &mut StdRng,
    now: i64,
    pos: &GeoPos,
    cloud_percent: f64,
    air_pressure: f64,
    air_temp: f64,
) -> Option<Sight> {
    if is_obscured_by_cloud(rng, cloud_percent) {
        return None;
    }

    let sun = env.celestial_horizontal(now, pos, CELESTIAL_OBJ_SUN, air_pressure, air_temp)?;

    if sun.alt > 0.0 {
        // Sun is up.
        return Some(Sight { object: CELESTIAL_OBJ_SUN, coord: sun });
    } else if sun.alt < -12.0 {
        // Too dark to see the horizon.
        return None;
    } else if sun.alt > -6.0 {
        // Sun is down but it's still too bright for stars.
        return None;
    }

    // Nautical twilight: shoot a randomly chosen star.
    for _ in 0..STAR_ATTEMPTS {
        let star = rng.gen_range(1..=CELESTIAL_OBJ_POLARIS);

        let coord = env.celestial_horizontal(now, pos, star, air_pressure, air_temp)?;
        if coord.alt < 0.0 {
            // Below the horizon; try another.
            continue;
        }

        return Some(Sight { object: star, coord });
    }

    None
}

/// Randomly perturbs a sight for the vessel's wave motion: each coordinate
/// gets its own double uniform draw scaled by wave height over the hull's
/// wave resistance. Returns `None` when the perturbed altitude dips below
/// the horizon.
pub fn wave_adjusted(
    sight: Sight,
    rng: &mut StdRng,
    wave_height: f64,
    wave_resistance: f64,
) -> Option<Sight> {
    let scale = wave_height / wave_resistance;

    let az_u1: f64 = rng.gen_range(-1.0..=1.0);
    let az_u2: f64 = rng.gen_range(-1.0..=1.0);
    let alt_u1: f64 = rng.gen_range(-1.0..=1.0);
    let alt_u2: f64 = rng.gen_range(-1.0..=1.0);

    let mut az = sight.coord.az + 100.0 * az_u1 * az_u2 * scale;
    let mut alt = sight.coord.alt + 1.666667 * alt_u1 * alt_u2 * scale;

    az = wrap_bearing(az);

    if alt > 90.0 {
        alt = 180.0 - alt;
    }
    if alt < 0.0 {
        return None;
    }

    Some(Sight { object: sight.object, coord: HorizontalCoord { az, alt } })
}

fn is_obscured_by_cloud(rng: &mut StdRng, cloud_percent: f64) -> bool {
    let adjusted = (cloud_percent * 100.0).sqrt() as i64;
    rng.gen_range(1..=100) <= adjusted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StaticEnvironment;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn clear_daytime_sky_always_sights_the_sun() {
        let env = StaticEnvironment::calm().with_sun(120.0, 35.0);
        let pos = GeoPos::new(40.0, -30.0);
        let mut r = rng();

        for _ in 0..50 {
            let sight = shoot(&env, &mut r, 0, &pos, 0.0, 1013.0, 15.0).unwrap();
            assert_eq!(sight.object, CELESTIAL_OBJ_SUN);
            assert_eq!(sight.coord.az, 120.0);
            assert_eq!(sight.coord.alt, 35.0);
        }
    }

    #[test]
    fn overcast_sky_blocks_every_sight() {
        // Full cover: adjusted = sqrt(100 * 100) = 100, obscured always.
        let env = StaticEnvironment::calm().with_sun(120.0, 35.0).with_cloud(100.0);
        let pos = GeoPos::new(40.0, -30.0);
        let mut r = rng();

        for _ in 0..50 {
            assert!(shoot(&env, &mut r, 0, &pos, 100.0, 1013.0, 15.0).is_none());
        }
    }

    #[test]
    fn deep_night_gives_no_sight() {
        let env = StaticEnvironment::calm().with_sun(0.0, -30.0);
        let pos = GeoPos::new(40.0, -30.0);
        assert!(shoot(&env, &mut rng(), 0, &pos, 0.0, 1013.0, 15.0).is_none());
    }

    #[test]
    fn civil_twilight_is_too_bright_for_stars() {
        let env = StaticEnvironment::calm().with_sun(0.0, -4.0);
        let pos = GeoPos::new(40.0, -30.0);
        assert!(shoot(&env, &mut rng(), 0, &pos, 0.0, 1013.0, 15.0).is_none());
    }

    #[test]
    fn nautical_twilight_shoots_a_star() {
        let env = StaticEnvironment::calm().with_sun(0.0, -9.0);
        let pos = GeoPos::new(40.0, -30.0);

        let sight = shoot(&env, &mut rng(), 0, &pos, 0.0, 1013.0, 15.0).unwrap();
        assert!(sight.object >= 1 && sight.object <= CELESTIAL_OBJ_POLARIS);
        assert!(sight.coord.alt >= 0.0);
    }

    #[test]
    fn calm_seas_leave_the_sight_untouched() {
        let sight =
            Sight { object: CELESTIAL_OBJ_SUN, coord: HorizontalCoord { az: 100.0, alt: 40.0 } };
        let adjusted = wave_adjusted(sight, &mut rng(), 0.0, 75.0).unwrap();
        assert_eq!(adjusted.coord.az, 100.0);
        assert_eq!(adjusted.coord.alt, 40.0);
    }

    #[test]
    fn wave_perturbation_keeps_coordinates_in_range() {
        let mut r = rng();
        for _ in 0..200 {
            let sight =
                Sight { object: CELESTIAL_OBJ_SUN, coord: HorizontalCoord { az: 359.0, alt: 1.0 } };
            if let Some(adjusted) = wave_adjusted(sight, &mut r, 8.0, 75.0) {
                assert!((0.0..360.0).contains(&adjusted.coord.az));
                assert!((0.0..=90.0).contains(&adjusted.coord.alt));
            }
        }
    }
}
