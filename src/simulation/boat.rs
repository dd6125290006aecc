//! Per-vessel state and the one-second physics advance: course slewing,
//! wind-response speed, ocean/ice/wave/damage speed factors, leeway, land
//! detection and stop semantics.

use rand::rngs::StdRng;
use rand::Rng;

use crate::env::Environment;
use crate::geo::{compass_diff, wrap_bearing, GeoPos, GeoVec};
use crate::simulation::{hull, wind_response};

pub const KNOTS_IN_M_PER_S: f64 = 1.943844;

/// Latitude band around the poles where vessels are forcibly stopped.
const FORBIDDEN_LAT: f64 = 0.0001;

/// How far ahead to look for water when launching from land, in metres.
const MOVE_TO_WATER_DISTANCE: f64 = 100.0;

/// Fixed launch speed while a vessel crawls from land toward water, m/s.
const MOVE_TO_WATER_SPEED: f64 = 0.5;

/// Gust threshold below which damage gets repaired: 25 knots.
const DAMAGE_DEC_THRESH: f64 = 25.0 / KNOTS_IN_M_PER_S;
/// Gust threshold above which modeled basic hulls take damage: 45 knots.
const DAMAGE_INC_THRESH: f64 = 45.0 / KNOTS_IN_M_PER_S;

// 0.25% (of remaining damage headroom) per hour per knot squared above the
// threshold, and 0.25% repaired per hour per knot below it.
const DAMAGE_TAKE_FACTOR: f64 = 0.25 * KNOTS_IN_M_PER_S * KNOTS_IN_M_PER_S / 3600.0;
const DAMAGE_REPAIR_FACTOR: f64 = 0.25 * KNOTS_IN_M_PER_S / 3600.0;

/// Ticks of ocean-current damping applied after a vessel launches off land.
const STARTING_FROM_LAND_TICKS: u32 = 10;

pub const FLAG_TAKES_DAMAGE: u32 = 0x0001;
pub const FLAG_WAVE_SPEED_EFFECT: u32 = 0x0002;
pub const FLAG_CELESTIAL: u32 = 0x0004;
pub const FLAG_CELESTIAL_WAVE_EFFECT: u32 = 0x0008;
pub const FLAG_DAMAGE_APPARENT_WIND: u32 = 0x0010;
pub const FLAG_HIDDEN_IN_GROUP: u32 = 0x0020;

/// All defined boat flag bits.
pub const FLAGS_ALL: u32 = 0x003f;

/// Boat model families: ids 0..=7 are table-driven basic hulls, id 8 is the
/// force-balance advanced hull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoatType {
    SailNavSimClassic,
    Seascape18,
    Contessa25,
    Hanse385,
    Volvo70,
    SuperMaxiScallywag,
    Brigantine140,
    MaxiTrimaran,
    AdvancedCruiser,
}

/// Highest valid boat type id accepted from commands and init data.
pub const BOAT_TYPE_MAX_VALUE: i64 = 8;

impl BoatType {
    pub fn from_id(id: i64) -> Option<BoatType> {
        match id {
            0 => Some(BoatType::SailNavSimClassic),
            1 => Some(BoatType::Seascape18),
            2 => Some(BoatType::Contessa25),
            3 => Some(BoatType::Hanse385),
            4 => Some(BoatType::Volvo70),
            5 => Some(BoatType::SuperMaxiScallywag),
            6 => Some(BoatType::Brigantine140),
            7 => Some(BoatType::MaxiTrimaran),
            8 => Some(BoatType::AdvancedCruiser),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            BoatType::SailNavSimClassic => 0,
            BoatType::Seascape18 => 1,
            BoatType::Contessa25 => 2,
            BoatType::Hanse385 => 3,
            BoatType::Volvo70 => 4,
            BoatType::SuperMaxiScallywag => 5,
            BoatType::Brigantine140 => 6,
            BoatType::MaxiTrimaran => 7,
            BoatType::AdvancedCruiser => 8,
        }
    }

    pub fn is_advanced(self) -> bool {
        matches!(self, BoatType::AdvancedCruiser)
    }

    /// The advanced-hull model id behind this type, where applicable.
    fn advanced_model(self) -> i32 {
        0
    }

    pub fn course_change_rate(self) -> f64 {
        if self.is_advanced() {
            hull::course_change_rate(self.advanced_model())
        } else {
            wind_response::course_change_rate(self.id() as usize)
        }
    }

    pub fn speed_change_response(self) -> f64 {
        wind_response::speed_change_response(self.id() as usize)
    }

    /// Resistance to the wave speed effect; larger hulls shrug off more sea
    /// state. Feeds `exp(-h^2 / resistance)`.
    pub fn wave_effect_resistance(self) -> f64 {
        match self {
            BoatType::SailNavSimClassic => 40.0,
            BoatType::Seascape18 => 15.0,
            BoatType::Contessa25 => 25.0,
            BoatType::Hanse385 => 45.0,
            BoatType::Volvo70 => 120.0,
            BoatType::SuperMaxiScallywag => 180.0,
            BoatType::Brigantine140 => 220.0,
            BoatType::MaxiTrimaran => 150.0,
            BoatType::AdvancedCruiser => hull::wave_effect_resistance(self.advanced_model()),
        }
    }

    /// Wind-gust magnitude above which this type starts taking damage, m/s.
    pub fn damage_gust_threshold(self) -> f64 {
        if self.is_advanced() {
            hull::damage_wind_gust_threshold(self.advanced_model())
        } else {
            DAMAGE_INC_THRESH
        }
    }
}

/// Mutable state of one simulated vessel.
///
/// Velocity vectors always carry true compass bearings. The stored water
/// velocity magnitude may go transiently negative (a hull pushed backwards
/// by wind forward of the beam); the derived ground vector is always
/// normalized to a non-negative magnitude.
#[derive(Debug, Clone)]
pub struct Vessel {
    pub pos: GeoPos,
    /// Velocity through water.
    pub v: GeoVec,
    /// Velocity over ground, derived each tick.
    pub v_ground: GeoVec,

    /// Commanded course in degrees; magnetic when `course_magnetic` is set.
    pub desired_course: f64,
    pub course_magnetic: bool,

    pub distance_travelled: f64,
    pub damage: f64,

    /// Sideways speed component at heading + 90 degrees, m/s (advanced
    /// hulls; always zero for basic hulls).
    pub leeway: f64,
    /// Heel in degrees (advanced hulls).
    pub heeling_angle: f64,
    /// Deployed sail area fraction in [0, 1] (advanced hulls).
    pub sail_area: f64,

    pub boat_type: BoatType,
    pub flags: u32,

    /// Remaining ticks of launch damping after leaving land, in [0, 10].
    pub starting_from_land_count: u32,

    pub stopped: bool,
    pub sails_down: bool,
    pub moving_to_sea: bool,

    /// Snap the heading to the desired course on the first launch.
    pub set_immediate_desired_course: bool,
}

impl Vessel {
    pub fn new(lat: f64, lon: f64, boat_type: BoatType, flags: u32) -> Vessel {
        Vessel {
            pos: GeoPos::new(lat, lon),
            v: GeoVec::zero(),
            v_ground: GeoVec::zero(),
            desired_course: 0.0,
            course_magnetic: false,
            distance_travelled: 0.0,
            damage: 0.0,
            leeway: 0.0,
            heeling_angle: 0.0,
            sail_area: 0.0,
            boat_type,
            flags,
            starting_from_land_count: 0,
            stopped: true,
            sails_down: false,
            moving_to_sea: false,
            set_immediate_desired_course: true,
        }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// One-second state advance. `now` is wall-clock seconds, used only for
    /// magnetic declination lookups.
    pub fn advance(&mut self, env: &dyn Environment, rng: &mut StdRng, now: i64) {
        if self.stopped {
            // At rest; the crew may still patch things up.
            if self.damage > 0.0 {
                let wx = env.weather(&self.pos);
                let gust = GeoVec::new(wx.wind.angle, wx.wind_gust);
                self.update_damage(&gust, false);
            }
            return;
        }

        if self.pos.lat >= 90.0 - FORBIDDEN_LAT || self.pos.lat <= -90.0 + FORBIDDEN_LAT {
            // The bearing arithmetic degenerates at the poles, so park the
            // vessel just short of them.
            self.stop();
            return;
        }

        if self.moving_to_sea {
            if env.is_water(&self.pos) {
                // Reached water; sail normally from here on.
                self.moving_to_sea = false;

                if self.set_immediate_desired_course {
                    // First start: point straight at the desired course.
                    self.v.angle = self.desired_course_true(env, now);
                    self.set_immediate_desired_course = false;
                }
            } else {
                if self.is_heading_toward_water(env, now) {
                    // Water ahead; crawl toward it at a fixed speed.
                    self.v.angle = self.desired_course_true(env, now);
                    self.v.mag = MOVE_TO_WATER_SPEED;
                    self.leeway = 0.0;
                    self.pos.advance(&self.v);
                } else {
                    self.stop();
                }
                return;
            }
        }

        let ocean = env.ocean(&self.pos);
        let wave = env.wave(&self.pos);
        let mut wx = env.weather(&self.pos);

        let mut gust = GeoVec::new(wx.wind.angle, wx.wind_gust);
        if let Some(od) = &ocean {
            let gust_angle = wx.adjust_for_current(&od.current);
            gust = GeoVec::new(gust_angle, wx.wind_gust);
        }

        let saf_ice = ice_speed_factor(ocean.as_ref());
        let saf_wave = self.wave_speed_factor(wave.as_ref());
        let saf_common = saf_ice * saf_wave;

        if self.sails_down && !self.boat_type.is_advanced() {
            // Bare poles: drift downwind at a tenth of the wind speed,
            // repairing but never taking damage, with no damage speed
            // penalty.
            self.v.angle = wrap_bearing(wx.wind.angle + 180.0);
            self.update_damage(&gust, false);
            self.v.mag = wx.wind.mag * 0.1 * saf_common;
            self.leeway = 0.0;
        } else {
            let take_damage = if self.boat_type.is_advanced() { self.sail_area > 0.0 } else { true };
            self.update_damage(&gust, take_damage);
            self.update_course(env, rng, now);
            self.update_velocity(&wx.wind, saf_common);
        }

        // Assemble the ground vector: water velocity, damped current, leeway.
        let mut ground = self.v;
        if let Some(od) = &ocean {
            let damp =
                f64::from(STARTING_FROM_LAND_TICKS - self.starting_from_land_count.min(10)) / 10.0;
            let mut current = od.current;
            current.mag *= damp;
            ground.add(&current);
        }
        if self.leeway != 0.0 {
            ground.add(&GeoVec::new(self.v.angle + 90.0, self.leeway));
        }
        let ground = ground.normalized();

        if self.starting_from_land_count > 0 {
            self.starting_from_land_count -= 1;
        }

        self.pos.advance(&ground);
        self.distance_travelled += ground.mag;
        self.v_ground = ground;

        if !env.is_water(&self.pos) {
            // Ran aground.
            self.stop();
            self.starting_from_land_count = STARTING_FROM_LAND_TICKS;
        }
    }

    /// Whether any water lies along the desired course within the next
    /// 110 metres (sampled every 10 metres, starting here).
    pub fn is_heading_toward_water(&self, env: &dyn Environment, now: i64) -> bool {
        let mut pos = self.pos;
        let step = GeoVec::new(self.desired_course_true(env, now), 10.0);

        let mut d = 0.0;
        while d <= MOVE_TO_WATER_DISTANCE + 10.0 {
            if env.is_water(&pos) {
                return true;
            }
            pos.advance(&step);
            d += 10.0;
        }

        false
    }

    /// The commanded course as a true bearing, resolving magnetic courses
    /// through the declination at the current position and time.
    pub fn desired_course_true(&self, env: &dyn Environment, now: i64) -> f64 {
        if self.course_magnetic {
            wrap_bearing(self.desired_course + env.magnetic_declination(&self.pos, now))
        } else {
            self.desired_course
        }
    }

    pub fn stop(&mut self) {
        self.stopped = true;
        self.moving_to_sea = false;
        self.v.mag = 0.0;
        self.v_ground.mag = 0.0;
    }

    fn update_course(&mut self, env: &dyn Environment, rng: &mut StdRng, now: i64) {
        let desired = self.desired_course_true(env, now);
        let diff = compass_diff(self.v.angle, desired);
        let rate = self.boat_type.course_change_rate();

        if diff.abs() <= rate {
            // Close enough: snap to the desired course.
            self.v.angle = desired;
            return;
        }

        if diff < 0.0 && diff >= -179.0 {
            self.v.angle -= rate;
        } else if diff > 0.0 && diff <= 179.0 {
            self.v.angle += rate;
        } else {
            // Desired course is dead astern (within a degree); neither turn
            // direction is shorter, so flip a coin.
            if rng.gen_bool(0.5) {
                self.v.angle -= rate;
            } else {
                self.v.angle += rate;
            }
        }

        self.v.angle = wrap_bearing(self.v.angle);
    }

    fn update_velocity(&mut self, wind: &GeoVec, saf_common: f64) {
        let angle_from_wind = compass_diff(wind.angle, self.v.angle);

        if self.boat_type.is_advanced() {
            self.update_velocity_advanced(wind, angle_from_wind, saf_common);
            return;
        }

        let spd = wind_response::boat_speed(wind.mag, angle_from_wind, self.boat_type.id() as usize)
            * saf_common
            * self.damage_speed_factor();

        let response = self.boat_type.speed_change_response();
        self.v.mag = (response * self.v.mag + spd) / (response + 1.0);
    }

    fn update_velocity_advanced(&mut self, wind: &GeoVec, angle_from_wind: f64, saf_common: f64) {
        let saf = if self.sail_area > 0.0 { saf_common.max(0.01) } else { saf_common };
        if saf <= 0.0 {
            self.v.mag = 0.0;
            self.leeway = 0.0;
            self.heeling_angle = 0.0;
            return;
        }

        let input = hull::HullInput {
            wind_angle: -angle_from_wind,
            wind_speed: wind.mag,
            boat_speed_ahead: self.v.mag / saf,
            boat_speed_abeam: self.leeway / saf,
            sail_area: self.sail_area,
        };

        match hull::boat_update(self.boat_type.advanced_model(), &input) {
            Ok(out) => {
                self.v.mag = out.boat_speed_ahead * saf;
                self.leeway = out.boat_speed_abeam * saf;
                self.heeling_angle = out.heeling_angle;
            }
            Err(err) => {
                tracing::warn!(boat_type = self.boat_type.id(), %err, "advanced hull update failed");
                self.v.mag = 0.0;
                self.leeway = 0.0;
                self.heeling_angle = 0.0;
            }
        }
    }

    /// Damage bookkeeping for one tick. Repair whenever the gust is below
    /// the repair threshold; take damage only above this type's threshold
    /// and when `take_damage` permits it.
    fn update_damage(&mut self, gust: &GeoVec, take_damage: bool) {
        if !self.has_flag(FLAG_TAKES_DAMAGE) {
            return;
        }

        let mut gust = *gust;
        if self.has_flag(FLAG_DAMAGE_APPARENT_WIND) {
            gust.add(&self.v);
            if self.leeway != 0.0 {
                gust.add(&GeoVec::new(self.v.angle + 90.0, self.leeway));
            }
        }
        let gust_mag = gust.mag;

        if gust_mag < DAMAGE_DEC_THRESH {
            if self.damage > 0.0 {
                self.damage -= (DAMAGE_DEC_THRESH - gust_mag) * DAMAGE_REPAIR_FACTOR;
                if self.damage < 0.0 {
                    self.damage = 0.0;
                }
            }
        } else if gust_mag > self.boat_type.damage_gust_threshold()
            && take_damage
            && self.damage < 100.0
        {
            let over = gust_mag - self.boat_type.damage_gust_threshold();
            self.damage += (100.0 - self.damage) * (over * over * DAMAGE_TAKE_FACTOR * 0.01);
            if self.damage > 100.0 {
                self.damage = 100.0;
            }
        }
    }

    fn damage_speed_factor(&self) -> f64 {
        if self.has_flag(FLAG_TAKES_DAMAGE) {
            1.0 - self.damage * 0.01
        } else {
            1.0
        }
    }

    fn wave_speed_factor(&self, wave: Option<&crate::env::WaveData>) -> f64 {
        match wave {
            Some(wd) if self.has_flag(FLAG_WAVE_SPEED_EFFECT) => {
                (-(wd.height * wd.height) / self.boat_type.wave_effect_resistance()).exp()
            }
            _ => 1.0,
        }
    }
}

fn ice_speed_factor(ocean: Option<&crate::env::OceanData>) -> f64 {
    match ocean {
        Some(od) => 1.0 - od.ice / 100.0,
        None => 1.0,
    }
}
