//! Advanced-hull hydrodynamics.
//!
//! A force-balance model for the advanced boat family: sail force from an
//! apparent-wind response table, windage, heel from the abeam sail force,
//! and boat speed at the point where aerodynamic and hydrodynamic forces
//! balance. The solver works in a boat-local frame: +y ahead, +x abeam to
//! starboard.
//!
//! The entry point keeps the original update contract (wind angle and speed
//! relative to the heading, current ahead/abeam speeds and sail area in,
//! new ahead/abeam speeds and heeling angle out) so alternative models can
//! be dropped in behind it.

use crate::simulation::boat::KNOTS_IN_M_PER_S;

const EPSILON: f64 = 1e-8;

/// Solver inputs, all relative to the boat's heading.
#[derive(Debug, Clone, Copy)]
pub struct HullInput {
    /// Wind bearing relative to the heading, degrees.
    pub wind_angle: f64,
    /// Wind speed in m/s.
    pub wind_speed: f64,
    /// Boat speed ahead in m/s.
    pub boat_speed_ahead: f64,
    /// Boat speed abeam in m/s.
    pub boat_speed_abeam: f64,
    /// Sail area fraction in [0, 1].
    pub sail_area: f64,
}

/// Solver outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HullOutput {
    pub boat_speed_ahead: f64,
    pub boat_speed_abeam: f64,
    pub heeling_angle: f64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HullError {
    #[error("unknown advanced hull model: {0}")]
    UnknownModel(i32),
}

/// Advances an advanced hull by one second.
pub fn boat_update(model: i32, input: &HullInput) -> Result<HullOutput, HullError> {
    match model {
        0 => {
            let wind = Vec2::from_angle_mag(input.wind_angle, input.wind_speed);
            let boat = Vec2::new(input.boat_speed_abeam, input.boat_speed_ahead);
            let (out, heel) = calculate_boat_response(wind, boat, input.sail_area);

            Ok(HullOutput {
                boat_speed_ahead: out.y,
                boat_speed_abeam: out.x,
                heeling_angle: heel,
            })
        }
        other => Err(HullError::UnknownModel(other)),
    }
}

/// Course change rate in degrees per second for an advanced model.
pub fn course_change_rate(model: i32) -> f64 {
    match model {
        0 => 5.0,
        _ => 0.0,
    }
}

/// Wave-effect resistance for an advanced model. Unmodeled types just have
/// very low resistance.
pub fn wave_effect_resistance(model: i32) -> f64 {
    match model {
        0 => 75.0,
        _ => 0.001,
    }
}

/// Wind-gust damage threshold in m/s for an advanced model.
pub fn damage_wind_gust_threshold(model: i32) -> f64 {
    match model {
        0 => 45.0 / KNOTS_IN_M_PER_S,
        _ => 0.001,
    }
}

const WATER_DENSITY: f64 = 1_000.0; // kg/m^3
const AIR_DENSITY: f64 = 1.204; // kg/m^3

const BOAT_AHEAD_WATER_AREA: f64 = 2.5; // m^2
const BOAT_AHEAD_WATER_DRAG_COEFFICIENT: f64 = 0.3;

const BOAT_ABEAM_WATER_AREA: f64 = 7.0; // m^2
const BOAT_ABEAM_WATER_DRAG_COEFFICIENT: f64 = 1.25;

const BOAT_AHEAD_AIR_AREA: f64 = 3.5; // m^2
const BOAT_AHEAD_AIR_DRAG_COEFFICIENT: f64 = 0.5;

const BOAT_ABEAM_AIR_AREA: f64 = 9.0; // m^2
const BOAT_ABEAM_AIR_DRAG_COEFFICIENT: f64 = 0.7;

// Heeling rolls more of the hull up into the wind.
const BOAT_ABEAM_AIR_AREA_EXTRA_PER_DEG_HEEL: f64 = 0.12; // m^2/deg

const BOAT_HEEL_RIGHTING_FORCE: f64 = 10_000.0;

fn calculate_boat_response(wind: Vec2, boat: Vec2, sail_area: f64) -> (Vec2, f64) {
    let wind_apparent = wind.add(boat);

    let f_sail = sail_force(wind_apparent, sail_area);

    let heeling_angle = heeling_angle(f_sail, sail_area);

    // cos²(heel): the heeled sail both presents less area to the wind and
    // points part of its force below the horizon.
    let ha_cos = heeling_angle.to_radians().cos();
    let f_sail = f_sail.scale(ha_cos * ha_cos);

    // Windage through the air.
    let wind_force = wind_apparent.rev();
    let f_air = Vec2::new(
        drag_force(
            AIR_DENSITY,
            wind_force.x,
            BOAT_ABEAM_AIR_DRAG_COEFFICIENT,
            BOAT_ABEAM_AIR_AREA + BOAT_ABEAM_AIR_AREA_EXTRA_PER_DEG_HEEL * heeling_angle,
        ),
        drag_force(AIR_DENSITY, wind_force.y, BOAT_AHEAD_AIR_DRAG_COEFFICIENT, BOAT_AHEAD_AIR_AREA),
    );

    let f_aero = f_sail.add(f_air);

    // Speed where aerodynamic and hydrodynamic forces balance.
    let v_x = balance_speed(
        f_aero.x,
        WATER_DENSITY,
        BOAT_ABEAM_WATER_DRAG_COEFFICIENT,
        BOAT_ABEAM_WATER_AREA * heeling_angle.to_radians().cos(),
    );
    let v_y =
        balance_speed(f_aero.y, WATER_DENSITY, BOAT_AHEAD_WATER_DRAG_COEFFICIENT, BOAT_AHEAD_WATER_AREA);

    // Averaging with the previous velocity stands in for inertia.
    (Vec2::new((boat.x + v_x) / 2.0, (boat.y + v_y) / 2.0), heeling_angle)
}

// Dimensionless sail force (abeam, ahead) at full sail in ideal trim, one
// row per 10 degrees of apparent wind angle.
const SAIL_RESPONSE_TABLE: [(f64, f64); 20] = [
    (0.0, -20.0),   // 0 deg
    (40.0, -10.0),  // 10
    (180.0, 40.0),  // 20
    (200.0, 120.0), // 30
    (180.0, 160.0), // 40
    (140.0, 180.0), // 50
    (120.0, 200.0), // 60
    (100.0, 210.0), // 70
    (80.0, 220.0),  // 80
    (70.0, 230.0),  // 90
    (60.0, 240.0),  // 100
    (55.0, 250.0),  // 110
    (50.0, 255.0),  // 120
    (45.0, 260.0),  // 130
    (40.0, 260.0),  // 140
    (40.0, 255.0),  // 150
    (45.0, 230.0),  // 160
    (50.0, 200.0),  // 170
    (0.0, 150.0),   // 180
    (0.0, 0.0),     // ---
];

fn sail_force(wind_apparent: Vec2, sail_area: f64) -> Vec2 {
    let mut wind_angle = wind_apparent.angle();
    let wind_mag = wind_apparent.mag();
    let mut neg_x = true;

    while wind_angle > 360.0 {
        wind_angle -= 360.0;
    }

    if wind_angle > 180.0 {
        wind_angle = 360.0 - wind_angle;
        neg_x = false;
    }

    let mut i = (wind_angle / 10.0) as i32;
    let frac;
    if i < 0 {
        i = 0;
        frac = 0.0;
    } else if i >= 18 {
        i = 18;
        frac = 0.0;
    } else {
        frac = (wind_angle / 10.0) - f64::from(i);
    }

    let (x0, y0) = SAIL_RESPONSE_TABLE[i as usize];
    let (x1, y1) = SAIL_RESPONSE_TABLE[(i + 1) as usize];

    let x = x0 * (1.0 - frac) + x1 * frac;
    let y = y0 * (1.0 - frac) + y1 * frac;

    let mut f_sail = Vec2::new(x, y);
    if neg_x {
        f_sail = f_sail.flip_x();
    }

    f_sail.scale(sail_area * wind_mag * wind_mag)
}

fn heeling_angle(f_sail: Vec2, sail_area: f64) -> f64 {
    // Abeam force applied at the centre of effort, which sits sqrt(area)
    // up the mast for a triangular sail plan.
    let f = f_sail.x.abs() * sail_area.sqrt();

    // Equilibrium of heeling and righting moments:
    // heel = atan(abeam force / righting force).
    (f / BOAT_HEEL_RIGHTING_FORCE).atan().to_degrees()
}

fn drag_force(density: f64, v: f64, c: f64, area: f64) -> f64 {
    if v >= 0.0 {
        0.5 * density * v * v * c * area
    } else {
        -0.5 * density * v * v * c * area
    }
}

fn balance_speed(f: f64, density: f64, c: f64, area: f64) -> f64 {
    if f >= 0.0 {
        (2.0 * f / (density * c * area)).sqrt()
    } else {
        -(-2.0 * f / (density * c * area)).sqrt()
    }
}

/// Boat-local 2D vector: +x abeam to starboard, +y ahead.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Vec2 {
    x: f64,
    y: f64,
}

impl Vec2 {
    fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    fn from_angle_mag(angle: f64, mag: f64) -> Self {
        let (mut angle, mut mag) = (angle, mag);

        if mag < 0.0 {
            angle += 180.0;
            mag = -mag;
        }
        while angle < 0.0 {
            angle += 360.0;
        }
        while angle > 360.0 {
            angle -= 360.0;
        }

        Vec2 { x: mag * angle.to_radians().sin(), y: mag * angle.to_radians().cos() }
    }

    fn angle(&self) -> f64 {
        if self.y.abs() < EPSILON {
            // Degenerate ahead component: due abeam one way or the other.
            if self.x < -EPSILON {
                270.0
            } else if self.x > EPSILON {
                90.0
            } else {
                0.0
            }
        } else {
            let a = (self.x / self.y).atan().to_degrees();
            if self.y < 0.0 {
                a + 180.0
            } else if self.x < 0.0 {
                a + 360.0
            } else {
                a
            }
        }
    }

    fn mag(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    fn add(mut self, other: Vec2) -> Vec2 {
        self.x += other.x;
        self.y += other.y;
        self
    }

    fn scale(mut self, scalar: f64) -> Vec2 {
        self.x *= scalar;
        self.y *= scalar;
        self
    }

    fn rev(mut self) -> Vec2 {
        self.x = -self.x;
        self.y = -self.y;
        self
    }

    fn flip_x(mut self) -> Vec2 {
        self.x = -self.x;
        self
    }
}
