//! The simulation engine: the owned aggregate of registry, command queue,
//! environment and RNG, plus the fixed 1 Hz tick loop that advances every
//! vessel, emits log batches on minute rollover and drains queued commands
//! between ticks.

pub mod boat;
pub mod celestial;
pub mod hull;
pub mod registry;
pub mod wind_response;

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandAction, CommandQueue};
use crate::env::Environment;
use crate::logger::{LogBatch, LogEntry, Logger, SightEntry};
use crate::simulation::boat::{BoatType, Vessel, FLAG_CELESTIAL, FLAG_CELESTIAL_WAVE_EFFECT};
use crate::simulation::registry::BoatRegistry;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("wall clock is unavailable: {0}")]
    Clock(#[from] std::time::SystemTimeError),
}

/// Everything the simulation and its collaborators share. One instance per
/// process, handed around behind an `Arc`; there is no global state.
pub struct Engine {
    pub registry: RwLock<BoatRegistry>,
    pub commands: Arc<CommandQueue>,
    pub env: Arc<dyn Environment>,
    /// Process-wide PRNG for course tiebreaks, cloud draws, star picks and
    /// wave perturbation. Only the simulation thread locks it in steady
    /// state.
    pub rng: Mutex<StdRng>,
}

impl Engine {
    pub fn new(env: Arc<dyn Environment>, rng_seed: u64) -> Engine {
        Engine {
            registry: RwLock::new(BoatRegistry::new()),
            commands: Arc::new(CommandQueue::new()),
            env,
            rng: Mutex::new(StdRng::seed_from_u64(rng_seed)),
        }
    }

    /// Seeds the RNG from the wall clock, the normal production setup.
    pub fn with_clock_seed(env: Arc<dyn Environment>) -> Result<Engine, SimulationError> {
        let seed = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        Ok(Engine::new(env, seed))
    }
}

/// The fixed-rate simulation driver.
pub struct SimulationApp {
    engine: Arc<Engine>,
    logger: Option<Logger>,
    last_iter: i64,
    running: bool,
}

impl SimulationApp {
    pub fn new(engine: Arc<Engine>, logger: Option<Logger>) -> SimulationApp {
        SimulationApp { engine, logger, last_iter: 0, running: false }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Runs the 1 Hz tick loop until `stop` is called from a tick (which
    /// production never does). Wakeup targets advance by exactly one second
    /// per iteration off a monotonic checkpoint; when a tick overruns, the
    /// next one starts immediately.
    pub fn run(&mut self) -> Result<(), SimulationError> {
        self.running = true;
        let tick = Duration::from_secs(1);
        let mut next_wakeup = Instant::now() + tick;

        info!("simulation loop starting");

        while self.running {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;

            let (boats, commands) = self.tick(now);

            if let Some(remaining) = next_wakeup.checked_duration_since(Instant::now()) {
                debug!(boats, commands, sleep_us = remaining.as_micros() as u64, "tick complete");
                spin_sleep::sleep(remaining);
            } else {
                warn!(boats, commands, "tick took longer than 1 second, starting next right away");
            }
            next_wakeup += tick;
        }

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// One full tick at wall-clock second `now`: advance every vessel under
    /// the write lock (capturing log entries when the minute rolled over),
    /// hand the batch to the logger with the lock released, then reacquire
    /// the lock and drain the command queue. Returns (boat count, commands
    /// applied).
    pub fn tick(&mut self, now: i64) -> (usize, usize) {
        let do_log = {
            let iter = now.rem_euclid(60);
            let rollover = iter < self.last_iter;
            self.last_iter = iter;
            rollover && self.logger.is_some()
        };

        // Advance phase.
        let batch = {
            let mut registry = self.engine.registry.write().expect("registry lock poisoned");
            let mut rng = self.engine.rng.lock().expect("engine rng poisoned");

            let mut entries =
                if do_log { Vec::with_capacity(registry.count()) } else { Vec::new() };
            let mut sights = Vec::new();

            for entry in registry.iter_mut() {
                entry.boat.advance(self.engine.env.as_ref(), &mut rng, now);

                if do_log {
                    let log =
                        LogEntry::capture(&entry.name, &entry.boat, self.engine.env.as_ref(), now);
                    if let Some(sight) =
                        attempt_sight(self.engine.env.as_ref(), &mut rng, &entry.boat, now)
                    {
                        sights.push(SightEntry {
                            time: now,
                            boat_name: entry.name.clone(),
                            object: sight.object,
                            az: sight.coord.az,
                            alt: sight.coord.alt,
                        });
                    }
                    entries.push(log);
                }
            }

            if do_log && !entries.is_empty() {
                Some(LogBatch { entries, sights })
            } else {
                None
            }
        };

        // Log phase, outside the registry lock.
        if let Some(batch) = batch {
            if let Some(logger) = &self.logger {
                logger.submit(batch);
            }
        }

        // Command phase.
        let mut commands = 0;
        {
            let mut registry = self.engine.registry.write().expect("registry lock poisoned");
            while let Some(cmd) = self.engine.commands.pop() {
                apply_command(&mut registry, self.engine.env.as_ref(), cmd, now);
                commands += 1;
            }
        }

        let boats = self.engine.registry.read().expect("registry lock poisoned").count();
        (boats, commands)
    }
}

/// A celestial sight attempt for one vessel, when it is equipped for
/// celestial navigation. Wave motion perturbs the measurement on hulls
/// flagged for it.
fn attempt_sight(
    env: &dyn Environment,
    rng: &mut StdRng,
    boat: &Vessel,
    now: i64,
) -> Option<celestial::Sight> {
    if !boat.has_flag(FLAG_CELESTIAL) {
        return None;
    }

    let wx = env.weather(&boat.pos);
    let sight = celestial::shoot(env, rng, now, &boat.pos, wx.cloud, wx.pressure, wx.temp)?;

    if boat.has_flag(FLAG_CELESTIAL_WAVE_EFFECT) {
        if let Some(wave) = env.wave(&boat.pos) {
            return celestial::wave_adjusted(
                sight,
                rng,
                wave.height,
                boat.boat_type.wave_effect_resistance(),
            );
        }
    }

    Some(sight)
}

/// Applies one queued command. Registry commands mutate membership; vessel
/// commands mutate a single boat, and silently vanish when the boat does
/// not exist.
fn apply_command(registry: &mut BoatRegistry, env: &dyn Environment, cmd: Command, now: i64) {
    match cmd.action {
        CommandAction::AddBoat(params) => {
            add_boat(registry, &cmd.name, &params, None, None);
        }
        CommandAction::AddBoatWithGroup { params, group, alt_name } => {
            add_boat(registry, &cmd.name, &params, Some(group), alt_name);
        }
        CommandAction::RemoveBoat => {
            if registry.remove(&cmd.name).is_some() {
                info!(boat = %cmd.name, "boat removed");
            }
        }
        CommandAction::Stop => {
            if let Some(boat) = registry.get_mut(&cmd.name) {
                boat.sails_down = true;
            }
        }
        CommandAction::Start => {
            if let Some(boat) = registry.get_mut(&cmd.name) {
                if boat.is_heading_toward_water(env, now) {
                    boat.stopped = false;
                    boat.sails_down = false;
                    boat.moving_to_sea = true;
                }
            }
        }
        CommandAction::CourseTrue(course) => {
            if let Some(boat) = registry.get_mut(&cmd.name) {
                boat.desired_course = course as f64;
                boat.course_magnetic = false;
            }
        }
        CommandAction::CourseMag(course) => {
            if let Some(boat) = registry.get_mut(&cmd.name) {
                boat.desired_course = course as f64;
                boat.course_magnetic = true;
            }
        }
        CommandAction::SailArea(percent) => {
            if let Some(boat) = registry.get_mut(&cmd.name) {
                boat.sail_area = percent as f64 / 100.0;
            }
        }
    }
}

fn add_boat(
    registry: &mut BoatRegistry,
    name: &str,
    params: &crate::command::AddBoatParams,
    group: Option<String>,
    alt_name: Option<String>,
) {
    let boat_type = match BoatType::from_id(params.boat_type) {
        Some(t) => t,
        None => {
            // Parse-time validation makes this unreachable in practice.
            warn!(boat = name, boat_type = params.boat_type, "rejecting unknown boat type");
            return;
        }
    };

    let boat = Vessel::new(params.lat, params.lon, boat_type, params.flags);
    match registry.add(boat, name, group, alt_name) {
        Ok(()) => info!(boat = name, "boat added"),
        Err(err) => debug!(boat = name, %err, "boat not added"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::StaticEnvironment;

    fn app() -> SimulationApp {
        let env = StaticEnvironment::calm().with_wind(0.0, 8.0);
        let engine = Arc::new(Engine::new(Arc::new(env), 3));
        SimulationApp::new(engine, None)
    }

    #[test]
    fn commands_apply_after_advance() {
        let mut app = app();
        app.engine().commands.push_line("Vega,add,10.0,20.0,0,0").unwrap();

        let (boats, commands) = app.tick(0);
        assert_eq!(commands, 1);
        assert_eq!(boats, 1);

        let reg = app.engine().registry.read().unwrap();
        let boat = reg.get("Vega").unwrap();
        assert_eq!(boat.pos.lat, 10.0);
        assert!(boat.stopped);
    }

    #[test]
    fn start_then_course_then_sailing() {
        let mut app = app();
        app.engine().commands.push_line("Vega,add,0.0,0.0,0,0").unwrap();
        app.tick(0);
        app.engine().commands.push_line("Vega,start").unwrap();
        app.engine().commands.push_line("Vega,course,90").unwrap();
        app.tick(1);

        // Next tick advances the started vessel.
        app.tick(2);

        let reg = app.engine().registry.read().unwrap();
        let boat = reg.get("Vega").unwrap();
        assert!(!boat.stopped);
        assert!(!boat.moving_to_sea);
        assert_eq!(boat.desired_course, 90.0);
    }

    #[test]
    fn stop_command_lowers_sails() {
        let mut app = app();
        app.engine().commands.push_line("Vega,add,0.0,0.0,0,0").unwrap();
        app.tick(0);
        app.engine().commands.push_line("Vega,start").unwrap();
        app.tick(1);
        app.engine().commands.push_line("Vega,stop").unwrap();
        app.tick(2);

        let reg = app.engine().registry.read().unwrap();
        let boat = reg.get("Vega").unwrap();
        assert!(boat.sails_down);
    }

    #[test]
    fn commands_for_unknown_boats_vanish() {
        let mut app = app();
        app.engine().commands.push_line("Nobody,course,45").unwrap();
        app.engine().commands.push_line("Nobody,remove").unwrap();

        let (boats, commands) = app.tick(0);
        assert_eq!(commands, 2);
        assert_eq!(boats, 0);
    }

    #[test]
    fn duplicate_add_keeps_the_first_boat() {
        let mut app = app();
        app.engine().commands.push_line("Vega,add,1.0,1.0,0,0").unwrap();
        app.engine().commands.push_line("Vega,add,2.0,2.0,0,0").unwrap();
        app.tick(0);

        let reg = app.engine().registry.read().unwrap();
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.get("Vega").unwrap().pos.lat, 1.0);
    }

    #[test]
    fn add_g_registers_group_membership() {
        let mut app = app();
        app.engine().commands.push_line("Vega,add_g,1.0,1.0,0,0,Fleet,Flagship").unwrap();
        app.tick(0);

        let reg = app.engine().registry.read().unwrap();
        assert_eq!(reg.group_membership_response("Fleet"), "Vega,Flagship\n");
    }

    #[test]
    fn sail_area_command_sets_fraction() {
        let mut app = app();
        app.engine().commands.push_line("Adv,add,0.0,0.0,8,0").unwrap();
        app.tick(0);
        app.engine().commands.push_line("Adv,sail_area,40").unwrap();
        app.tick(1);

        let reg = app.engine().registry.read().unwrap();
        assert_eq!(reg.get("Adv").unwrap().sail_area, 0.4);
    }

    #[test]
    fn minute_rollover_tracks_iteration() {
        let mut app = app();
        app.engine().commands.push_line("Vega,add,0.0,0.0,0,0").unwrap();
        for now in 55..70 {
            app.tick(now);
        }
        assert_eq!(app.last_iter, 69 % 60);
    }

    #[test]
    fn log_phase_fires_on_minute_rollover() {
        let dir = tempfile::tempdir().unwrap();
        let env = StaticEnvironment::calm().with_wind(0.0, 8.0);
        let engine = Arc::new(Engine::new(Arc::new(env), 3));
        let logger = Logger::start(Some(dir.path().to_path_buf()), None).unwrap();
        let mut app = SimulationApp::new(engine, Some(logger));

        app.engine().commands.push_line("Vega,add,0.0,0.0,0,0").unwrap();
        app.tick(58);
        app.tick(59);
        // Second counter wraps: this tick must emit a log batch.
        app.tick(60);

        let path = dir.path().join("Vega.csv");
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(20));
            if path.exists() {
                return;
            }
        }
        panic!("expected a CSV log entry after the minute rollover");
    }
}
