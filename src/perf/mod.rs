//! Performance mode: a deterministic scripted workload driven without tick
//! pacing, reporting elapsed nanoseconds per phase for throughput
//! comparisons between builds.

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::simulation::boat::BOAT_TYPE_MAX_VALUE;
use crate::simulation::{Engine, SimulationApp};

const PERF_BOAT_COUNT: usize = 5_000;
const PERF_ADVANCE_TICKS: i64 = 120;
const PERF_COMMAND_ROUNDS: usize = 20;

const RANDOM_NAME_LEN: usize = 32;
const RANDOM_NAME_CHARS: &[u8] = b"0123456789abcdef";

/// Independent deterministic generators for names, positions and the
/// miscellaneous values, so each stream stays reproducible regardless of
/// how the others get consumed.
struct PerfRand {
    names: StdRng,
    positions: StdRng,
    misc: StdRng,
}

impl PerfRand {
    fn new() -> PerfRand {
        PerfRand {
            names: StdRng::seed_from_u64(314_159_265),
            positions: StdRng::seed_from_u64(271_828_182),
            misc: StdRng::seed_from_u64(141_421_356),
        }
    }

    fn name(&mut self) -> String {
        (0..RANDOM_NAME_LEN)
            .map(|_| RANDOM_NAME_CHARS[self.names.gen_range(0..RANDOM_NAME_CHARS.len())] as char)
            .collect()
    }

    fn lat(&mut self) -> f64 {
        self.positions.gen_range(-79_000..=80_000) as f64 / 1000.0
    }

    fn lon(&mut self) -> f64 {
        self.positions.gen_range(-180_000..180_000) as f64 / 1000.0
    }

    fn boat_type(&mut self) -> i64 {
        self.misc.gen_range(0..=BOAT_TYPE_MAX_VALUE)
    }

    fn flags(&mut self) -> u32 {
        self.misc.gen_range(0..=0x3f)
    }

    fn course(&mut self) -> i64 {
        self.misc.gen_range(0..=359)
    }
}

/// Runs the scripted workload on a fresh engine and prints a throughput
/// summary to stdout.
pub fn run(engine: Arc<Engine>) {
    let mut app = SimulationApp::new(engine, None);
    let mut rand = PerfRand::new();

    info!(boats = PERF_BOAT_COUNT, ticks = PERF_ADVANCE_TICKS, "performance mode starting");

    // Phase 1: populate and start the fleet through the command pipeline.
    let names: Vec<String> = (0..PERF_BOAT_COUNT).map(|_| rand.name()).collect();

    let populate_start = Instant::now();
    for name in &names {
        app.engine()
            .commands
            .push_line(&format!(
                "{},add,{},{},{},{}",
                name,
                rand.lat(),
                rand.lon(),
                rand.boat_type(),
                rand.flags()
            ))
            .expect("perf add command must parse");
        app.engine()
            .commands
            .push_line(&format!("{},course,{}", name, rand.course()))
            .expect("perf course command must parse");
        app.engine().commands.push_line(&format!("{name},start")).expect("perf start");
    }
    app.tick(0);
    let populate_ns = populate_start.elapsed().as_nanos();

    // Phase 2: pure advance ticks.
    let advance_start = Instant::now();
    for now in 1..=PERF_ADVANCE_TICKS {
        app.tick(now);
    }
    let advance_ns = advance_start.elapsed().as_nanos();

    // Phase 3: command churn against the running fleet.
    let churn_start = Instant::now();
    let mut now = PERF_ADVANCE_TICKS;
    for _ in 0..PERF_COMMAND_ROUNDS {
        for name in &names {
            app.engine()
                .commands
                .push_line(&format!("{},course,{}", name, rand.course()))
                .expect("perf churn command must parse");
        }
        now += 1;
        app.tick(now);
    }
    let churn_ns = churn_start.elapsed().as_nanos();

    // Phase 4: tear the whole fleet back down.
    let remove_start = Instant::now();
    for name in &names {
        app.engine().commands.push_line(&format!("{name},remove")).expect("perf remove");
    }
    now += 1;
    let (boats_left, _) = app.tick(now);
    let remove_ns = remove_start.elapsed().as_nanos();
    assert_eq!(boats_left, 0, "perf removal must drain the registry");

    let boat_ticks = PERF_BOAT_COUNT as u128 * PERF_ADVANCE_TICKS as u128;
    println!("perf: populate {PERF_BOAT_COUNT} boats: {populate_ns} ns");
    println!(
        "perf: advance {PERF_ADVANCE_TICKS} ticks: {advance_ns} ns ({} ns/boat-tick)",
        advance_ns / boat_ticks
    );
    println!("perf: command churn {PERF_COMMAND_ROUNDS} rounds: {churn_ns} ns");
    println!("perf: remove {PERF_BOAT_COUNT} boats: {remove_ns} ns");
}
