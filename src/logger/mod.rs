//! Asynchronous boat logging: the simulation thread hands over snapshot
//! batches, and a single consumer thread drains them into per-boat
//! append-only CSV files and a transactional SQLite sink.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::env::{Environment, OceanData, WaveData, Weather};
use crate::geo::{GeoPos, GeoVec};
use crate::simulation::boat::{Vessel, FLAG_HIDDEN_IN_GROUP};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to start logger thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Boat status column: 0 stopped, 1 sailing, 2 moving with sails down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoatState {
    Stopped = 0,
    Sailing = 1,
    SailsDown = 2,
}

/// Location column: 0 on water, 1 landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationState {
    Water = 0,
    Landed = 1,
}

/// Everything logged for one boat at one tick.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub time: i64,
    pub boat_name: String,
    pub pos: GeoPos,
    pub vec_water: GeoVec,
    pub vec_ground: GeoVec,
    pub compass_mag_dec: f64,
    pub distance_travelled: f64,
    pub damage: f64,
    pub wx: Weather,
    pub ocean: Option<OceanData>,
    pub wave: Option<WaveData>,
    pub boat_state: BoatState,
    pub loc_state: LocationState,
    pub visible: bool,
}

impl LogEntry {
    /// Snapshots a vessel and its ambient conditions for logging.
    pub fn capture(name: &str, boat: &Vessel, env: &dyn Environment, time: i64) -> LogEntry {
        let wx = env.weather(&boat.pos);
        let ocean = env.ocean(&boat.pos);
        let wave = env.wave(&boat.pos);

        let boat_state = if boat.stopped {
            BoatState::Stopped
        } else if boat.sails_down {
            BoatState::SailsDown
        } else {
            BoatState::Sailing
        };

        let loc_state =
            if env.is_water(&boat.pos) { LocationState::Water } else { LocationState::Landed };

        LogEntry {
            time,
            boat_name: name.to_string(),
            pos: boat.pos,
            vec_water: boat.v,
            vec_ground: boat.v_ground,
            compass_mag_dec: env.magnetic_declination(&boat.pos, time),
            distance_travelled: boat.distance_travelled,
            damage: boat.damage,
            wx,
            ocean,
            wave,
            boat_state,
            loc_state,
            visible: !boat.has_flag(FLAG_HIDDEN_IN_GROUP),
        }
    }
}

/// One celestial sight row, kept beside the main log entries.
#[derive(Debug, Clone)]
pub struct SightEntry {
    pub time: i64,
    pub boat_name: String,
    pub object: i32,
    pub az: f64,
    pub alt: f64,
}

/// A full tick's worth of log entries plus any celestial sights.
#[derive(Debug, Default)]
pub struct LogBatch {
    pub entries: Vec<LogEntry>,
    pub sights: Vec<SightEntry>,
}

#[derive(Default)]
struct LogQueue {
    queue: Mutex<VecDeque<LogBatch>>,
    available: Condvar,
}

/// Handle to the background logging thread. Submitting is cheap: batches go
/// onto a FIFO and the consumer is signalled.
pub struct Logger {
    shared: Arc<LogQueue>,
}

impl Logger {
    /// Starts the consumer thread. `csv_dir` and `sqlite_path` may each be
    /// absent; with neither, nothing gets written but the queue still
    /// drains. A SQLite path pointing at a missing file disables the SQL
    /// sink rather than failing startup.
    pub fn start(
        csv_dir: Option<PathBuf>,
        sqlite_path: Option<PathBuf>,
    ) -> Result<Logger, LoggerError> {
        let sql = match sqlite_path {
            Some(path) if path.exists() => {
                let conn = Connection::open(&path)?;
                info!(path = %path.display(), "boat log SQLite sink open");
                Some(conn)
            }
            Some(path) => {
                info!(path = %path.display(), "no SQLite DB file found, not logging there");
                None
            }
            None => None,
        };

        if csv_dir.is_none() && sql.is_none() {
            warn!("no logger output paths provided, boat logs go nowhere");
        }

        let shared = Arc::new(LogQueue::default());
        let consumer = Arc::clone(&shared);

        thread::Builder::new().name("logger".into()).spawn(move || {
            consumer_main(&consumer, csv_dir.as_deref(), sql);
        })?;

        Ok(Logger { shared })
    }

    /// Queues a batch for the consumer. Batches are written in submission
    /// order.
    pub fn submit(&self, batch: LogBatch) {
        let mut queue = self.shared.queue.lock().expect("log queue poisoned");
        queue.push_back(batch);
        self.shared.available.notify_one();
    }
}

fn consumer_main(shared: &LogQueue, csv_dir: Option<&Path>, sql: Option<Connection>) {
    loop {
        let batch = {
            let mut queue = shared.queue.lock().expect("log queue poisoned");
            loop {
                match queue.pop_front() {
                    Some(batch) => break batch,
                    None => queue = shared.available.wait(queue).expect("log queue poisoned"),
                }
            }
        };

        if let Some(conn) = &sql {
            write_logs_sql(conn, &batch.entries);
            write_sights_sql(conn, &batch.sights);
        }
        if let Some(dir) = csv_dir {
            write_logs_csv(dir, &batch.entries);
            write_sights_csv(dir, &batch.sights);
        }
    }
}

/// Begins an immediate transaction, retrying for as long as the database
/// reports busy. Returns false on any other failure.
fn begin_immediate(conn: &Connection) -> bool {
    loop {
        match conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;") {
            Ok(()) => return true,
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::DatabaseBusy => {
                warn!("database busy starting transaction, retrying in 1 second");
                thread::sleep(Duration::from_secs(1));
            }
            Err(err) => {
                error!(%err, "failed to begin log transaction");
                return false;
            }
        }
    }
}

fn commit_or_rollback(conn: &Connection) {
    if let Err(err) = conn.execute_batch("END TRANSACTION;") {
        error!(%err, "failed to commit log transaction");
        if let Err(err) = conn.execute_batch("ROLLBACK;") {
            error!(%err, "rollback after failed commit also failed");
        }
    } else {
        debug!("committed boat logs");
    }
}

fn write_logs_sql(conn: &Connection, entries: &[LogEntry]) {
    if entries.is_empty() || !begin_immediate(conn) {
        return;
    }

    let mut stmt = match conn.prepare_cached(
        "INSERT INTO BoatLog VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?);",
    ) {
        Ok(stmt) => stmt,
        Err(err) => {
            error!(%err, "failed to prepare BoatLog insert");
            let _ = conn.execute_batch("ROLLBACK;");
            return;
        }
    };

    for log in entries {
        let ocean = log.ocean.as_ref();
        let wave = log.wave.as_ref();

        let result = stmt.execute(params![
            log.boat_name,
            log.time,
            log.pos.lat,
            log.pos.lon,
            log.vec_water.angle,
            log.vec_water.mag,
            log.vec_ground.angle,
            log.vec_ground.mag,
            log.wx.wind.angle,
            log.wx.wind.mag,
            ocean.map(|od| od.current.angle),
            ocean.map(|od| od.current.mag),
            ocean.map(|od| od.surface_temp),
            log.wx.temp,
            log.wx.dewpoint,
            log.wx.pressure,
            log.wx.cloud.round() as i64,
            log.wx.visibility.round() as i64,
            log.wx.precip_rate,
            log.wx.cond,
            log.boat_state as i64,
            log.loc_state as i64,
            ocean.map(|od| od.salinity),
            ocean.map(|od| od.ice.round() as i64),
            log.distance_travelled,
            log.damage,
            log.wx.wind_gust,
            wave.map(|wd| wd.height),
            log.compass_mag_dec,
            !log.visible as i64,
        ]);

        if let Err(err) = result {
            error!(%err, boat = %log.boat_name, "failed to insert boat log row");
        }
    }

    drop(stmt);
    commit_or_rollback(conn);
}

fn write_sights_sql(conn: &Connection, sights: &[SightEntry]) {
    if sights.is_empty() || !begin_immediate(conn) {
        return;
    }

    let mut stmt =
        match conn.prepare_cached("INSERT INTO CelestialSight VALUES (?,?,?,?,?);") {
            Ok(stmt) => stmt,
            Err(err) => {
                error!(%err, "failed to prepare CelestialSight insert");
                let _ = conn.execute_batch("ROLLBACK;");
                return;
            }
        };

    for sight in sights {
        if let Err(err) =
            stmt.execute(params![sight.boat_name, sight.time, sight.object, sight.az, sight.alt])
        {
            error!(%err, boat = %sight.boat_name, "failed to insert celestial sight row");
        }
    }

    drop(stmt);
    commit_or_rollback(conn);
}

fn write_logs_csv(dir: &Path, entries: &[LogEntry]) {
    if !dir.is_dir() {
        // The operator removes the directory to pause CSV logging.
        return;
    }

    for log in entries {
        let path = dir.join(format!("{}.csv", log.boat_name));
        let line = csv_line(log);

        match OpenOptions::new().append(true).create(true).open(&path) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(line.as_bytes()) {
                    error!(%err, boat = %log.boat_name, "failed to write CSV log entry");
                }
            }
            Err(err) => {
                error!(%err, path = %path.display(), "failed to open CSV log file");
            }
        }
    }
}

fn write_sights_csv(dir: &Path, sights: &[SightEntry]) {
    if !dir.is_dir() {
        return;
    }

    for sight in sights {
        let path = dir.join(format!("{}-cs.csv", sight.boat_name));
        let line =
            format!("{},{},{:.3},{:.3}\n", sight.time, sight.object, sight.az, sight.alt);

        match OpenOptions::new().append(true).create(true).open(&path) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(line.as_bytes()) {
                    error!(%err, boat = %sight.boat_name, "failed to write CSV sight entry");
                }
            }
            Err(err) => {
                error!(%err, path = %path.display(), "failed to open CSV sight file");
            }
        }
    }
}

/// One CSV line per log entry; fields backed by invalid ocean or wave data
/// stay empty.
fn csv_line(log: &LogEntry) -> String {
    let mut line = format!(
        "{},{:.6},{:.6},{:.1},{:.3},{:.1},{:.3},{:.1},{:.3},",
        log.time,
        log.pos.lat,
        log.pos.lon,
        log.vec_water.angle,
        log.vec_water.mag,
        log.vec_ground.angle,
        log.vec_ground.mag,
        log.wx.wind.angle,
        log.wx.wind.mag,
    );

    match &log.ocean {
        Some(od) => {
            line.push_str(&format!(
                "{:.1},{:.3},{:.1},",
                od.current.angle, od.current.mag, od.surface_temp
            ));
        }
        None => line.push_str(",,,"),
    }

    line.push_str(&format!(
        "{:.1},{:.1},{:.1},{:.0},{:.0},{:.2},{},{},{},",
        log.wx.temp,
        log.wx.dewpoint,
        log.wx.pressure,
        log.wx.cloud,
        log.wx.visibility,
        log.wx.precip_rate,
        log.wx.cond,
        log.boat_state as i64,
        log.loc_state as i64,
    ));

    match &log.ocean {
        Some(od) => line.push_str(&format!("{:.3},{:.0},", od.salinity, od.ice)),
        None => line.push_str(",,"),
    }

    line.push_str(&format!("{:.1},{:.3},{:.3},", log.distance_travelled, log.damage, log.wx.wind_gust));

    match &log.wave {
        Some(wd) => line.push_str(&format!("{:.2},", wd.height)),
        None => line.push(','),
    }

    line.push_str(&format!("{:.3},{}\n", log.compass_mag_dec, !log.visible as i64));

    line
}
