//! Initial boat ingest at process start: the SQLite database is the
//! preferred source (resuming each boat from its most recent log row), with
//! a plain CSV file as the fallback for fresh installations.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use tracing::{info, warn};

use crate::simulation::boat::{BoatType, Vessel, FLAGS_ALL};
use crate::simulation::registry::BoatRegistry;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to read boat init file: {0}")]
    Io(#[from] std::io::Error),
}

/// One boat to materialize at startup.
#[derive(Debug)]
pub struct InitBoat {
    pub name: String,
    pub group: Option<String>,
    pub alt_name: Option<String>,
    pub boat: Vessel,
}

/// Loads the initial fleet. Prefers the SQLite DB when its file exists;
/// otherwise falls back to the CSV init file; with neither present the
/// simulation starts empty.
pub fn load_initial_boats(
    sqlite_path: Option<&Path>,
    csv_path: Option<&Path>,
) -> Result<Vec<InitBoat>, BootstrapError> {
    if let Some(path) = sqlite_path {
        if path.exists() {
            info!(path = %path.display(), "loading initial boats from SQLite");
            return load_from_sqlite(path);
        }
        info!(path = %path.display(), "no SQLite DB file found, not reading boat init from there");
    }

    if let Some(path) = csv_path {
        if path.exists() {
            info!(path = %path.display(), "loading initial boats from CSV");
            return load_from_csv(path);
        }
    }

    info!("boat init found nothing, continuing with no boats");
    Ok(Vec::new())
}

/// Populates a registry from init entries; failures to add (duplicate
/// names in the init source) are logged and skipped.
pub fn populate_registry(registry: &mut BoatRegistry, boats: Vec<InitBoat>) {
    for init in boats {
        let name = init.name;
        if let Err(err) = registry.add(init.boat, &name, init.group, init.alt_name) {
            warn!(boat = %name, %err, "skipping boat from init data");
        }
    }
}

fn load_from_sqlite(path: &Path) -> Result<Vec<InitBoat>, BootstrapError> {
    let conn = Connection::open(path)?;
    let mut boats = Vec::new();

    let mut boat_stmt = conn.prepare(
        "SELECT name, race, altName, desiredCourse, started, boatType, boatFlags FROM Boat;",
    )?;
    let mut log_stmt = conn.prepare(
        "SELECT lat, lon, courseWater, speedWater, boatStatus, boatLocation, \
                distanceTravelled, damage \
         FROM BoatLog WHERE boatName=? ORDER BY time DESC LIMIT 1;",
    )?;
    let mut race_stmt = conn.prepare("SELECT startLat, startLon FROM BoatRace WHERE name=?;")?;

    let mut rows = boat_stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let race: Option<String> = row.get(1)?;
        let alt_name: Option<String> = row.get(2)?;
        let desired_course: f64 = row.get(3)?;
        let started: i64 = row.get(4)?;
        let boat_type_id: i64 = row.get(5)?;
        let flags: i64 = row.get(6)?;

        let boat_type = match BoatType::from_id(boat_type_id) {
            Some(t) => t,
            None => {
                warn!(boat = %name, boat_type = boat_type_id, "skipping boat of unknown type");
                continue;
            }
        };
        let flags = (flags as u32) & FLAGS_ALL;

        let resume = log_stmt
            .query_row([&name], |log| {
                Ok((
                    log.get::<_, f64>(0)?,
                    log.get::<_, f64>(1)?,
                    log.get::<_, f64>(2)?,
                    log.get::<_, f64>(3)?,
                    log.get::<_, i64>(4)?,
                    log.get::<_, i64>(5)?,
                    log.get::<_, f64>(6)?,
                    log.get::<_, f64>(7)?,
                ))
            })
            .optional()?;

        let boat = match resume {
            Some((lat, lon, course, speed, status, location, distance, damage)) => {
                let mut boat = Vessel::new(lat, lon, boat_type, flags);
                boat.v.angle = course;
                boat.v.mag = speed;
                boat.desired_course = desired_course;
                boat.distance_travelled = distance;
                boat.damage = damage;
                boat.stopped = status == 0 && started == 0;
                boat.sails_down = status == 2;
                boat.moving_to_sea = location == 1 && started == 1;
                if boat.stopped {
                    boat.v.mag = 0.0;
                }
                boat
            }
            None => {
                // In the Boat table with nothing logged yet: a newly added
                // boat starting from its race's starting position.
                let Some(race_name) = &race else {
                    warn!(boat = %name, "boat has no log rows and no race, skipping");
                    continue;
                };
                let start = race_stmt
                    .query_row([race_name], |r| {
                        Ok((r.get::<_, f64>(0)?, r.get::<_, f64>(1)?))
                    })
                    .optional()?;
                let Some((lat, lon)) = start else {
                    warn!(boat = %name, race = %race_name, "race not found, skipping boat");
                    continue;
                };

                let mut boat = Vessel::new(lat, lon, boat_type, flags);
                boat.desired_course = desired_course;
                boat
            }
        };

        boats.push(InitBoat { name, group: race, alt_name, boat });
    }

    info!(count = boats.len(), "loaded boats from SQLite");
    Ok(boats)
}

/// CSV fallback format, one boat per line: `name,lat,lon,type[,flags]`.
fn load_from_csv(path: &Path) -> Result<Vec<InitBoat>, BootstrapError> {
    let reader = BufReader::new(File::open(path)?);
    let mut boats = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match parse_csv_line(&line) {
            Some(init) => boats.push(init),
            None => warn!(%line, "skipping malformed boat init line"),
        }
    }

    info!(count = boats.len(), "loaded boats from CSV");
    Ok(boats)
}

fn parse_csv_line(line: &str) -> Option<InitBoat> {
    let mut tokens = line.trim_end().split(',');

    let name = tokens.next().filter(|s| !s.is_empty())?;
    let lat: f64 = tokens.next()?.trim().parse().ok()?;
    let lon: f64 = tokens.next()?.trim().parse().ok()?;
    let type_id: i64 = tokens.next()?.trim().parse().ok()?;
    let flags: u32 = match tokens.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };

    if !(lat > -90.0 && lat < 90.0 && (-180.0..=180.0).contains(&lon)) || flags > FLAGS_ALL {
        return None;
    }
    let boat_type = BoatType::from_id(type_id)?;

    Some(InitBoat {
        name: name.to_string(),
        group: None,
        alt_name: None,
        boat: Vessel::new(lat, lon, boat_type, flags),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn csv_fallback_parses_boats() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Vega,44.5,-63.6,0").unwrap();
        writeln!(file, "Lyra,10.0,20.0,8,5").unwrap();
        writeln!(file, "Bad,999,0,0").unwrap();
        writeln!(file, "AlsoBad,0,0,42").unwrap();
        file.flush().unwrap();

        let boats = load_initial_boats(None, Some(file.path())).unwrap();
        assert_eq!(boats.len(), 2);
        assert_eq!(boats[0].name, "Vega");
        assert_eq!(boats[1].boat.flags, 5);
        assert!(boats[1].boat.boat_type.is_advanced());
        assert!(boats[0].boat.stopped);
    }

    #[test]
    fn missing_sources_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let boats = load_initial_boats(
            Some(&dir.path().join("missing.sql")),
            Some(&dir.path().join("missing.txt")),
        )
        .unwrap();
        assert!(boats.is_empty());
    }

    #[test]
    fn sqlite_resume_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("sim.sql");
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE Boat (
                name TEXT, race TEXT, altName TEXT, desiredCourse REAL,
                started INTEGER, boatType INTEGER, boatFlags INTEGER
            );
            CREATE TABLE BoatRace (name TEXT, startLat REAL, startLon REAL);
            CREATE TABLE BoatLog (
                boatName TEXT, time INTEGER, lat REAL, lon REAL,
                courseWater REAL, speedWater REAL, boatStatus INTEGER,
                boatLocation INTEGER, distanceTravelled REAL, damage REAL
            );
            INSERT INTO Boat VALUES ('Vega', 'Transat', 'Vega II', 245.0, 1, 2, 1);
            INSERT INTO Boat VALUES ('Fresh', 'Transat', NULL, 0.0, 0, 0, 0);
            INSERT INTO BoatRace VALUES ('Transat', 46.5, -1.8);
            INSERT INTO BoatLog VALUES ('Vega', 100, 44.0, -40.0, 250.0, 3.5, 1, 0, 5000.0, 2.5);
            INSERT INTO BoatLog VALUES ('Vega', 50, 45.0, -30.0, 240.0, 3.0, 1, 0, 2000.0, 1.0);",
        )
        .unwrap();
        drop(conn);

        let boats = load_initial_boats(Some(&db), None).unwrap();
        assert_eq!(boats.len(), 2);

        let vega = boats.iter().find(|b| b.name == "Vega").unwrap();
        // Resumed from the most recent log row (time 100).
        assert_eq!(vega.boat.pos.lat, 44.0);
        assert_eq!(vega.boat.pos.lon, -40.0);
        assert_eq!(vega.boat.v.angle, 250.0);
        assert_eq!(vega.boat.v.mag, 3.5);
        assert_eq!(vega.boat.desired_course, 245.0);
        assert_eq!(vega.boat.distance_travelled, 5000.0);
        assert_eq!(vega.boat.damage, 2.5);
        assert!(!vega.boat.stopped);
        assert_eq!(vega.group.as_deref(), Some("Transat"));
        assert_eq!(vega.alt_name.as_deref(), Some("Vega II"));

        // No log rows: placed at the race start.
        let fresh = boats.iter().find(|b| b.name == "Fresh").unwrap();
        assert_eq!(fresh.boat.pos.lat, 46.5);
        assert_eq!(fresh.boat.pos.lon, -1.8);
        assert!(fresh.boat.stopped);
    }

    #[test]
    fn populate_registry_skips_duplicates() {
        let mut registry = BoatRegistry::new();
        let boats = vec![
            InitBoat {
                name: "A".into(),
                group: None,
                alt_name: None,
                boat: Vessel::new(0.0, 0.0, BoatType::SailNavSimClassic, 0),
            },
            InitBoat {
                name: "A".into(),
                group: None,
                alt_name: None,
                boat: Vessel::new(1.0, 1.0, BoatType::SailNavSimClassic, 0),
            },
        ];
        populate_registry(&mut registry, boats);
        assert_eq!(registry.count(), 1);
    }
}
