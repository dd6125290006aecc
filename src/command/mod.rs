//! Command ingress: newline-delimited boat commands arriving through an
//! external FIFO or the TCP server, parsed into a typed stream and queued
//! for the simulation loop to drain between ticks.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::simulation::boat::{BOAT_TYPE_MAX_VALUE, FLAGS_ALL};

/// Upper bound on queued-but-undrained commands. The simulation drains the
/// queue every second, so hitting this means the producers have run away.
const MAX_PENDING_COMMANDS: usize = 16 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("command queue full, command dropped")]
    QueueFull,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command line")]
    Empty,
    #[error("missing boat name")]
    MissingName,
    #[error("missing action keyword")]
    MissingAction,
    #[error("unknown action keyword: {0}")]
    UnknownAction(String),
    #[error("missing value for action")]
    MissingValue,
    #[error("malformed value: {0}")]
    MalformedValue(String),
    #[error("value out of range")]
    OutOfRange,
}

/// Parameters shared by `add` and `add_g`.
#[derive(Debug, Clone, PartialEq)]
pub struct AddBoatParams {
    pub lat: f64,
    pub lon: f64,
    pub boat_type: i64,
    pub flags: u32,
}

/// A validated boat command addressed to `name`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    Stop,
    Start,
    CourseTrue(i64),
    CourseMag(i64),
    SailArea(i64),
    AddBoat(AddBoatParams),
    AddBoatWithGroup { params: AddBoatParams, group: String, alt_name: Option<String> },
    RemoveBoat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub action: CommandAction,
}

impl Command {
    /// Parses one comma-separated command line. The first token is the
    /// target boat name, the second the action keyword; the keyword fixes
    /// the number and types of the remaining values.
    pub fn parse(line: &str) -> Result<Command, CommandParseError> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Err(CommandParseError::Empty);
        }

        let mut tokens = line.split(',');

        let name = tokens.next().filter(|s| !s.is_empty()).ok_or(CommandParseError::MissingName)?;
        let keyword = tokens.next().ok_or(CommandParseError::MissingAction)?;

        let action = match keyword {
            "stop" => CommandAction::Stop,
            "start" => CommandAction::Start,
            "course" => CommandAction::CourseTrue(parse_course(&mut tokens)?),
            "course_m" => CommandAction::CourseMag(parse_course(&mut tokens)?),
            "sail_area" => {
                let v = parse_int(&mut tokens)?;
                if !(0..=100).contains(&v) {
                    return Err(CommandParseError::OutOfRange);
                }
                CommandAction::SailArea(v)
            }
            "add" => CommandAction::AddBoat(parse_add_params(&mut tokens)?),
            "add_g" => {
                let params = parse_add_params(&mut tokens)?;
                let group = tokens
                    .next()
                    .filter(|s| !s.is_empty())
                    .ok_or(CommandParseError::MissingValue)?
                    .to_string();
                let alt = tokens.next().ok_or(CommandParseError::MissingValue)?;
                let alt_name = if alt.is_empty() || alt == "!" { None } else { Some(alt.to_string()) };
                CommandAction::AddBoatWithGroup { params, group, alt_name }
            }
            "remove" => CommandAction::RemoveBoat,
            other => return Err(CommandParseError::UnknownAction(other.to_string())),
        };

        Ok(Command { name: name.to_string(), action })
    }
}

impl fmt::Display for Command {
    /// The canonical wire form of the command; parsing it back yields an
    /// equal value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            CommandAction::Stop => write!(f, "{},stop", self.name),
            CommandAction::Start => write!(f, "{},start", self.name),
            CommandAction::CourseTrue(c) => write!(f, "{},course,{c}", self.name),
            CommandAction::CourseMag(c) => write!(f, "{},course_m,{c}", self.name),
            CommandAction::SailArea(a) => write!(f, "{},sail_area,{a}", self.name),
            CommandAction::AddBoat(p) => {
                write!(f, "{},add,{},{},{},{}", self.name, p.lat, p.lon, p.boat_type, p.flags)
            }
            CommandAction::AddBoatWithGroup { params: p, group, alt_name } => write!(
                f,
                "{},add_g,{},{},{},{},{},{}",
                self.name,
                p.lat,
                p.lon,
                p.boat_type,
                p.flags,
                group,
                alt_name.as_deref().unwrap_or("!")
            ),
            CommandAction::RemoveBoat => write!(f, "{},remove", self.name),
        }
    }
}

fn parse_int<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<i64, CommandParseError> {
    let s = tokens.next().ok_or(CommandParseError::MissingValue)?;
    s.trim().parse::<i64>().map_err(|_| CommandParseError::MalformedValue(s.to_string()))
}

fn parse_double<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<f64, CommandParseError> {
    let s = tokens.next().ok_or(CommandParseError::MissingValue)?;
    s.trim().parse::<f64>().map_err(|_| CommandParseError::MalformedValue(s.to_string()))
}

fn parse_course<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<i64, CommandParseError> {
    let v = parse_int(tokens)?;
    if !(0..=360).contains(&v) {
        return Err(CommandParseError::OutOfRange);
    }
    Ok(v)
}

fn parse_add_params<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<AddBoatParams, CommandParseError> {
    let lat = parse_double(tokens)?;
    let lon = parse_double(tokens)?;
    let boat_type = parse_int(tokens)?;
    let flags = parse_int(tokens)?;

    let valid = lat > -90.0
        && lat < 90.0
        && (-180.0..=180.0).contains(&lon)
        && (0..=BOAT_TYPE_MAX_VALUE).contains(&boat_type)
        && (0..=i64::from(FLAGS_ALL)).contains(&flags);
    if !valid {
        return Err(CommandParseError::OutOfRange);
    }

    Ok(AddBoatParams { lat, lon, boat_type, flags: flags as u32 })
}

/// Bounded mutex-guarded FIFO between the ingress producers (FIFO reader
/// thread, server `boatcmd` handler) and the simulation loop.
#[derive(Debug, Default)]
pub struct CommandQueue {
    queue: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    pub fn new() -> CommandQueue {
        CommandQueue::default()
    }

    /// Appends a command, refusing (and dropping it) when the queue is at
    /// capacity.
    pub fn push(&self, cmd: Command) -> Result<(), CommandError> {
        let mut queue = self.queue.lock().expect("command queue poisoned");
        if queue.len() >= MAX_PENDING_COMMANDS {
            return Err(CommandError::QueueFull);
        }
        queue.push_back(cmd);
        Ok(())
    }

    /// Pops the oldest pending command, if any.
    pub fn pop(&self) -> Option<Command> {
        self.queue.lock().expect("command queue poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("command queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses a raw line and enqueues it on success.
    pub fn push_line(&self, line: &str) -> Result<(), CommandError> {
        let cmd = Command::parse(line)?;
        self.push(cmd)
    }
}

/// Spawns the blocking reader on the external command path (normally a
/// FIFO). The open happens on the reader thread, since opening a FIFO
/// blocks until a writer shows up. Lines are parsed and queued as they
/// arrive; at end of input the reader sleeps a second and tries again,
/// which is the desired behaviour for a FIFO whose writers come and go.
pub fn spawn_reader(
    path: PathBuf,
    queue: Arc<CommandQueue>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("cmd-reader".into()).spawn(move || {
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                error!(path = %path.display(), %err, "failed to open command input path");
                return;
            }
        };
        info!(path = %path.display(), "command reader started");

        let mut reader = BufReader::new(file);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => thread::sleep(Duration::from_secs(1)),
                Ok(_) => {
                    if let Err(err) = queue.push_line(&line) {
                        warn!(%err, line = line.trim_end(), "discarding command");
                    }
                }
                Err(err) => {
                    error!(%err, "command input read failed");
                    thread::sleep(Duration::from_secs(1));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_actions_parse() {
        assert_eq!(
            Command::parse("Vega,stop\n").unwrap(),
            Command { name: "Vega".into(), action: CommandAction::Stop }
        );
        assert_eq!(
            Command::parse("Vega,start").unwrap(),
            Command { name: "Vega".into(), action: CommandAction::Start }
        );
        assert_eq!(
            Command::parse("Vega,remove").unwrap(),
            Command { name: "Vega".into(), action: CommandAction::RemoveBoat }
        );
    }

    #[test]
    fn course_bounds_are_inclusive() {
        assert!(Command::parse("V,course,0").is_ok());
        assert!(Command::parse("V,course,360").is_ok());
        assert_eq!(Command::parse("V,course,361"), Err(CommandParseError::OutOfRange));
        assert_eq!(Command::parse("V,course,-1"), Err(CommandParseError::OutOfRange));
        assert!(Command::parse("V,course_m,270").is_ok());
    }

    #[test]
    fn sail_area_is_percent() {
        assert!(Command::parse("V,sail_area,0").is_ok());
        assert!(Command::parse("V,sail_area,100").is_ok());
        assert_eq!(Command::parse("V,sail_area,101"), Err(CommandParseError::OutOfRange));
    }

    #[test]
    fn add_validates_every_field() {
        assert!(Command::parse("V,add,44.5,-63.6,0,0").is_ok());
        assert!(Command::parse("V,add,44.5,-63.6,8,63").is_ok());

        // Latitude bounds are exclusive, the poles are not addable.
        assert_eq!(Command::parse("V,add,90.0,0,0,0"), Err(CommandParseError::OutOfRange));
        assert_eq!(Command::parse("V,add,0,-180.5,0,0"), Err(CommandParseError::OutOfRange));
        assert_eq!(Command::parse("V,add,0,0,9,0"), Err(CommandParseError::OutOfRange));
        assert_eq!(Command::parse("V,add,0,0,0,64"), Err(CommandParseError::OutOfRange));
        assert_eq!(Command::parse("V,add,0,0,0"), Err(CommandParseError::MissingValue));
        assert!(matches!(
            Command::parse("V,add,abc,0,0,0"),
            Err(CommandParseError::MalformedValue(_))
        ));
    }

    #[test]
    fn add_g_carries_group_and_alt_name() {
        let cmd = Command::parse("V,add_g,10.0,20.0,1,3,FleetRace,Vega II").unwrap();
        match cmd.action {
            CommandAction::AddBoatWithGroup { params, group, alt_name } => {
                assert_eq!(params.boat_type, 1);
                assert_eq!(params.flags, 3);
                assert_eq!(group, "FleetRace");
                assert_eq!(alt_name.as_deref(), Some("Vega II"));
            }
            other => panic!("unexpected action: {other:?}"),
        }

        // "!" marks an absent alternate name.
        let cmd = Command::parse("V,add_g,10.0,20.0,1,3,FleetRace,!").unwrap();
        match cmd.action {
            CommandAction::AddBoatWithGroup { alt_name, .. } => assert!(alt_name.is_none()),
            other => panic!("unexpected action: {other:?}"),
        }

        assert_eq!(
            Command::parse("V,add_g,10.0,20.0,1,3,,x"),
            Err(CommandParseError::MissingValue)
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(Command::parse(""), Err(CommandParseError::Empty));
        assert_eq!(Command::parse("\n"), Err(CommandParseError::Empty));
        assert_eq!(Command::parse(",stop"), Err(CommandParseError::MissingName));
        assert_eq!(Command::parse("V"), Err(CommandParseError::MissingAction));
        assert_eq!(
            Command::parse("V,launch"),
            Err(CommandParseError::UnknownAction("launch".into()))
        );
    }

    #[test]
    fn canonical_form_round_trips() {
        for line in [
            "Vega,stop",
            "Vega,start",
            "Vega,course,180",
            "Vega,course_m,45",
            "Vega,sail_area,75",
            "Vega,add,44.5,-63.6,2,17",
            "Vega,add_g,44.5,-63.6,2,17,Fleet,Alt",
            "Vega,add_g,44.5,-63.6,2,17,Fleet,!",
            "Vega,remove",
        ] {
            let cmd = Command::parse(line).unwrap();
            assert_eq!(cmd.to_string(), line);
            assert_eq!(Command::parse(&cmd.to_string()).unwrap(), cmd);
        }
    }

    #[test]
    fn queue_is_fifo() {
        let q = CommandQueue::new();
        q.push_line("A,stop").unwrap();
        q.push_line("B,start").unwrap();
        q.push_line("C,course,10").unwrap();

        assert_eq!(q.len(), 3);
        assert_eq!(q.pop().unwrap().name, "A");
        assert_eq!(q.pop().unwrap().name, "B");
        assert_eq!(q.pop().unwrap().name, "C");
        assert!(q.pop().is_none());
    }

    #[test]
    fn full_queue_refuses_further_commands() {
        let q = CommandQueue::new();
        for _ in 0..MAX_PENDING_COMMANDS {
            q.push_line("A,stop").unwrap();
        }

        assert_eq!(q.push_line("B,start"), Err(CommandError::QueueFull));
        assert_eq!(q.len(), MAX_PENDING_COMMANDS);

        // Draining one makes room again.
        q.pop().unwrap();
        q.push_line("B,start").unwrap();
    }
}
