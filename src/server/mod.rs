//! Line-protocol TCP request server: an accept thread feeding a bounded
//! connection buffer, a fixed worker pool owning connections end-to-end,
//! and a comma-separated request dispatcher over the engine's registry,
//! environment and command queue.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::env::Environment;
use crate::geo::GeoPos;
use crate::simulation::boat::{FLAG_CELESTIAL, FLAG_HIDDEN_IN_GROUP};
use crate::simulation::Engine;

/// Longest accepted request line, including the newline.
const MSG_BUF_SIZE: u64 = 1024;

/// Capacity of the accepted-connection ring buffer.
const MAX_PENDING_CONNECTIONS: usize = 256;

/// Default number of request worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 5;

/// Sentinel reported for unavailable environment data.
const INVALID_DOUBLE_VALUE: f64 = -999.0;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),
    #[error("failed to start server thread: {0}")]
    Thread(std::io::Error),
}

/// One statistics counter on its own cache line, so the hot-path updates
/// from different workers do not bounce a shared line around.
#[repr(align(64))]
#[derive(Default)]
struct PaddedCounter(AtomicU64);

impl PaddedCounter {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Request/connection statistics, one counter per concern and per request
/// type (including invalid requests).
#[derive(Default)]
pub struct Counters {
    accept: PaddedCounter,
    accept_fail: PaddedCounter,
    read: PaddedCounter,
    read_fail: PaddedCounter,
    data_too_long: PaddedCounter,
    message: PaddedCounter,
    message_fail: PaddedCounter,

    req_bd_nc: PaddedCounter,
    req_wind: PaddedCounter,
    req_wind_c: PaddedCounter,
    req_wind_gust: PaddedCounter,
    req_wind_gust_c: PaddedCounter,
    req_ocean_current: PaddedCounter,
    req_sea_ice: PaddedCounter,
    req_wave_height: PaddedCounter,
    req_bd: PaddedCounter,
    req_boatcmd: PaddedCounter,
    req_boatgroupmembers: PaddedCounter,
    req_sys_req_counts: PaddedCounter,
    req_invalid: PaddedCounter,
}

impl Counters {
    fn dump(&self) -> String {
        format!(
            "sys_req_counts,{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            self.accept.get(),
            self.accept_fail.get(),
            self.read.get(),
            self.read_fail.get(),
            self.data_too_long.get(),
            self.message.get(),
            self.message_fail.get(),
            self.req_bd_nc.get(),
            self.req_wind.get(),
            self.req_wind_c.get(),
            self.req_wind_gust.get(),
            self.req_wind_gust_c.get(),
            self.req_ocean_current.get(),
            self.req_sea_ice.get(),
            self.req_wave_height.get(),
            self.req_bd.get(),
            self.req_boatcmd.get(),
            self.req_boatgroupmembers.get(),
            self.req_sys_req_counts.get(),
            self.req_invalid.get(),
        )
    }
}

/// Bounded ring of accepted connections waiting for a free worker.
#[derive(Default)]
struct AcceptQueue {
    pending: Mutex<std::collections::VecDeque<TcpStream>>,
    available: Condvar,
}

impl AcceptQueue {
    /// Queues a connection; refuses when the buffer is full.
    fn push(&self, stream: TcpStream) -> Result<(), TcpStream> {
        let mut pending = self.pending.lock().expect("accept queue poisoned");
        if pending.len() >= MAX_PENDING_CONNECTIONS {
            return Err(stream);
        }
        pending.push_back(stream);
        self.available.notify_one();
        Ok(())
    }

    fn pop(&self) -> TcpStream {
        let mut pending = self.pending.lock().expect("accept queue poisoned");
        loop {
            match pending.pop_front() {
                Some(stream) => return stream,
                None => pending = self.available.wait(pending).expect("accept queue poisoned"),
            }
        }
    }
}

/// Handle to the running server. The listener and workers run for the rest
/// of the process lifetime.
pub struct NetServer {
    counters: Arc<Counters>,
    local_addr: std::net::SocketAddr,
}

impl NetServer {
    /// Binds `host:port` and starts the accept thread plus `workers`
    /// request workers.
    pub fn start(
        engine: Arc<Engine>,
        host: &str,
        port: u16,
        workers: usize,
    ) -> Result<NetServer, ServerError> {
        let listener = TcpListener::bind((host, port)).map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;
        info!(%local_addr, workers, "request server listening");

        let counters = Arc::new(Counters::default());
        let queue = Arc::new(AcceptQueue::default());

        for id in 0..workers {
            let queue = Arc::clone(&queue);
            let engine = Arc::clone(&engine);
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name(format!("ns-worker{id}"))
                .spawn(move || loop {
                    let stream = queue.pop();
                    process_connection(&engine, &counters, stream);
                })
                .map_err(ServerError::Thread)?;
        }

        let accept_counters = Arc::clone(&counters);
        thread::Builder::new()
            .name("ns-accept".into())
            .spawn(move || loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        accept_counters.accept.inc();
                        debug!(%peer, "accepted connection");
                        if queue.push(stream).is_err() {
                            warn!(%peer, "pending connection buffer full, dropping connection");
                        }
                    }
                    Err(err) => {
                        accept_counters.accept_fail.inc();
                        error!(%err, "accept failed");
                    }
                }
            })
            .map_err(ServerError::Thread)?;

        Ok(NetServer { counters, local_addr })
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// The address the listener actually bound, which matters when the
    /// configured port was 0.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }
}

fn process_connection(engine: &Engine, counters: &Counters, stream: TcpStream) {
    let reader = match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            counters.read_fail.inc();
            error!(%err, "failed to clone connection stream");
            return;
        }
    };
    let mut reader = BufReader::new(reader);
    let mut writer = stream;
    let mut line = String::new();

    loop {
        line.clear();
        match reader.by_ref().take(MSG_BUF_SIZE).read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                counters.read.inc();
                if !line.ends_with('\n') {
                    if line.len() as u64 >= MSG_BUF_SIZE {
                        warn!("excessive request message length");
                        counters.data_too_long.inc();
                    }
                    // Otherwise: stream ended mid-line; nothing to process.
                    break;
                }

                counters.message.inc();
                if !handle_message(engine, counters, &mut writer, line.trim_end_matches(['\n', '\r'])) {
                    counters.message_fail.inc();
                    break;
                }
            }
            Err(err) => {
                counters.read_fail.inc();
                debug!(%err, "connection read failed");
                break;
            }
        }
    }
}

/// Handles one request line; returns false when the connection should be
/// dropped (bad request or write failure).
fn handle_message(
    engine: &Engine,
    counters: &Counters,
    writer: &mut TcpStream,
    request: &str,
) -> bool {
    match dispatch(engine, counters, request) {
        Some(response) => writer.write_all(response.as_bytes()).is_ok(),
        None => {
            counters.req_invalid.inc();
            let _ = writer.write_all(b"error\n");
            false
        }
    }
}

/// Parses and executes a request, producing the response text, or `None`
/// for any parse or validation failure. The keyword comparisons are ordered
/// with the hottest request first.
fn dispatch(engine: &Engine, counters: &Counters, request: &str) -> Option<String> {
    let mut tokens = request.splitn(2, ',');
    let keyword = tokens.next()?;
    let rest = tokens.next().unwrap_or("");

    match keyword {
        "bd_nc" => {
            counters.req_bd_nc.inc();
            boat_data_response(engine, rest, true)
        }
        "wind" => {
            counters.req_wind.inc();
            let pos = parse_lat_lon(rest)?;
            Some(wind_response(engine.env.as_ref(), "wind", &pos, false, false))
        }
        "wind_c" => {
            counters.req_wind_c.inc();
            let pos = parse_lat_lon(rest)?;
            Some(wind_response(engine.env.as_ref(), "wind_c", &pos, false, true))
        }
        "wind_gust" => {
            counters.req_wind_gust.inc();
            let pos = parse_lat_lon(rest)?;
            Some(wind_response(engine.env.as_ref(), "wind_gust", &pos, true, false))
        }
        "wind_gust_c" => {
            counters.req_wind_gust_c.inc();
            let pos = parse_lat_lon(rest)?;
            Some(wind_response(engine.env.as_ref(), "wind_gust_c", &pos, true, true))
        }
        "ocean_current" => {
            counters.req_ocean_current.inc();
            let pos = parse_lat_lon(rest)?;
            let od = engine.env.ocean(&pos);
            let (angle, mag) = match od {
                Some(od) => (od.current.angle, od.current.mag),
                None => (INVALID_DOUBLE_VALUE, INVALID_DOUBLE_VALUE),
            };
            Some(format!("ocean_current,{:.6},{:.6},{:.6},{:.6}\n", pos.lat, pos.lon, angle, mag))
        }
        "sea_ice" => {
            counters.req_sea_ice.inc();
            let pos = parse_lat_lon(rest)?;
            let ice = engine.env.ocean(&pos).map_or(INVALID_DOUBLE_VALUE, |od| od.ice);
            Some(format!("sea_ice,{:.6},{:.6},{:.6}\n", pos.lat, pos.lon, ice))
        }
        "wave_height" => {
            counters.req_wave_height.inc();
            let pos = parse_lat_lon(rest)?;
            let height = engine.env.wave(&pos).map_or(INVALID_DOUBLE_VALUE, |wd| wd.height);
            Some(format!("wave_height,{:.6},{:.6},{:.6}\n", pos.lat, pos.lon, height))
        }
        "bd" => {
            counters.req_bd.inc();
            boat_data_response(engine, rest, false)
        }
        "boatcmd" => {
            counters.req_boatcmd.inc();
            let status = match engine.commands.push_line(rest) {
                Ok(()) => "ok",
                Err(err) => {
                    debug!(%err, "rejected boatcmd request");
                    "fail"
                }
            };
            Some(format!("boatcmd,{status}\n"))
        }
        "boatgroupmembers" => {
            counters.req_boatgroupmembers.inc();
            group_members_response(engine, rest)
        }
        "sys_req_counts" => {
            counters.req_sys_req_counts.inc();
            Some(counters.dump())
        }
        _ => None,
    }
}

fn parse_lat_lon(args: &str) -> Option<GeoPos> {
    let mut tokens = args.split(',');
    let lat: f64 = tokens.next()?.trim().parse().ok()?;
    let lon: f64 = tokens.next()?.trim().parse().ok()?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    Some(GeoPos { lat, lon })
}

fn wind_response(
    env: &dyn Environment,
    keyword: &str,
    pos: &GeoPos,
    gust: bool,
    adjust_for_current: bool,
) -> String {
    let mut wx = env.weather(pos);
    let mut gust_angle = wx.wind.angle;

    if adjust_for_current {
        if let Some(od) = env.ocean(pos) {
            gust_angle = wx.adjust_for_current(&od.current);
        }
    }

    let (angle, mag) =
        if gust { (gust_angle, wx.wind_gust) } else { (wx.wind.angle, wx.wind.mag) };

    format!("{},{:.6},{:.6},{:.6},{:.6}\n", keyword, pos.lat, pos.lon, angle, mag)
}

fn boat_data_response(engine: &Engine, name: &str, no_celestial: bool) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let keyword = if no_celestial { "bd_nc" } else { "bd" };

    let registry = engine.registry.read().expect("registry lock poisoned");

    let boat = registry
        .get(name)
        .filter(|boat| !(no_celestial && boat.has_flag(FLAG_CELESTIAL)));

    Some(match boat {
        Some(boat) => format!(
            "{},{},ok,{:.6},{:.6},{:.1},{:.2},{:.1},{:.2},{:.2},{:.1}\n",
            keyword,
            name,
            boat.pos.lat,
            boat.pos.lon,
            boat.v.angle,
            boat.v.mag,
            boat.v_ground.angle,
            boat.v_ground.mag,
            boat.leeway,
            boat.heeling_angle,
        ),
        None => format!("{keyword},{name},noboat\n"),
    })
}

fn group_members_response(engine: &Engine, name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    let registry = engine.registry.read().expect("registry lock poisoned");

    let entry = match registry.entry(name) {
        Some(entry) => entry,
        None => return Some(format!("boatgroupmembers,{name},noboat\n")),
    };

    let group = match &entry.group {
        Some(group) => group,
        None => return Some(format!("boatgroupmembers,{name},nogroup\n")),
    };

    if entry.boat.has_flag(FLAG_HIDDEN_IN_GROUP) {
        // Hidden boats get themselves back, masked, instead of the roster.
        return Some(format!("boatgroupmembers,{name},ok\n{name},?\n\n"));
    }

    let body = registry.group_membership_response(group);
    Some(format!("boatgroupmembers,{name},ok\n{body}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandAction;
    use crate::env::{OceanData, StaticEnvironment};
    use crate::geo::GeoVec;
    use crate::simulation::boat::{BoatType, Vessel, FLAG_CELESTIAL};
    use crate::simulation::Engine;

    fn engine() -> Arc<Engine> {
        let env = StaticEnvironment::calm().with_wind(270.0, 10.0).with_gust(14.0);
        Arc::new(Engine::new(Arc::new(env), 1))
    }

    fn engine_with_boat(name: &str, flags: u32) -> Arc<Engine> {
        let engine = engine();
        {
            let mut reg = engine.registry.write().unwrap();
            let mut boat = Vessel::new(44.5, -63.6, BoatType::SailNavSimClassic, flags);
            boat.v = GeoVec::new(90.0, 2.5);
            boat.v_ground = GeoVec::new(95.0, 2.75);
            reg.add(boat, name, Some("fleet".into()), None).unwrap();
        }
        engine
    }

    #[test]
    fn wind_request_echoes_position_and_wind() {
        let engine = engine();
        let counters = Counters::default();
        let resp = dispatch(&engine, &counters, "wind,44.5,-63.6").unwrap();
        assert_eq!(resp, "wind,44.500000,-63.600000,270.000000,10.000000\n");
        assert_eq!(counters.req_wind.get(), 1);
    }

    #[test]
    fn wind_gust_reports_gust_magnitude() {
        let engine = engine();
        let counters = Counters::default();
        let resp = dispatch(&engine, &counters, "wind_gust,0,0").unwrap();
        assert!(resp.starts_with("wind_gust,0.000000,0.000000,270.000000,14.000000"));
    }

    #[test]
    fn current_adjustment_changes_the_wind() {
        let env = StaticEnvironment::calm().with_wind(0.0, 5.0).with_gust(5.0).with_ocean(
            OceanData {
                current: GeoVec::new(90.0, 3.0),
                surface_temp: 15.0,
                salinity: 35.0,
                ice: 0.0,
            },
        );
        let engine = Arc::new(Engine::new(Arc::new(env), 1));
        let counters = Counters::default();

        let plain = dispatch(&engine, &counters, "wind,10,10").unwrap();
        let adjusted = dispatch(&engine, &counters, "wind_c,10,10").unwrap();
        assert_ne!(plain, adjusted);
        assert!(adjusted.starts_with("wind_c,"));
    }

    #[test]
    fn out_of_range_coordinates_are_invalid() {
        let engine = engine();
        let counters = Counters::default();
        assert!(dispatch(&engine, &counters, "wind,91.0,0").is_none());
        assert!(dispatch(&engine, &counters, "wind,0,181.0").is_none());
        assert!(dispatch(&engine, &counters, "wind,abc,0").is_none());
        assert!(dispatch(&engine, &counters, "wind").is_none());
    }

    #[test]
    fn unknown_keyword_is_invalid() {
        let engine = engine();
        let counters = Counters::default();
        assert!(dispatch(&engine, &counters, "windy,0,0").is_none());
        assert!(dispatch(&engine, &counters, "").is_none());
    }

    #[test]
    fn missing_env_data_yields_sentinels() {
        let engine = engine();
        let counters = Counters::default();
        let resp = dispatch(&engine, &counters, "ocean_current,0,0").unwrap();
        assert!(resp.contains("-999.000000,-999.000000"));
        let resp = dispatch(&engine, &counters, "sea_ice,0,0").unwrap();
        assert!(resp.ends_with("-999.000000\n"));
        let resp = dispatch(&engine, &counters, "wave_height,0,0").unwrap();
        assert!(resp.ends_with("-999.000000\n"));
    }

    #[test]
    fn boat_data_round_trip() {
        let engine = engine_with_boat("Vega", 0);
        let counters = Counters::default();

        let resp = dispatch(&engine, &counters, "bd,Vega").unwrap();
        assert_eq!(resp, "bd,Vega,ok,44.500000,-63.600000,90.0,2.50,95.0,2.75,0.00,0.0\n");

        let resp = dispatch(&engine, &counters, "bd,Nobody").unwrap();
        assert_eq!(resp, "bd,Nobody,noboat\n");
    }

    #[test]
    fn bd_nc_masks_celestial_boats() {
        let engine = engine_with_boat("Sextant", FLAG_CELESTIAL);
        let counters = Counters::default();

        let resp = dispatch(&engine, &counters, "bd,Sextant").unwrap();
        assert!(resp.contains(",ok,"));

        let resp = dispatch(&engine, &counters, "bd_nc,Sextant").unwrap();
        assert_eq!(resp, "bd_nc,Sextant,noboat\n");
    }

    #[test]
    fn boatcmd_feeds_the_command_queue() {
        let engine = engine();
        let counters = Counters::default();

        let resp = dispatch(&engine, &counters, "boatcmd,Vega,course,45").unwrap();
        assert_eq!(resp, "boatcmd,ok\n");
        let cmd = engine.commands.pop().unwrap();
        assert_eq!(cmd.name, "Vega");
        assert_eq!(cmd.action, CommandAction::CourseTrue(45));

        let resp = dispatch(&engine, &counters, "boatcmd,Vega,warp,9").unwrap();
        assert_eq!(resp, "boatcmd,fail\n");
        assert!(engine.commands.pop().is_none());
    }

    #[test]
    fn group_members_listing_and_special_cases() {
        let engine = engine_with_boat("Vega", 0);
        {
            let mut reg = engine.registry.write().unwrap();
            let boat = Vessel::new(0.0, 0.0, BoatType::SailNavSimClassic, 0);
            reg.add(boat, "Lyra", Some("fleet".into()), Some("Lyra II".into())).unwrap();
            let boat = Vessel::new(0.0, 0.0, BoatType::SailNavSimClassic, 0);
            reg.add(boat, "Loner", None, None).unwrap();
            let boat =
                Vessel::new(0.0, 0.0, BoatType::SailNavSimClassic, FLAG_HIDDEN_IN_GROUP);
            reg.add(boat, "Ghost", Some("fleet".into()), None).unwrap();
        }
        let counters = Counters::default();

        let resp = dispatch(&engine, &counters, "boatgroupmembers,Vega").unwrap();
        assert_eq!(resp, "boatgroupmembers,Vega,ok\nVega,!\nLyra,Lyra II\nGhost,!\n\n");

        let resp = dispatch(&engine, &counters, "boatgroupmembers,Missing").unwrap();
        assert_eq!(resp, "boatgroupmembers,Missing,noboat\n");

        let resp = dispatch(&engine, &counters, "boatgroupmembers,Loner").unwrap();
        assert_eq!(resp, "boatgroupmembers,Loner,nogroup\n");

        let resp = dispatch(&engine, &counters, "boatgroupmembers,Ghost").unwrap();
        assert_eq!(resp, "boatgroupmembers,Ghost,ok\nGhost,?\n\n");
    }

    #[test]
    fn counters_dump_includes_every_counter() {
        let engine = engine();
        let counters = Counters::default();
        dispatch(&engine, &counters, "wind,0,0").unwrap();
        dispatch(&engine, &counters, "wind,0,0").unwrap();

        let resp = dispatch(&engine, &counters, "sys_req_counts").unwrap();
        let fields: Vec<&str> = resp.trim_end().split(',').collect();
        assert_eq!(fields[0], "sys_req_counts");
        assert_eq!(fields.len(), 21);
        // wind counted twice, sys_req_counts once.
        assert_eq!(fields[9], "2");
        assert_eq!(fields[19], "1");
    }

    #[test]
    fn end_to_end_over_a_socket() {
        let engine = engine_with_boat("Vega", 0);
        let server = NetServer::start(engine, "127.0.0.1", 0, 2).unwrap();

        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(b"bd,Vega\nwind,1,2\n").unwrap();

        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.starts_with("bd,Vega,ok,"));

        line.clear();
        reader.read_line(&mut line).unwrap();
        assert!(line.starts_with("wind,1.000000,2.000000,"));

        // A bad request gets "error" and the connection closed.
        stream.write_all(b"nonsense\n").unwrap();
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "error\n");
        line.clear();
        assert_eq!(reader.read_line(&mut line).unwrap(), 0);
    }
}
