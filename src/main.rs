use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sailnavsim::bootstrap;
use sailnavsim::command;
use sailnavsim::config::{Args, ConfigLoader, USAGE, VERSION_STRING};
use sailnavsim::env::StaticEnvironment;
use sailnavsim::perf;
use sailnavsim::server::NetServer;
use sailnavsim::simulation::{Engine, SimulationApp};
use sailnavsim::logger::Logger;

const CONFIG_FILE: &str = "config.json";

fn main() {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            exit(1);
        }
    };

    if args.show_version {
        println!("{VERSION_STRING}");
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("{VERSION_STRING}");

    if let Err(err) = run(args) {
        error!("{err}");
        let mut source = err.source();
        while let Some(cause) = source {
            error!("  caused by: {cause}");
            source = cause.source();
        }
        exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = ConfigLoader::load_or_default(Path::new(CONFIG_FILE))?;

    // A data-backed provider (gridded weather/ocean/wave/geo files under
    // config.data) plugs in through the Environment trait; without one the
    // engine runs against uniform static conditions.
    let env = Arc::new(StaticEnvironment::calm());

    let engine = Arc::new(Engine::with_clock_seed(env)?);

    if args.perf {
        perf::run(engine);
        return Ok(());
    }

    // Initial fleet, resumed from the database where possible.
    {
        let boats = bootstrap::load_initial_boats(
            Some(Path::new(&config.paths.sqlite_db)),
            Some(Path::new(&config.paths.boat_init)),
        )?;
        let mut registry = engine.registry.write().expect("registry lock poisoned");
        bootstrap::populate_registry(&mut registry, boats);
        info!(boats = registry.count(), "fleet initialized");
    }

    command::spawn_reader(PathBuf::from(&config.paths.commands), Arc::clone(&engine.commands))?;

    let logger = Logger::start(
        Some(PathBuf::from(&config.paths.csv_log_dir)),
        Some(PathBuf::from(&config.paths.sqlite_db)),
    )?;

    if let Some(port) = args.net_port {
        NetServer::start(
            Arc::clone(&engine),
            &config.server.host,
            port,
            config.server.worker_threads,
        )?;
    }

    let mut app = SimulationApp::new(engine, Some(logger));
    app.run()?;

    Ok(())
}
