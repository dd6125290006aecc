//! Configuration data structures, deserialized from an optional JSON file.
//! Every field has a compiled-in default so the simulator runs from a bare
//! working directory.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Input/output paths of the engine itself.
    pub paths: PathsConfig,
    /// Data directories handed to the environment provider.
    pub data: DataConfig,
    /// TCP request server settings.
    pub server: ServerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    /// FIFO (or file) the command reader follows.
    pub commands: String,
    /// CSV fallback for the initial fleet.
    pub boat_init: String,
    /// Directory for per-boat CSV logs; logging pauses while it is absent.
    pub csv_log_dir: String,
    /// SQLite database for init state and boat logs.
    pub sqlite_db: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            commands: "./cmds".into(),
            boat_init: "./boatinit.txt".into(),
            csv_log_dir: "./boatlogs/".into(),
            sqlite_db: "./sailnavsim.sql".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    pub weather_dir_f006: String,
    pub weather_dir_f009: String,
    pub ocean_data_t030: String,
    pub ocean_data_t042: String,
    pub wave_data_dir: String,
    pub geo_water_data_dir: String,
    pub compass_data_dir: String,
    pub celestial_data_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            weather_dir_f006: "wx_data_f006/".into(),
            weather_dir_f009: "wx_data_f009/".into(),
            ocean_data_t030: "ocean_data/t030.csv".into(),
            ocean_data_t042: "ocean_data/t042.csv".into(),
            wave_data_dir: "wave_data/".into(),
            geo_water_data_dir: "geo_water_data/".into(),
            compass_data_dir: "compass_data/".into(),
            celestial_data_dir: "celestial_data/".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address; loopback unless deliberately exposed.
    pub host: String,
    /// Number of request worker threads.
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".into(),
            worker_threads: crate::server::DEFAULT_WORKER_THREADS,
        }
    }
}
