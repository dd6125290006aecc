pub mod bootstrap; // Initial fleet ingest (SQLite preferred, CSV fallback)
pub mod command; // Command parsing, queue and FIFO reader
pub mod config; // CLI arguments and configuration handling
pub mod env; // Environment provider contract and data types
pub mod geo; // Geodesy primitives and land-visibility sampling
pub mod logger; // Background CSV + SQLite boat logging
pub mod perf; // Deterministic performance workload
pub mod server; // TCP line-protocol request server
pub mod simulation; // Engine aggregate, vessel physics, tick loop

// Re-export commonly used items
pub mod prelude {
    pub use crate::command::{Command, CommandAction, CommandQueue};
    pub use crate::config::{Args, Config, ConfigLoader};
    pub use crate::env::{Environment, OceanData, StaticEnvironment, WaveData, Weather};
    pub use crate::geo::{GeoPos, GeoVec};
    pub use crate::logger::{LogBatch, LogEntry, Logger};
    pub use crate::simulation::boat::{BoatType, Vessel};
    pub use crate::simulation::registry::BoatRegistry;
    pub use crate::simulation::{Engine, SimulationApp};
}
