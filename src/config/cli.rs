use crate::config::toml_config::AppConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "parkwise")]
#[command(about = "Parking slot allocation engine")]
pub struct CliConfig {
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "SQLite database file, overrides [database].path")]
    pub database: Option<String>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the database schema if missing
    Init,

    /// Create a parking lot with a number of slots
    CreateLot {
        #[arg(long)]
        name: String,

        #[arg(long, allow_negative_numbers = true)]
        slots: i64,
    },

    /// Park a vehicle in the lowest free slot of a lot
    Park {
        #[arg(long)]
        lot: String,

        #[arg(long)]
        registration: String,
    },

    /// Unpark a vehicle and print its fee
    Unpark {
        #[arg(long)]
        registration: String,
    },

    /// Show every slot of a lot with its current occupant
    Status {
        #[arg(long)]
        lot: String,
    },

    /// Aggregate one UTC day of a lot's activity
    Report {
        #[arg(long)]
        lot: String,

        #[arg(long, help = "Date as YYYY-MM-DD")]
        date: String,
    },

    /// Park many vehicles concurrently into a fresh lot and report the outcome
    Demo {
        #[arg(long, default_value = "10")]
        slots: u32,

        #[arg(long, default_value = "25")]
        vehicles: u32,

        #[arg(long, default_value = "3")]
        rounds: u32,

        #[arg(long, help = "Use an in-memory store instead of the database file")]
        in_memory: bool,
    },
}

impl CliConfig {
    /// Command-line flags win over the configuration file.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(path) = &self.database {
            config.database.path = path.clone();
            config.database.in_memory = false;
        }
        if self.json_logs {
            config.logging.json = true;
        }
        if let Command::Demo { in_memory: true, .. } = self.command {
            config.database.in_memory = true;
        }
    }
}
