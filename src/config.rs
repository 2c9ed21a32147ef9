//! Runtime configuration: `PORT` / `DATABASE_URL` env vars, with `clap`
//! flags available to override them for local runs.

use clap::Parser;

/// Coordination server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "challenge-server")]
#[command(about = "Realtime coordination server for peer-to-peer game challenges")]
pub struct Config {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

impl Config {
    /// Parse configuration from environment variables and CLI flags.
    pub fn load() -> Self {
        Self::parse()
    }
}
