//! Command-line surface of the daemon.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "leapgated", version, about = "Lutron LEAP gateway daemon")]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Directory of static assets served at the root.
    #[arg(long, default_value = "assets")]
    pub asset_dir: PathBuf,

    /// Path of the persisted state file (credentials + cache).
    #[arg(long, default_value = "state.json")]
    pub state_path: PathBuf,

    /// Secret URL prefix every route is nested under (e.g. "somesecret").
    #[arg(long, default_value = "")]
    pub base_path: String,

    /// Lutron account username.
    #[arg(long, env = "LEAP_USERNAME")]
    pub username: String,

    /// Lutron account password.
    #[arg(long, env = "LEAP_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// The base path normalized to `/prefix` form, or `None` when the
    /// routes live at the root.
    pub fn normalized_base_path(&self) -> Option<String> {
        let trimmed = self.base_path.trim_matches('/');
        if trimmed.is_empty() {
            None
        } else {
            Some(format!("/{trimmed}"))
        }
    }
}
