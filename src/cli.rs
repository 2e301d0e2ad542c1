//! Control-socket command dispatch.
//!
//! The server loop in [`crate::server`] accepts connections on a unix
//! socket, reads one line per connection, and hands it to
//! [`ControlInterface::dispatch`]. Keeping the command handling here,
//! away from any I/O, makes every command testable with plain strings.

use chrono::Utc;
use tracing::info;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::config::Config;
use crate::error::Result;
use crate::lease::StoreStats;

/// Handle for swapping the log filter at runtime.
pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

pub struct ControlInterface {
    config_json: String,
    filter: FilterHandle,
}

impl ControlInterface {
    pub fn new(config: &Config, filter: FilterHandle) -> Result<Self> {
        let config_json = serde_json::to_string_pretty(config)?;
        Ok(Self {
            config_json,
            filter,
        })
    }

    /// Executes one command line and returns the full response text.
    pub fn dispatch(&self, line: &str, stats: StoreStats) -> String {
        let line = line.trim();
        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        match command {
            "show-config" => format!("{}\n", self.config_json),
            "stats" => {
                let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                format!(
                    "time: {}\nna-leases: {}\npd-leases: {}\ndeclined-addrs: {}\ndeclined-prefixes: {}\n",
                    now,
                    stats.na_leases,
                    stats.pd_leases,
                    stats.declined_addrs,
                    stats.declined_prefixes,
                )
            }
            "set-log" => self.set_log(argument),
            _ => "UNKNOWN COMMAND\n".to_string(),
        }
    }

    fn set_log(&self, directives: &str) -> String {
        if directives.is_empty() {
            return "ERROR: missing filter directives\n".to_string();
        }
        let filter = match EnvFilter::try_new(directives) {
            Ok(filter) => filter,
            Err(error) => return format!("ERROR: {}\n", error),
        };
        match self.filter.reload(filter) {
            Ok(()) => {
                info!("log filter set to {:?}", directives);
                "OK\n".to_string()
            }
            Err(error) => format!("ERROR: {}\n", error),
        }
    }
}
