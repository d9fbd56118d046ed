//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::catalog::DEFAULT_ENDPOINT;

#[derive(Parser)]
#[command(name = "booktimer", about = "reading-time tracker for web novel tabs")]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/booktimer/booktimerd.sock)
    #[arg(long, short = 's', global = true, env = "BOOKTIMER_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (scheduler + UDS server)
    Daemon(DaemonOpts),
    /// Show today's and total reading time
    Stats {
        /// Print the raw stats object
        #[arg(long)]
        json: bool,
    },
    /// Live-refresh stats view
    Watch,
    /// Write the portable store keys as JSON (stdout when no file is given)
    Export {
        output: Option<PathBuf>,
    },
    /// Replace the portable store keys from an exported JSON file
    Import {
        input: PathBuf,
    },
    /// Show per-site enable flags
    Sites,
    /// Enable or disable tracking for one site domain
    SiteEnable {
        /// kakuyomu.jp, syosetu.org, pixiv.net or syosetu.com
        domain: String,
        #[arg(long)]
        off: bool,
    },
    /// Show settings, or merge a partial JSON object into them
    Settings {
        #[arg(long, value_name = "JSON")]
        set: Option<String>,
    },
    /// Drop today's records and subtract them from the total
    ResetToday,
    /// Zero every total and drop every record
    ResetAll,
    /// Per-tab session state (JSON)
    Dump,
    /// Send one raw JSON-RPC request and print the result
    Call {
        method: String,
        /// JSON params object
        params: Option<String>,
    },
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// JSON store file (default: $XDG_DATA_HOME/booktimer/store.json)
    #[arg(long, env = "BOOKTIMER_STORE")]
    pub store: Option<PathBuf>,

    /// Narou novel API endpoint
    #[arg(long, env = "BOOKTIMER_NAROU_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub catalog_endpoint: String,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/booktimer/booktimerd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/booktimer-{user}/booktimerd.sock")
}

/// Default store file under the XDG data directory.
pub fn default_store_path() -> PathBuf {
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .unwrap_or_else(std::env::temp_dir);
    data_home.join("booktimer").join("store.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_site_enable() {
        let cli = Cli::try_parse_from(["booktimer", "site-enable", "pixiv.net", "--off"])
            .expect("parses");
        match cli.command {
            Command::SiteEnable { domain, off } => {
                assert_eq!(domain, "pixiv.net");
                assert!(off);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn daemon_defaults_to_public_endpoint() {
        let cli = Cli::try_parse_from(["booktimer", "-s", "/tmp/x.sock", "daemon"]).expect("parses");
        assert_eq!(cli.socket_path.as_deref(), Some("/tmp/x.sock"));
        match cli.command {
            Command::Daemon(opts) => {
                if std::env::var_os("BOOKTIMER_NAROU_ENDPOINT").is_none() {
                    assert_eq!(opts.catalog_endpoint, DEFAULT_ENDPOINT);
                }
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn store_path_ends_in_booktimer_dir() {
        let path = default_store_path();
        assert!(path.ends_with("booktimer/store.json"));
    }
}
