use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON config file with `server` and `client` sections
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve a directory
    Serve {
        /// Directory to serve files from
        #[arg(long)]
        root: Option<PathBuf>,
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Cap on concurrent sessions
        #[arg(long)]
        max_connections: Option<usize>,
    },
    /// List files on a server
    List {
        /// Server host
        #[arg(long)]
        host: Option<String>,
        /// Server port
        #[arg(long)]
        port: Option<u16>,
        /// Print the listing as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Download files (comma-separated names and glob patterns allowed)
    Get {
        /// Files to download
        #[arg(required = true)]
        names: Vec<String>,
        /// Server host
        #[arg(long)]
        host: Option<String>,
        /// Server port
        #[arg(long)]
        port: Option<u16>,
        /// Directory to save downloads in
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
}
