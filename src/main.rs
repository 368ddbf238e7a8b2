mod cli;

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use cli::{Cli, Commands};
use relay::client::{Client, Outcome, Progress, split_names};
use relay::config::Config;
use relay::logging::init_logging;
use relay::server;

/// Prints one line per finished part and per rename.
struct ConsoleProgress;

impl Progress for ConsoleProgress {
    fn renamed(&self, requested: &str, local: &str) {
        println!("[i] File '{}' exists. Saving as '{}'.", requested, local);
    }

    fn part(&self, name: &str, part: u32, parts: u32, received: u64, len: u64) {
        if received == len {
            println!("Downloading '{}' part {}/{} ... 100%", name, part, parts);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Serve {
            root,
            bind,
            port,
            max_connections,
        } => {
            let server_config = &mut config.server;
            if let Some(root) = root {
                server_config.root = root;
            }
            if let Some(bind) = bind {
                server_config.bind = bind;
            }
            if let Some(port) = port {
                server_config.port = port;
            }
            if max_connections.is_some() {
                server_config.max_connections = max_connections;
            }

            if !server_config.root.exists() {
                std::fs::create_dir_all(&server_config.root)?;
            }
            println!(
                "Serving {:?} on {}",
                server_config.root,
                server_config.addr()
            );

            tokio::select! {
                result = server::run_server(config.server.clone()) => result?,
                _ = tokio::signal::ctrl_c() => println!("Shutting down."),
            }
        }
        Commands::List { host, port, json } => {
            if let Some(host) = host {
                config.client.host = host;
            }
            if let Some(port) = port {
                config.client.port = port;
            }

            let names = Client::new(&config.client).list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                println!("Available files:");
                for name in names {
                    println!("  {}", name);
                }
            }
        }
        Commands::Get {
            names,
            host,
            port,
            save_dir,
        } => {
            if let Some(host) = host {
                config.client.host = host;
            }
            if let Some(port) = port {
                config.client.port = port;
            }
            if let Some(save_dir) = save_dir {
                config.client.save_dir = save_dir;
            }

            let client = Client::new(&config.client).with_progress(Arc::new(ConsoleProgress));
            let requested = client.expand(&split_names(names.as_slice())).await?;
            if requested.is_empty() {
                bail!("nothing to download");
            }

            let mut failed = 0;
            for (name, result) in client.download_all(requested).await {
                match result {
                    Ok(Outcome::Saved { path, bytes }) => {
                        println!("[✓] '{}' saved to {} ({} bytes)", name, path.display(), bytes)
                    }
                    Ok(Outcome::Empty) => println!("[-] Nothing to download for '{}'.", name),
                    Ok(Outcome::Refused(status)) => {
                        failed += 1;
                        println!("[-] Server refused '{}': {}", name, status)
                    }
                    Err(e) => {
                        failed += 1;
                        println!("[x] Error downloading '{}': {}", name, e)
                    }
                }
            }
            if failed > 0 {
                bail!("{} download(s) failed", failed);
            }
        }
    }

    Ok(())
}
