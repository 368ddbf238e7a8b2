//! Line-oriented TCP file transfer: a server exposes one directory, clients
//! list it and download files, one file per connection.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod path;
pub mod protocol;
pub mod server;

pub use client::{Client, LocalStore, NoopProgress, Outcome, Progress};
pub use config::{ClientConfig, Config, ServerConfig};
pub use error::{Error, Result};
