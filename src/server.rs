use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::path::resolve;
use crate::protocol::{
    COMMAND_LIMIT, Command, Status, TransferHeader, part_count, with_deadline, write_chunk,
    write_text,
};

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, root = %config.root.display(), "server listening");
    serve(listener, config).await
}

/// Accept loop. Every connection gets its own task; with
/// `max_connections` set, accepting waits for a free slot.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> Result<()> {
    config.validate()?;
    let root = config
        .root
        .canonicalize()
        .map_err(|e| Error::filesystem(&config.root, e))?;
    let ctx = Arc::new(SessionContext {
        root,
        chunk_size: config.chunk_size,
        io_timeout: config.io_timeout(),
    });
    let limit = config.max_connections.map(|n| Arc::new(Semaphore::new(n)));

    loop {
        let permit = match &limit {
            Some(slots) => Some(
                slots
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(e)))?,
            ),
            None => None,
        };

        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            Session::new(ctx, peer).run(socket).await;
        });
    }
}

struct SessionContext {
    root: PathBuf,
    chunk_size: usize,
    io_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingCommand,
    Listing,
    Sending,
    Rejecting,
    Closed,
}

/// One connection, one command.
struct Session {
    ctx: Arc<SessionContext>,
    peer: SocketAddr,
    state: SessionState,
}

impl Session {
    fn new(ctx: Arc<SessionContext>, peer: SocketAddr) -> Self {
        Self {
            ctx,
            peer,
            state: SessionState::AwaitingCommand,
        }
    }

    async fn run(mut self, mut socket: TcpStream) {
        info!(peer = %self.peer, "connection accepted");
        let _ = socket.set_nodelay(true);

        match self.handle(&mut socket).await {
            Ok(()) => {}
            Err(Error::ConnectionClosed) if self.state == SessionState::AwaitingCommand => {
                debug!(peer = %self.peer, "closed before sending a command");
            }
            Err(e) => {
                error!(peer = %self.peer, state = ?self.state, error = %e, "session failed");
            }
        }

        let _ = socket.shutdown().await;
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        debug!(peer = %self.peer, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    async fn handle(&mut self, socket: &mut TcpStream) -> Result<()> {
        match self.read_command(socket).await? {
            Command::List => {
                self.transition(SessionState::Listing);
                self.send_listing(socket).await
            }
            Command::Get(name) => self.send_file(socket, &name).await,
            Command::Invalid(raw) => {
                self.refuse(socket, Error::UnknownCommand { command: raw })
                    .await
            }
        }
    }

    /// The command is whatever one bounded read returns.
    async fn read_command(&self, socket: &mut TcpStream) -> Result<Command> {
        let mut buf = vec![0u8; COMMAND_LIMIT];
        let n = with_deadline(self.ctx.io_timeout, async {
            Ok::<_, Error>(socket.read(&mut buf).await?)
        })
        .await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(Command::parse(&String::from_utf8_lossy(&buf[..n])))
    }

    async fn send_listing(&mut self, socket: &mut TcpStream) -> Result<()> {
        let root = self.ctx.root.clone();
        let names = tokio::task::spawn_blocking(move || list_root(&root))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        debug!(peer = %self.peer, entries = names.len(), "sending listing");
        write_text(socket, &names.join("\n"), self.ctx.io_timeout).await
    }

    async fn send_file(&mut self, socket: &mut TcpStream, name: &str) -> Result<()> {
        let (path, mut file, size) = match self.open_request(name).await {
            Ok(opened) => opened,
            Err(e) => return self.refuse(socket, e).await,
        };

        self.transition(SessionState::Sending);
        let chunk_size = self.ctx.chunk_size;
        let parts = part_count(size, chunk_size)?;
        let header = TransferHeader::Ready {
            name: name.to_string(),
            parts,
        };
        write_text(socket, &header.encode(), self.ctx.io_timeout).await?;

        let mut buf = vec![0u8; size.min(chunk_size as u64) as usize];
        let mut remaining = size;
        for _ in 0..parts {
            let len = remaining.min(chunk_size as u64) as usize;
            file.read_exact(&mut buf[..len])
                .await
                .map_err(|e| Error::filesystem(&path, e))?;
            write_chunk(socket, &buf[..len], self.ctx.io_timeout).await?;
            remaining -= len as u64;
        }

        info!(peer = %self.peer, file = %name, parts, bytes = size, "file sent");
        Ok(())
    }

    async fn open_request(&self, name: &str) -> Result<(PathBuf, File, u64)> {
        let path = resolve(&self.ctx.root, name)?;
        if name.is_empty() {
            return Err(Error::FileNotFound {
                name: name.to_string(),
            });
        }
        let (file, size) = open_regular(&path, name).await?;
        Ok((path, file, size))
    }

    /// Answer a refused request with its sentinel. Errors without one end
    /// the session instead.
    async fn refuse(&mut self, socket: &mut TcpStream, err: Error) -> Result<()> {
        let Some(status) = refusal_status(&err) else {
            return Err(err);
        };
        match &err {
            Error::FileNotFound { name } => {
                debug!(peer = %self.peer, requested = %name, "no such file");
            }
            _ => warn!(peer = %self.peer, error = %err, "request refused"),
        }
        self.reject(socket, status).await
    }

    async fn reject(&mut self, socket: &mut TcpStream, status: Status) -> Result<()> {
        self.transition(SessionState::Rejecting);
        let header = TransferHeader::Rejected(status);
        write_text(socket, &header.encode(), self.ctx.io_timeout).await
    }
}

/// Sentinel sent for a request that fails before its header goes out. An
/// unreadable file is reported to the peer as missing; the io error itself
/// only reaches the log.
fn refusal_status(err: &Error) -> Option<Status> {
    match err {
        Error::PathTraversal { .. } => Some(Status::InvalidPath),
        Error::FileNotFound { .. } | Error::Filesystem { .. } => Some(Status::FileNotFound),
        Error::UnknownCommand { .. } => Some(Status::InvalidCommand),
        _ => None,
    }
}

async fn open_regular(path: &Path, name: &str) -> Result<(File, u64)> {
    let not_found = || Error::FileNotFound {
        name: name.to_string(),
    };
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(Error::filesystem(path, e)),
    };
    let metadata = file
        .metadata()
        .await
        .map_err(|e| Error::filesystem(path, e))?;
    if !metadata.is_file() {
        return Err(not_found());
    }
    Ok((file, metadata.len()))
}

/// Immediate entries of `root`, files and directories alike, in
/// enumeration order.
fn list_root(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::filesystem(path, std::io::Error::from(e))
        })?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_root_is_shallow() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/inner.txt"), b"i").unwrap();

        let mut names = list_root(dir.path()).unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "nested".to_string()]);
    }

    #[test]
    fn list_root_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_root(dir.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_regular_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"12345").unwrap();

        let (_, size) = open_regular(&dir.path().join("f"), "f").await.unwrap();
        assert_eq!(size, 5);
        assert!(matches!(
            open_regular(dir.path(), "").await,
            Err(Error::FileNotFound { .. })
        ));
        match open_regular(&dir.path().join("missing"), "missing").await {
            Err(Error::FileNotFound { name }) => assert_eq!(name, "missing"),
            other => panic!("expected FileNotFound, got {:?}", other.map(|(_, n)| n)),
        }
    }

    #[tokio::test]
    async fn open_regular_keeps_other_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let err = open_regular(&dir.path().join("a.txt/x"), "a.txt/x")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Filesystem { .. }));
        assert_eq!(refusal_status(&err), Some(Status::FileNotFound));
    }

    #[test]
    fn refusals_map_to_sentinels() {
        let traversal = Error::PathTraversal {
            requested: "../x".into(),
        };
        let missing = Error::FileNotFound { name: "x".into() };
        let unknown = Error::UnknownCommand {
            command: "PUT x".into(),
        };
        assert_eq!(refusal_status(&traversal), Some(Status::InvalidPath));
        assert_eq!(refusal_status(&missing), Some(Status::FileNotFound));
        assert_eq!(refusal_status(&unknown), Some(Status::InvalidCommand));
        assert_eq!(refusal_status(&Error::ConnectionClosed), None);
        assert_eq!(refusal_status(&Error::Timeout), None);
    }
}
