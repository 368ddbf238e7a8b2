use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use glob::Pattern;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    Command, LISTING_LIMIT, Status, TransferHeader, read_chunk_length, read_header,
    with_deadline, write_text,
};

/// Socket read size while draining a chunk.
const RECV_BLOCK: usize = 64 * 1024;

/// Receives download events. Every method defaults to a no-op.
pub trait Progress: Send + Sync {
    /// A collision forced `requested` to be saved as `local`.
    fn renamed(&self, _requested: &str, _local: &str) {}
    /// `received` of `len` bytes of part `part` (1-based) of `parts` are in.
    fn part(&self, _name: &str, _part: u32, _parts: u32, _received: u64, _len: u64) {}
}

pub struct NoopProgress;
impl Progress for NoopProgress {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Saved { path: PathBuf, bytes: u64 },
    /// The server announced zero parts.
    Empty,
    Refused(Status),
}

/// Save directory plus the lock that serializes local name selection.
pub struct LocalStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a fresh file for `name`, appending `(1)`, `(2)`, ... before the
    /// extension until the name is free. Creating the file is the reservation.
    pub async fn reserve(&self, name: &str) -> Result<(PathBuf, File)> {
        let _guard = self.lock.lock().await;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::filesystem(&self.dir, e))?;

        let mut counter = 0u32;
        loop {
            let candidate = self.dir.join(candidate_name(name, counter));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => counter += 1,
                Err(e) => return Err(Error::filesystem(candidate, e)),
            }
        }
    }
}

/// `report.pdf` with `n = 2` becomes `report(2).pdf`; `n = 0` is the name
/// itself.
pub fn candidate_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    match path.extension() {
        Some(ext) => format!("{}({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{}({})", stem, n),
    }
}

/// Last component of the name the server announced. Anything that would
/// point elsewhere (`..`, `/`, empty) is refused.
fn local_basename(received: &str) -> Result<String> {
    Path::new(received)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::malformed(format!("unusable file name {:?}", received)))
}

/// Split comma-separated requests, dropping blanks.
pub fn split_names<S: AsRef<str>>(inputs: &[S]) -> Vec<String> {
    inputs
        .iter()
        .flat_map(|input| input.as_ref().split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_pattern(name: &str) -> bool {
    name.contains(['*', '?', '['])
}

#[derive(Clone)]
pub struct Client {
    addr: String,
    io_timeout: Option<Duration>,
    store: Arc<LocalStore>,
    progress: Arc<dyn Progress>,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            addr: config.addr(),
            io_timeout: config.io_timeout(),
            store: Arc::new(LocalStore::new(&config.save_dir)),
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    async fn connect(&self) -> Result<TcpStream> {
        let socket = with_deadline(self.io_timeout, async {
            Ok::<_, Error>(TcpStream::connect(&self.addr).await?)
        })
        .await?;
        socket.set_nodelay(true)?;
        Ok(socket)
    }

    /// Names in the server root. Only the first 4096 bytes of the listing
    /// are read, so a longer listing comes back truncated.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut socket = self.connect().await?;
        write_text(&mut socket, &Command::List.to_line(), self.io_timeout).await?;

        let mut raw = Vec::new();
        with_deadline(self.io_timeout, async {
            (&mut socket)
                .take(LISTING_LIMIT as u64)
                .read_to_end(&mut raw)
                .await?;
            Ok::<_, Error>(())
        })
        .await?;

        if raw.len() == LISTING_LIMIT {
            warn!(addr = %self.addr, "listing reached {} bytes and may be truncated", LISTING_LIMIT);
        }

        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Expand glob patterns against the server listing. Plain names pass
    /// through untouched, and no listing is fetched if there are no patterns.
    pub async fn expand(&self, requested: &[String]) -> Result<Vec<String>> {
        if !requested.iter().any(|name| is_pattern(name)) {
            return Ok(requested.to_vec());
        }

        let listing = self.list().await?;
        let mut names = Vec::new();
        for item in requested {
            if !is_pattern(item) {
                names.push(item.clone());
                continue;
            }
            let pattern = Pattern::new(item).map_err(|e| Error::Pattern {
                pattern: item.clone(),
                message: e.msg.to_string(),
            })?;
            let before = names.len();
            names.extend(listing.iter().filter(|n| pattern.matches(n)).cloned());
            if names.len() == before {
                warn!(pattern = %item, "pattern matched nothing");
            }
        }
        Ok(names)
    }

    /// Fetch one file into the save directory. A failed transfer removes the
    /// partial local file.
    pub async fn download(&self, name: &str) -> Result<Outcome> {
        let result = self.try_download(name).await;
        if let Err(e) = &result {
            error!(file = %name, error = %e, "download failed");
        }
        result
    }

    async fn try_download(&self, name: &str) -> Result<Outcome> {
        let socket = self.connect().await?;
        let mut reader = BufReader::new(socket);
        let command = Command::Get(name.to_string());
        write_text(reader.get_mut(), &command.to_line(), self.io_timeout).await?;

        let (received, parts) = match read_header(&mut reader, self.io_timeout).await? {
            TransferHeader::Rejected(status) => {
                warn!(file = %name, status = %status, "server refused");
                return Ok(Outcome::Refused(status));
            }
            TransferHeader::Ready { name, parts } => (name, parts),
        };

        if parts == 0 {
            info!(file = %name, "nothing to transfer");
            return Ok(Outcome::Empty);
        }

        let local = local_basename(&received)?;
        let (path, file) = self.store.reserve(&local).await?;
        let saved_as = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if saved_as != local {
            self.progress.renamed(&received, &saved_as);
        }
        debug!(file = %name, parts, path = %path.display(), "receiving");

        match self.receive_parts(&mut reader, file, name, parts, &path).await {
            Ok(bytes) => {
                info!(file = %name, bytes, path = %path.display(), "download complete");
                Ok(Outcome::Saved { path, bytes })
            }
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %remove_err, "could not remove partial file");
                }
                Err(e)
            }
        }
    }

    async fn receive_parts<R>(
        &self,
        reader: &mut R,
        mut file: File,
        name: &str,
        parts: u32,
        path: &Path,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; RECV_BLOCK];
        let mut total = 0u64;

        for part in 1..=parts {
            let len = read_chunk_length(reader, self.io_timeout).await? as u64;
            let mut received = 0u64;
            while received < len {
                let want = (len - received).min(buf.len() as u64) as usize;
                let n = with_deadline(self.io_timeout, async {
                    Ok::<_, Error>(reader.read(&mut buf[..want]).await?)
                })
                .await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
                file.write_all(&buf[..n])
                    .await
                    .map_err(|e| Error::filesystem(path, e))?;
                received += n as u64;
                self.progress.part(name, part, parts, received, len);
            }
            total += len;
        }

        file.flush().await.map_err(|e| Error::filesystem(path, e))?;
        Ok(total)
    }

    /// Download every name concurrently, one task each. Results come back
    /// in request order; a failure only affects its own entry.
    pub async fn download_all(&self, names: Vec<String>) -> Vec<(String, Result<Outcome>)> {
        let tasks = names.iter().map(|name| {
            let client = self.clone();
            let name = name.clone();
            tokio::spawn(async move { client.download(&name).await })
        });
        let joined = join_all(tasks).await;

        names
            .into_iter()
            .zip(joined)
            .map(|(name, result)| {
                let result = result.unwrap_or_else(|e| Err(Error::Io(std::io::Error::other(e))));
                (name, result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_names() {
        assert_eq!(candidate_name("report.pdf", 0), "report.pdf");
        assert_eq!(candidate_name("report.pdf", 1), "report(1).pdf");
        assert_eq!(candidate_name("report.pdf", 12), "report(12).pdf");
        assert_eq!(candidate_name("archive.tar.gz", 1), "archive.tar(1).gz");
        assert_eq!(candidate_name("Makefile", 2), "Makefile(2)");
        assert_eq!(candidate_name(".bashrc", 1), ".bashrc(1)");
    }

    #[test]
    fn basename_of_announced_name() {
        assert_eq!(local_basename("a.txt").unwrap(), "a.txt");
        assert_eq!(local_basename("sub/dir/a.txt").unwrap(), "a.txt");
        assert!(local_basename("..").is_err());
        assert!(local_basename("").is_err());
    }

    #[test]
    fn split_comma_lists() {
        assert_eq!(
            split_names(&["a.txt, b.txt", " ,c d.bin,", "e"]),
            vec!["a.txt", "b.txt", "c d.bin", "e"]
        );
        assert!(split_names::<&str>(&[]).is_empty());
    }

    #[test]
    fn detects_patterns() {
        assert!(is_pattern("*.txt"));
        assert!(is_pattern("file?.bin"));
        assert!(is_pattern("[ab].dat"));
        assert!(!is_pattern("plain name.txt"));
    }

    #[tokio::test]
    async fn reserve_picks_increasing_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("saves"));

        let (first, _) = store.reserve("a.txt").await.unwrap();
        let (second, _) = store.reserve("a.txt").await.unwrap();
        let (third, _) = store.reserve("a.txt").await.unwrap();

        assert_eq!(first, store.dir().join("a.txt"));
        assert_eq!(second, store.dir().join("a(1).txt"));
        assert_eq!(third, store.dir().join("a(2).txt"));
    }

    #[tokio::test]
    async fn reserve_skips_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"old").unwrap();
        std::fs::write(dir.path().join("a(1).txt"), b"old").unwrap();
        let store = LocalStore::new(dir.path());

        let (path, _) = store.reserve("a.txt").await.unwrap();
        assert_eq!(path, dir.path().join("a(2).txt"));
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"old");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));

        let tasks = (0..16).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.reserve("same.bin").await.map(|(path, _)| path) })
        });
        let mut paths: Vec<PathBuf> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 16);
        assert!(paths.contains(&dir.path().join("same.bin")));
        assert!(paths.contains(&dir.path().join("same(15).bin")));
    }
}
