//! Receiver-side state machine, path guard, and accept loop.
//!
//! Each accepted connection gets its own worker thread with fully isolated
//! state. Incoming virtual paths are resolved under the destination root
//! with a strict guard: absolute paths, `..` components, NUL bytes, and
//! backslashes are rejected outright.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use crate::checksum::ContentHasher;
use crate::compress::DecompressSession;
use crate::connection::{Connection, Link, PacketHandler};
use crate::logger::{Logger, NoopLogger, TextLogger};
use crate::net;
use crate::packet::{Packet, FLAG_COMPRESSED};
use crate::progress::TransferProgress;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    WaitingForHello,
    Idle,
    Downloading,
    WaitingForHash,
}

/// Per-file download context. Owns the partially written destination file;
/// unless the download was marked complete, dropping the context unlinks
/// the file so aborted transfers leave nothing behind.
struct Download {
    file: Option<File>,
    virtual_path: String,
    fs_path: PathBuf,
    size: u64,
    received: u64,
    compressed: bool,
    completed: bool,
}

impl Drop for Download {
    fn drop(&mut self) {
        if !self.completed {
            // Close before unlinking.
            drop(self.file.take());
            let _ = fs::remove_file(&self.fs_path);
        }
    }
}

/// Maps a wire path to a filesystem path under `destination`, or explains
/// why it is unacceptable.
fn resolve_virtual_path(destination: &Path, virtual_path: &str) -> Result<PathBuf, String> {
    if virtual_path.contains('\0') {
        return Err("path contains a NUL byte".into());
    }
    if virtual_path.starts_with('/') {
        return Err("path is absolute".into());
    }

    let mut resolved = destination.to_path_buf();
    let mut depth = 0usize;
    for component in virtual_path.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err("path contains a `..` component".into()),
            name if name.contains('\\') => {
                return Err("path component contains a backslash".into())
            }
            name => {
                resolved.push(name);
                depth += 1;
            }
        }
    }
    if depth == 0 {
        return Err("path resolves to the destination root".into());
    }
    Ok(resolved)
}

pub struct Receiver {
    peer: String,
    destination: PathBuf,
    state: State,
    download: Option<Download>,
    hasher: ContentHasher,
    decompressor: Option<DecompressSession>,
    plain_buffer: Vec<u8>,
    progress: TransferProgress,
    logger: Arc<dyn Logger>,
}

impl Receiver {
    pub fn new(peer: String, destination: PathBuf, logger: Arc<dyn Logger>) -> Self {
        Self {
            peer,
            destination,
            state: State::WaitingForHello,
            download: None,
            hasher: ContentHasher::new(),
            decompressor: None,
            plain_buffer: Vec::new(),
            progress: TransferProgress::new("downloading", false),
            logger,
        }
    }

    fn reject(&mut self, link: &mut Link, description: String) {
        link.send(&Packet::Acknowledged { accepted: false });
        link.protocol_error(description);
    }

    fn on_sender_hello(&mut self, link: &mut Link) {
        if self.state != State::WaitingForHello {
            return link.protocol_error("received unexpected SenderHello packet");
        }
        link.send(&Packet::ReceiverHello);
        self.state = State::Idle;
    }

    fn on_create_directory(&mut self, link: &mut Link, path: String) {
        if self.state != State::Idle {
            return link.protocol_error("received unexpected CreateDirectory packet");
        }

        let fs_path = match resolve_virtual_path(&self.destination, &path) {
            Ok(fs_path) => fs_path,
            Err(reason) => {
                return self.reject(link, format!("rejected directory `{path}`: {reason}"));
            }
        };

        if let Err(error) = fs::create_dir_all(&fs_path) {
            return self.reject(
                link,
                format!("failed to create directory `{path}`: {error}"),
            );
        }

        println!("{}: created directory `{path}`", self.peer);
        self.logger.directory_created(&path);
        link.send(&Packet::Acknowledged { accepted: true });
    }

    fn on_create_file(&mut self, link: &mut Link, path: String, size: u64, flags: u16) {
        if self.state != State::Idle {
            return link.protocol_error("received unexpected CreateFile packet");
        }

        let fs_path = match resolve_virtual_path(&self.destination, &path) {
            Ok(fs_path) => fs_path,
            Err(reason) => {
                return self.reject(link, format!("rejected file `{path}`: {reason}"));
            }
        };

        let file = match OpenOptions::new().write(true).create_new(true).open(&fs_path) {
            Ok(file) => file,
            Err(error) => {
                return self.reject(link, format!("failed to create `{path}`: {error}"));
            }
        };

        let compressed = flags & FLAG_COMPRESSED != 0;
        self.hasher.reset();
        if compressed {
            let ready = match self.decompressor.as_mut() {
                Some(session) => session.reset().is_ok(),
                None => match DecompressSession::new() {
                    Ok(session) => {
                        self.decompressor = Some(session);
                        true
                    }
                    Err(_) => false,
                },
            };
            if !ready {
                return self.reject(
                    link,
                    format!("no decompression session for `{path}`"),
                );
            }
        }

        self.download = Some(Download {
            file: Some(file),
            virtual_path: path.clone(),
            fs_path,
            size,
            received: 0,
            compressed,
            completed: false,
        });
        self.progress.begin_file(&path, size);
        link.send(&Packet::Acknowledged { accepted: true });

        // Nothing to stream for an empty file; the hash announcement is
        // next on the wire.
        self.state = if size == 0 {
            State::WaitingForHash
        } else {
            State::Downloading
        };
    }

    fn on_file_chunk(&mut self, link: &mut Link, data: Vec<u8>) {
        if self.state != State::Downloading {
            return link.protocol_error("received unexpected FileChunk packet");
        }
        let Some(download) = self.download.as_mut() else {
            return link.protocol_error("file chunk without an active download");
        };

        let plaintext: &[u8] = if download.compressed {
            self.plain_buffer.clear();
            let Some(session) = self.decompressor.as_mut() else {
                return link.protocol_error("file chunk without a decompression session");
            };
            if let Err(error) = session.decompress(&data, &mut self.plain_buffer) {
                return link.protocol_error(format!(
                    "failed to decompress chunk of `{}`: {error}",
                    download.virtual_path
                ));
            }
            &self.plain_buffer
        } else {
            &data
        };

        let received = download.received + plaintext.len() as u64;
        if received > download.size {
            return link.protocol_error(format!(
                "got more data for `{}` than announced",
                download.virtual_path
            ));
        }

        let Some(file) = download.file.as_mut() else {
            return link.protocol_error("file chunk after the download was closed");
        };
        if let Err(error) = file.write_all(plaintext) {
            return link.protocol_error(format!(
                "failed to write `{}`: {error}",
                download.fs_path.display()
            ));
        }

        self.hasher.feed(plaintext);
        self.progress.advance(plaintext.len() as u64);
        download.received = received;
        if received == download.size {
            self.state = State::WaitingForHash;
        }
    }

    fn on_verify_file(&mut self, link: &mut Link, announced_hash: u64) {
        if self.state != State::WaitingForHash {
            return link.protocol_error("received unexpected VerifyFile packet");
        }
        let Some(download) = self.download.as_mut() else {
            return link.protocol_error("hash announcement without an active download");
        };

        let local_hash = self.hasher.finalize();
        let virtual_path = download.virtual_path.clone();
        let size = download.size;

        if local_hash != announced_hash {
            link.send(&Packet::Acknowledged { accepted: false });
            eprintln!(
                "{}: integrity failure: `{virtual_path}` hash mismatch",
                self.peer
            );
            self.logger
                .error("integrity", &format!("`{virtual_path}` hash mismatch"));
            // Dropping the context unlinks the corrupt file.
            self.download = None;
            self.progress.abort_file();
            link.set_not_alive();
            return;
        }

        download.completed = true;
        self.download = None;
        self.progress.finish_file();
        println!("{}: received `{virtual_path}`", self.peer);
        self.logger.file_done(&virtual_path, size);
        link.send(&Packet::Acknowledged { accepted: true });
        self.state = State::Idle;
    }
}

impl PacketHandler for Receiver {
    fn on_packet(&mut self, link: &mut Link, packet: Packet) {
        match packet {
            Packet::SenderHello => self.on_sender_hello(link),
            Packet::CreateDirectory { path } => self.on_create_directory(link, path),
            Packet::CreateFile { path, size, flags } => {
                self.on_create_file(link, path, size, flags)
            }
            Packet::FileChunk { data } => self.on_file_chunk(link, data),
            Packet::VerifyFile { hash } => self.on_verify_file(link, hash),
            other => {
                link.protocol_error(format!("received unexpected {} packet", other.name()))
            }
        }
    }

    fn on_transport_error(&mut self, error: &std::io::Error) {
        eprintln!("{}: transport error: {error}", self.peer);
        self.logger.error("transport", &error.to_string());
        self.progress.abort_file();
        self.download = None;
    }

    fn on_disconnected(&mut self) {
        if self.state == State::Idle {
            println!("{}: disconnected ({})", self.peer, self.progress.summary());
            self.logger.done(&self.progress.summary());
        } else {
            eprintln!("{}: disconnected unexpectedly", self.peer);
            self.logger.error("transport", "disconnected unexpectedly");
        }
        self.progress.abort_file();
        self.download = None;
    }

    fn on_protocol_error(&mut self, description: &str) {
        eprintln!("{}: protocol error: {description}", self.peer);
        self.logger.error("protocol", description);
        self.progress.abort_file();
        self.download = None;
    }
}

/// Runs one connection to completion on the calling thread.
pub fn serve_connection(
    stream: TcpStream,
    peer: String,
    destination: PathBuf,
    logger: Arc<dyn Logger>,
) {
    net::tune_socket(&stream);
    let receiver = Receiver::new(peer, destination, logger);
    let mut connection = Connection::new(stream, receiver);
    connection.run();
}

pub struct ReceiveOptions {
    pub port: Option<u16>,
    pub log: Option<PathBuf>,
}

/// `fling receive <destination> [port]`
pub fn run(destination: &Path, options: &ReceiveOptions) -> Result<()> {
    let port = options.port.unwrap_or(net::DEFAULT_PORT);

    fs::create_dir_all(destination).with_context(|| {
        format!("failed to create destination `{}`", destination.display())
    })?;
    let destination = destination
        .canonicalize()
        .with_context(|| format!("failed to resolve `{}`", destination.display()))?;

    let logger: Arc<dyn Logger> = match &options.log {
        Some(path) => Arc::new(TextLogger::new(path)?),
        None => Arc::new(NoopLogger),
    };

    let listener = net::bind_listener(port)?;
    println!("listening on port {port}...");

    loop {
        match listener.accept() {
            Ok((stream, peer_address)) => {
                let peer = peer_address.to_string();
                println!("client {peer} connected");
                let destination = destination.clone();
                let logger = logger.clone();
                thread::spawn(move || serve_connection(stream, peer, destination, logger));
            }
            Err(error) => {
                eprintln!("failed to accept client: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::hash_bytes;
    use crate::framing::FrameSender;
    use std::net::{Shutdown, TcpListener};
    use tempfile::TempDir;

    #[test]
    fn path_guard_accepts_nested_relative_paths() {
        let destination = Path::new("/dest");
        assert_eq!(
            resolve_virtual_path(destination, "a/b/c").unwrap(),
            destination.join("a").join("b").join("c")
        );
        // `.` and doubled separators collapse.
        assert_eq!(
            resolve_virtual_path(destination, "./a//b").unwrap(),
            destination.join("a").join("b")
        );
        // A colon is an ordinary filename character here.
        assert!(resolve_virtual_path(destination, "a::b").is_ok());
    }

    #[test]
    fn path_guard_rejects_escapes() {
        let destination = Path::new("/dest");
        assert!(resolve_virtual_path(destination, "../escape").is_err());
        assert!(resolve_virtual_path(destination, "a/../../escape").is_err());
        assert!(resolve_virtual_path(destination, "/etc/passwd").is_err());
        assert!(resolve_virtual_path(destination, "a\u{0}b").is_err());
        assert!(resolve_virtual_path(destination, "a\\..\\b").is_err());
        assert!(resolve_virtual_path(destination, "").is_err());
        assert!(resolve_virtual_path(destination, "./.").is_err());
    }

    #[test]
    fn incomplete_download_unlinks_on_drop() {
        let dir = TempDir::new().unwrap();
        let fs_path = dir.path().join("partial.bin");
        let file = File::create(&fs_path).unwrap();

        drop(Download {
            file: Some(file),
            virtual_path: "partial.bin".into(),
            fs_path: fs_path.clone(),
            size: 10,
            received: 4,
            compressed: false,
            completed: false,
        });
        assert!(!fs_path.exists());
    }

    #[test]
    fn completed_download_keeps_the_file() {
        let dir = TempDir::new().unwrap();
        let fs_path = dir.path().join("done.bin");
        let file = File::create(&fs_path).unwrap();

        drop(Download {
            file: Some(file),
            virtual_path: "done.bin".into(),
            fs_path: fs_path.clone(),
            size: 0,
            received: 0,
            compressed: false,
            completed: true,
        });
        assert!(fs_path.exists());
    }

    /// Feeds a scripted packet sequence to a receiver over a real socket
    /// pair and runs the connection to completion.
    fn run_script(destination: &Path, packets: &[Packet]) -> Connection<Receiver> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let mut peer = TcpStream::connect(address).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let receiver = Receiver::new(
            "test-peer".into(),
            destination.to_path_buf(),
            Arc::new(NoopLogger),
        );
        let mut connection = Connection::new(stream, receiver);

        let mut frames = FrameSender::new();
        for packet in packets {
            let mut writer = frames.prepare();
            packet.encode(&mut writer);
            peer.write_all(frames.finalize().unwrap()).unwrap();
        }
        // Signal end-of-stream while leaving the ack direction open.
        peer.shutdown(Shutdown::Write).unwrap();

        connection.run();
        connection
    }

    #[test]
    fn receives_a_small_file() {
        let dir = TempDir::new().unwrap();
        let content = [0x01u8, 0x02, 0x03];

        let connection = run_script(
            dir.path(),
            &[
                Packet::SenderHello,
                Packet::CreateFile {
                    path: "x".into(),
                    size: 3,
                    flags: 0,
                },
                Packet::FileChunk {
                    data: content.to_vec(),
                },
                Packet::VerifyFile {
                    hash: hash_bytes(&content),
                },
            ],
        );

        assert_eq!(connection.handler.state, State::Idle);
        assert_eq!(fs::read(dir.path().join("x")).unwrap(), content);
    }

    #[test]
    fn receives_an_empty_file() {
        let dir = TempDir::new().unwrap();
        let connection = run_script(
            dir.path(),
            &[
                Packet::SenderHello,
                Packet::CreateFile {
                    path: "a.bin".into(),
                    size: 0,
                    flags: 0,
                },
                Packet::VerifyFile {
                    hash: hash_bytes(b""),
                },
            ],
        );

        assert_eq!(connection.handler.state, State::Idle);
        let metadata = fs::metadata(dir.path().join("a.bin")).unwrap();
        assert_eq!(metadata.len(), 0);
    }

    #[test]
    fn creates_directory_trees() {
        let dir = TempDir::new().unwrap();
        run_script(
            dir.path(),
            &[
                Packet::SenderHello,
                Packet::CreateDirectory { path: "dir".into() },
                Packet::CreateDirectory {
                    path: "dir/sub".into(),
                },
            ],
        );
        assert!(dir.path().join("dir/sub").is_dir());
    }

    #[test]
    fn hash_mismatch_unlinks_the_file() {
        let dir = TempDir::new().unwrap();
        let content = [0xAAu8; 64];

        let connection = run_script(
            dir.path(),
            &[
                Packet::SenderHello,
                Packet::CreateFile {
                    path: "x".into(),
                    size: 64,
                    flags: 0,
                },
                Packet::FileChunk {
                    data: content.to_vec(),
                },
                Packet::VerifyFile {
                    hash: hash_bytes(&content) ^ 1,
                },
            ],
        );

        assert_ne!(connection.handler.state, State::Idle);
        assert!(!dir.path().join("x").exists());
    }

    #[test]
    fn overrun_is_a_protocol_error() {
        let dir = TempDir::new().unwrap();
        let connection = run_script(
            dir.path(),
            &[
                Packet::SenderHello,
                Packet::CreateFile {
                    path: "x".into(),
                    size: 2,
                    flags: 0,
                },
                Packet::FileChunk {
                    data: vec![1, 2, 3],
                },
            ],
        );

        assert_ne!(connection.handler.state, State::Idle);
        assert!(!dir.path().join("x").exists());
    }

    #[test]
    fn chunk_while_idle_is_a_protocol_error() {
        let dir = TempDir::new().unwrap();
        let connection = run_script(
            dir.path(),
            &[Packet::SenderHello, Packet::FileChunk { data: vec![0] }],
        );
        assert_ne!(connection.handler.state, State::Idle);
    }

    #[test]
    fn existing_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), b"old").unwrap();

        run_script(
            dir.path(),
            &[
                Packet::SenderHello,
                Packet::CreateFile {
                    path: "x".into(),
                    size: 1,
                    flags: 0,
                },
            ],
        );
        // The pre-existing file is untouched.
        assert_eq!(fs::read(dir.path().join("x")).unwrap(), b"old");
    }

    #[test]
    fn traversal_attempt_is_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = dir.path().join("outside.txt");
        let destination = dir.path().join("dest");
        fs::create_dir(&destination).unwrap();

        run_script(
            &destination,
            &[
                Packet::SenderHello,
                Packet::CreateFile {
                    path: "../outside.txt".into(),
                    size: 1,
                    flags: 0,
                },
            ],
        );
        assert!(!outside.exists());
    }
}
