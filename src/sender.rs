//! Sender-side transfer state machine and entry point.
//!
//! After the handshake the sender walks its listing one entry at a time,
//! waiting for the receiver's acknowledgement between entries. File bytes
//! are streamed synchronously inside the file-creation acknowledgement
//! handler: read a block, hash it, ship it (raw or through the compression
//! session), then announce the content hash with `VerifyFile`.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::checksum::ContentHasher;
use crate::compress::{CompressSession, CompressionPolicy, SessionMode, DEFAULT_LEVEL};
use crate::connection::{Connection, Link, PacketHandler};
use crate::listing::{EntryKind, FileListing, ListingEntry};
use crate::logger::{Logger, NoopLogger, TextLogger};
use crate::net;
use crate::packet::{Packet, FLAG_COMPRESSED};
use crate::progress::TransferProgress;

/// Plaintext read block size.
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Compressed output is coalesced and shipped once this many bytes are
/// pending.
pub const COMPRESSED_FLUSH_SIZE: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    WaitingForHello,
    Idle,
    WaitingForDirectoryAck,
    WaitingForFileAck,
    WaitingForUploadAck,
    Finished,
}

struct Upload {
    file: File,
    virtual_path: String,
    size: u64,
    compressed: bool,
}

pub struct Sender {
    entries: Vec<ListingEntry>,
    next_entry: usize,
    state: State,
    upload: Option<Upload>,
    chunk_buffer: Vec<u8>,
    compressed_buffer: Vec<u8>,
    hasher: ContentHasher,
    compressor: Option<CompressSession>,
    policy: CompressionPolicy,
    progress: TransferProgress,
    logger: Arc<dyn Logger>,
}

impl Sender {
    pub fn new(
        entries: Vec<ListingEntry>,
        policy: CompressionPolicy,
        render_progress: bool,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let compressor = if policy.enabled() {
            Some(CompressSession::new(DEFAULT_LEVEL)?)
        } else {
            None
        };
        Ok(Self {
            entries,
            next_entry: 0,
            state: State::WaitingForHello,
            upload: None,
            chunk_buffer: vec![0u8; CHUNK_SIZE],
            compressed_buffer: Vec::new(),
            hasher: ContentHasher::new(),
            compressor,
            policy,
            progress: TransferProgress::new("uploading", render_progress),
            logger,
        })
    }

    /// Opens the conversation; the state machine takes over once the
    /// receiver's hello arrives.
    pub fn start(&mut self, link: &mut Link) {
        link.send(&Packet::SenderHello);
    }

    pub fn finished(&self) -> bool {
        self.state == State::Finished
    }

    pub fn summary(&self) -> String {
        self.progress.summary()
    }

    fn advance(&mut self, link: &mut Link) {
        let Some(entry) = self.entries.get(self.next_entry).cloned() else {
            self.state = State::Finished;
            link.set_not_alive();
            return;
        };
        self.next_entry += 1;

        match entry.kind {
            EntryKind::Directory => self.create_directory(link, entry),
            EntryKind::File => self.start_upload(link, entry),
        }
    }

    fn create_directory(&mut self, link: &mut Link, entry: ListingEntry) {
        if link.send(&Packet::CreateDirectory {
            path: entry.relative_path,
        }) {
            self.state = State::WaitingForDirectoryAck;
        }
    }

    fn start_upload(&mut self, link: &mut Link, entry: ListingEntry) {
        let file = match File::open(&entry.absolute_path) {
            Ok(file) => file,
            Err(error) => {
                return link.protocol_error(format!(
                    "failed to open `{}` for reading: {error}",
                    entry.absolute_path.display()
                ));
            }
        };
        let size = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(error) => {
                return link.protocol_error(format!(
                    "failed to probe size of `{}`: {error}",
                    entry.absolute_path.display()
                ));
            }
        };

        let compressed = self.policy.should_compress(&entry.relative_path, size);
        let flags = if compressed { FLAG_COMPRESSED } else { 0 };

        if !link.send(&Packet::CreateFile {
            path: entry.relative_path.clone(),
            size,
            flags,
        }) {
            return;
        }

        self.state = State::WaitingForFileAck;
        self.progress.begin_file(&entry.relative_path, size);
        self.upload = Some(Upload {
            file,
            virtual_path: entry.relative_path,
            size,
            compressed,
        });
    }

    /// The synchronous chunk loop, run entirely inside the file-creation
    /// acknowledgement handler.
    fn stream_file(&mut self, link: &mut Link) {
        let Some(upload) = self.upload.as_mut() else {
            return link.protocol_error("file creation acknowledged without an active upload");
        };

        self.hasher.reset();
        self.compressed_buffer.clear();

        // Taken for the duration of the loop so the session and the upload
        // context can be borrowed side by side.
        let mut compressor = self.compressor.take();
        if upload.compressed {
            let ready = compressor
                .as_mut()
                .map(|session| session.reset().is_ok())
                .unwrap_or(false);
            if !ready {
                self.progress.abort_file();
                return link.protocol_error("compression session unavailable");
            }
        }

        let mut total_read: u64 = 0;
        while total_read < upload.size {
            let want = CHUNK_SIZE.min((upload.size - total_read) as usize);
            let block = &mut self.chunk_buffer[..want];
            if let Err(error) = upload.file.read_exact(block) {
                self.progress.abort_file();
                return link.protocol_error(format!(
                    "failed to read `{}`: {error}",
                    upload.virtual_path
                ));
            }
            total_read += want as u64;
            self.hasher.feed(block);

            if let Some(session) = compressor.as_mut().filter(|_| upload.compressed) {
                let mode = if total_read == upload.size {
                    SessionMode::End
                } else {
                    SessionMode::Continue
                };
                if let Err(error) =
                    session.compress(block, &mut self.compressed_buffer, mode)
                {
                    self.progress.abort_file();
                    return link.protocol_error(format!(
                        "failed to compress `{}`: {error}",
                        upload.virtual_path
                    ));
                }
                if self.compressed_buffer.len() >= COMPRESSED_FLUSH_SIZE {
                    let data = std::mem::take(&mut self.compressed_buffer);
                    if !link.send(&Packet::FileChunk { data }) {
                        self.progress.abort_file();
                        return;
                    }
                }
            } else if !link.send(&Packet::FileChunk {
                data: block.to_vec(),
            }) {
                self.progress.abort_file();
                return;
            }

            self.progress.advance(want as u64);
        }
        self.compressor = compressor;

        if !self.compressed_buffer.is_empty() {
            let data = std::mem::take(&mut self.compressed_buffer);
            if !link.send(&Packet::FileChunk { data }) {
                self.progress.abort_file();
                return;
            }
        }

        let hash = self.hasher.finalize();
        if !link.send(&Packet::VerifyFile { hash }) {
            self.progress.abort_file();
            return;
        }
        self.progress.finish_file();
        self.state = State::WaitingForUploadAck;
    }

    fn on_acknowledged(&mut self, link: &mut Link, accepted: bool) {
        match self.state {
            State::WaitingForDirectoryAck => {
                if !accepted {
                    return link.protocol_error("receiver rejected the directory creation request");
                }
                let path = self
                    .next_entry
                    .checked_sub(1)
                    .and_then(|index| self.entries.get(index))
                    .map(|entry| entry.relative_path.clone())
                    .unwrap_or_default();
                self.logger.directory_created(&path);
                self.state = State::Idle;
                self.advance(link);
            }
            State::WaitingForFileAck => {
                if !accepted {
                    return link.protocol_error("receiver rejected the file creation request");
                }
                self.stream_file(link);
            }
            State::WaitingForUploadAck => {
                if !accepted {
                    // The receiver's hash did not match ours.
                    let path = self
                        .upload
                        .as_ref()
                        .map(|upload| upload.virtual_path.clone())
                        .unwrap_or_default();
                    eprintln!("integrity failure: receiver rejected the upload of `{path}`");
                    self.logger
                        .error("integrity", &format!("upload of `{path}` rejected"));
                    link.set_not_alive();
                    return;
                }
                if let Some(upload) = self.upload.take() {
                    self.logger.file_done(&upload.virtual_path, upload.size);
                }
                self.state = State::Idle;
                self.advance(link);
            }
            _ => link.protocol_error("received unexpected Acknowledged packet"),
        }
    }

    fn on_receiver_hello(&mut self, link: &mut Link) {
        if self.state != State::WaitingForHello {
            return link.protocol_error("received unexpected ReceiverHello packet");
        }
        self.state = State::Idle;
        self.advance(link);
    }
}

impl PacketHandler for Sender {
    fn on_packet(&mut self, link: &mut Link, packet: Packet) {
        match packet {
            Packet::ReceiverHello => self.on_receiver_hello(link),
            Packet::Acknowledged { accepted } => self.on_acknowledged(link, accepted),
            other => {
                link.protocol_error(format!("received unexpected {} packet", other.name()))
            }
        }
    }

    fn on_transport_error(&mut self, error: &std::io::Error) {
        self.progress.abort_file();
        eprintln!("transport error: {error}");
        self.logger.error("transport", &error.to_string());
    }

    fn on_disconnected(&mut self) {
        self.progress.abort_file();
        if self.state == State::Finished {
            println!("disconnected");
        } else {
            eprintln!("disconnected unexpectedly");
            self.logger.error("transport", "disconnected unexpectedly");
        }
    }

    fn on_protocol_error(&mut self, description: &str) {
        self.progress.abort_file();
        eprintln!("protocol error: {description}");
        self.logger.error("protocol", description);
    }
}

pub struct SendOptions {
    pub compress: bool,
    pub progress: bool,
    pub log: Option<PathBuf>,
}

/// `fling send <address> <path>...`
pub fn run(address: &str, paths: &[PathBuf], options: &SendOptions) -> Result<()> {
    let (host, port) = net::parse_address(address)?;

    let mut listing = FileListing::new();
    for path in paths {
        listing.add(path)?;
    }
    let entries = listing.finalize()?;
    println!("{} entries to send", entries.len());

    let policy = CompressionPolicy::from_env(options.compress);
    println!(
        "compression is {} (`FT_DISABLE_COMPRESSION` overrides)",
        if policy.enabled() { "enabled" } else { "disabled" }
    );

    let logger: Arc<dyn Logger> = match &options.log {
        Some(path) => Arc::new(TextLogger::new(path)?),
        None => Arc::new(NoopLogger),
    };

    let stream = net::connect(&host, port)?;
    println!("connected to `{host}:{port}`");

    let sender = Sender::new(entries, policy, options.progress, logger.clone())?;
    let mut connection = Connection::new(stream, sender);
    connection.with_link(|sender, link| sender.start(link));
    connection.run();

    let summary = connection.handler.summary();
    if connection.handler.finished() {
        println!("done: {summary}");
        logger.done(&summary);
        Ok(())
    } else {
        logger.error("transfer", "aborted before completion");
        bail!("transfer failed");
    }
}
