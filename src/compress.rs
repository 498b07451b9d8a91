//! Streaming zstd sessions and the per-file compression policy.
//!
//! Every compressed file travels as one independent zstd frame: the session
//! is reset when the file starts and finished with an end-of-frame flush on
//! the last block. Compressor state never carries across files.

use std::io;

use zstd::stream::raw::{Decoder, Encoder, InBuffer, Operation, OutBuffer};

pub const DEFAULT_LEVEL: i32 = 3;

const SCRATCH_SIZE: usize = 64 * 1024;

/// Files below this size are never worth a compression session.
pub const MIN_COMPRESS_SIZE: u64 = 4096;

/// Extensions that already hold compressed data; recompressing them wastes
/// cycles for no ratio.
const COMPRESSED_EXTENSIONS: &[&str] = &[
    "gz", "zip", "bz2", "xz", "lz4", "zst", "7z", "rar", "jpg", "jpeg", "png", "gif", "webp",
    "mp3", "mp4", "mkv", "avi", "mov", "flac", "ogg", "opus", "pdf",
];

pub fn is_compressed_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    COMPRESSED_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

/// Sender-side compression policy: off unless opted in with `--compress`,
/// and `FT_DISABLE_COMPRESSION` force-disables even then.
#[derive(Clone, Copy, Debug)]
pub struct CompressionPolicy {
    enabled: bool,
}

impl CompressionPolicy {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn from_env(compress_flag: bool) -> Self {
        let env_value = std::env::var("FT_DISABLE_COMPRESSION").ok();
        Self {
            enabled: resolve_enabled(compress_flag, env_value.as_deref()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn should_compress(&self, virtual_path: &str, size: u64) -> bool {
        self.enabled && size >= MIN_COMPRESS_SIZE && !is_compressed_extension(virtual_path)
    }
}

fn resolve_enabled(compress_flag: bool, env_value: Option<&str>) -> bool {
    if matches!(env_value, Some("1") | Some("ON")) {
        return false;
    }
    compress_flag
}

/// Whether a block is the last of its file's session.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Continue,
    End,
}

pub struct CompressSession {
    encoder: Encoder<'static>,
    scratch: Vec<u8>,
}

impl CompressSession {
    pub fn new(level: i32) -> io::Result<Self> {
        Ok(Self {
            encoder: Encoder::new(level)?,
            scratch: vec![0u8; SCRATCH_SIZE],
        })
    }

    /// Starts a fresh session; must be called at every file boundary.
    pub fn reset(&mut self) -> io::Result<()> {
        self.encoder.reinit()
    }

    /// Compresses one block, appending the produced bytes to `out`. With
    /// [`SessionMode::End`] the session's frame is completed, after which
    /// the session must be reset before reuse.
    pub fn compress(
        &mut self,
        block: &[u8],
        out: &mut Vec<u8>,
        mode: SessionMode,
    ) -> io::Result<()> {
        let Self { encoder, scratch } = self;

        let mut input = InBuffer::around(block);
        while input.pos < input.src.len() {
            let mut output = OutBuffer::around(&mut scratch[..]);
            encoder.run(&mut input, &mut output)?;
            let produced = output.pos();
            out.extend_from_slice(&scratch[..produced]);
        }

        if mode == SessionMode::End {
            loop {
                let mut output = OutBuffer::around(&mut scratch[..]);
                let remaining = encoder.finish(&mut output, true)?;
                let produced = output.pos();
                out.extend_from_slice(&scratch[..produced]);
                if remaining == 0 {
                    break;
                }
            }
        }
        Ok(())
    }
}

pub struct DecompressSession {
    decoder: Decoder<'static>,
    scratch: Vec<u8>,
}

impl DecompressSession {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            decoder: Decoder::new()?,
            scratch: vec![0u8; SCRATCH_SIZE],
        })
    }

    pub fn reset(&mut self) -> io::Result<()> {
        self.decoder.reinit()
    }

    /// Decompresses one wire chunk, appending all decodable plaintext to
    /// `out`. Chunk boundaries need not align with zstd's internal blocks.
    pub fn decompress(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        let Self { decoder, scratch } = self;

        let mut input = InBuffer::around(chunk);
        loop {
            let mut output = OutBuffer::around(&mut scratch[..]);
            decoder.run(&mut input, &mut output)?;
            let produced = output.pos();
            out.extend_from_slice(&scratch[..produced]);

            // A full scratch may mean more buffered output is pending even
            // though the input has been consumed.
            if input.pos == input.src.len() && produced < scratch.len() {
                break;
            }
        }
        Ok(())
    }
}
