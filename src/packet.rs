//! Typed packets, one per frame.
//!
//! A packet is a 16-bit tag followed by a tag-specific body. Decoding must
//! consume the whole frame payload; trailing bytes and unknown tags are
//! protocol errors.

use thiserror::Error;

use crate::binary::{BinaryReader, BinaryWriter};

/// `CreateFile` flag bit: chunks carry zstd-compressed data.
pub const FLAG_COMPRESSED: u16 = 1 << 0;

const KNOWN_FILE_FLAGS: u16 = FLAG_COMPRESSED;

mod tag {
    pub const RECEIVER_HELLO: u16 = 1;
    pub const SENDER_HELLO: u16 = 2;
    pub const ACKNOWLEDGED: u16 = 3;
    pub const CREATE_DIRECTORY: u16 = 4;
    pub const CREATE_FILE: u16 = 5;
    pub const FILE_CHUNK: u16 = 6;
    pub const VERIFY_FILE: u16 = 7;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReceiverHello,
    SenderHello,
    Acknowledged { accepted: bool },
    CreateDirectory { path: String },
    CreateFile { path: String, size: u64, flags: u16 },
    FileChunk { data: Vec<u8> },
    VerifyFile { hash: u64 },
}

#[derive(Debug, Error)]
pub enum PacketDecodeError {
    #[error("truncated packet: missing {0}")]
    Truncated(&'static str),
    #[error("unknown packet tag {0}")]
    UnknownTag(u16),
    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),
    #[error("packet path is not valid UTF-8")]
    InvalidPath,
    #[error("unknown file flags {0:#06x}")]
    UnknownFlags(u16),
}

impl Packet {
    /// Short name used in protocol error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::ReceiverHello => "ReceiverHello",
            Packet::SenderHello => "SenderHello",
            Packet::Acknowledged { .. } => "Acknowledged",
            Packet::CreateDirectory { .. } => "CreateDirectory",
            Packet::CreateFile { .. } => "CreateFile",
            Packet::FileChunk { .. } => "FileChunk",
            Packet::VerifyFile { .. } => "VerifyFile",
        }
    }

    pub fn encode(&self, writer: &mut BinaryWriter<'_>) {
        match self {
            Packet::ReceiverHello => {
                writer.write_u16(tag::RECEIVER_HELLO);
            }
            Packet::SenderHello => {
                writer.write_u16(tag::SENDER_HELLO);
            }
            Packet::Acknowledged { accepted } => {
                writer.write_u16(tag::ACKNOWLEDGED);
                writer.write_u8(u8::from(*accepted));
            }
            Packet::CreateDirectory { path } => {
                writer.write_u16(tag::CREATE_DIRECTORY);
                // The frame boundary delimits the path; no length prefix.
                writer.write_bytes(path.as_bytes());
            }
            Packet::CreateFile { path, size, flags } => {
                writer.write_u16(tag::CREATE_FILE);
                writer.write_u64(*size);
                writer.write_u16(*flags);
                writer.write_bytes(path.as_bytes());
            }
            Packet::FileChunk { data } => {
                writer.write_u16(tag::FILE_CHUNK);
                writer.write_bytes(data);
            }
            Packet::VerifyFile { hash } => {
                writer.write_u16(tag::VERIFY_FILE);
                writer.write_u64(*hash);
            }
        }
    }

    pub fn decode(mut reader: BinaryReader<'_>) -> Result<Self, PacketDecodeError> {
        use PacketDecodeError::*;

        let tag_value = reader.read_u16().ok_or(Truncated("packet tag"))?;

        let packet = match tag_value {
            tag::RECEIVER_HELLO => Packet::ReceiverHello,
            tag::SENDER_HELLO => Packet::SenderHello,
            tag::ACKNOWLEDGED => {
                let accepted = reader.read_u8().ok_or(Truncated("acknowledged byte"))?;
                Packet::Acknowledged {
                    accepted: accepted != 0,
                }
            }
            tag::CREATE_DIRECTORY => Packet::CreateDirectory {
                path: read_path(&mut reader)?,
            },
            tag::CREATE_FILE => {
                let size = reader.read_u64().ok_or(Truncated("file size"))?;
                let flags = reader.read_u16().ok_or(Truncated("file flags"))?;
                if flags & !KNOWN_FILE_FLAGS != 0 {
                    return Err(UnknownFlags(flags));
                }
                Packet::CreateFile {
                    path: read_path(&mut reader)?,
                    size,
                    flags,
                }
            }
            tag::FILE_CHUNK => Packet::FileChunk {
                data: reader.read_remaining().to_vec(),
            },
            tag::VERIFY_FILE => Packet::VerifyFile {
                hash: reader.read_u64().ok_or(Truncated("file hash"))?,
            },
            unknown => return Err(UnknownTag(unknown)),
        };

        if reader.remaining() != 0 {
            return Err(TrailingBytes(reader.remaining()));
        }
        Ok(packet)
    }
}

fn read_path(reader: &mut BinaryReader<'_>) -> Result<String, PacketDecodeError> {
    std::str::from_utf8(reader.read_remaining())
        .map(str::to_owned)
        .map_err(|_| PacketDecodeError::InvalidPath)
}
