//! fling - point-to-point file and directory transfer.
//!
//! One sender pushes a listing of files and directory trees over a single
//! TCP connection to one receiver, which rebuilds the tree under its
//! destination directory. Every file is verified end to end with xxh3-64
//! and may be streamed through a per-file zstd session.

pub mod binary;
pub mod checksum;
pub mod cli;
pub mod compress;
pub mod connection;
pub mod framing;
pub mod listing;
pub mod logger;
pub mod net;
pub mod packet;
pub mod progress;
pub mod receiver;
pub mod sender;
