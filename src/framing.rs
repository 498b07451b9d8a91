//! Length-prefixed framing over a byte stream.
//!
//! Every frame is an 8-byte header (32-bit magic, 32-bit total length that
//! includes the header) followed by the payload. Frame sizes are bounded to
//! `(FRAME_HEADER_SIZE, MAX_FRAME_SIZE]`.

use thiserror::Error;

use crate::binary::{BinaryReader, BinaryWriter};

pub const FRAME_MAGIC: u32 = 0xF150_CCC2;
pub const FRAME_HEADER_SIZE: usize = 8;

/// Upper bound on a whole frame, header included. Keeps a malicious peer
/// from growing the reassembly buffer without bound.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_RECEIVE_WINDOW: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame size {0} is outside ({FRAME_HEADER_SIZE}, {MAX_FRAME_SIZE}]")]
    SizeOutOfBounds(usize),
}

/// Outbound framer. `prepare()` hands out a writer positioned past a
/// reserved header; `finalize()` patches the total length in and yields the
/// completed frame bytes.
pub struct FrameSender {
    buffer: Vec<u8>,
}

impl FrameSender {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn prepare(&mut self) -> BinaryWriter<'_> {
        self.buffer.clear();
        let mut writer = BinaryWriter::new(&mut self.buffer);
        writer.write_u32(FRAME_MAGIC);
        // Placeholder length, patched in finalize().
        writer.write_u32(u32::MAX);
        writer
    }

    pub fn finalize(&mut self) -> Result<&[u8], FrameError> {
        let frame_size = self.buffer.len();
        if frame_size <= FRAME_HEADER_SIZE || frame_size > MAX_FRAME_SIZE {
            return Err(FrameError::SizeOutOfBounds(frame_size));
        }

        let mut size_bytes = Vec::with_capacity(4);
        BinaryWriter::new(&mut size_bytes).write_u32(frame_size as u32);
        self.buffer[4..FRAME_HEADER_SIZE].copy_from_slice(&size_bytes);

        Ok(&self.buffer)
    }
}

impl Default for FrameSender {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of inbound reassembly.
pub enum FrameEvent<'a> {
    /// Not enough buffered bytes for a header or a whole frame.
    NeedMoreData,
    /// The stream cannot be a valid frame sequence: bad magic or a declared
    /// size outside the allowed bounds.
    MalformedStream,
    /// A complete frame is buffered; the reader covers the payload with the
    /// header stripped. Call `discard_frame()` once it has been consumed.
    Frame(BinaryReader<'a>),
}

/// Inbound reassembler. Bytes are received directly into the tail of a
/// grow-only buffer (`prepare_receive_buffer` + `commit`), then `update()`
/// is polled for complete frames.
pub struct FrameReceiver {
    buffer: Vec<u8>,
    used: usize,
    receive_window: usize,
    pending_frame_size: Option<usize>,
}

impl FrameReceiver {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            used: 0,
            receive_window: INITIAL_RECEIVE_WINDOW,
            pending_frame_size: None,
        }
    }

    /// Writable span of `receive_window` bytes past the valid tail, growing
    /// the buffer as needed. The buffer never shrinks.
    pub fn prepare_receive_buffer(&mut self) -> &mut [u8] {
        let unused = self.buffer.len() - self.used;
        if unused < self.receive_window {
            let missing = self.receive_window - unused;
            self.buffer.resize(self.buffer.len() + missing, 0);
        }
        &mut self.buffer[self.used..self.used + self.receive_window]
    }

    /// Marks `size` bytes of the prepared span as received.
    pub fn commit(&mut self, size: usize) {
        self.used += size;
        debug_assert!(self.used <= self.buffer.len(), "out of bounds receive");
    }

    pub fn update(&mut self) -> FrameEvent<'_> {
        if self.pending_frame_size.is_none() && self.used >= FRAME_HEADER_SIZE {
            let mut reader = BinaryReader::new(&self.buffer[..self.used]);

            match reader.read_u32() {
                Some(FRAME_MAGIC) => {}
                _ => return FrameEvent::MalformedStream,
            }

            let frame_size = match reader.read_u32() {
                Some(size) => size as usize,
                None => return FrameEvent::MalformedStream,
            };
            if frame_size <= FRAME_HEADER_SIZE || frame_size > MAX_FRAME_SIZE {
                return FrameEvent::MalformedStream;
            }

            self.pending_frame_size = Some(frame_size);
            // Make sure the rest of this frame fits in one receive.
            self.receive_window = self.receive_window.max(frame_size);
        }

        if let Some(frame_size) = self.pending_frame_size {
            if self.used >= frame_size {
                let payload = &self.buffer[FRAME_HEADER_SIZE..frame_size];
                return FrameEvent::Frame(BinaryReader::new(payload));
            }
        }

        FrameEvent::NeedMoreData
    }

    /// Shifts the consumed frame out of the buffer and clears the pending
    /// size so `update()` can parse the next header.
    pub fn discard_frame(&mut self) {
        if let Some(frame_size) = self.pending_frame_size {
            if self.used >= frame_size {
                self.buffer.copy_within(frame_size..self.used, 0);
                self.used -= frame_size;
                self.pending_frame_size = None;
            }
        }
    }
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new()
    }
}
