//! Streaming content hashing.
//!
//! Files are verified end to end with xxh3-64: the sender hashes plaintext
//! blocks as it reads them, the receiver hashes plaintext as it writes, and
//! the finalized values must agree.

use xxhash_rust::xxh3::{xxh3_64, Xxh3};

pub struct ContentHasher {
    state: Xxh3,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self { state: Xxh3::new() }
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.state.update(bytes);
    }

    pub fn finalize(&self) -> u64 {
        self.state.digest()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot hash of a complete buffer.
pub fn hash_bytes(data: &[u8]) -> u64 {
    xxh3_64(data)
}
