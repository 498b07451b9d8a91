//! Big-endian primitive codec over byte buffers.
//!
//! All integer byte-order conversion in the crate happens here; higher
//! layers (framing, packets) only ever call through these cursors.

/// Read cursor over a borrowed byte slice. Reads fail soft by returning
/// `None` when the remaining data is shorter than the requested primitive.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn read_bytes(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.remaining() < size {
            return None;
        }
        let bytes = &self.data[self.offset..self.offset + size];
        self.offset += size;
        Some(bytes)
    }

    /// Consumes everything left in the buffer.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        self.read_bytes(self.remaining()).unwrap_or(&[])
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        self.read_bytes(8)
            .map(|b| u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub fn read_i8(&mut self) -> Option<i8> {
        self.read_u8().map(|v| v as i8)
    }

    pub fn read_i16(&mut self) -> Option<i16> {
        self.read_u16().map(|v| v as i16)
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.read_u32().map(|v| v as i32)
    }

    pub fn read_i64(&mut self) -> Option<i64> {
        self.read_u64().map(|v| v as i64)
    }
}

/// Write cursor appending to a borrowed growable buffer.
pub struct BinaryWriter<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> BinaryWriter<'a> {
    pub fn new(buffer: &'a mut Vec<u8>) -> Self {
        Self { buffer }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_u64(value as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_primitives() {
        let mut buffer = Vec::new();
        let mut writer = BinaryWriter::new(&mut buffer);
        writer.write_u8(0xAB);
        writer.write_u16(0x1234);
        writer.write_u32(0xDEADBEEF);
        writer.write_u64(0x0123_4567_89AB_CDEF);
        writer.write_i32(-7);
        writer.write_bytes(b"tail");

        let mut reader = BinaryReader::new(&buffer);
        assert_eq!(reader.read_u8(), Some(0xAB));
        assert_eq!(reader.read_u16(), Some(0x1234));
        assert_eq!(reader.read_u32(), Some(0xDEADBEEF));
        assert_eq!(reader.read_u64(), Some(0x0123_4567_89AB_CDEF));
        assert_eq!(reader.read_i32(), Some(-7));
        assert_eq!(reader.read_bytes(4), Some(&b"tail"[..]));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn big_endian_layout() {
        let mut buffer = Vec::new();
        BinaryWriter::new(&mut buffer).write_u32(0x0102_0304);
        assert_eq!(buffer, [0x01, 0x02, 0x03, 0x04]);

        let mut buffer = Vec::new();
        BinaryWriter::new(&mut buffer).write_u16(0xF150);
        assert_eq!(buffer, [0xF1, 0x50]);
    }

    #[test]
    fn short_reads_fail_without_consuming() {
        let data = [0x01, 0x02];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_u32(), None);
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.read_u16(), Some(0x0102));
        assert_eq!(reader.read_u8(), None);
    }

    #[test]
    fn read_remaining_drains() {
        let data = [0x00, 0x01, 0x02, 0x03];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_u8(), Some(0x00));
        assert_eq!(reader.read_remaining(), &[0x01, 0x02, 0x03]);
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.read_remaining(), &[] as &[u8]);
    }
}
