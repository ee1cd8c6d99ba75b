//! Record header codec
//!
//! Fixed 32-byte little-endian header that precedes every record.

use crate::error::{Result, VaultError};

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = 32;

/// "SGVR"
pub const RECORD_MAGIC: u32 = 0x5347_5652;

/// Current record format version
pub const RECORD_VERSION: u8 = 1;

/// Placeholder data length for a streamed record whose size is not known yet.
///
/// Until the header is patched the record claims to run past the end of any
/// real segment, so an interrupted stream replays as a torn tail.
pub const UNKNOWN_DATA_LEN: u64 = u64::MAX;

/// Operation carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    Put = 1,
    Delete = 2,
}

impl TryFrom<u8> for RecordOp {
    type Error = VaultError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordOp::Put),
            2 => Ok(RecordOp::Delete),
            other => Err(VaultError::corrupt("", 0, format!("unknown op {}", other))),
        }
    }
}

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub op: RecordOp,
    pub key_len: u32,
    pub content_type_len: u16,
    pub data_len: u64,
    /// Unix timestamp in nanoseconds
    pub updated_ns: i64,
    /// CRC32 of the data payload
    pub checksum: u32,
}

impl RecordHeader {
    pub fn new(
        op: RecordOp,
        key: &str,
        content_type: &str,
        data_len: u64,
        updated_ns: i64,
        checksum: u32,
    ) -> Result<Self> {
        let key_len = u32::try_from(key.len())
            .map_err(|_| VaultError::InvalidKey("key too long".to_string()))?;
        let content_type_len = u16::try_from(content_type.len())
            .map_err(|_| VaultError::InvalidInput("content type too long".to_string()))?;
        Ok(Self {
            op,
            key_len,
            content_type_len,
            data_len,
            updated_ns,
            checksum,
        })
    }

    /// Encode into a fixed-size buffer
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        buf[4] = RECORD_VERSION;
        buf[5] = self.op as u8;
        buf[6..10].copy_from_slice(&self.key_len.to_le_bytes());
        buf[10..12].copy_from_slice(&self.content_type_len.to_le_bytes());
        buf[12..20].copy_from_slice(&self.data_len.to_le_bytes());
        buf[20..28].copy_from_slice(&self.updated_ns.to_le_bytes());
        buf[28..32].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decode a header from the front of `buf`.
    ///
    /// Fails with `CorruptRecord` on a short buffer, a foreign magic, an
    /// unsupported version or an unknown op.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(VaultError::corrupt(
                "",
                0,
                format!("short header: {} bytes", buf.len()),
            ));
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != RECORD_MAGIC {
            return Err(VaultError::corrupt("", 0, format!("bad magic {:#010x}", magic)));
        }
        if buf[4] != RECORD_VERSION {
            return Err(VaultError::corrupt("", 0, format!("unsupported version {}", buf[4])));
        }
        let op = RecordOp::try_from(buf[5])?;

        Ok(Self {
            op,
            key_len: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            content_type_len: u16::from_le_bytes([buf[10], buf[11]]),
            data_len: u64::from_le_bytes(le_array(&buf[12..20])),
            updated_ns: i64::from_le_bytes(le_array(&buf[20..28])),
            checksum: u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]),
        })
    }

    /// Bytes between the header and the data payload
    pub fn payload_prefix_len(&self) -> u64 {
        self.key_len as u64 + self.content_type_len as u64
    }

    /// Total encoded record length, `None` if it does not fit in a u64
    /// (always the case for [`UNKNOWN_DATA_LEN`]).
    pub fn record_len(&self) -> Option<u64> {
        (HEADER_SIZE as u64 + self.payload_prefix_len()).checked_add(self.data_len)
    }
}

fn le_array(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}
