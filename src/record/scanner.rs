//! Segment scanner
//!
//! Walks the records of one segment file in order. Used by recovery to
//! rebuild the index; the data payloads are skipped, never read.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use super::header::{RecordHeader, HEADER_SIZE};
use crate::error::{io_context, Result, VaultError};

const SCAN_BUFFER_SIZE: usize = 64 * 1024;

/// One record found by the scanner
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    /// Offset of the record header within the segment
    pub offset: u64,
    pub header: RecordHeader,
    pub key: String,
    pub content_type: String,
    /// Offset of the first data byte within the segment
    pub data_offset: u64,
}

/// Why a scan ended before the end of the file.
///
/// Both cases look like an append that never finished. Whether that is
/// acceptable depends on where the segment sits in its shard, so the
/// scanner reports it and lets recovery decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    /// Fewer bytes than a header remain after the last record
    ShortHeader { offset: u64, available: u64 },

    /// A decoded record claims more bytes than the file holds
    Overrun { offset: u64, declared_len: Option<u64> },
}

impl ScanStop {
    pub fn offset(&self) -> u64 {
        match self {
            ScanStop::ShortHeader { offset, .. } | ScanStop::Overrun { offset, .. } => *offset,
        }
    }
}

/// Result of scanning a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Number of complete records visited
    pub records: u64,

    /// End of the last complete record (the valid length of the segment)
    pub end: u64,

    /// Set when trailing bytes did not form a complete record
    pub stop: Option<ScanStop>,
}

/// Scan `file` from `start` up to `file_len`, handing every complete record
/// to `apply` in log order.
///
/// Header decode failures and undecodable keys are fatal `CorruptRecord`
/// errors. Incomplete trailing bytes end the scan and are reported in
/// [`ScanOutcome::stop`].
pub fn scan_segment(
    file: &File,
    file_len: u64,
    start: u64,
    segment: &str,
    mut apply: impl FnMut(ScannedRecord),
) -> Result<ScanOutcome> {
    if start > file_len {
        return Err(VaultError::corrupt(
            segment,
            start,
            format!("scan start beyond segment length {}", file_len),
        ));
    }

    let mut reader = BufReader::with_capacity(SCAN_BUFFER_SIZE, file);
    reader
        .seek(SeekFrom::Start(start))
        .map_err(io_context(format!("seek segment {}", segment)))?;

    let mut offset = start;
    let mut records = 0u64;
    let mut header_buf = [0u8; HEADER_SIZE];
    let mut payload = Vec::new();

    while offset < file_len {
        let available = file_len - offset;
        if available < HEADER_SIZE as u64 {
            return Ok(ScanOutcome {
                records,
                end: offset,
                stop: Some(ScanStop::ShortHeader { offset, available }),
            });
        }

        reader
            .read_exact(&mut header_buf)
            .map_err(io_context(format!("read header in {}", segment)))?;
        let header = RecordHeader::decode(&header_buf).map_err(|e| e.located(segment, offset))?;

        let record_len = header.record_len();
        match record_len {
            Some(len) if len <= available => {}
            declared_len => {
                return Ok(ScanOutcome {
                    records,
                    end: offset,
                    stop: Some(ScanStop::Overrun {
                        offset,
                        declared_len,
                    }),
                });
            }
        }

        // Key and content type are bounded by the header fields (u32 + u16).
        payload.resize(header.payload_prefix_len() as usize, 0);
        reader
            .read_exact(&mut payload)
            .map_err(io_context(format!("read record key in {}", segment)))?;
        let (key_bytes, ct_bytes) = payload.split_at(header.key_len as usize);
        let key = String::from_utf8(key_bytes.to_vec())
            .map_err(|_| VaultError::corrupt(segment, offset, "key is not valid UTF-8"))?;
        let content_type = String::from_utf8(ct_bytes.to_vec())
            .map_err(|_| VaultError::corrupt(segment, offset, "content type is not valid UTF-8"))?;

        // data_len <= available <= file_len, which fits in i64 for any real file
        reader
            .seek_relative(header.data_len as i64)
            .map_err(io_context(format!("skip record data in {}", segment)))?;

        let data_offset = offset + HEADER_SIZE as u64 + header.payload_prefix_len();
        apply(ScannedRecord {
            offset,
            header,
            key,
            content_type,
            data_offset,
        });

        records += 1;
        offset = data_offset + header.data_len;
    }

    Ok(ScanOutcome {
        records,
        end: offset,
        stop: None,
    })
}
