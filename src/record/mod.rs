//! Record Module
//!
//! Binary framing for everything written to a segment.
//!
//! ## Record Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Header (32 bytes, little endian)                                 │
//! │ ┌───────┬─────┬────┬────────┬───────┬─────────┬─────────┬──────┐ │
//! │ │Magic 4│Ver 1│Op 1│KeyLen 4│CtLen 2│DataLen 8│Updated 8│CRC 4 │ │
//! │ └───────┴─────┴────┴────────┴───────┴─────────┴─────────┴──────┘ │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Key bytes (KeyLen)                                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Content-type bytes (CtLen)                                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Data bytes (DataLen)                                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `Delete` record carries no content type and no data.

mod header;
mod scanner;

pub use header::{
    RecordHeader, RecordOp, HEADER_SIZE, RECORD_MAGIC, RECORD_VERSION, UNKNOWN_DATA_LEN,
};
pub use scanner::{scan_segment, ScanOutcome, ScanStop, ScannedRecord};
