//! Snapshot codec: the on-disk `.kdb` format.
//!
//! Little-endian throughout. A file is a 4-byte encoding version followed by
//! zero or more tightly packed 43-byte records, terminated by EOF:
//!
//! ```text
//!  0..3    IPv4 as u32
//!  4..15   current impact   five_min, hour, day   u32 each
//! 16..27   maximum impact   five_min, hour, day   u32 each
//! 28..39   window starts    five_min, hour, day   u32 unix seconds each
//! 40..41   forgiven         u16
//! 42      flags            u8
//! ```
//!
//! EOF exactly on a record boundary ends decoding cleanly; EOF inside a
//! record is an error.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::error::CodecError;
use crate::store::record::{ImpactRecord, ImpactTriple, WindowStarts};

/// Version written into the file header.
pub const ENCODING_VERSION: u32 = 1;

/// Header length in bytes.
pub const HEADER_LEN: usize = 4;

/// Packed record length in bytes.
pub const RECORD_LEN: usize = 43;

/// Packs one IP and its record into the 43-byte wire form.
pub fn pack_record(ip: u32, record: &ImpactRecord) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    buf[0..4].copy_from_slice(&ip.to_le_bytes());
    buf[4..8].copy_from_slice(&record.current.five_min.to_le_bytes());
    buf[8..12].copy_from_slice(&record.current.hour.to_le_bytes());
    buf[12..16].copy_from_slice(&record.current.day.to_le_bytes());
    buf[16..20].copy_from_slice(&record.maximum.five_min.to_le_bytes());
    buf[20..24].copy_from_slice(&record.maximum.hour.to_le_bytes());
    buf[24..28].copy_from_slice(&record.maximum.day.to_le_bytes());
    buf[28..32].copy_from_slice(&record.starts.five_min.to_le_bytes());
    buf[32..36].copy_from_slice(&record.starts.hour.to_le_bytes());
    buf[36..40].copy_from_slice(&record.starts.day.to_le_bytes());
    buf[40..42].copy_from_slice(&record.forgiven.to_le_bytes());
    buf[42] = record.flags;
    buf
}

/// Unpacks the 43-byte wire form back into an IP and record.
pub fn unpack_record(buf: &[u8; RECORD_LEN]) -> (u32, ImpactRecord) {
    let ip = read_u32(&buf[0..4]);
    let record = ImpactRecord {
        current: ImpactTriple {
            five_min: read_u32(&buf[4..8]),
            hour: read_u32(&buf[8..12]),
            day: read_u32(&buf[12..16]),
        },
        maximum: ImpactTriple {
            five_min: read_u32(&buf[16..20]),
            hour: read_u32(&buf[20..24]),
            day: read_u32(&buf[24..28]),
        },
        starts: WindowStarts {
            five_min: read_u32(&buf[28..32]),
            hour: read_u32(&buf[32..36]),
            day: read_u32(&buf[36..40]),
        },
        forgiven: u16::from_le_bytes([buf[40], buf[41]]),
        flags: buf[42],
    };
    (ip, record)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().expect("4-byte slice"))
}

/// Streams a snapshot out to a writer.
pub struct SnapshotEncoder<W: Write> {
    writer: W,
}

impl<W: Write> SnapshotEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes the version header. The header has its own buffer; record
    /// packing never aliases it.
    pub fn write_header(&mut self) -> io::Result<()> {
        let header: [u8; HEADER_LEN] = ENCODING_VERSION.to_le_bytes();
        self.writer.write_all(&header)
    }

    pub fn write_record(&mut self, ip: u32, record: &ImpactRecord) -> io::Result<()> {
        self.writer.write_all(&pack_record(ip, record))
    }
}

/// Reads a snapshot back into a plain record map.
pub struct SnapshotDecoder<R: Read> {
    reader: R,
}

impl<R: Read> SnapshotDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Decodes the whole file. Fails on a version mismatch or on EOF inside
    /// a record.
    pub fn decode(mut self) -> Result<HashMap<u32, ImpactRecord>, CodecError> {
        let mut header = [0u8; HEADER_LEN];
        self.reader.read_exact(&mut header)?;
        let version = u32::from_le_bytes(header);
        if version != ENCODING_VERSION {
            return Err(CodecError::WrongVersion {
                found: version,
                expected: ENCODING_VERSION,
            });
        }

        let mut records = HashMap::new();
        let mut buf = [0u8; RECORD_LEN];
        while self.fill_record(&mut buf)? {
            let (ip, record) = unpack_record(&buf);
            records.insert(ip, record);
        }
        Ok(records)
    }

    /// Reads one full record into `buf`. Returns `Ok(false)` on clean EOF at
    /// a record boundary.
    fn fill_record(&mut self, buf: &mut [u8; RECORD_LEN]) -> Result<bool, CodecError> {
        let mut filled = 0;
        while filled < RECORD_LEN {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(CodecError::Truncated {
                        len: filled,
                        expected: RECORD_LEN,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }
}
