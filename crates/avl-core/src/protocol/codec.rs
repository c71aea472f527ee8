//! Binary decoder (and device-side encoder) for Codec 8 AVL telemetry frames.
//!
//! Three framings reach the gateway.  All multi-byte integers are big-endian.
//!
//! ```text
//! standard : [0x00000000:4][len:4][data:len][crc:4]
//! compact  :               [len:4][data:len][crc:4]
//! bare     : [len:4][codec:1][count:1][gps record:24]...
//!
//! data     : [codec:1][count:1][record × count][count:1]
//! record   : [timestamp:8][priority:1][lon:4][lat:4][alt:2][angle:2][sats:1][speed:2]
//!            [event_io:1][io_total:1]
//!            [n1:1][(id:1 value:1) × n1]
//!            [n2:1][(id:1 value:2) × n2]
//!            [n4:1][(id:1 value:4) × n4]
//!            [n8:1][(id:1 value:8) × n8]
//! ```
//!
//! A buffer whose length matches an envelope's arithmetic is decoded under
//! that envelope, CRC first, and every record is walked.  Anything else of at
//! least 30 bytes is read as a bare frame: only the fixed GPS block at offset
//! 6 is trusted, yielding exactly one record.  Bare decoding can be disabled
//! with [`DecodeOptions::require_envelope`].
//!
//! The CRC is CRC-16/IBM over the data field, carried in the low 16 bits of
//! the 4-byte CRC field.

use std::ops::Range;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::domain::record::{AvlRecord, IoElement};
use crate::protocol::crc::crc16_ibm;

// ── Protocol constants ────────────────────────────────────────────────────────

/// The only codec id this decoder accepts.
pub const CODEC_8: u8 = 0x08;

/// Coordinates travel as signed integers in units of 10^-7 degrees.
pub const COORDINATE_SCALE: f64 = 10_000_000.0;

/// Timestamp + priority + GPS element.
pub const GPS_RECORD_LEN: usize = 24;

/// Where the single record of a bare frame starts.
pub const BARE_RECORD_OFFSET: usize = 6;

/// Minimum length of a bare frame: header plus one fixed GPS block.
pub const BARE_FRAME_MIN_LEN: usize = BARE_RECORD_OFFSET + GPS_RECORD_LEN;

const PREAMBLE: [u8; 4] = [0x00; 4];
/// Preamble + length + CRC.
const STANDARD_OVERHEAD: usize = 12;
/// Length + CRC.
const COMPACT_OVERHEAD: usize = 8;
/// Codec id + record count + trailing record count.
const DATA_FIELD_MIN_LEN: usize = 3;
/// Value widths of the four IO element groups, in wire order.
const IO_VALUE_WIDTHS: [usize; 4] = [1, 2, 4, 8];

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can occur while decoding a telemetry frame.
///
/// None of these are reported to the device.  The gateway withholds the ACK
/// and the device retransmits.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The buffer ends before a required field.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// No length/CRC envelope matched and bare frames are not accepted.
    #[error("frame of {len} bytes has no verifiable length/CRC envelope")]
    MissingEnvelope { len: usize },

    #[error("unsupported codec id: 0x{0:02X}")]
    UnsupportedCodec(u8),

    #[error("CRC mismatch: frame carries 0x{declared:08X}, data hashes to 0x{computed:04X}")]
    CrcMismatch { declared: u32, computed: u16 },

    /// Leading and trailing record counts disagree.
    #[error("record count mismatch: header says {header}, trailer says {trailer}")]
    RecordCountMismatch { header: u8, trailer: u8 },

    /// The records did not end exactly at the trailing count byte.
    #[error("record data length mismatch: records end at byte {consumed}, trailer sits at {expected}")]
    DataLengthMismatch { consumed: usize, expected: usize },

    /// An IO section's total disagrees with the sum of its groups.
    #[error("IO element count mismatch: declared {declared}, found {found}")]
    IoCountMismatch { declared: u8, found: usize },

    /// Neither interpretation of the timestamp yields a representable instant.
    #[error("timestamp {0} is not a representable instant")]
    InvalidTimestamp(u64),
}

/// Errors from [`encode_telemetry`].
#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    /// A frame carries at most 255 records.
    #[error("{0} records do not fit in one frame (at most 255)")]
    TooManyRecords(usize),

    /// The wire timestamp is unsigned milliseconds since the epoch.
    #[error("timestamp {0} is before the Unix epoch")]
    TimestampBeforeEpoch(DateTime<Utc>),

    #[error("{0} IO elements do not fit in one record (at most 255)")]
    TooManyIoElements(usize),

    /// Codec 8 IO ids are a single byte.
    #[error("IO element id {0} does not fit in one byte")]
    IoIdOutOfRange(u16),
}

impl ProtocolError {
    /// Whether the error concerns the shape of the frame rather than its
    /// content.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::InsufficientData { .. }
                | ProtocolError::MissingEnvelope { .. }
        )
    }
}

// ── Frame types ───────────────────────────────────────────────────────────────

/// Which framing a telemetry buffer was decoded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// Zero preamble, length, data, CRC.
    Standard,
    /// Length, data, CRC.
    Compact,
    /// Fixed layout without a verifiable envelope; first record only.
    Bare,
}

/// Decoder settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Reject frames that do not match a length/CRC envelope.
    pub require_envelope: bool,
}

/// A decoded telemetry frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub envelope: Envelope,
    /// The declared length field.
    pub total_length: u32,
    pub codec_id: u8,
    /// Record count from the header.
    pub record_count: u8,
    /// Trailing record count; `None` for bare frames.
    pub record_count_trailer: Option<u8>,
    pub records: Vec<AvlRecord>,
    /// Byte range each record occupied in the input buffer.
    pub record_spans: Vec<Range<usize>>,
}

impl TelemetryFrame {
    /// Number of records to acknowledge.
    pub fn accepted_count(&self) -> u32 {
        self.records.len() as u32
    }
}

/// How a raw 8-byte timestamp was turned into an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampInterpretation {
    /// Read directly as milliseconds since the Unix epoch.
    Milliseconds,
    /// The millisecond reading was out of range; the raw value was divided by
    /// 1000 (integer division) and read again.
    Rescaled,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one telemetry frame.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the buffer is truncated, fails its CRC,
/// carries an unsupported codec, has inconsistent record counts or lengths,
/// or contains a timestamp that cannot be resolved.
///
/// # Examples
///
/// ```rust
/// use avl_core::protocol::codec::{decode_telemetry, encode_telemetry, DecodeOptions, Envelope};
/// use avl_core::AvlRecord;
/// use chrono::{TimeZone, Utc};
///
/// let record = AvlRecord {
///     timestamp: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
///     priority: 1,
///     longitude: 23.5,
///     latitude: 61.2,
///     altitude: 150,
///     angle: 90,
///     satellites: 7,
///     speed: 45,
///     event_io_id: 0,
///     io: Vec::new(),
/// };
/// let bytes = encode_telemetry(std::slice::from_ref(&record), Envelope::Standard).unwrap();
/// let frame = decode_telemetry(&bytes, &DecodeOptions::default()).unwrap();
/// assert_eq!(frame.records, vec![record]);
/// assert_eq!(frame.accepted_count(), 1);
/// ```
pub fn decode_telemetry(
    buf: &[u8],
    options: &DecodeOptions,
) -> Result<TelemetryFrame, ProtocolError> {
    match detect_envelope(buf) {
        Some(bounds) => decode_enveloped(buf, bounds),
        None if options.require_envelope => Err(ProtocolError::MissingEnvelope { len: buf.len() }),
        None => decode_bare(buf),
    }
}

/// Resolves the raw 8-byte timestamp field into an instant.
///
/// The value is read as milliseconds since the epoch.  Only when that instant
/// is not representable is the value divided by 1000 and read again; old but
/// valid millisecond dates are never reinterpreted.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidTimestamp`] when neither reading is
/// representable.
pub fn resolve_timestamp(
    raw: u64,
) -> Result<(DateTime<Utc>, TimestampInterpretation), ProtocolError> {
    if let Some(ts) = millis_to_instant(raw) {
        return Ok((ts, TimestampInterpretation::Milliseconds));
    }
    match millis_to_instant(raw / 1000) {
        Some(ts) => Ok((ts, TimestampInterpretation::Rescaled)),
        None => Err(ProtocolError::InvalidTimestamp(raw)),
    }
}

/// Total length of a standard-envelope frame, read from its first 8 bytes.
///
/// Returns `None` when the prefix is shorter than 8 bytes or does not start
/// with the zero preamble.  Used by stream readers to know how many bytes
/// are still missing.
pub fn standard_frame_len(prefix: &[u8]) -> Option<usize> {
    if prefix.len() < 8 || prefix[..4] != PREAMBLE {
        return None;
    }
    let declared = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    declared_total(declared, STANDARD_OVERHEAD)
}

/// Encodes records the way a device would send them.
///
/// Standard and compact envelopes carry every record (at most 255) with
/// their IO elements, grouped by the narrowest width that holds each value.
/// A bare frame carries only the fixed GPS block of the first record.
///
/// # Errors
///
/// Returns [`EncodeError`] when a count, IO id or timestamp does not fit its
/// wire field.
pub fn encode_telemetry(
    records: &[AvlRecord],
    envelope: Envelope,
) -> Result<Vec<u8>, EncodeError> {
    let count =
        u8::try_from(records.len()).map_err(|_| EncodeError::TooManyRecords(records.len()))?;
    let frame = match envelope {
        Envelope::Bare => {
            let mut buf = Vec::with_capacity(BARE_FRAME_MIN_LEN);
            let declared = match records.first() {
                Some(_) => (BARE_FRAME_MIN_LEN - 4) as u32,
                None => 2,
            };
            buf.extend_from_slice(&declared.to_be_bytes());
            buf.push(CODEC_8);
            buf.push(count);
            if let Some(first) = records.first() {
                encode_gps_block(&mut buf, first)?;
            }
            buf
        }
        Envelope::Standard | Envelope::Compact => {
            let mut data = vec![CODEC_8, count];
            for record in records {
                encode_gps_block(&mut data, record)?;
                encode_io(&mut data, record)?;
            }
            data.push(count);

            let mut buf = Vec::with_capacity(data.len() + STANDARD_OVERHEAD);
            if envelope == Envelope::Standard {
                buf.extend_from_slice(&PREAMBLE);
            }
            buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
            buf.extend_from_slice(&data);
            buf.extend_from_slice(&u32::from(crc16_ibm(&data)).to_be_bytes());
            buf
        }
    };
    Ok(frame)
}

// ── Envelope detection ────────────────────────────────────────────────────────

struct EnvelopeBounds {
    kind: Envelope,
    total_length: u32,
    /// Data field range within the buffer; the CRC follows at `data.end`.
    data: Range<usize>,
}

fn detect_envelope(buf: &[u8]) -> Option<EnvelopeBounds> {
    if buf.len() >= STANDARD_OVERHEAD && standard_frame_len(buf) == Some(buf.len()) {
        let declared = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        return Some(EnvelopeBounds {
            kind: Envelope::Standard,
            total_length: declared,
            data: 8..buf.len() - 4,
        });
    }
    if buf.len() >= COMPACT_OVERHEAD {
        let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if declared_total(declared, COMPACT_OVERHEAD) == Some(buf.len()) {
            return Some(EnvelopeBounds {
                kind: Envelope::Compact,
                total_length: declared,
                data: 4..buf.len() - 4,
            });
        }
    }
    None
}

fn declared_total(declared: u32, overhead: usize) -> Option<usize> {
    usize::try_from(declared).ok()?.checked_add(overhead)
}

// ── Frame decoding ────────────────────────────────────────────────────────────

fn decode_enveloped(buf: &[u8], bounds: EnvelopeBounds) -> Result<TelemetryFrame, ProtocolError> {
    let data = &buf[bounds.data.clone()];
    require_len(data, DATA_FIELD_MIN_LEN)?;

    let declared_crc = read_u32(buf, bounds.data.end)?;
    let computed = crc16_ibm(data);
    if declared_crc != u32::from(computed) {
        return Err(ProtocolError::CrcMismatch {
            declared: declared_crc,
            computed,
        });
    }

    let codec_id = data[0];
    if codec_id != CODEC_8 {
        return Err(ProtocolError::UnsupportedCodec(codec_id));
    }

    let record_count = data[1];
    let records_end = data.len() - 1;
    let trailer = data[records_end];
    if trailer != record_count {
        return Err(ProtocolError::RecordCountMismatch {
            header: record_count,
            trailer,
        });
    }

    let mut offset = 2;
    let mut records = Vec::with_capacity(record_count as usize);
    let mut record_spans = Vec::with_capacity(record_count as usize);
    for _ in 0..record_count {
        let (record, used) = decode_record(&data[offset..records_end])?;
        let start = bounds.data.start + offset;
        record_spans.push(start..start + used);
        records.push(record);
        offset += used;
    }

    if offset != records_end {
        return Err(ProtocolError::DataLengthMismatch {
            consumed: offset,
            expected: records_end,
        });
    }

    Ok(TelemetryFrame {
        envelope: bounds.kind,
        total_length: bounds.total_length,
        codec_id,
        record_count,
        record_count_trailer: Some(trailer),
        records,
        record_spans,
    })
}

fn decode_bare(buf: &[u8]) -> Result<TelemetryFrame, ProtocolError> {
    require_len(buf, BARE_FRAME_MIN_LEN)?;

    let total_length = read_u32(buf, 0)?;
    let codec_id = buf[4];
    if codec_id != CODEC_8 {
        return Err(ProtocolError::UnsupportedCodec(codec_id));
    }
    let record_count = buf[5];
    let record = decode_gps_block(&buf[BARE_RECORD_OFFSET..BARE_FRAME_MIN_LEN])?;

    Ok(TelemetryFrame {
        envelope: Envelope::Bare,
        total_length,
        codec_id,
        record_count,
        record_count_trailer: None,
        records: vec![record],
        record_spans: vec![BARE_RECORD_OFFSET..BARE_FRAME_MIN_LEN],
    })
}

/// Decodes one full record from the start of `p`, returning the record and
/// the number of bytes it occupied.
fn decode_record(p: &[u8]) -> Result<(AvlRecord, usize), ProtocolError> {
    let mut record = decode_gps_block(p)?;
    let mut cursor = GPS_RECORD_LEN;

    let event_io_id = read_u8(p, cursor)?;
    let declared_total = read_u8(p, cursor + 1)?;
    cursor += 2;

    let mut io = Vec::with_capacity(declared_total as usize);
    for width in IO_VALUE_WIDTHS {
        let count = read_u8(p, cursor)?;
        cursor += 1;
        for _ in 0..count {
            let id = read_u8(p, cursor)?;
            let value = read_uint(p, cursor + 1, width)?;
            cursor += 1 + width;
            io.push(IoElement {
                id: u16::from(id),
                value,
            });
        }
    }

    if io.len() != declared_total as usize {
        return Err(ProtocolError::IoCountMismatch {
            declared: declared_total,
            found: io.len(),
        });
    }

    record.event_io_id = event_io_id;
    record.io = io;
    Ok((record, cursor))
}

/// Decodes the fixed 24-byte timestamp/priority/GPS block.
fn decode_gps_block(p: &[u8]) -> Result<AvlRecord, ProtocolError> {
    require_len(p, GPS_RECORD_LEN)?;

    let raw_timestamp = read_u64(p, 0)?;
    let (timestamp, interpretation) = resolve_timestamp(raw_timestamp)?;
    if interpretation == TimestampInterpretation::Rescaled {
        debug!(raw = raw_timestamp, %timestamp, "timestamp out of millisecond range, rescaled");
    }

    Ok(AvlRecord {
        timestamp,
        priority: p[8],
        longitude: f64::from(read_i32(p, 9)?) / COORDINATE_SCALE,
        latitude: f64::from(read_i32(p, 13)?) / COORDINATE_SCALE,
        altitude: read_i16(p, 17)?,
        angle: read_u16(p, 19)?,
        satellites: p[21],
        speed: read_u16(p, 22)?,
        event_io_id: 0,
        io: Vec::new(),
    })
}

fn millis_to_instant(millis: u64) -> Option<DateTime<Utc>> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

// ── Encoding helpers ──────────────────────────────────────────────────────────

fn encode_gps_block(buf: &mut Vec<u8>, r: &AvlRecord) -> Result<(), EncodeError> {
    let millis = u64::try_from(r.timestamp.timestamp_millis())
        .map_err(|_| EncodeError::TimestampBeforeEpoch(r.timestamp))?;
    buf.extend_from_slice(&millis.to_be_bytes());
    buf.push(r.priority);
    buf.extend_from_slice(&degrees_to_wire(r.longitude).to_be_bytes());
    buf.extend_from_slice(&degrees_to_wire(r.latitude).to_be_bytes());
    buf.extend_from_slice(&r.altitude.to_be_bytes());
    buf.extend_from_slice(&r.angle.to_be_bytes());
    buf.push(r.satellites);
    buf.extend_from_slice(&r.speed.to_be_bytes());
    Ok(())
}

fn encode_io(buf: &mut Vec<u8>, r: &AvlRecord) -> Result<(), EncodeError> {
    let total =
        u8::try_from(r.io.len()).map_err(|_| EncodeError::TooManyIoElements(r.io.len()))?;
    buf.push(r.event_io_id);
    buf.push(total);
    for width in IO_VALUE_WIDTHS {
        let group: Vec<&IoElement> = r.io.iter().filter(|e| io_width(e.value) == width).collect();
        // Never exceeds `total`, which already fits in a byte.
        buf.push(group.len() as u8);
        for element in group {
            let id =
                u8::try_from(element.id).map_err(|_| EncodeError::IoIdOutOfRange(element.id))?;
            buf.push(id);
            buf.extend_from_slice(&element.value.to_be_bytes()[8 - width..]);
        }
    }
    Ok(())
}

fn degrees_to_wire(degrees: f64) -> i32 {
    (degrees * COORDINATE_SCALE).round() as i32
}

fn io_width(value: u64) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFFFF_FFFF => 4,
        _ => 8,
    }
}

// ── Read helpers ──────────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(ProtocolError::InsufficientData {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], ProtocolError> {
    require_len(buf, offset + N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    Ok(out)
}

fn read_u8(buf: &[u8], offset: usize) -> Result<u8, ProtocolError> {
    read_array::<1>(buf, offset).map(|b| b[0])
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    read_array(buf, offset).map(u16::from_be_bytes)
}

fn read_i16(buf: &[u8], offset: usize) -> Result<i16, ProtocolError> {
    read_array(buf, offset).map(i16::from_be_bytes)
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    read_array(buf, offset).map(u32::from_be_bytes)
}

fn read_i32(buf: &[u8], offset: usize) -> Result<i32, ProtocolError> {
    read_array(buf, offset).map(i32::from_be_bytes)
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    read_array(buf, offset).map(u64::from_be_bytes)
}

/// Reads a big-endian unsigned integer of 1, 2, 4 or 8 bytes.
fn read_uint(buf: &[u8], offset: usize, width: usize) -> Result<u64, ProtocolError> {
    require_len(buf, offset + width)?;
    Ok(buf[offset..offset + width]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
