//! Binary value codec
//!
//! Stateless encode/decode of wire values. Decoders take an explicit buffer and
//! offset and return the number of bytes consumed, because row values are read
//! in place from one shared receive packet. Every `skip_*` function consumes
//! exactly as many bytes as its `decode_*` counterpart.

use super::constants::{column_type, lenenc};
use bytes::{BufMut, BytesMut};
use std::io;

/// Byte order of a fixed-width field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Protocol order
    Little,
    /// Network order
    Big,
}

/// A sub-slice of a shared buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteWindow {
    /// Start offset within the buffer
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
}

impl ByteWindow {
    /// Borrow the window from `buf`
    pub fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.offset..self.offset + self.len]
    }
}

fn eof(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string())
}

fn ensure(buf: &[u8], offset: usize, len: usize, what: &str) -> io::Result<()> {
    if offset.checked_add(len).map_or(true, |end| end > buf.len()) {
        return Err(eof(what));
    }
    Ok(())
}

/// Decode an unsigned integer of `width` bytes (1..=8)
pub fn decode_uint(buf: &[u8], offset: usize, width: usize, order: ByteOrder) -> io::Result<u64> {
    if width == 0 || width > 8 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported integer width {}", width),
        ));
    }
    ensure(buf, offset, width, "fixed-width integer")?;
    let bytes = &buf[offset..offset + width];
    let value = match order {
        ByteOrder::Little => bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        ByteOrder::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
    };
    Ok(value)
}

/// Decode a signed integer of `width` bytes, sign-extending
pub fn decode_int(buf: &[u8], offset: usize, width: usize, order: ByteOrder) -> io::Result<i64> {
    let raw = decode_uint(buf, offset, width, order)?;
    let shift = 64 - (width as u32) * 8;
    Ok(((raw << shift) as i64) >> shift)
}

/// Encode the low `width` bytes of `value`
pub fn encode_uint(buf: &mut BytesMut, value: u64, width: usize, order: ByteOrder) {
    let bytes = value.to_le_bytes();
    match order {
        ByteOrder::Little => buf.put_slice(&bytes[..width]),
        ByteOrder::Big => {
            for b in bytes[..width].iter().rev() {
                buf.put_u8(*b);
            }
        }
    }
}

/// Decode an IEEE-754 single
pub fn decode_f32(buf: &[u8], offset: usize, order: ByteOrder) -> io::Result<f32> {
    Ok(f32::from_bits(decode_uint(buf, offset, 4, order)? as u32))
}

/// Decode an IEEE-754 double
pub fn decode_f64(buf: &[u8], offset: usize, order: ByteOrder) -> io::Result<f64> {
    Ok(f64::from_bits(decode_uint(buf, offset, 8, order)?))
}

/// Decode a length-encoded integer
///
/// Returns `(None, 1)` for the NULL marker.
pub fn decode_lenenc_int(buf: &[u8], offset: usize) -> io::Result<(Option<u64>, usize)> {
    ensure(buf, offset, 1, "length-encoded integer")?;
    let marker = buf[offset];
    match marker {
        0..=lenenc::MAX_ONE_BYTE => Ok((Some(u64::from(marker)), 1)),
        lenenc::NULL => Ok((None, 1)),
        lenenc::TWO_BYTES => Ok((Some(decode_uint(buf, offset + 1, 2, ByteOrder::Little)?), 3)),
        lenenc::THREE_BYTES => Ok((Some(decode_uint(buf, offset + 1, 3, ByteOrder::Little)?), 4)),
        lenenc::EIGHT_BYTES => Ok((Some(decode_uint(buf, offset + 1, 8, ByteOrder::Little)?), 9)),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("reserved length-encoded integer prefix 0x{:02X}", other),
        )),
    }
}

/// Skip a length-encoded integer, returning the bytes it occupies
pub fn skip_lenenc_int(buf: &[u8], offset: usize) -> io::Result<usize> {
    ensure(buf, offset, 1, "length-encoded integer")?;
    let consumed = match buf[offset] {
        0..=lenenc::MAX_ONE_BYTE | lenenc::NULL => 1,
        lenenc::TWO_BYTES => 3,
        lenenc::THREE_BYTES => 4,
        lenenc::EIGHT_BYTES => 9,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("reserved length-encoded integer prefix 0x{:02X}", other),
            ))
        }
    };
    ensure(buf, offset, consumed, "length-encoded integer")?;
    Ok(consumed)
}

/// Bytes needed to encode `value` as a length-encoded integer
pub fn lenenc_int_size(value: u64) -> usize {
    match value {
        0..=250 => 1,
        251..=0xFFFF => 3,
        0x1_0000..=0xFF_FFFF => 4,
        _ => 9,
    }
}

/// Encode a length-encoded integer
pub fn encode_lenenc_int(buf: &mut BytesMut, value: u64) {
    match lenenc_int_size(value) {
        1 => buf.put_u8(value as u8),
        3 => {
            buf.put_u8(lenenc::TWO_BYTES);
            buf.put_u16_le(value as u16);
        }
        4 => {
            buf.put_u8(lenenc::THREE_BYTES);
            encode_uint(buf, value, 3, ByteOrder::Little);
        }
        _ => {
            buf.put_u8(lenenc::EIGHT_BYTES);
            buf.put_u64_le(value);
        }
    }
}

/// Encode the NULL marker
pub fn encode_lenenc_null(buf: &mut BytesMut) {
    buf.put_u8(lenenc::NULL);
}

/// Decode a length-encoded byte string as a window into `buf`
///
/// Returns `(None, 1)` for NULL.
pub fn decode_lenenc_bytes(buf: &[u8], offset: usize) -> io::Result<(Option<ByteWindow>, usize)> {
    let (len, header) = decode_lenenc_int(buf, offset)?;
    let Some(len) = len else {
        return Ok((None, header));
    };
    let len = usize::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string length overflow"))?;
    ensure(buf, offset + header, len, "length-encoded string")?;
    Ok((
        Some(ByteWindow {
            offset: offset + header,
            len,
        }),
        header + len,
    ))
}

/// Skip a length-encoded byte string
pub fn skip_lenenc_bytes(buf: &[u8], offset: usize) -> io::Result<usize> {
    decode_lenenc_bytes(buf, offset).map(|(_, consumed)| consumed)
}

/// Encode a length-encoded byte string
pub fn encode_lenenc_bytes(buf: &mut BytesMut, data: &[u8]) {
    encode_lenenc_int(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Read a NUL-terminated string window starting at `offset`
pub fn decode_null_terminated(buf: &[u8], offset: usize) -> io::Result<(ByteWindow, usize)> {
    let rest = buf.get(offset..).ok_or_else(|| eof("null-terminated string"))?;
    let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "missing null terminator in string",
        )
    })?;
    Ok((ByteWindow { offset, len: end }, end + 1))
}

/// Date or date-time value; all-zero is the zero-date sentinel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DateTimeValue {
    /// Year
    pub year: u16,
    /// Month (1-12, 0 in zero dates)
    pub month: u8,
    /// Day (1-31, 0 in zero dates)
    pub day: u8,
    /// Hour
    pub hour: u8,
    /// Minute
    pub minute: u8,
    /// Second
    pub second: u8,
    /// Nanoseconds; the wire carries microsecond precision
    pub nanosecond: u32,
}

impl DateTimeValue {
    /// Date-only value
    pub fn date(year: u16, month: u8, day: u8) -> Self {
        Self {
            year,
            month,
            day,
            ..Default::default()
        }
    }

    /// `0000-00-00 00:00:00`
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    fn has_time(&self) -> bool {
        self.hour != 0 || self.minute != 0 || self.second != 0 || self.nanosecond != 0
    }
}

/// TIME value: a signed duration up to 838:59:59.999999
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TimeValue {
    /// Whether the duration is negative
    pub negative: bool,
    /// Hours, including whole days
    pub hours: u32,
    /// Minutes
    pub minutes: u8,
    /// Seconds
    pub seconds: u8,
    /// Nanoseconds; the wire carries microsecond precision
    pub nanosecond: u32,
}

impl TimeValue {
    /// `00:00:00`
    pub fn is_zero(&self) -> bool {
        self.hours == 0 && self.minutes == 0 && self.seconds == 0 && self.nanosecond == 0
    }
}

/// Wire length of an encoded date-time (excluding the length byte)
pub fn datetime_wire_len(value: &DateTimeValue) -> usize {
    if value.is_zero() {
        0
    } else if value.nanosecond / 1000 != 0 {
        11
    } else if value.has_time() {
        7
    } else {
        4
    }
}

/// Encode a DATE/DATETIME/TIMESTAMP in its shortest binary form
pub fn encode_datetime(buf: &mut BytesMut, value: &DateTimeValue) {
    let len = datetime_wire_len(value);
    buf.put_u8(len as u8);
    if len >= 4 {
        buf.put_u16_le(value.year);
        buf.put_u8(value.month);
        buf.put_u8(value.day);
    }
    if len >= 7 {
        buf.put_u8(value.hour);
        buf.put_u8(value.minute);
        buf.put_u8(value.second);
    }
    if len == 11 {
        buf.put_u32_le(value.nanosecond / 1000);
    }
}

/// Decode a binary DATE/DATETIME/TIMESTAMP
pub fn decode_datetime(buf: &[u8], offset: usize) -> io::Result<(DateTimeValue, usize)> {
    ensure(buf, offset, 1, "temporal length")?;
    let len = buf[offset] as usize;
    if !matches!(len, 0 | 4 | 7 | 11) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid date-time length {}", len),
        ));
    }
    ensure(buf, offset + 1, len, "date-time value")?;
    let p = offset + 1;
    let mut value = DateTimeValue::default();
    if len >= 4 {
        value.year = decode_uint(buf, p, 2, ByteOrder::Little)? as u16;
        value.month = buf[p + 2];
        value.day = buf[p + 3];
    }
    if len >= 7 {
        value.hour = buf[p + 4];
        value.minute = buf[p + 5];
        value.second = buf[p + 6];
    }
    if len == 11 {
        value.nanosecond = decode_micros(buf, p + 7)?;
    }
    Ok((value, 1 + len))
}

/// Wire length of an encoded TIME (excluding the length byte)
pub fn time_wire_len(value: &TimeValue) -> usize {
    if value.is_zero() {
        0
    } else if value.nanosecond / 1000 != 0 {
        12
    } else {
        8
    }
}

/// Encode a TIME in its shortest binary form
pub fn encode_time(buf: &mut BytesMut, value: &TimeValue) {
    let len = time_wire_len(value);
    buf.put_u8(len as u8);
    if len >= 8 {
        buf.put_u8(u8::from(value.negative));
        buf.put_u32_le(value.hours / 24);
        buf.put_u8((value.hours % 24) as u8);
        buf.put_u8(value.minutes);
        buf.put_u8(value.seconds);
    }
    if len == 12 {
        buf.put_u32_le(value.nanosecond / 1000);
    }
}

/// Decode a binary TIME
pub fn decode_time(buf: &[u8], offset: usize) -> io::Result<(TimeValue, usize)> {
    ensure(buf, offset, 1, "temporal length")?;
    let len = buf[offset] as usize;
    if !matches!(len, 0 | 8 | 12) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid time length {}", len),
        ));
    }
    ensure(buf, offset + 1, len, "time value")?;
    let p = offset + 1;
    let mut value = TimeValue::default();
    if len >= 8 {
        value.negative = buf[p] == 1;
        let days = decode_uint(buf, p + 1, 4, ByteOrder::Little)? as u32;
        value.hours = days
            .checked_mul(24)
            .and_then(|h| h.checked_add(u32::from(buf[p + 5])))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("time of {} days out of range", days),
                )
            })?;
        value.minutes = buf[p + 6];
        value.seconds = buf[p + 7];
    }
    if len == 12 {
        value.nanosecond = decode_micros(buf, p + 8)?;
    }
    Ok((value, 1 + len))
}

/// Fractional seconds stored as microseconds, returned as nanoseconds
fn decode_micros(buf: &[u8], offset: usize) -> io::Result<u32> {
    let micros = decode_uint(buf, offset, 4, ByteOrder::Little)? as u32;
    if micros > 999_999 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} microseconds out of range", micros),
        ));
    }
    Ok(micros * 1000)
}

/// A decoded value that still borrows from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue<'a> {
    /// SQL NULL
    Null,
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Single precision float
    Float(f32),
    /// Double precision float
    Double(f64),
    /// DATE, DATETIME or TIMESTAMP
    DateTime(DateTimeValue),
    /// TIME
    Time(TimeValue),
    /// Decimal, string, blob, bit, set, enum, JSON or geometry bytes, as sent
    Bytes(&'a [u8]),
}

fn fixed_width(col_type: u8) -> Option<usize> {
    match col_type {
        column_type::TINY => Some(1),
        column_type::SHORT | column_type::YEAR => Some(2),
        column_type::LONG | column_type::INT24 | column_type::FLOAT => Some(4),
        column_type::LONGLONG | column_type::DOUBLE => Some(8),
        column_type::NULL => Some(0),
        _ => None,
    }
}

/// Decode one binary-protocol value of `col_type` at `offset`
pub fn decode_binary_value(
    buf: &[u8],
    offset: usize,
    col_type: u8,
    unsigned: bool,
) -> io::Result<(RawValue<'_>, usize)> {
    if let Some(width) = fixed_width(col_type) {
        let value = match col_type {
            column_type::NULL => RawValue::Null,
            column_type::FLOAT => RawValue::Float(decode_f32(buf, offset, ByteOrder::Little)?),
            column_type::DOUBLE => RawValue::Double(decode_f64(buf, offset, ByteOrder::Little)?),
            _ if unsigned || col_type == column_type::YEAR => {
                RawValue::UInt(decode_uint(buf, offset, width, ByteOrder::Little)?)
            }
            _ => RawValue::Int(decode_int(buf, offset, width, ByteOrder::Little)?),
        };
        return Ok((value, width));
    }
    match col_type {
        column_type::DATE | column_type::DATETIME | column_type::TIMESTAMP => {
            let (value, consumed) = decode_datetime(buf, offset)?;
            Ok((RawValue::DateTime(value), consumed))
        }
        column_type::TIME => {
            let (value, consumed) = decode_time(buf, offset)?;
            Ok((RawValue::Time(value), consumed))
        }
        _ => match decode_lenenc_bytes(buf, offset)? {
            (Some(window), consumed) => Ok((RawValue::Bytes(window.slice(buf)), consumed)),
            (None, consumed) => Ok((RawValue::Null, consumed)),
        },
    }
}

/// Skip one binary-protocol value of `col_type` at `offset`
pub fn skip_binary_value(buf: &[u8], offset: usize, col_type: u8) -> io::Result<usize> {
    if let Some(width) = fixed_width(col_type) {
        ensure(buf, offset, width, "fixed-width value")?;
        return Ok(width);
    }
    match col_type {
        column_type::DATE
        | column_type::DATETIME
        | column_type::TIMESTAMP
        | column_type::TIME => {
            ensure(buf, offset, 1, "temporal length")?;
            let consumed = 1 + buf[offset] as usize;
            ensure(buf, offset, consumed, "temporal value")?;
            Ok(consumed)
        }
        _ => skip_lenenc_bytes(buf, offset),
    }
}

/// Whether bit `index` is set in a null bitmap that starts `bit_offset` bits in
pub fn null_bitmap_is_set(bitmap: &[u8], index: usize, bit_offset: usize) -> bool {
    let bit = index + bit_offset;
    bitmap
        .get(bit / 8)
        .map_or(false, |byte| byte & (1 << (bit % 8)) != 0)
}

/// Size of a null bitmap for `count` entries with a leading bit offset
pub fn null_bitmap_len(count: usize, bit_offset: usize) -> usize {
    (count + bit_offset + 7) / 8
}
