//! Parameter slots shared by client-side and server-side statements

use crate::protocol::codec::{
    datetime_wire_len, encode_datetime, encode_lenenc_bytes, encode_time, lenenc_int_size,
    time_wire_len, DateTimeValue, TimeValue,
};
use crate::connection::CharacterEncoding;
use crate::protocol::constants::column_type;
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::io::AsyncRead;

/// Flag byte following the type code of an unsigned parameter
pub const UNSIGNED_FLAG: u8 = 0x80;

/// A value bound to one `?` placeholder
pub enum BindValue {
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
    /// Decimal in its textual form (`-12.50`)
    Decimal(String),
    /// Binary string
    Bytes(Bytes),
    /// Character string
    Text(String),
    /// DATE
    Date(DateTimeValue),
    /// DATETIME / TIMESTAMP
    DateTime(DateTimeValue),
    /// TIME
    Time(TimeValue),
    /// Byte stream uploaded as long data; `length` limits how much is read
    ByteStream {
        /// Source
        reader: Box<dyn AsyncRead + Send + Unpin>,
        /// Declared length in bytes, if known
        length: Option<u64>,
    },
    /// Character stream uploaded as long data
    CharStream {
        /// Source
        chars: Box<dyn Iterator<Item = char> + Send>,
        /// Declared length in characters, if known
        length: Option<u64>,
    },
}

impl fmt::Debug for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Int(v) => write!(f, "Int({})", v),
            Self::UInt(v) => write!(f, "UInt({})", v),
            Self::Float(v) => write!(f, "Float({})", v),
            Self::Double(v) => write!(f, "Double({})", v),
            Self::Decimal(v) => write!(f, "Decimal({})", v),
            Self::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            Self::Text(v) => write!(f, "Text({:?})", v),
            Self::Date(v) => write!(f, "Date({:?})", v),
            Self::DateTime(v) => write!(f, "DateTime({:?})", v),
            Self::Time(v) => write!(f, "Time({:?})", v),
            Self::ByteStream { length, .. } => write!(f, "ByteStream(length={:?})", length),
            Self::CharStream { length, .. } => write!(f, "CharStream(length={:?})", length),
        }
    }
}

impl BindValue {
    /// Byte stream of unknown length
    pub fn byte_stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::ByteStream {
            reader: Box::new(reader),
            length: None,
        }
    }

    /// Character stream of unknown length
    pub fn char_stream(chars: impl Iterator<Item = char> + Send + 'static) -> Self {
        Self::CharStream {
            chars: Box::new(chars),
            length: None,
        }
    }

    /// SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Value travels as long data rather than inline
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::ByteStream { .. } | Self::CharStream { .. })
    }

    /// Binary-protocol type code and flag byte
    pub fn type_code(&self) -> (u8, u8) {
        match self {
            Self::Null => (column_type::NULL, 0),
            Self::Int(_) => (column_type::LONGLONG, 0),
            Self::UInt(_) => (column_type::LONGLONG, UNSIGNED_FLAG),
            Self::Float(_) => (column_type::FLOAT, 0),
            Self::Double(_) => (column_type::DOUBLE, 0),
            Self::Decimal(_) => (column_type::NEWDECIMAL, 0),
            Self::Bytes(_) | Self::ByteStream { .. } => (column_type::BLOB, 0),
            Self::Text(_) | Self::CharStream { .. } => (column_type::VAR_STRING, 0),
            Self::Date(_) => (column_type::DATE, 0),
            Self::DateTime(_) => (column_type::DATETIME, 0),
            Self::Time(_) => (column_type::TIME, 0),
        }
    }

    /// Serialized size in the binary protocol
    ///
    /// Text is counted as UTF-8, an upper bound for single-byte encodings.
    /// Streams count twice their declared length; `None` for a stream of
    /// unknown length.
    pub fn binary_len(&self) -> Option<u64> {
        let lenenc = |len: usize| (lenenc_int_size(len as u64) + len) as u64;
        Some(match self {
            Self::Null => 0,
            Self::Int(_) | Self::UInt(_) | Self::Double(_) => 8,
            Self::Float(_) => 4,
            Self::Decimal(s) => lenenc(s.len()),
            Self::Bytes(b) => lenenc(b.len()),
            Self::Text(s) => lenenc(s.len()),
            Self::Date(v) => 1 + datetime_wire_len(&DateTimeValue::date(v.year, v.month, v.day)) as u64,
            Self::DateTime(v) => 1 + datetime_wire_len(v) as u64,
            Self::Time(v) => 1 + time_wire_len(v) as u64,
            Self::ByteStream { length, .. } => return length.map(|l| l.saturating_mul(2)),
            // Declared in characters; up to four bytes each
            Self::CharStream { length, .. } => return length.map(|l| l.saturating_mul(8)),
        })
    }

    /// Append the binary-protocol encoding of a non-null inline value
    ///
    /// Text and decimals are written in the session `encoding`.
    pub fn encode_binary(&self, buf: &mut BytesMut, encoding: CharacterEncoding) -> Result<()> {
        match self {
            Self::Int(v) => buf.put_i64_le(*v),
            Self::UInt(v) => buf.put_u64_le(*v),
            Self::Float(v) => buf.put_f32_le(*v),
            Self::Double(v) => buf.put_f64_le(*v),
            Self::Decimal(s) => encode_lenenc_bytes(buf, &encoding.encode(s)),
            Self::Bytes(b) => encode_lenenc_bytes(buf, b),
            Self::Text(s) => encode_lenenc_bytes(buf, &encoding.encode(s)),
            Self::Date(v) => encode_datetime(buf, &DateTimeValue::date(v.year, v.month, v.day)),
            Self::DateTime(v) => encode_datetime(buf, v),
            Self::Time(v) => encode_time(buf, v),
            Self::Null | Self::ByteStream { .. } | Self::CharStream { .. } => {
                return Err(Error::Protocol(format!(
                    "{:?} has no inline binary encoding",
                    self
                )))
            }
        }
        Ok(())
    }
}

macro_rules! bind_from {
    ($($t:ty => $variant:ident via $conv:expr),* $(,)?) => {
        $(impl From<$t> for BindValue {
            fn from(v: $t) -> Self {
                BindValue::$variant($conv(v))
            }
        })*
    };
}

bind_from! {
    i8 => Int via i64::from,
    i16 => Int via i64::from,
    i32 => Int via i64::from,
    i64 => Int via std::convert::identity,
    u8 => UInt via u64::from,
    u16 => UInt via u64::from,
    u32 => UInt via u64::from,
    u64 => UInt via std::convert::identity,
    f32 => Float via std::convert::identity,
    f64 => Double via std::convert::identity,
    String => Text via std::convert::identity,
    Bytes => Bytes via std::convert::identity,
    Vec<u8> => Bytes via Bytes::from,
    TimeValue => Time via std::convert::identity,
    DateTimeValue => DateTime via std::convert::identity,
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        BindValue::Text(v.to_string())
    }
}

impl From<bool> for BindValue {
    fn from(v: bool) -> Self {
        BindValue::Int(i64::from(v))
    }
}

impl<T: Into<BindValue>> From<Option<T>> for BindValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(BindValue::Null, Into::into)
    }
}

/// Parameter slots of one execution, addressed by 1-based index
#[derive(Debug, Default)]
pub struct ParameterSet {
    slots: Vec<Option<BindValue>>,
}

impl ParameterSet {
    /// `count` unset slots
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| None).collect(),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No slots at all
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bind slot `index` (1-based)
    pub fn set(&mut self, index: usize, value: impl Into<BindValue>) -> Result<()> {
        let count = self.slots.len();
        let slot = index
            .checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "parameter index {} out of range (1..={})",
                    index, count
                ))
            })?;
        *slot = Some(value.into());
        Ok(())
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, index: usize, value: impl Into<BindValue>) -> Result<Self> {
        self.set(index, value)?;
        Ok(self)
    }

    /// Value of slot `index` (1-based)
    pub fn get(&self, index: usize) -> Option<&BindValue> {
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get(i))
            .and_then(Option::as_ref)
    }

    /// Fails with the first unset 1-based index
    pub fn check(&self) -> Result<()> {
        match self.slots.iter().position(Option::is_none) {
            Some(i) => Err(Error::MissingParameter { index: i + 1 }),
            None => Ok(()),
        }
    }

    /// Every unset 1-based index
    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i + 1)
            .collect()
    }

    /// Unset every slot
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// Bound values in order; `None` for unset slots
    pub fn values(&self) -> impl Iterator<Item = Option<&BindValue>> {
        self.slots.iter().map(Option::as_ref)
    }

    /// Any slot holds a stream
    pub fn has_streams(&self) -> bool {
        self.slots.iter().flatten().any(BindValue::is_stream)
    }

    /// Remove stream values, returning them with their 0-based index
    ///
    /// Streams are consumed by an execution; their slots become unset.
    pub(crate) fn take_streams(&mut self) -> Vec<(usize, BindValue)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Some(v) if v.is_stream()))
            .filter_map(|(i, slot)| slot.take().map(|v| (i, v)))
            .collect()
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut Option<BindValue>> {
        self.slots.get_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter_reports_first_unset() {
        let mut params = ParameterSet::new(3);
        params.set(1, 10).unwrap();
        params.set(3, "x").unwrap();
        assert!(matches!(params.check(), Err(Error::MissingParameter { index: 2 })));
        assert_eq!(params.missing(), vec![2]);

        params.set(2, BindValue::Null).unwrap();
        assert!(params.check().is_ok());

        params.clear();
        assert_eq!(params.missing(), vec![1, 2, 3]);
    }

    #[test]
    fn test_index_out_of_range() {
        let mut params = ParameterSet::new(1);
        assert!(params.set(0, 1).is_err());
        assert!(params.set(2, 1).is_err());
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(BindValue::from(5u32).type_code(), (column_type::LONGLONG, UNSIGNED_FLAG));
        assert_eq!(BindValue::from(-5i32).type_code(), (column_type::LONGLONG, 0));
        assert_eq!(BindValue::from("s").type_code(), (column_type::VAR_STRING, 0));
        assert_eq!(BindValue::from(None::<i32>).type_code(), (column_type::NULL, 0));
    }

    #[test]
    fn test_binary_len_matches_encoding() {
        let values = [
            BindValue::Int(-1),
            BindValue::Float(1.5),
            BindValue::Decimal("12.50".into()),
            BindValue::Text("x".repeat(300)),
            BindValue::DateTime(DateTimeValue {
                year: 2024,
                month: 1,
                day: 2,
                hour: 3,
                minute: 4,
                second: 5,
                nanosecond: 6000,
            }),
            BindValue::Time(TimeValue {
                negative: true,
                hours: 30,
                minutes: 1,
                seconds: 2,
                nanosecond: 0,
            }),
        ];
        for value in &values {
            let mut buf = BytesMut::new();
            value.encode_binary(&mut buf, CharacterEncoding::Utf8mb4).unwrap();
            assert_eq!(Some(buf.len() as u64), value.binary_len(), "{:?}", value);
        }
    }

    #[test]
    fn test_text_follows_session_encoding() {
        let value = BindValue::from("\u{e9}t\u{e9}");
        let mut utf8 = BytesMut::new();
        value.encode_binary(&mut utf8, CharacterEncoding::Utf8mb4).unwrap();
        assert_eq!(&utf8[..], &[5, 0xC3, 0xA9, b't', 0xC3, 0xA9]);

        let mut latin1 = BytesMut::new();
        value.encode_binary(&mut latin1, CharacterEncoding::Latin1).unwrap();
        assert_eq!(&latin1[..], &[3, 0xE9, b't', 0xE9]);
        assert!(value.binary_len() >= Some(latin1.len() as u64));
    }

    #[test]
    fn test_stream_lengths() {
        let declared = BindValue::ByteStream {
            reader: Box::new(&b"abcd"[..]),
            length: Some(4),
        };
        assert_eq!(declared.binary_len(), Some(8));
        assert_eq!(BindValue::byte_stream(&b""[..]).binary_len(), None);
        assert!(BindValue::Null
            .encode_binary(&mut BytesMut::new(), CharacterEncoding::Utf8mb4)
            .is_err());
    }

    #[test]
    fn test_take_streams() {
        let mut params = ParameterSet::new(2);
        params.set(1, 1).unwrap();
        params
            .set(2, BindValue::char_stream("abc".chars().collect::<Vec<_>>().into_iter()))
            .unwrap();
        assert!(params.has_streams());
        let streams = params.take_streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].0, 1);
        assert_eq!(params.missing(), vec![2]);
    }
}
