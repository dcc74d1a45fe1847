//! Client-side prepared statements
//!
//! Placeholders are found once when the statement is created; each execution
//! renders every bound value as a SQL literal and splices it into the
//! template, then sends an ordinary text query.

use super::batch::{self, BatchResult};
use super::bind::{BindValue, ParameterSet};
use crate::connection::{DiscardRows, QueryResult, ResultSink, Session};
use crate::protocol::codec::{DateTimeValue, TimeValue};
use crate::protocol::constants::capability;
use crate::{Error, Result};
use std::fmt::Write as _;
use std::ops::Range;
use tokio::io::AsyncReadExt;

/// COM_QUERY command byte preceding the SQL text
const QUERY_COMMAND_LEN: usize = 1;

/// Statement whose parameters are substituted by the client
#[derive(Debug, Clone)]
pub struct ClientPreparedStatement {
    sql: String,
    /// Byte offsets of every `?` placeholder
    placeholders: Vec<usize>,
}

impl ClientPreparedStatement {
    /// Scan `sql` for placeholders
    ///
    /// With `no_backslash_escapes` a backslash inside a string literal is an
    /// ordinary character.
    pub fn new(sql: impl Into<String>, no_backslash_escapes: bool) -> Self {
        let sql = sql.into();
        let placeholders = scan_placeholders(&sql, no_backslash_escapes);
        Self { sql, placeholders }
    }

    /// Scan `sql` using the session's current escaping mode
    pub fn for_session(session: &Session, sql: impl Into<String>) -> Self {
        Self::new(sql, session.no_backslash_escapes())
    }

    /// Statement template
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of `?` placeholders
    pub fn param_count(&self) -> usize {
        self.placeholders.len()
    }

    /// Empty parameter set sized for this statement
    pub fn parameters(&self) -> ParameterSet {
        ParameterSet::new(self.param_count())
    }

    /// Render the statement with every placeholder replaced
    ///
    /// Streams must have been read into memory beforehand.
    pub fn render(&self, params: &ParameterSet, no_backslash_escapes: bool) -> Result<String> {
        self.check_arity(params)?;
        params.check()?;
        let mut out = String::with_capacity(self.sql.len() + 16 * self.placeholders.len());
        let mut last = 0;
        for (i, (offset, value)) in self.placeholders.iter().zip(params.values()).enumerate() {
            out.push_str(&self.sql[last..*offset]);
            let value = value.ok_or(Error::MissingParameter { index: i + 1 })?;
            write_literal(&mut out, value, no_backslash_escapes)?;
            last = offset + 1;
        }
        out.push_str(&self.sql[last..]);
        Ok(out)
    }

    /// Execute once and collect every result
    pub async fn execute(
        &self,
        session: &mut Session,
        params: &mut ParameterSet,
    ) -> Result<QueryResult> {
        let mut result = QueryResult::default();
        self.execute_with(session, params, &mut result).await?;
        Ok(result)
    }

    /// Execute once, delivering results to `sink`
    ///
    /// Stream parameters are read into memory and replace their slots.
    pub async fn execute_with(
        &self,
        session: &mut Session,
        params: &mut ParameterSet,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        self.check_arity(params)?;
        params.check()?;
        materialize(params).await?;
        let sql = self.render(params, session.no_backslash_escapes())?;
        let scope = session.cancel_scope(session.config().query_timeout);
        session.query_in_scope(&sql, sink, scope).await
    }

    /// Execute once per parameter set
    ///
    /// With `allowMultiQueries` and a server that accepted multi-statements,
    /// rendered statements are joined with `;` into as few queries as
    /// `max_allowed_packet` permits. Otherwise each set is its own query.
    pub async fn execute_batch(
        &self,
        session: &mut Session,
        batch: &mut [ParameterSet],
    ) -> Result<BatchResult> {
        let no_backslash_escapes = session.no_backslash_escapes();
        let mut rendered = Vec::with_capacity(batch.len());
        for params in batch.iter_mut() {
            self.check_arity(params)?;
            params.check()?;
            materialize(params).await?;
            rendered.push(self.render(params, no_backslash_escapes)?);
        }

        let multi = session.config().allow_multi_queries
            && session.capabilities() & u64::from(capability::CLIENT_MULTI_STATEMENTS) != 0;
        let chunks = if multi {
            multi_statement_plan(&rendered, session.max_allowed_packet())
        } else {
            (0..rendered.len()).map(|i| i..i + 1).collect()
        };

        let scope = session.cancel_scope(session.config().query_timeout);
        let result = async {
            let mut result = BatchResult::default();
            for range in chunks {
                let rows = range.len();
                let sql = rendered[range].join(";");
                let mut sink = DiscardRows::default();
                session.query_raw(&sql, &mut sink).await?;
                result.affected_rows += sink.affected_rows;
                result.chunks += 1;
                result.rows += rows;
                crate::metrics::histograms::batch_chunk_rows(rows);
            }
            Ok(result)
        }
        .await;
        scope.finish(result).await
    }

    fn check_arity(&self, params: &ParameterSet) -> Result<()> {
        if params.len() != self.param_count() {
            return Err(Error::Protocol(format!(
                "statement expects {} parameters, {} bound",
                self.param_count(),
                params.len()
            )));
        }
        Ok(())
    }
}

/// Chunks of rendered statements joined with `;` into one COM_QUERY each
///
/// Every row counts its whole statement plus one separator byte; the only
/// fixed cost is the command byte.
fn multi_statement_plan(rendered: &[String], max_packet: usize) -> Vec<Range<usize>> {
    let row_sizes: Vec<Option<usize>> = rendered.iter().map(|s| Some(s.len() + 1)).collect();
    batch::plan(&row_sizes, QUERY_COMMAND_LEN, max_packet)
}

/// Byte offsets of `?` outside literals, quoted identifiers and comments
pub fn scan_placeholders(sql: &str, no_backslash_escapes: bool) -> Vec<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Lex {
        Normal,
        Quoted(u8),
        LineComment,
        BlockComment,
    }

    let bytes = sql.as_bytes();
    let mut placeholders = Vec::new();
    let mut state = Lex::Normal;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            Lex::Normal => match b {
                b'?' => placeholders.push(i),
                b'\'' | b'"' | b'`' => state = Lex::Quoted(b),
                b'#' => state = Lex::LineComment,
                b'-' if next == Some(b'-')
                    && bytes
                        .get(i + 2)
                        .map_or(true, |c| c.is_ascii_whitespace()) =>
                {
                    state = Lex::LineComment;
                    i += 1;
                }
                b'/' if next == Some(b'*') => {
                    state = Lex::BlockComment;
                    i += 1;
                }
                _ => {}
            },
            Lex::Quoted(quote) => {
                if b == b'\\' && quote != b'`' && !no_backslash_escapes {
                    i += 1;
                } else if b == quote {
                    state = Lex::Normal;
                }
            }
            Lex::LineComment => {
                if b == b'\n' || b == b'\r' {
                    state = Lex::Normal;
                }
            }
            Lex::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = Lex::Normal;
                    i += 1;
                }
            }
        }
        i += 1;
    }
    placeholders
}

/// Append `value` as a SQL literal
pub fn write_literal(out: &mut String, value: &BindValue, no_backslash_escapes: bool) -> Result<()> {
    match value {
        BindValue::Null => out.push_str("NULL"),
        BindValue::Int(v) => {
            let _ = write!(out, "{}", v);
        }
        BindValue::UInt(v) => {
            let _ = write!(out, "{}", v);
        }
        BindValue::Float(v) if v.is_finite() => {
            let _ = write!(out, "{}", v);
        }
        BindValue::Double(v) if v.is_finite() => {
            let _ = write!(out, "{}", v);
        }
        BindValue::Float(_) | BindValue::Double(_) => {
            return Err(Error::Protocol(format!(
                "{:?} has no SQL literal form",
                value
            )))
        }
        BindValue::Decimal(s) => {
            let valid = !s.is_empty()
                && s
                    .bytes()
                    .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
            if !valid {
                return Err(Error::Protocol(format!("invalid decimal literal {:?}", s)));
            }
            out.push_str(s);
        }
        BindValue::Bytes(b) => {
            if b.is_empty() {
                out.push_str("''");
            } else {
                out.push_str("X'");
                for byte in b.iter() {
                    let _ = write!(out, "{:02X}", byte);
                }
                out.push('\'');
            }
        }
        BindValue::Text(s) => write_quoted(out, s, no_backslash_escapes),
        BindValue::Date(v) => {
            let _ = write!(out, "'{:04}-{:02}-{:02}'", v.year, v.month, v.day);
        }
        BindValue::DateTime(v) => {
            out.push('\'');
            write_datetime(out, v);
            out.push('\'');
        }
        BindValue::Time(v) => {
            out.push('\'');
            write_time(out, v);
            out.push('\'');
        }
        BindValue::ByteStream { .. } | BindValue::CharStream { .. } => {
            return Err(Error::Protocol(
                "stream parameters must be read before rendering".into(),
            ))
        }
    }
    Ok(())
}

fn write_quoted(out: &mut String, s: &str, no_backslash_escapes: bool) {
    out.push('\'');
    for c in s.chars() {
        if no_backslash_escapes {
            if c == '\'' {
                out.push('\'');
            }
            out.push(c);
            continue;
        }
        match c {
            '\0' => out.push_str("\\0"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{1a}' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

fn write_fraction(out: &mut String, nanosecond: u32) {
    let micros = nanosecond / 1000;
    if micros > 0 {
        let _ = write!(out, ".{:06}", micros);
    }
}

fn write_datetime(out: &mut String, v: &DateTimeValue) {
    let _ = write!(
        out,
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        v.year, v.month, v.day, v.hour, v.minute, v.second
    );
    write_fraction(out, v.nanosecond);
}

fn write_time(out: &mut String, v: &TimeValue) {
    if v.negative {
        out.push('-');
    }
    let _ = write!(out, "{:02}:{:02}:{:02}", v.hours, v.minutes, v.seconds);
    write_fraction(out, v.nanosecond);
}

/// Replace stream slots with their fully read contents
///
/// Text is kept as-is; the session encodes the rendered query.
async fn materialize(params: &mut ParameterSet) -> Result<()> {
    for index in 0..params.len() {
        let Some(slot) = params.slot_mut(index) else {
            continue;
        };
        let value = match slot.take() {
            Some(BindValue::ByteStream { reader, length }) => {
                let mut data = Vec::new();
                match length {
                    Some(limit) => reader.take(limit).read_to_end(&mut data).await?,
                    None => {
                        let mut reader = reader;
                        reader.read_to_end(&mut data).await?
                    }
                };
                BindValue::Bytes(data.into())
            }
            Some(BindValue::CharStream { chars, length }) => {
                let limit = length.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
                BindValue::Text(chars.take(limit).collect())
            }
            other => {
                *slot = other;
                continue;
            }
        };
        *slot = Some(value);
    }
    Ok(())
}
