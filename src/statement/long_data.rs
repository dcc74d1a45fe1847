//! Chunked long-data upload
//!
//! Stream parameters are sent with COM_STMT_SEND_LONG_DATA before the execute
//! command. Chunks never exceed the configured threshold. Character streams
//! are cut on character boundaries with a per-character margin of at least two
//! bytes (four whenever UTF-8 is emitted), so a multi-byte character never
//! straddles two chunks.

use super::bind::BindValue;
use crate::connection::{latin1_byte, CharacterEncoding, Session};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Characters per chunk for a character stream
pub fn char_chunk_len(threshold: usize, encoding: CharacterEncoding) -> usize {
    let margin = encoding.max_encoded_char_len().max(2);
    (threshold / margin).max(1)
}

/// Upload one stream parameter, returning the number of bytes sent
///
/// `param_index` is 0-based. At least one chunk is always sent so the server
/// sees the parameter as long data even for an empty stream.
pub async fn upload(
    session: &mut Session,
    statement_id: u32,
    param_index: u16,
    value: BindValue,
    threshold: usize,
    encoding: CharacterEncoding,
) -> Result<u64> {
    let threshold = threshold.max(1);
    let mut sent = 0u64;
    let mut chunks = 0usize;

    match value {
        BindValue::ByteStream { reader, length } => {
            let mut reader: Box<dyn AsyncRead + Send + Unpin> = match length {
                Some(limit) => Box::new(reader.take(limit)),
                None => reader,
            };
            loop {
                let chunk = read_chunk(&mut reader, threshold).await?;
                if chunk.is_empty() && chunks > 0 {
                    break;
                }
                let len = chunk.len();
                session
                    .send_long_data(statement_id, param_index, chunk.freeze())
                    .await?;
                sent += len as u64;
                chunks += 1;
                tracing::trace!(statement_id, param_index, len, "long data chunk sent");
                if len < threshold {
                    break;
                }
            }
        }
        BindValue::CharStream { mut chars, length } => {
            let per_chunk = char_chunk_len(threshold, encoding);
            let mut remaining = length;
            loop {
                let take = remaining.map_or(per_chunk, |r| per_chunk.min(r as usize));
                let mut chunk = BytesMut::with_capacity(take * 2);
                let mut taken = 0usize;
                for c in chars.by_ref().take(take) {
                    encode_char(&mut chunk, c, encoding);
                    taken += 1;
                }
                if let Some(r) = remaining.as_mut() {
                    *r -= taken as u64;
                }
                if taken == 0 && chunks > 0 {
                    break;
                }
                let len = chunk.len();
                session
                    .send_long_data(statement_id, param_index, chunk.freeze())
                    .await?;
                sent += len as u64;
                chunks += 1;
                tracing::trace!(statement_id, param_index, len, "long data chunk sent");
                if taken < take || remaining == Some(0) {
                    break;
                }
            }
        }
        other => {
            return Err(Error::Protocol(format!(
                "{:?} cannot be sent as long data",
                other
            )))
        }
    }

    tracing::debug!(statement_id, param_index, bytes = sent, chunks, "long data uploaded");
    Ok(sent)
}

/// Fill up to `limit` bytes, stopping early only at end of stream
async fn read_chunk<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    limit: usize,
) -> Result<BytesMut> {
    let mut chunk = BytesMut::with_capacity(limit);
    while chunk.len() < limit {
        let mut window = (&mut *reader).take((limit - chunk.len()) as u64);
        let n = window.read_buf(&mut chunk).await?;
        if n == 0 {
            break;
        }
    }
    Ok(chunk)
}

/// Append one character in the connection encoding
pub(crate) fn encode_char(buf: &mut BytesMut, c: char, encoding: CharacterEncoding) {
    match encoding {
        CharacterEncoding::Latin1 => {
            buf.put_u8(latin1_byte(c));
        }
        _ => {
            let mut utf8 = [0u8; 4];
            buf.put_slice(c.encode_utf8(&mut utf8).as_bytes());
        }
    }
}
