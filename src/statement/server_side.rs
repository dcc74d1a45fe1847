//! Server-side prepared statements (binary protocol)

use super::batch::{self, BatchResult};
use super::bind::{BindValue, ParameterSet};
use super::long_data;
use crate::connection::{
    CharacterEncoding, DiscardRows, QueryResult, ResultSink, Session, StatementMetadata,
};
use crate::protocol::codec::null_bitmap_len;
use crate::protocol::constants::{bulk, column_type};
use crate::protocol::ColumnDefinition;
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// COM_STMT_EXECUTE flags byte: no cursor
const CURSOR_TYPE_NO_CURSOR: u8 = 0;

/// Statement prepared on the server
#[derive(Debug)]
pub struct PreparedStatement {
    meta: StatementMetadata,
    sql: String,
    /// Parameter types sent with the last execute
    last_types: Option<Vec<(u8, u8)>>,
}

impl PreparedStatement {
    /// COM_STMT_PREPARE
    pub async fn prepare(session: &mut Session, sql: &str) -> Result<Self> {
        let meta = session.prepare_statement(sql).await?;
        Ok(Self {
            meta,
            sql: sql.to_string(),
            last_types: None,
        })
    }

    /// Server statement id
    pub fn id(&self) -> u32 {
        self.meta.id
    }

    /// Statement text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of `?` placeholders
    pub fn param_count(&self) -> usize {
        self.meta.params.len()
    }

    /// Parameter metadata returned by the prepare
    pub fn params(&self) -> &Arc<[ColumnDefinition]> {
        &self.meta.params
    }

    /// Result column metadata returned by the prepare
    pub fn columns(&self) -> &Arc<[ColumnDefinition]> {
        &self.meta.columns
    }

    /// Warnings raised by the prepare
    pub fn warnings(&self) -> u16 {
        self.meta.warnings
    }

    /// Empty parameter set sized for this statement
    pub fn parameters(&self) -> ParameterSet {
        ParameterSet::new(self.param_count())
    }

    /// Execute once and collect every result
    pub async fn execute(
        &mut self,
        session: &mut Session,
        params: &mut ParameterSet,
    ) -> Result<QueryResult> {
        let mut result = QueryResult::default();
        self.execute_with(session, params, &mut result).await?;
        Ok(result)
    }

    /// Execute once, delivering results to `sink`
    ///
    /// Stream parameters are uploaded as long data first and are consumed:
    /// their slots are unset afterwards. The configured `query_timeout`
    /// covers the upload and the execution.
    pub async fn execute_with(
        &mut self,
        session: &mut Session,
        params: &mut ParameterSet,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        self.check_arity(params)?;
        params.check()?;
        let scope = session.cancel_scope(session.config().query_timeout);
        let result = self.execute_unscoped(session, params, sink).await;
        scope.finish(result).await
    }

    async fn execute_unscoped(
        &mut self,
        session: &mut Session,
        params: &mut ParameterSet,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        let types: Vec<(u8, u8)> = params
            .values()
            .map(|v| v.map_or((column_type::NULL, 0), BindValue::type_code))
            .collect();
        let send_types = self.last_types.as_ref() != Some(&types);

        let (threshold, encoding) = {
            let config = session.config();
            (config.long_data_threshold, config.character_encoding)
        };
        for (index, stream) in params.take_streams() {
            let param_id = u16::try_from(index)
                .map_err(|_| Error::Protocol(format!("parameter {} out of range", index + 1)))?;
            let uploaded =
                long_data::upload(session, self.meta.id, param_id, stream, threshold, encoding)
                    .await;
            if let Err(e) = uploaded {
                self.discard_long_data(session).await;
                return Err(e);
            }
        }

        let body = execute_body(&types, params.values(), send_types, encoding)?;
        session.execute_statement(self.meta.id, body, sink).await?;
        self.last_types = Some(types);
        Ok(())
    }

    /// Execute once per parameter set
    ///
    /// Uses MariaDB bulk execution when the server supports it, `useBulkStmts`
    /// is on, no set holds a stream and each column has one value type;
    /// bulk rows are split so every command fits `max_allowed_packet`.
    /// Otherwise the sets execute one by one. The whole batch runs under one
    /// cancellation scope.
    pub async fn execute_batch(
        &mut self,
        session: &mut Session,
        batch: &mut [ParameterSet],
    ) -> Result<BatchResult> {
        for params in batch.iter() {
            self.check_arity(params)?;
            params.check()?;
        }
        let scope = session.cancel_scope(session.config().query_timeout);
        let result = self.execute_batch_unscoped(session, batch).await;
        scope.finish(result).await
    }

    async fn execute_batch_unscoped(
        &mut self,
        session: &mut Session,
        batch: &mut [ParameterSet],
    ) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        if batch.is_empty() {
            return Ok(result);
        }

        let bulk_types = if session.supports_bulk()
            && session.config().use_bulk_stmts
            && self.param_count() > 0
            && !batch.iter().any(ParameterSet::has_streams)
        {
            uniform_types(batch)
        } else {
            None
        };

        let Some(types) = bulk_types else {
            for params in batch.iter_mut() {
                let mut sink = DiscardRows::default();
                self.execute_unscoped(session, params, &mut sink).await?;
                result.affected_rows += sink.affected_rows;
                result.chunks += 1;
                result.rows += 1;
                crate::metrics::histograms::batch_chunk_rows(1);
            }
            return Ok(result);
        };

        let row_sizes: Vec<Option<usize>> = batch.iter().map(bulk_row_len).collect();
        let overhead = bulk_overhead(types.len());
        let chunks = batch::plan(&row_sizes, overhead, session.max_allowed_packet());
        tracing::debug!(
            statement_id = self.meta.id,
            rows = batch.len(),
            chunks = chunks.len(),
            "bulk execution"
        );
        for range in chunks {
            let rows = &batch[range.clone()];
            let body = bulk_body(&types, rows, session.config().character_encoding)?;
            let mut sink = DiscardRows::default();
            session
                .bulk_execute_statement(self.meta.id, body, &mut sink)
                .await?;
            result.affected_rows += sink.affected_rows;
            result.chunks += 1;
            result.rows += rows.len();
            crate::metrics::histograms::batch_chunk_rows(rows.len());
        }
        // Bulk types are not remembered for COM_STMT_EXECUTE
        self.last_types = None;
        Ok(result)
    }

    /// COM_STMT_RESET: discard long data and any open cursor
    pub async fn reset(&mut self, session: &mut Session) -> Result<()> {
        session.reset_statement(self.meta.id).await
    }

    /// Drop chunks of an interrupted upload so the next execute starts clean
    async fn discard_long_data(&mut self, session: &mut Session) {
        if session.is_closed() {
            return;
        }
        if let Err(e) = self.reset(session).await {
            tracing::warn!(statement_id = self.meta.id, error = %e, "statement reset failed");
        }
    }

    /// COM_STMT_CLOSE
    pub async fn close(self, session: &mut Session) -> Result<()> {
        session.close_statement(self.meta.id).await
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

/// COM_STMT_EXECUTE body after the statement id
///
/// An unset slot is a parameter already sent as long data: it is flagged
/// non-null and carries no inline value.
fn execute_body<'a>(
    types: &[(u8, u8)],
    values: impl Iterator<Item = Option<&'a BindValue>>,
    send_types: bool,
    encoding: CharacterEncoding,
) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(CURSOR_TYPE_NO_CURSOR);
    buf.put_u32_le(1);
    if types.is_empty() {
        return Ok(buf.freeze());
    }

    let bitmap_start = buf.len();
    buf.put_bytes(0, null_bitmap_len(types.len(), 0));
    buf.put_u8(u8::from(send_types));
    if send_types {
        for (code, flag) in types {
            buf.put_u8(*code);
            buf.put_u8(*flag);
        }
    }

    for (i, value) in values.enumerate() {
        match value {
            Some(BindValue::Null) => buf[bitmap_start + i / 8] |= 1 << (i % 8),
            Some(value) => value.encode_binary(&mut buf, encoding)?,
            None => {}
        }
    }
    Ok(buf.freeze())
}

/// Per-column type shared by every row, or `None` when a column mixes types
///
/// All-null columns are declared as strings; their values travel as null
/// indicators.
fn uniform_types(batch: &[ParameterSet]) -> Option<Vec<(u8, u8)>> {
    let width = batch.first()?.len();
    let mut types = vec![None; width];
    for params in batch {
        for (slot, value) in types.iter_mut().zip(params.values()) {
            let value = value?;
            if value.is_null() {
                continue;
            }
            let code = value.type_code();
            match slot {
                Some(existing) if *existing != code => return None,
                Some(_) => {}
                None => *slot = Some(code),
            }
        }
    }
    Some(
        types
            .into_iter()
            .map(|t| t.unwrap_or((column_type::VAR_STRING, 0)))
            .collect(),
    )
}

/// Command byte, statement id, bulk flags and the type vector
fn bulk_overhead(param_count: usize) -> usize {
    1 + 4 + 2 + 2 * param_count
}

/// Indicator byte plus value for every parameter
fn bulk_row_len(params: &ParameterSet) -> Option<usize> {
    params.values().try_fold(0usize, |acc, value| {
        let len = value?.binary_len()?;
        Some(acc + 1 + usize::try_from(len).ok()?)
    })
}

/// COM_STMT_BULK_EXECUTE body after the statement id
fn bulk_body(
    types: &[(u8, u8)],
    rows: &[ParameterSet],
    encoding: CharacterEncoding,
) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u16_le(bulk::SEND_TYPES_TO_SERVER);
    for (code, flag) in types {
        buf.put_u8(*code);
        buf.put_u8(*flag);
    }
    for params in rows {
        for (i, value) in params.values().enumerate() {
            match value {
                Some(BindValue::Null) => buf.put_u8(bulk::INDICATOR_NULL),
                Some(value) => {
                    buf.put_u8(bulk::INDICATOR_NONE);
                    value.encode_binary(&mut buf, encoding)?;
                }
                None => return Err(Error::MissingParameter { index: i + 1 }),
            }
        }
    }
    Ok(buf.freeze())
}
