//! Result delivery
//!
//! Rows are kept as the packet the server sent plus a table of value offsets,
//! so nothing is decoded until the caller asks for a column through a
//! [`ValueFactory`].

use crate::protocol::codec::{
    decode_binary_value, decode_lenenc_bytes, null_bitmap_is_set, null_bitmap_len,
    skip_binary_value, skip_lenenc_bytes, RawValue,
};
use crate::protocol::constants::lenenc;
use crate::protocol::{ColumnDefinition, OkPacket, ValueFactory};
use crate::{Error, Result};
use bytes::Bytes;
use std::io;
use std::sync::Arc;

/// Receives the output of a command as it is read off the wire
pub trait ResultSink: Send {
    /// Column metadata of a new result set
    fn columns(&mut self, columns: &Arc<[ColumnDefinition]>) -> Result<()>;

    /// One row of the current result set
    fn row(&mut self, row: Row) -> Result<()>;

    /// End of one result (OK packet, or the terminator of a result set)
    fn complete(&mut self, ok: &OkPacket) -> Result<()>;
}

/// One result row, decoded lazily
#[derive(Debug, Clone)]
pub struct Row {
    data: Bytes,
    columns: Arc<[ColumnDefinition]>,
    binary: bool,
    offsets: Vec<Option<usize>>,
}

impl Row {
    /// Index a text-protocol row
    pub fn text(data: Bytes, columns: Arc<[ColumnDefinition]>) -> io::Result<Self> {
        let mut offsets = Vec::with_capacity(columns.len());
        let mut pos = 0;
        for _ in 0..columns.len() {
            if data.get(pos) == Some(&lenenc::NULL) {
                offsets.push(None);
                pos += 1;
            } else {
                offsets.push(Some(pos));
                pos += skip_lenenc_bytes(&data, pos)?;
            }
        }
        Ok(Self {
            data,
            columns,
            binary: false,
            offsets,
        })
    }

    /// Index a binary-protocol row (`0x00`, null bitmap, values)
    pub fn binary(data: Bytes, columns: Arc<[ColumnDefinition]>) -> io::Result<Self> {
        let bitmap_len = null_bitmap_len(columns.len(), 2);
        if data.len() < 1 + bitmap_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "binary row shorter than its null bitmap",
            ));
        }
        let bitmap = &data[1..1 + bitmap_len];
        let mut offsets = Vec::with_capacity(columns.len());
        let mut pos = 1 + bitmap_len;
        for (i, column) in columns.iter().enumerate() {
            if null_bitmap_is_set(bitmap, i, 2) {
                offsets.push(None);
            } else {
                offsets.push(Some(pos));
                pos += skip_binary_value(&data, pos, column.column_type)?;
            }
        }
        Ok(Self {
            data,
            columns,
            binary: true,
            offsets,
        })
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True for a row without columns
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Column metadata
    pub fn columns(&self) -> &Arc<[ColumnDefinition]> {
        &self.columns
    }

    /// Whether column `index` is SQL NULL
    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.offsets.get(index), Some(None))
    }

    /// Decoded view of column `index`, borrowing the row packet
    pub fn raw(&self, index: usize) -> Result<RawValue<'_>> {
        let slot = self.offsets.get(index).ok_or_else(|| {
            Error::Protocol(format!(
                "column index {} out of range ({} columns)",
                index,
                self.offsets.len()
            ))
        })?;
        let Some(offset) = *slot else {
            return Ok(RawValue::Null);
        };
        if self.binary {
            let column = &self.columns[index];
            let (value, _) =
                decode_binary_value(&self.data, offset, column.column_type, column.is_unsigned())?;
            Ok(value)
        } else {
            match decode_lenenc_bytes(&self.data, offset)? {
                (Some(window), _) => Ok(RawValue::Bytes(window.slice(&self.data))),
                (None, _) => Ok(RawValue::Null),
            }
        }
    }

    /// Column `index` converted by `factory`
    pub fn get<F: ValueFactory>(&self, index: usize, factory: &F) -> Result<F::Output> {
        let raw = self.raw(index)?;
        factory.make(&self.columns[index], raw)
    }
}

/// Outcome of one command, collected in memory
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Columns of the last result set
    pub columns: Option<Arc<[ColumnDefinition]>>,
    /// Rows of every result set, in arrival order
    pub rows: Vec<Row>,
    /// Sum of affected rows across results
    pub affected_rows: u64,
    /// Last insert id of the last result
    pub last_insert_id: u64,
    /// Warnings of the last result
    pub warnings: u16,
    /// Info string of the last result
    pub info: String,
    /// Number of results completed
    pub results: usize,
}

impl ResultSink for QueryResult {
    fn columns(&mut self, columns: &Arc<[ColumnDefinition]>) -> Result<()> {
        self.columns = Some(Arc::clone(columns));
        Ok(())
    }

    fn row(&mut self, row: Row) -> Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn complete(&mut self, ok: &OkPacket) -> Result<()> {
        self.affected_rows += ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.warnings = ok.warnings;
        self.info.clone_from(&ok.info);
        self.results += 1;
        Ok(())
    }
}

/// Sink that drops rows and only keeps the completion counts
#[derive(Debug, Default)]
pub(crate) struct DiscardRows {
    pub(crate) affected_rows: u64,
}

impl ResultSink for DiscardRows {
    fn columns(&mut self, _: &Arc<[ColumnDefinition]>) -> Result<()> {
        Ok(())
    }

    fn row(&mut self, _: Row) -> Result<()> {
        Ok(())
    }

    fn complete(&mut self, ok: &OkPacket) -> Result<()> {
        self.affected_rows += ok.affected_rows;
        Ok(())
    }
}
