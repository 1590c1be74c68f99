//! Rows of raw column bytes and their decoded forms.

use std::{any::type_name, sync::Arc};

use bytes::Bytes;

use crate::{
    codec::{CodecError, CodecRegistry},
    column::{ColumnSpec, ColumnType},
    from_cql::{FromCql, ScanTarget},
    value::CqlValue,
};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("row has {columns} column(s) but {destinations} destination(s) were supplied")]
    ArityMismatch { columns: usize, destinations: usize },

    #[error("column '{column}' of type {column_type} cannot be read into {target}")]
    TypeMismatch {
        column: String,
        column_type: ColumnType,
        target: &'static str,
    },

    #[error("failed to decode column '{column}': {source}")]
    Column {
        column: String,
        #[source]
        source: CodecError,
    },

    #[error("column index {index} out of range for row of {len} column(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no column named '{0}' in row")]
    NoSuchColumn(String),

    #[error("row carries {values} value(s) for {columns} column(s)")]
    MalformedRow { columns: usize, values: usize },
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// One row of a result, holding the undecoded bytes of each column
///
/// Column metadata and the codec registry are shared with every other row of the same
/// result.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[ColumnSpec]>,
    values: Vec<Option<Bytes>>,
    registry: Arc<CodecRegistry>,
}

impl Row {
    pub fn new(
        columns: Arc<[ColumnSpec]>,
        values: Vec<Option<Bytes>>,
        registry: Arc<CodecRegistry>,
    ) -> Result<Self> {
        if columns.len() != values.len() {
            return Err(DecodeError::MalformedRow {
                columns: columns.len(),
                values: values.len(),
            });
        }
        Ok(Self {
            columns,
            values,
            registry,
        })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The undecoded bytes of a column, `None` when the column is null
    pub fn raw(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index)?.as_deref()
    }

    fn spec(&self, index: usize) -> Result<&ColumnSpec> {
        self.columns.get(index).ok_or(DecodeError::IndexOutOfRange {
            index,
            len: self.columns.len(),
        })
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| DecodeError::NoSuchColumn(name.to_owned()))
    }

    /// Decode a column without interpreting nulls
    fn decode_raw(&self, index: usize, spec: &ColumnSpec) -> Result<CqlValue> {
        let raw = self.values.get(index).and_then(Option::as_deref);
        self.registry
            .decode_nullable(&spec.typ, raw)
            .map_err(|source| DecodeError::Column {
                column: spec.name.clone(),
                source,
            })
    }

    /// Read column `index` into a native type
    pub fn get<T: FromCql>(&self, index: usize) -> Result<T> {
        let spec = self.spec(index)?;
        if !T::accepts(&spec.typ) {
            return Err(DecodeError::TypeMismatch {
                column: spec.name.clone(),
                column_type: spec.typ.clone(),
                target: type_name::<T>(),
            });
        }
        match self.decode_raw(index, spec)? {
            CqlValue::Null => Ok(T::zero(&spec.typ)),
            value => T::from_cql(&spec.typ, value).map_err(|source| DecodeError::Column {
                column: spec.name.clone(),
                source,
            }),
        }
    }

    /// Read the first column called `name` into a native type
    pub fn get_by_name<T: FromCql>(&self, name: &str) -> Result<T> {
        self.get(self.index_of(name)?)
    }

    /// Decode column `index` generically, with nulls materialized as the zero value of the
    /// column type
    pub fn value(&self, index: usize) -> Result<CqlValue> {
        self.get::<CqlValue>(index)
    }

    /// Decode every column into the matching destination, in projection order
    ///
    /// Fails without touching any destination if the number of destinations differs from
    /// the number of columns, if any destination cannot hold its column's type, or if any
    /// column fails to decode.
    pub fn scan(&self, destinations: &mut [&mut dyn ScanTarget]) -> Result<()> {
        if destinations.len() != self.columns.len() {
            return Err(DecodeError::ArityMismatch {
                columns: self.columns.len(),
                destinations: destinations.len(),
            });
        }

        for (spec, dest) in self.columns.iter().zip(destinations.iter()) {
            if !dest.accepts_column(&spec.typ) {
                return Err(DecodeError::TypeMismatch {
                    column: spec.name.clone(),
                    column_type: spec.typ.clone(),
                    target: dest.target_type_name(),
                });
            }
        }

        let mut staged = Vec::with_capacity(destinations.len());
        for (index, (spec, dest)) in self.columns.iter().zip(destinations.iter()).enumerate() {
            let value = self.decode_raw(index, spec)?;
            let value = dest
                .stage(&spec.typ, value)
                .map_err(|source| DecodeError::Column {
                    column: spec.name.clone(),
                    source,
                })?;
            staged.push(value);
        }

        for (dest, value) in destinations.iter_mut().zip(staged) {
            dest.commit(value);
        }
        Ok(())
    }

    /// Decode every column into an owned [`RowData`]
    pub fn to_row_data(&self) -> Result<RowData> {
        let values = (0..self.columns.len())
            .map(|i| self.value(i))
            .collect::<Result<Vec<_>>>()?;
        Ok(RowData {
            columns: self.columns.iter().map(|c| c.name.clone()).collect(),
            values,
        })
    }

    pub fn into_row_data(self) -> Result<RowData> {
        self.to_row_data()
    }
}

/// A decoded row: projected column names and their values, in projection order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowData {
    pub columns: Vec<String>,
    pub values: Vec<CqlValue>,
}

impl RowData {
    /// A row with the zero value of each column's type
    pub fn zeroed(columns: &[ColumnSpec]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            values: columns.iter().map(|c| CqlValue::zero(&c.typ)).collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&CqlValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}
