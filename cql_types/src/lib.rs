//! Column types, values and the codecs that move between them and their wire encoding.

pub mod codec;
pub mod column;
pub mod consistency;
pub mod from_cql;
pub mod row;
pub mod value;

pub use codec::{Codec, CodecError, CodecRegistry, Width};
pub use column::{ColumnSpec, ColumnType, TypeTag};
pub use consistency::Consistency;
pub use from_cql::{FromCql, FromRow, ScanTarget};
pub use row::{DecodeError, Row, RowData};
pub use value::{BindValues, CqlValue};
