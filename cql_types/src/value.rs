//! Native representation of decoded column values and bound parameters.

use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, Ipv4Addr},
};

use uuid::Uuid;

use crate::column::ColumnType;

/// An owned, decoded CQL value
///
/// Values never borrow from the buffer they were decoded from, so a value may outlive the
/// response page that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Text(String),
    /// Uninterpreted bytes, produced for `blob`, `jsonb` and custom columns
    Blob(Vec<u8>),
    /// Milliseconds since the unix epoch
    Timestamp(i64),
    /// Days since the unix epoch, centered on 2^31
    Date(u32),
    /// Nanoseconds since midnight
    Time(i64),
    Uuid(Uuid),
    Inet(IpAddr),
    List(Vec<CqlValue>),
    Set(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
}

impl CqlValue {
    /// The zero-equivalent value for a column of the given type
    ///
    /// This is what a null column materializes as.
    pub fn zero(ty: &ColumnType) -> Self {
        match ty {
            ColumnType::Boolean => Self::Boolean(false),
            ColumnType::TinyInt => Self::TinyInt(0),
            ColumnType::SmallInt => Self::SmallInt(0),
            ColumnType::Int => Self::Int(0),
            ColumnType::BigInt | ColumnType::Counter => Self::BigInt(0),
            ColumnType::Float => Self::Float(0.0),
            ColumnType::Double => Self::Double(0.0),
            ColumnType::Text | ColumnType::Ascii => Self::Text(String::new()),
            ColumnType::Blob | ColumnType::Jsonb | ColumnType::Custom(_) => Self::Blob(Vec::new()),
            ColumnType::Timestamp => Self::Timestamp(0),
            ColumnType::Date => Self::Date(1 << 31),
            ColumnType::Time => Self::Time(0),
            ColumnType::Uuid | ColumnType::TimeUuid => Self::Uuid(Uuid::nil()),
            ColumnType::Inet => Self::Inet(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            ColumnType::List(_) => Self::List(Vec::new()),
            ColumnType::Set(_) => Self::Set(Vec::new()),
            ColumnType::Map(_, _) => Self::Map(Vec::new()),
        }
    }

    /// The column type a value encodes as when no declared type is available
    ///
    /// Collections take their element types from their first entry; empty collections
    /// default to `blob` elements since they encode identically regardless.
    pub fn natural_type(&self) -> Option<ColumnType> {
        let ty = match self {
            Self::Null => return None,
            Self::Boolean(_) => ColumnType::Boolean,
            Self::TinyInt(_) => ColumnType::TinyInt,
            Self::SmallInt(_) => ColumnType::SmallInt,
            Self::Int(_) => ColumnType::Int,
            Self::BigInt(_) => ColumnType::BigInt,
            Self::Float(_) => ColumnType::Float,
            Self::Double(_) => ColumnType::Double,
            Self::Text(_) => ColumnType::Text,
            Self::Blob(_) => ColumnType::Blob,
            Self::Timestamp(_) => ColumnType::Timestamp,
            Self::Date(_) => ColumnType::Date,
            Self::Time(_) => ColumnType::Time,
            Self::Uuid(_) => ColumnType::Uuid,
            Self::Inet(_) => ColumnType::Inet,
            Self::List(items) => ColumnType::list(element_type(items.first())),
            Self::Set(items) => ColumnType::set(element_type(items.first())),
            Self::Map(entries) => match entries.first() {
                Some((k, v)) => ColumnType::map(element_type(Some(k)), element_type(Some(v))),
                None => ColumnType::map(ColumnType::Blob, ColumnType::Blob),
            },
        };
        Some(ty)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::TinyInt(_) => "tinyint",
            Self::SmallInt(_) => "smallint",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Timestamp(_) => "timestamp",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Uuid(_) => "uuid",
            Self::Inet(_) => "inet",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::TinyInt(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }
}

fn element_type(value: Option<&CqlValue>) -> ColumnType {
    value
        .and_then(CqlValue::natural_type)
        .unwrap_or(ColumnType::Blob)
}

macro_rules! from_scalar {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for CqlValue {
                fn from(v: $t) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

from_scalar! {
    bool => Boolean,
    i8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
    String => Text,
    Vec<u8> => Blob,
    Uuid => Uuid,
    IpAddr => Inet,
}

impl From<&str> for CqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<&[u8]> for CqlValue {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for CqlValue {
    fn from(v: &[u8; N]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<bytes::Bytes> for CqlValue {
    fn from(v: bytes::Bytes) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl<T: Into<CqlValue>> From<Option<T>> for CqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<K: Into<CqlValue>, V: Into<CqlValue>> From<HashMap<K, V>> for CqlValue {
    fn from(v: HashMap<K, V>) -> Self {
        Self::Map(v.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<CqlValue>, V: Into<CqlValue>> From<BTreeMap<K, V>> for CqlValue {
    fn from(v: BTreeMap<K, V>) -> Self {
        Self::Map(v.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A set of positional values bound to a statement's `?` placeholders
///
/// Implemented for `()`, `Vec<CqlValue>` and tuples of up to eight values convertible into
/// [`CqlValue`].
pub trait BindValues {
    fn into_values(self) -> Vec<CqlValue>;
}

impl BindValues for () {
    fn into_values(self) -> Vec<CqlValue> {
        Vec::new()
    }
}

impl BindValues for Vec<CqlValue> {
    fn into_values(self) -> Vec<CqlValue> {
        self
    }
}

macro_rules! impl_bind_values {
    ($($T:ident $idx:tt),+) => {
        impl<$($T: Into<CqlValue>),+> BindValues for ($($T,)+) {
            fn into_values(self) -> Vec<CqlValue> {
                vec![$(self.$idx.into()),+]
            }
        }
    };
}

impl_bind_values!(A 0);
impl_bind_values!(A 0, B 1);
impl_bind_values!(A 0, B 1, C 2);
impl_bind_values!(A 0, B 1, C 2, D 3);
impl_bind_values!(A 0, B 1, C 2, D 3, E 4);
impl_bind_values!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_bind_values!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_bind_values!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_values_preserve_order_and_types() {
        let values = (1, b"true", "x", None::<i64>).into_values();
        assert_eq!(
            values,
            vec![
                CqlValue::Int(1),
                CqlValue::Blob(b"true".to_vec()),
                CqlValue::Text("x".to_owned()),
                CqlValue::Null,
            ]
        );
    }

    #[test]
    fn zero_values_follow_column_type() {
        assert_eq!(CqlValue::zero(&ColumnType::Int), CqlValue::Int(0));
        assert_eq!(CqlValue::zero(&ColumnType::Jsonb), CqlValue::Blob(vec![]));
        assert_eq!(
            CqlValue::zero(&ColumnType::map(ColumnType::Text, ColumnType::Text)),
            CqlValue::Map(vec![])
        );
    }

    #[test]
    fn natural_type_of_collections() {
        let v = CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]);
        assert_eq!(v.natural_type(), Some(ColumnType::list(ColumnType::Int)));
        assert_eq!(CqlValue::Null.natural_type(), None);
        let m = CqlValue::Map(vec![("a".into(), "b".into())]);
        assert_eq!(
            m.natural_type(),
            Some(ColumnType::map(ColumnType::Text, ColumnType::Text))
        );
    }
}
