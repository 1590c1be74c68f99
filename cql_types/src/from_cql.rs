//! Native destination types and how they bind to columns.
//!
//! A destination declares which column types it can be read from ([`FromCql::accepts`]);
//! the row decoder checks every destination before decoding anything.

use std::{
    any::{Any, type_name},
    collections::{BTreeMap, HashMap},
    hash::Hash,
    net::IpAddr,
};

use uuid::Uuid;

use crate::{
    codec::CodecError,
    column::ColumnType,
    row::{DecodeError, Row, RowData},
    value::CqlValue,
};

/// A native type that a column value can be read into
pub trait FromCql: Sized {
    /// Whether a column of this type can be read into `Self`
    fn accepts(ty: &ColumnType) -> bool;

    /// The value a null column of type `ty` materializes as
    fn zero(ty: &ColumnType) -> Self;

    /// Convert a decoded, non-null value of a column of type `ty`
    fn from_cql(ty: &ColumnType, value: CqlValue) -> Result<Self, CodecError>;
}

fn conversion<T>(value: &CqlValue) -> CodecError {
    CodecError::Conversion {
        value: value.kind(),
        target: type_name::<T>(),
    }
}

fn from_nullable<T: FromCql>(ty: &ColumnType, value: CqlValue) -> Result<T, CodecError> {
    if value.is_null() {
        Ok(T::zero(ty))
    } else {
        T::from_cql(ty, value)
    }
}

macro_rules! impl_from_cql {
    ($t:ty, zero = $zero:expr, accepts = $($accept:pat_param)|+ => |$v:ident| $convert:expr) => {
        impl FromCql for $t {
            fn accepts(ty: &ColumnType) -> bool {
                matches!(ty, $($accept)|+)
            }

            fn zero(_: &ColumnType) -> Self {
                $zero
            }

            fn from_cql(_: &ColumnType, value: CqlValue) -> Result<Self, CodecError> {
                let $v = value;
                $convert.ok_or_else(|| conversion::<$t>(&$v))
            }
        }
    };
}

impl_from_cql!(bool, zero = false, accepts = ColumnType::Boolean => |v| match v {
    CqlValue::Boolean(b) => Some(b),
    _ => None,
});

impl_from_cql!(i8, zero = 0, accepts = ColumnType::TinyInt => |v| match v {
    CqlValue::TinyInt(n) => Some(n),
    _ => None,
});

impl_from_cql!(i16, zero = 0, accepts = ColumnType::TinyInt | ColumnType::SmallInt => |v| match v {
    CqlValue::TinyInt(n) => Some(i16::from(n)),
    CqlValue::SmallInt(n) => Some(n),
    _ => None,
});

impl_from_cql!(
    i32,
    zero = 0,
    accepts = ColumnType::TinyInt | ColumnType::SmallInt | ColumnType::Int => |v| match v {
        CqlValue::TinyInt(n) => Some(i32::from(n)),
        CqlValue::SmallInt(n) => Some(i32::from(n)),
        CqlValue::Int(n) => Some(n),
        _ => None,
    }
);

impl_from_cql!(
    i64,
    zero = 0,
    accepts = ColumnType::TinyInt
        | ColumnType::SmallInt
        | ColumnType::Int
        | ColumnType::BigInt
        | ColumnType::Counter
        | ColumnType::Timestamp
        | ColumnType::Time => |v| match v {
        CqlValue::Timestamp(n) | CqlValue::Time(n) => Some(n),
        ref other => other.as_i64(),
    }
);

impl_from_cql!(f32, zero = 0.0, accepts = ColumnType::Float => |v| match v {
    CqlValue::Float(n) => Some(n),
    _ => None,
});

impl_from_cql!(f64, zero = 0.0, accepts = ColumnType::Float | ColumnType::Double => |v| match v {
    CqlValue::Float(n) => Some(f64::from(n)),
    CqlValue::Double(n) => Some(n),
    _ => None,
});

impl_from_cql!(String, zero = String::new(), accepts = ColumnType::Text | ColumnType::Ascii => |v| match v {
    CqlValue::Text(ref s) => Some(s.clone()),
    _ => None,
});

impl_from_cql!(
    Vec<u8>,
    zero = Vec::new(),
    accepts = ColumnType::Blob
        | ColumnType::Jsonb
        | ColumnType::Custom(_)
        | ColumnType::Text
        | ColumnType::Ascii => |v| match v {
        CqlValue::Blob(ref b) => Some(b.clone()),
        CqlValue::Text(ref s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
);

impl_from_cql!(Uuid, zero = Uuid::nil(), accepts = ColumnType::Uuid | ColumnType::TimeUuid => |v| match v {
    CqlValue::Uuid(u) => Some(u),
    _ => None,
});

impl_from_cql!(
    IpAddr,
    zero = IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
    accepts = ColumnType::Inet => |v| match v {
        CqlValue::Inet(a) => Some(a),
        _ => None,
    }
);

impl FromCql for CqlValue {
    fn accepts(_: &ColumnType) -> bool {
        true
    }

    fn zero(ty: &ColumnType) -> Self {
        Self::zero(ty)
    }

    fn from_cql(_: &ColumnType, value: CqlValue) -> Result<Self, CodecError> {
        Ok(value)
    }
}

impl<T: FromCql> FromCql for Option<T> {
    fn accepts(ty: &ColumnType) -> bool {
        T::accepts(ty)
    }

    fn zero(_: &ColumnType) -> Self {
        None
    }

    fn from_cql(ty: &ColumnType, value: CqlValue) -> Result<Self, CodecError> {
        match value {
            CqlValue::Null => Ok(None),
            value => T::from_cql(ty, value).map(Some),
        }
    }
}

macro_rules! impl_from_cql_map {
    ($map:ident, $($bound:path),+) => {
        impl<K, V> FromCql for $map<K, V>
        where
            K: FromCql $(+ $bound)+,
            V: FromCql,
        {
            fn accepts(ty: &ColumnType) -> bool {
                match ty {
                    ColumnType::Map(k, v) => K::accepts(k) && V::accepts(v),
                    _ => false,
                }
            }

            fn zero(_: &ColumnType) -> Self {
                $map::new()
            }

            fn from_cql(ty: &ColumnType, value: CqlValue) -> Result<Self, CodecError> {
                match (ty, value) {
                    (ColumnType::Map(key_type, value_type), CqlValue::Map(entries)) => entries
                        .into_iter()
                        .map(|(k, v)| {
                            Ok::<_, CodecError>((
                                from_nullable(key_type, k)?,
                                from_nullable(value_type, v)?,
                            ))
                        })
                        .collect(),
                    (_, value) => Err(conversion::<Self>(&value)),
                }
            }
        }
    };
}

impl_from_cql_map!(HashMap, Eq, Hash);
impl_from_cql_map!(BTreeMap, Ord);

// `Vec<u8>` is a blob destination, so sequences are implemented per element type.
macro_rules! impl_from_cql_sequence {
    ($($t:ty),+) => {
        $(
            impl FromCql for Vec<$t> {
                fn accepts(ty: &ColumnType) -> bool {
                    match ty {
                        ColumnType::List(e) | ColumnType::Set(e) => <$t as FromCql>::accepts(e),
                        _ => false,
                    }
                }

                fn zero(_: &ColumnType) -> Self {
                    Vec::new()
                }

                fn from_cql(ty: &ColumnType, value: CqlValue) -> Result<Self, CodecError> {
                    match (ty, value) {
                        (
                            ColumnType::List(element_type) | ColumnType::Set(element_type),
                            CqlValue::List(items) | CqlValue::Set(items),
                        ) => items
                            .into_iter()
                            .map(|item| from_nullable(element_type, item))
                            .collect(),
                        (_, value) => Err(conversion::<Self>(&value)),
                    }
                }
            }
        )+
    };
}

impl_from_cql_sequence!(bool, i16, i32, i64, f32, f64, String, Uuid, IpAddr, Vec<u8>);

/// A value staged by [`ScanTarget::stage`], waiting to be committed
#[derive(Debug)]
pub struct Staged(Box<dyn Any + Send>);

/// An object-safe destination for [`Row::scan`][crate::row::Row::scan]
///
/// Scanning is two-phase: every column is staged first and only committed once all columns
/// converted, so a failed scan leaves every destination untouched. Implemented for every
/// [`FromCql`] type.
pub trait ScanTarget: Send {
    fn accepts_column(&self, ty: &ColumnType) -> bool;

    /// Convert a decoded value, which may be null, without writing it
    fn stage(&self, ty: &ColumnType, value: CqlValue) -> Result<Staged, CodecError>;

    /// Write a value produced by [`ScanTarget::stage`] on this same target
    fn commit(&mut self, staged: Staged);

    fn target_type_name(&self) -> &'static str;
}

impl<T: FromCql + Send + 'static> ScanTarget for T {
    fn accepts_column(&self, ty: &ColumnType) -> bool {
        <T as FromCql>::accepts(ty)
    }

    fn stage(&self, ty: &ColumnType, value: CqlValue) -> Result<Staged, CodecError> {
        let value: T = from_nullable(ty, value)?;
        Ok(Staged(Box::new(value)))
    }

    fn commit(&mut self, staged: Staged) {
        let committed = staged.0.downcast::<T>().map(|value| *self = *value);
        debug_assert!(
            committed.is_ok(),
            "value staged by another target committed into {}",
            type_name::<T>()
        );
    }

    fn target_type_name(&self) -> &'static str {
        type_name::<T>()
    }
}

/// A type that can be built from a whole row
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, DecodeError>;
}

impl FromRow for RowData {
    fn from_row(row: &Row) -> Result<Self, DecodeError> {
        row.to_row_data()
    }
}

macro_rules! impl_from_row {
    ($n:literal; $($T:ident $idx:tt),+) => {
        impl<$($T: FromCql),+> FromRow for ($($T,)+) {
            fn from_row(row: &Row) -> Result<Self, DecodeError> {
                if row.len() != $n {
                    return Err(DecodeError::ArityMismatch {
                        columns: row.len(),
                        destinations: $n,
                    });
                }
                Ok(($(row.get::<$T>($idx)?,)+))
            }
        }
    };
}

impl_from_row!(1; A 0);
impl_from_row!(2; A 0, B 1);
impl_from_row!(3; A 0, B 1, C 2);
impl_from_row!(4; A 0, B 1, C 2, D 3);
impl_from_row!(5; A 0, B 1, C 2, D 3, E 4);
impl_from_row!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_from_row!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_from_row!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn integer_destinations_widen_but_never_narrow() {
        assert!(i64::accepts(&ColumnType::Int));
        assert!(i32::accepts(&ColumnType::SmallInt));
        assert!(!i32::accepts(&ColumnType::BigInt));
        assert!(!i8::accepts(&ColumnType::Int));
        assert_eq!(
            i64::from_cql(&ColumnType::Int, CqlValue::Int(-4)).unwrap(),
            -4
        );
    }

    #[test]
    fn bytes_destination_accepts_opaque_types() {
        for ty in [
            ColumnType::Blob,
            ColumnType::Jsonb,
            ColumnType::Custom("org.example.T".to_owned()),
        ] {
            assert!(<Vec<u8>>::accepts(&ty), "{ty}");
        }
        assert!(!<Vec<u8>>::accepts(&ColumnType::Int));
    }

    #[test]
    fn maps_check_both_element_types() {
        let ty = ColumnType::map(ColumnType::Text, ColumnType::Text);
        assert!(HashMap::<String, String>::accepts(&ty));
        assert!(!HashMap::<String, i32>::accepts(&ty));

        let value = CqlValue::Map(vec![
            ("class".into(), "SimpleStrategy".into()),
            ("replication_factor".into(), CqlValue::Null),
        ]);
        let map = BTreeMap::<String, String>::from_cql(&ty, value).unwrap();
        assert_eq!(map["class"], "SimpleStrategy");
        assert_eq!(map["replication_factor"], "");
    }

    #[test]
    fn sequences_decode_element_wise() {
        let ty = ColumnType::set(ColumnType::Int);
        let value = CqlValue::Set(vec![CqlValue::Int(1), CqlValue::Null, CqlValue::Int(3)]);
        assert_eq!(Vec::<i64>::from_cql(&ty, value).unwrap(), vec![1, 0, 3]);
    }

    #[test]
    fn staged_values_commit_only_when_asked() {
        let mut target = 7i32;
        let staged = ScanTarget::stage(&target, &ColumnType::Int, CqlValue::Int(9)).unwrap();
        assert_eq!(target, 7);
        target.commit(staged);
        assert_eq!(target, 9);

        let staged = ScanTarget::stage(&target, &ColumnType::Int, CqlValue::Null).unwrap();
        target.commit(staged);
        assert_eq!(target, 0);
    }

    #[test]
    fn scan_targets_describe_themselves_through_trait_objects() {
        let mut id = 0_i32;
        let target: &mut dyn ScanTarget = &mut id;
        assert!(target.accepts_column(&ColumnType::SmallInt));
        assert!(!target.accepts_column(&ColumnType::Text));
        assert_eq!(target.target_type_name(), "i32");

        assert!(Vec::<i32>::accepts(&ColumnType::list(ColumnType::Int)));
        assert!(!Vec::<String>::accepts(&ColumnType::set(ColumnType::Int)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "value staged by another target")]
    fn committing_a_value_staged_for_another_type_is_caught() {
        let staged = ScanTarget::stage(&0_i32, &ColumnType::Int, CqlValue::Int(1)).unwrap();
        let mut name = String::new();
        name.commit(staged);
    }

    #[test]
    fn option_destination_keeps_null() {
        let mut target: Option<String> = Some("x".to_owned());
        let staged = target.stage(&ColumnType::Text, CqlValue::Null).unwrap();
        target.commit(staged);
        assert_eq!(target, None);
    }
}
