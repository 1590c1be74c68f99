//! The type codec registry
//!
//! Every wire type is registered against a [`Codec`] that knows how to turn the raw bytes of
//! a column into a [`CqlValue`] and back. Codecs declare a [`Width`] contract: fixed-width
//! codecs are length-checked by the registry before their decode function runs, so the
//! functions themselves can assume a well-sized input.
//!
//! Opaque types (`blob`, `jsonb` and custom types) are pass-through: their bytes are copied
//! verbatim and never interpreted.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use uuid::Uuid;

use crate::{
    column::{ColumnType, TypeTag},
    value::CqlValue,
};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("no codec registered for type tag {0:?}")]
    Unregistered(TypeTag),

    #[error("{typ} expects {expected} bytes, got {actual}")]
    WidthMismatch {
        typ: ColumnType,
        expected: usize,
        actual: usize,
    },

    #[error("truncated {typ} value while reading {context}")]
    Truncated {
        typ: ColumnType,
        context: &'static str,
    },

    #[error("{typ} value has {remaining} unread trailing byte(s)")]
    TrailingBytes { typ: ColumnType, remaining: usize },

    #[error("negative length {len} in {typ} value")]
    NegativeLength { typ: ColumnType, len: i32 },

    #[error("invalid UTF-8 in text value: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("non-ascii byte in ascii value")]
    InvalidAscii,

    #[error("inet address must be 4 or 16 bytes, got {0}")]
    InvalidInet(usize),

    #[error("a {value} value cannot be encoded as {typ}")]
    IncompatibleValue { typ: ColumnType, value: &'static str },

    #[error("a {value} value cannot be converted into {target}")]
    Conversion {
        value: &'static str,
        target: &'static str,
    },

    #[error("collection with {0} elements exceeds the protocol limit")]
    TooLarge(usize),
}

pub type Result<T, E = CodecError> = std::result::Result<T, E>;

/// The size contract of a codec's encoded values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// Values always occupy exactly this many bytes
    Fixed(usize),
    /// Values carry their own structure or are opaque
    Variable,
}

pub type DecodeFn = fn(&ColumnType, &CodecRegistry, &[u8]) -> Result<CqlValue>;
pub type EncodeFn = fn(&ColumnType, &CodecRegistry, &CqlValue) -> Result<Vec<u8>>;

/// A decode/encode strategy for one wire type
#[derive(Clone, Copy)]
pub struct Codec {
    width: Width,
    decode: DecodeFn,
    encode: EncodeFn,
}

impl Codec {
    pub const fn new(width: Width, decode: DecodeFn, encode: EncodeFn) -> Self {
        Self {
            width,
            decode,
            encode,
        }
    }

    pub fn width(&self) -> Width {
        self.width
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").field("width", &self.width).finish()
    }
}

/// Maps [`TypeTag`]s to [`Codec`]s
///
/// [`CodecRegistry::default`] registers codecs for every built-in type; individual entries
/// can be replaced with [`CodecRegistry::register`].
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    codecs: HashMap<TypeTag, Codec>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (tag, codec) in builtin_codecs() {
            registry.register(tag, codec);
        }
        registry
    }
}

impl CodecRegistry {
    /// A registry with no codecs registered
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register a codec for a tag, returning the codec it replaced, if any
    pub fn register(&mut self, tag: TypeTag, codec: Codec) -> Option<Codec> {
        self.codecs.insert(tag, codec)
    }

    pub fn codec(&self, tag: TypeTag) -> Result<&Codec> {
        self.codecs.get(&tag).ok_or(CodecError::Unregistered(tag))
    }

    /// Decode the non-null raw bytes of a value of type `ty`
    ///
    /// An empty value for a fixed-width type decodes to the zero value of that type.
    pub fn decode(&self, ty: &ColumnType, raw: &[u8]) -> Result<CqlValue> {
        let codec = self.codec(ty.tag())?;
        if let Width::Fixed(expected) = codec.width {
            if raw.is_empty() {
                return Ok(CqlValue::zero(ty));
            }
            if raw.len() != expected {
                return Err(CodecError::WidthMismatch {
                    typ: ty.clone(),
                    expected,
                    actual: raw.len(),
                });
            }
        }
        (codec.decode)(ty, self, raw)
    }

    /// Decode a possibly-null raw value
    pub fn decode_nullable(&self, ty: &ColumnType, raw: Option<&[u8]>) -> Result<CqlValue> {
        match raw {
            Some(raw) => self.decode(ty, raw),
            None => Ok(CqlValue::Null),
        }
    }

    /// Encode a value as type `ty`. Null values encode as `None`.
    pub fn encode(&self, ty: &ColumnType, value: &CqlValue) -> Result<Option<Vec<u8>>> {
        if value.is_null() {
            return Ok(None);
        }
        let codec = self.codec(ty.tag())?;
        let out = (codec.encode)(ty, self, value)?;
        if let Width::Fixed(expected) = codec.width {
            if out.len() != expected {
                return Err(CodecError::WidthMismatch {
                    typ: ty.clone(),
                    expected,
                    actual: out.len(),
                });
            }
        }
        Ok(Some(out))
    }

    /// Encode a value using its [natural type][CqlValue::natural_type]
    pub fn encode_natural(&self, value: &CqlValue) -> Result<Option<Vec<u8>>> {
        match value.natural_type() {
            Some(ty) => self.encode(&ty, value),
            None => Ok(None),
        }
    }
}

fn builtin_codecs() -> [(TypeTag, Codec); 22] {
    use Width::{Fixed, Variable};
    [
        (TypeTag::Boolean, Codec::new(Fixed(1), decode_boolean, encode_boolean)),
        (TypeTag::TinyInt, Codec::new(Fixed(1), decode_tinyint, encode_tinyint)),
        (TypeTag::SmallInt, Codec::new(Fixed(2), decode_smallint, encode_smallint)),
        (TypeTag::Int, Codec::new(Fixed(4), decode_int, encode_int)),
        (TypeTag::BigInt, Codec::new(Fixed(8), decode_bigint, encode_bigint)),
        (TypeTag::Counter, Codec::new(Fixed(8), decode_bigint, encode_bigint)),
        (TypeTag::Timestamp, Codec::new(Fixed(8), decode_timestamp, encode_timestamp)),
        (TypeTag::Time, Codec::new(Fixed(8), decode_time, encode_time)),
        (TypeTag::Date, Codec::new(Fixed(4), decode_date, encode_date)),
        (TypeTag::Float, Codec::new(Fixed(4), decode_float, encode_float)),
        (TypeTag::Double, Codec::new(Fixed(8), decode_double, encode_double)),
        (TypeTag::Uuid, Codec::new(Fixed(16), decode_uuid, encode_uuid)),
        (TypeTag::TimeUuid, Codec::new(Fixed(16), decode_uuid, encode_uuid)),
        (TypeTag::Inet, Codec::new(Variable, decode_inet, encode_inet)),
        (TypeTag::Text, Codec::new(Variable, decode_text, encode_text)),
        (TypeTag::Ascii, Codec::new(Variable, decode_ascii, encode_ascii)),
        (TypeTag::Blob, Codec::new(Variable, decode_opaque, encode_opaque)),
        (TypeTag::Jsonb, Codec::new(Variable, decode_opaque, encode_opaque)),
        (TypeTag::Custom, Codec::new(Variable, decode_opaque, encode_opaque)),
        (TypeTag::List, Codec::new(Variable, decode_sequence, encode_sequence)),
        (TypeTag::Set, Codec::new(Variable, decode_sequence, encode_sequence)),
        (TypeTag::Map, Codec::new(Variable, decode_map, encode_map)),
    ]
}

fn incompatible(ty: &ColumnType, value: &CqlValue) -> CodecError {
    CodecError::IncompatibleValue {
        typ: ty.clone(),
        value: value.kind(),
    }
}

// Fixed-width decoders receive exactly-sized input, see `CodecRegistry::decode`.
fn fixed<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&raw[..N]);
    buf
}

fn decode_boolean(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Boolean(raw[0] != 0))
}

fn encode_boolean(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Boolean(b) => Ok(vec![u8::from(*b)]),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_tinyint(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::TinyInt(i8::from_be_bytes(fixed(raw))))
}

fn encode_tinyint(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::TinyInt(v) => Ok(v.to_be_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_smallint(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::SmallInt(i16::from_be_bytes(fixed(raw))))
}

fn encode_smallint(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::TinyInt(v) => Ok(i16::from(*v).to_be_bytes().to_vec()),
        CqlValue::SmallInt(v) => Ok(v.to_be_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_int(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Int(i32::from_be_bytes(fixed(raw))))
}

fn encode_int(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    let v = match value {
        CqlValue::TinyInt(v) => i32::from(*v),
        CqlValue::SmallInt(v) => i32::from(*v),
        CqlValue::Int(v) => *v,
        v => return Err(incompatible(ty, v)),
    };
    Ok(v.to_be_bytes().to_vec())
}

fn decode_bigint(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::BigInt(i64::from_be_bytes(fixed(raw))))
}

fn encode_bigint(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value.as_i64() {
        Some(v) => Ok(v.to_be_bytes().to_vec()),
        None => Err(incompatible(ty, value)),
    }
}

fn decode_timestamp(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Timestamp(i64::from_be_bytes(fixed(raw))))
}

fn encode_timestamp(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Timestamp(ms) | CqlValue::BigInt(ms) => Ok(ms.to_be_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_time(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Time(i64::from_be_bytes(fixed(raw))))
}

fn encode_time(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Time(ns) | CqlValue::BigInt(ns) => Ok(ns.to_be_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_date(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Date(u32::from_be_bytes(fixed(raw))))
}

fn encode_date(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Date(days) => Ok(days.to_be_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_float(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Float(f32::from_be_bytes(fixed(raw))))
}

fn encode_float(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Float(v) => Ok(v.to_be_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_double(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Double(f64::from_be_bytes(fixed(raw))))
}

fn encode_double(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Float(v) => Ok(f64::from(*v).to_be_bytes().to_vec()),
        CqlValue::Double(v) => Ok(v.to_be_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_uuid(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Uuid(Uuid::from_bytes(fixed(raw))))
}

fn encode_uuid(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Uuid(u) => Ok(u.as_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_inet(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    let addr = match raw.len() {
        4 => IpAddr::V4(Ipv4Addr::from(fixed::<4>(raw))),
        16 => IpAddr::V6(Ipv6Addr::from(fixed::<16>(raw))),
        n => return Err(CodecError::InvalidInet(n)),
    };
    Ok(CqlValue::Inet(addr))
}

fn encode_inet(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Inet(IpAddr::V4(a)) => Ok(a.octets().to_vec()),
        CqlValue::Inet(IpAddr::V6(a)) => Ok(a.octets().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_text(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Text(std::str::from_utf8(raw)?.to_owned()))
}

fn encode_text(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Text(s) => Ok(s.as_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_ascii(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    if !raw.is_ascii() {
        return Err(CodecError::InvalidAscii);
    }
    Ok(CqlValue::Text(std::str::from_utf8(raw)?.to_owned()))
}

fn encode_ascii(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Text(s) if s.is_ascii() => Ok(s.as_bytes().to_vec()),
        CqlValue::Text(_) => Err(CodecError::InvalidAscii),
        v => Err(incompatible(ty, v)),
    }
}

fn decode_opaque(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    Ok(CqlValue::Blob(raw.to_vec()))
}

fn encode_opaque(ty: &ColumnType, _: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    match value {
        CqlValue::Blob(b) => Ok(b.clone()),
        CqlValue::Text(s) => Ok(s.as_bytes().to_vec()),
        v => Err(incompatible(ty, v)),
    }
}

/// Reads `[int]`-prefixed structures out of a collection value
struct Reader<'a> {
    typ: &'a ColumnType,
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(typ: &'a ColumnType, buf: &'a [u8]) -> Self {
        Self { typ, buf }
    }

    fn read_i32(&mut self, context: &'static str) -> Result<i32> {
        if self.buf.len() < 4 {
            return Err(CodecError::Truncated {
                typ: self.typ.clone(),
                context,
            });
        }
        let (head, rest) = self.buf.split_at(4);
        self.buf = rest;
        Ok(i32::from_be_bytes(fixed(head)))
    }

    fn read_count(&mut self) -> Result<usize> {
        let n = self.read_i32("element count")?;
        usize::try_from(n).map_err(|_| CodecError::NegativeLength {
            typ: self.typ.clone(),
            len: n,
        })
    }

    /// Read a `[bytes]` element, where a negative length is null
    fn read_element(&mut self) -> Result<Option<&'a [u8]>> {
        let len = self.read_i32("element length")?;
        let Ok(len) = usize::try_from(len) else {
            return Ok(None);
        };
        if self.buf.len() < len {
            return Err(CodecError::Truncated {
                typ: self.typ.clone(),
                context: "element body",
            });
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(Some(head))
    }

    fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                typ: self.typ.clone(),
                remaining: self.buf.len(),
            })
        }
    }
}

fn write_element(out: &mut Vec<u8>, element: Option<Vec<u8>>) -> Result<()> {
    match element {
        Some(bytes) => {
            let len = i32::try_from(bytes.len()).map_err(|_| CodecError::TooLarge(bytes.len()))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&bytes);
        }
        None => out.extend_from_slice(&(-1i32).to_be_bytes()),
    }
    Ok(())
}

fn write_count(out: &mut Vec<u8>, n: usize) -> Result<()> {
    let n = i32::try_from(n).map_err(|_| CodecError::TooLarge(n))?;
    out.extend_from_slice(&n.to_be_bytes());
    Ok(())
}

fn decode_sequence(ty: &ColumnType, registry: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    let element_type = match ty {
        ColumnType::List(e) | ColumnType::Set(e) => e.as_ref(),
        _ => return Err(CodecError::Unregistered(ty.tag())),
    };
    let mut reader = Reader::new(ty, raw);
    let count = reader.read_count()?;
    let mut items = Vec::with_capacity(count.min(raw.len() / 4));
    for _ in 0..count {
        let element = reader.read_element()?;
        items.push(registry.decode_nullable(element_type, element)?);
    }
    reader.finish()?;
    Ok(match ty {
        ColumnType::Set(_) => CqlValue::Set(items),
        _ => CqlValue::List(items),
    })
}

fn encode_sequence(ty: &ColumnType, registry: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    let element_type = match ty {
        ColumnType::List(e) | ColumnType::Set(e) => e.as_ref(),
        _ => return Err(CodecError::Unregistered(ty.tag())),
    };
    let items = match value {
        CqlValue::List(items) | CqlValue::Set(items) => items,
        v => return Err(incompatible(ty, v)),
    };
    let mut out = Vec::new();
    write_count(&mut out, items.len())?;
    for item in items {
        write_element(&mut out, registry.encode(element_type, item)?)?;
    }
    Ok(out)
}

fn decode_map(ty: &ColumnType, registry: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
    let ColumnType::Map(key_type, value_type) = ty else {
        return Err(CodecError::Unregistered(ty.tag()));
    };
    let mut reader = Reader::new(ty, raw);
    let count = reader.read_count()?;
    let mut entries = Vec::with_capacity(count.min(raw.len() / 8));
    for _ in 0..count {
        let key = reader.read_element()?;
        let value = reader.read_element()?;
        entries.push((
            registry.decode_nullable(key_type, key)?,
            registry.decode_nullable(value_type, value)?,
        ));
    }
    reader.finish()?;
    Ok(CqlValue::Map(entries))
}

fn encode_map(ty: &ColumnType, registry: &CodecRegistry, value: &CqlValue) -> Result<Vec<u8>> {
    let ColumnType::Map(key_type, value_type) = ty else {
        return Err(CodecError::Unregistered(ty.tag()));
    };
    let CqlValue::Map(entries) = value else {
        return Err(incompatible(ty, value));
    };
    let mut out = Vec::new();
    write_count(&mut out, entries.len())?;
    for (k, v) in entries {
        write_element(&mut out, registry.encode(key_type, k)?)?;
        write_element(&mut out, registry.encode(value_type, v)?)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn registry() -> CodecRegistry {
        CodecRegistry::default()
    }

    #[test]
    fn opaque_values_pass_through_verbatim() {
        let registry = registry();
        for raw in [b"true".as_slice(), br#"{"foo":"bar"}"#.as_slice(), &[0xff, 0x00]] {
            assert_eq!(
                registry.decode(&ColumnType::Jsonb, raw).unwrap(),
                CqlValue::Blob(raw.to_vec())
            );
            assert_eq!(
                registry
                    .encode(&ColumnType::Jsonb, &CqlValue::Blob(raw.to_vec()))
                    .unwrap(),
                Some(raw.to_vec())
            );
        }
    }

    #[test]
    fn fixed_width_is_enforced() {
        let err = registry().decode(&ColumnType::Int, &[0, 1]).unwrap_err();
        assert_eq!(
            err,
            CodecError::WidthMismatch {
                typ: ColumnType::Int,
                expected: 4,
                actual: 2,
            }
        );
    }

    #[test]
    fn empty_fixed_width_value_is_zero() {
        assert_eq!(
            registry().decode(&ColumnType::BigInt, &[]).unwrap(),
            CqlValue::BigInt(0)
        );
    }

    #[test]
    fn map_of_text_decodes_in_wire_order() {
        let ty = ColumnType::map(ColumnType::Text, ColumnType::Text);
        let value = CqlValue::Map(vec![
            ("class".into(), "SimpleStrategy".into()),
            ("replication_factor".into(), "3".into()),
        ]);
        let registry = registry();
        let raw = registry.encode(&ty, &value).unwrap().unwrap();
        assert_eq!(registry.decode(&ty, &raw).unwrap(), value);
    }

    #[test]
    fn collection_with_trailing_bytes_is_rejected() {
        let ty = ColumnType::list(ColumnType::Int);
        let registry = registry();
        let mut raw = registry
            .encode(&ty, &CqlValue::List(vec![CqlValue::Int(7)]))
            .unwrap()
            .unwrap();
        raw.push(0);
        assert!(matches!(
            registry.decode(&ty, &raw),
            Err(CodecError::TrailingBytes { remaining: 1, .. })
        ));
    }

    #[test]
    fn truncated_collection_is_rejected() {
        let ty = ColumnType::list(ColumnType::Int);
        let raw = [0, 0, 0, 2, 0, 0, 0, 4, 0, 0, 0, 1];
        assert!(matches!(
            registry().decode(&ty, &raw),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn incompatible_value_is_rejected_on_encode() {
        let err = registry()
            .encode(&ColumnType::Int, &CqlValue::Text("1".to_owned()))
            .unwrap_err();
        assert_eq!(
            err,
            CodecError::IncompatibleValue {
                typ: ColumnType::Int,
                value: "text",
            }
        );
    }

    #[test]
    fn unregistered_tag_is_an_error() {
        let err = CodecRegistry::empty()
            .decode(&ColumnType::Int, &[0, 0, 0, 1])
            .unwrap_err();
        assert_eq!(err, CodecError::Unregistered(TypeTag::Int));
    }

    #[test]
    fn registered_codec_replaces_builtin() {
        fn decode_upper(_: &ColumnType, _: &CodecRegistry, raw: &[u8]) -> Result<CqlValue> {
            Ok(CqlValue::Text(String::from_utf8_lossy(raw).to_uppercase()))
        }
        let mut registry = registry();
        let previous = registry.register(
            TypeTag::Custom,
            Codec::new(Width::Variable, decode_upper, encode_opaque),
        );
        assert!(previous.is_some());
        assert_eq!(
            registry
                .decode(&ColumnType::Custom("x".to_owned()), b"abc")
                .unwrap(),
            CqlValue::Text("ABC".to_owned())
        );
    }

    proptest! {
        #[test]
        fn prop_opaque_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let registry = CodecRegistry::default();
            let encoded = registry
                .encode(&ColumnType::Blob, &CqlValue::Blob(bytes.clone()))
                .unwrap()
                .unwrap();
            prop_assert_eq!(&encoded, &bytes);
            prop_assert_eq!(
                registry.decode(&ColumnType::Jsonb, &encoded).unwrap(),
                CqlValue::Blob(bytes)
            );
        }

        #[test]
        fn prop_int_list_round_trip(items in proptest::collection::vec(any::<i32>(), 0..64)) {
            let registry = CodecRegistry::default();
            let ty = ColumnType::list(ColumnType::Int);
            let value = CqlValue::List(items.into_iter().map(CqlValue::Int).collect());
            let raw = registry.encode(&ty, &value).unwrap().unwrap();
            prop_assert_eq!(registry.decode(&ty, &raw).unwrap(), value);
        }
    }
}
