//! Column type descriptors as they appear in result metadata.

use std::{fmt::Display, str::FromStr};

/// The discriminant of a [`ColumnType`], used to key codecs in the
/// [`CodecRegistry`][crate::codec::CodecRegistry]
///
/// The numeric values are the native protocol `[option]` ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum TypeTag {
    Custom = 0x0000,
    Ascii = 0x0001,
    BigInt = 0x0002,
    Blob = 0x0003,
    Boolean = 0x0004,
    Counter = 0x0005,
    Double = 0x0007,
    Float = 0x0008,
    Int = 0x0009,
    Timestamp = 0x000B,
    Uuid = 0x000C,
    Text = 0x000D,
    TimeUuid = 0x000F,
    Inet = 0x0010,
    Date = 0x0011,
    Time = 0x0012,
    SmallInt = 0x0013,
    TinyInt = 0x0014,
    List = 0x0020,
    Map = 0x0021,
    Set = 0x0022,
    Jsonb = 0x0080,
}

impl TypeTag {
    /// Look up a tag from its protocol option id
    pub fn from_id(id: u16) -> Option<Self> {
        let tag = match id {
            0x0000 => Self::Custom,
            0x0001 => Self::Ascii,
            0x0002 => Self::BigInt,
            0x0003 => Self::Blob,
            0x0004 => Self::Boolean,
            0x0005 => Self::Counter,
            0x0007 => Self::Double,
            0x0008 => Self::Float,
            0x0009 => Self::Int,
            0x000B => Self::Timestamp,
            0x000C => Self::Uuid,
            0x000D => Self::Text,
            0x000F => Self::TimeUuid,
            0x0010 => Self::Inet,
            0x0011 => Self::Date,
            0x0012 => Self::Time,
            0x0013 => Self::SmallInt,
            0x0014 => Self::TinyInt,
            0x0020 => Self::List,
            0x0021 => Self::Map,
            0x0022 => Self::Set,
            0x0080 => Self::Jsonb,
            _ => return None,
        };
        Some(tag)
    }

    pub fn id(&self) -> u16 {
        *self as u16
    }

    /// Types whose values the client never interprets
    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Blob | Self::Jsonb | Self::Custom)
    }
}

/// The type of a column, including the element types of collections
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// A server-side type identified by its fully-qualified class name. Values are opaque.
    Custom(String),
    Ascii,
    BigInt,
    Blob,
    Boolean,
    Counter,
    Double,
    Float,
    Int,
    Timestamp,
    Uuid,
    Text,
    TimeUuid,
    Inet,
    Date,
    Time,
    SmallInt,
    TinyInt,
    /// Binary JSON. The client stores and returns the bytes verbatim.
    Jsonb,
    List(Box<ColumnType>),
    Set(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
}

impl ColumnType {
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Custom(_) => TypeTag::Custom,
            Self::Ascii => TypeTag::Ascii,
            Self::BigInt => TypeTag::BigInt,
            Self::Blob => TypeTag::Blob,
            Self::Boolean => TypeTag::Boolean,
            Self::Counter => TypeTag::Counter,
            Self::Double => TypeTag::Double,
            Self::Float => TypeTag::Float,
            Self::Int => TypeTag::Int,
            Self::Timestamp => TypeTag::Timestamp,
            Self::Uuid => TypeTag::Uuid,
            Self::Text => TypeTag::Text,
            Self::TimeUuid => TypeTag::TimeUuid,
            Self::Inet => TypeTag::Inet,
            Self::Date => TypeTag::Date,
            Self::Time => TypeTag::Time,
            Self::SmallInt => TypeTag::SmallInt,
            Self::TinyInt => TypeTag::TinyInt,
            Self::Jsonb => TypeTag::Jsonb,
            Self::List(_) => TypeTag::List,
            Self::Set(_) => TypeTag::Set,
            Self::Map(_, _) => TypeTag::Map,
        }
    }

    /// Create a `map<key, value>` type
    pub fn map(key: Self, value: Self) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    /// Create a `list<element>` type
    pub fn list(element: Self) -> Self {
        Self::List(Box::new(element))
    }

    /// Create a `set<element>` type
    pub fn set(element: Self) -> Self {
        Self::Set(Box::new(element))
    }

    pub fn is_opaque(&self) -> bool {
        self.tag().is_opaque()
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Text | Self::Ascii)
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom(class) => write!(f, "'{class}'"),
            Self::Ascii => write!(f, "ascii"),
            Self::BigInt => write!(f, "bigint"),
            Self::Blob => write!(f, "blob"),
            Self::Boolean => write!(f, "boolean"),
            Self::Counter => write!(f, "counter"),
            Self::Double => write!(f, "double"),
            Self::Float => write!(f, "float"),
            Self::Int => write!(f, "int"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Uuid => write!(f, "uuid"),
            Self::Text => write!(f, "text"),
            Self::TimeUuid => write!(f, "timeuuid"),
            Self::Inet => write!(f, "inet"),
            Self::Date => write!(f, "date"),
            Self::Time => write!(f, "time"),
            Self::SmallInt => write!(f, "smallint"),
            Self::TinyInt => write!(f, "tinyint"),
            Self::Jsonb => write!(f, "jsonb"),
            Self::List(e) => write!(f, "list<{e}>"),
            Self::Set(e) => write!(f, "set<{e}>"),
            Self::Map(k, v) => write!(f, "map<{k}, {v}>"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseColumnTypeError {
    #[error("unknown column type: '{0}'")]
    Unknown(String),

    #[error("malformed type parameters in '{0}'")]
    Malformed(String),
}

impl FromStr for ColumnType {
    type Err = ParseColumnTypeError;

    /// Parse a CQL type name such as `int`, `map<text, text>` or `frozen<list<int>>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(class) = s.strip_prefix('\'').and_then(|c| c.strip_suffix('\'')) {
            return Ok(Self::Custom(class.to_owned()));
        }

        if let Some(open) = s.find('<') {
            let inner = s[open + 1..]
                .strip_suffix('>')
                .ok_or_else(|| ParseColumnTypeError::Malformed(s.to_owned()))?;
            let outer = s[..open].trim().to_ascii_lowercase();
            return match outer.as_str() {
                "frozen" => inner.parse(),
                "list" => Ok(Self::list(inner.parse()?)),
                "set" => Ok(Self::set(inner.parse()?)),
                "map" => {
                    let (k, v) = split_top_level_comma(inner)
                        .ok_or_else(|| ParseColumnTypeError::Malformed(s.to_owned()))?;
                    Ok(Self::map(k.parse()?, v.parse()?))
                }
                _ => Err(ParseColumnTypeError::Unknown(s.to_owned())),
            };
        }

        let ty = match s.to_ascii_lowercase().as_str() {
            "ascii" => Self::Ascii,
            "bigint" => Self::BigInt,
            "blob" => Self::Blob,
            "boolean" => Self::Boolean,
            "counter" => Self::Counter,
            "double" => Self::Double,
            "float" => Self::Float,
            "int" => Self::Int,
            "timestamp" => Self::Timestamp,
            "uuid" => Self::Uuid,
            "text" | "varchar" => Self::Text,
            "timeuuid" => Self::TimeUuid,
            "inet" => Self::Inet,
            "date" => Self::Date,
            "time" => Self::Time,
            "smallint" => Self::SmallInt,
            "tinyint" => Self::TinyInt,
            "jsonb" => Self::Jsonb,
            _ => return Err(ParseColumnTypeError::Unknown(s.to_owned())),
        };
        Ok(ty)
    }
}

fn split_top_level_comma(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => return Some((&s[..i], &s[i + 1..])),
            _ => (),
        }
    }
    None
}

/// A named, typed column in a result set
///
/// The order of the specs in a result matches the projection order of the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSpec {
    pub name: String,
    pub typ: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, typ: ColumnType) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}
