use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// How many replicas must acknowledge a read or write
///
/// The discriminants are the native protocol `[consistency]` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0000,
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    #[default]
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    Serial = 0x0008,
    LocalSerial = 0x0009,
    LocalOne = 0x000A,
}

impl Consistency {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Serial levels are only valid for the paxos phase of conditional updates
    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial | Self::LocalSerial)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::One => "one",
            Self::Two => "two",
            Self::Three => "three",
            Self::Quorum => "quorum",
            Self::All => "all",
            Self::LocalQuorum => "local_quorum",
            Self::EachQuorum => "each_quorum",
            Self::Serial => "serial",
            Self::LocalSerial => "local_serial",
            Self::LocalOne => "local_one",
        }
    }
}

impl Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid consistency level: '{0}'")]
pub struct ParseConsistencyError(String);

impl FromStr for Consistency {
    type Err = ParseConsistencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "any" => Self::Any,
            "one" => Self::One,
            "two" => Self::Two,
            "three" => Self::Three,
            "quorum" => Self::Quorum,
            "all" => Self::All,
            "local_quorum" => Self::LocalQuorum,
            "each_quorum" => Self::EachQuorum,
            "serial" => Self::Serial,
            "local_serial" => Self::LocalSerial,
            "local_one" => Self::LocalOne,
            _ => return Err(ParseConsistencyError(s.to_owned())),
        };
        Ok(level)
    }
}
