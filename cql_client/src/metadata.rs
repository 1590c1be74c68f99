//! Keyspace replication metadata read from the system schema tables.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Display,
};

use cql_types::{Row, TypeTag};
use tracing::{debug, info};

use crate::{
    Error, Result,
    dispatch::{DbErrorCode, DispatchError},
    session::Session,
    statement::Statement,
};

const KEYSPACE_QUERY: &str = "SELECT keyspace_name, durable_writes, replication \
    FROM system_schema.keyspaces WHERE keyspace_name = ?";

const LEGACY_KEYSPACE_QUERY: &str = "SELECT keyspace_name, durable_writes, strategy_class, \
    strategy_options FROM system.schema_keyspaces WHERE keyspace_name = ?";

const REPLICATION_FACTOR: &str = "replication_factor";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("keyspace '{0}' does not exist")]
    KeyspaceNotFound(String),

    #[error("requested keyspace '{requested}' but the schema returned '{returned}'")]
    NameMismatch { requested: String, returned: String },

    #[error("replication of keyspace '{0}' has no strategy class")]
    MissingClass(String),

    #[error("strategy {class} requires option '{key}'")]
    MissingOption { class: String, key: &'static str },

    #[error("invalid replication factor '{value}' for '{key}'")]
    InvalidReplicationFactor { key: String, value: String },

    #[error("strategy options are not a JSON object: {0}")]
    InvalidOptionsJson(String),
}

/// A strategy option value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyValue {
    Text(String),
    Integer(i64),
    Map(BTreeMap<String, StrategyValue>),
}

impl StrategyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read the value as a replica count
    ///
    /// A `total/transient` value (transient replication) counts all `total` replicas.
    fn as_factor(&self, key: &str) -> Result<usize, MetadataError> {
        let factor = match self {
            Self::Text(s) => parse_factor(s),
            Self::Integer(n) => usize::try_from(*n).ok(),
            Self::Map(_) => None,
        };
        factor.ok_or_else(|| MetadataError::InvalidReplicationFactor {
            key: key.to_owned(),
            value: self.to_string(),
        })
    }
}

fn parse_factor(s: &str) -> Option<usize> {
    let s = s.trim();
    match s.split_once('/') {
        Some((total, transient)) => {
            let total = total.trim().parse::<usize>().ok()?;
            let transient = transient.trim().parse::<usize>().ok()?;
            (transient < total).then_some(total)
        }
        None => s.parse().ok(),
    }
}

impl Display for StrategyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<serde_json::Value> for StrategyValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(n) => Self::Integer(n),
                None => Self::Text(n.to_string()),
            },
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            other => Self::Text(other.to_string()),
        }
    }
}

/// The replication strategy of a keyspace, with its options interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationStrategy {
    Simple {
        replication_factor: usize,
    },
    NetworkTopology {
        datacenter_factors: BTreeMap<String, usize>,
    },
    Local,
    /// A strategy whose options are not interpreted
    Other {
        class: String,
    },
}

/// Keyspace-level configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceMetadata {
    pub name: String,
    pub durable_writes: bool,
    /// Fully-qualified class name of the replication strategy
    pub strategy_class: String,
    pub strategy_options: HashMap<String, StrategyValue>,
}

impl KeyspaceMetadata {
    /// The unqualified strategy class name, e.g. `SimpleStrategy`
    pub fn strategy_name(&self) -> &str {
        short_class(&self.strategy_class)
    }

    /// The `replication_factor` option as a replica count
    pub fn replication_factor(&self) -> Result<usize, MetadataError> {
        self.strategy_options
            .get(REPLICATION_FACTOR)
            .ok_or_else(|| MetadataError::MissingOption {
                class: self.strategy_class.clone(),
                key: REPLICATION_FACTOR,
            })?
            .as_factor(REPLICATION_FACTOR)
    }

    /// Interpret the strategy options for the strategies the client knows
    pub fn strategy(&self) -> Result<ReplicationStrategy, MetadataError> {
        match self.strategy_name() {
            "SimpleStrategy" => Ok(ReplicationStrategy::Simple {
                replication_factor: self.simple_replication_factor()?,
            }),
            "NetworkTopologyStrategy" => {
                let datacenter_factors = self
                    .strategy_options
                    .iter()
                    .map(|(dc, value)| value.as_factor(dc).map(|factor| (dc.clone(), factor)))
                    .collect::<Result<_, MetadataError>>()?;
                Ok(ReplicationStrategy::NetworkTopology { datacenter_factors })
            }
            "LocalStrategy" | "EverywhereStrategy" => Ok(ReplicationStrategy::Local),
            _ => Ok(ReplicationStrategy::Other {
                class: self.strategy_class.clone(),
            }),
        }
    }

    fn simple_replication_factor(&self) -> Result<usize, MetadataError> {
        match self.replication_factor()? {
            0 => Err(MetadataError::InvalidReplicationFactor {
                key: REPLICATION_FACTOR.to_owned(),
                value: "0".to_owned(),
            }),
            factor => Ok(factor),
        }
    }

    /// Check the options a strategy cannot work without
    ///
    /// Only required options are checked; the remaining options are kept as the server
    /// reported them and interpreted on demand by [`Self::strategy`].
    fn validate(&self) -> Result<(), MetadataError> {
        for &key in required_options(&self.strategy_class) {
            if !self.strategy_options.contains_key(key) {
                return Err(MetadataError::MissingOption {
                    class: self.strategy_class.clone(),
                    key,
                });
            }
        }
        if self.strategy_name() == "SimpleStrategy" {
            self.simple_replication_factor()?;
        }
        Ok(())
    }
}

fn short_class(class: &str) -> &str {
    class.rsplit('.').next().unwrap_or(class)
}

fn required_options(class: &str) -> &'static [&'static str] {
    match short_class(class) {
        "SimpleStrategy" => &[REPLICATION_FACTOR],
        _ => &[],
    }
}

/// Parse the JSON object the legacy schema table stores strategy options as
pub fn parse_options_json(json: &str) -> Result<HashMap<String, StrategyValue>, MetadataError> {
    if json.trim().is_empty() {
        return Ok(HashMap::new());
    }
    match serde_json::from_str(json) {
        Ok(serde_json::Value::Object(map)) => {
            Ok(map.into_iter().map(|(k, v)| (k, v.into())).collect())
        }
        Ok(other) => Err(MetadataError::InvalidOptionsJson(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(MetadataError::InvalidOptionsJson(e.to_string())),
    }
}

pub(crate) async fn resolve(session: &Session, keyspace: &str) -> Result<KeyspaceMetadata> {
    let statement = Statement::new(KEYSPACE_QUERY).with_values((keyspace,));
    let metadata = match session.first_row(statement).await {
        Ok(row) => from_current_row(keyspace, row)?,
        Err(Error::Request {
            source:
                DispatchError::Server {
                    code: DbErrorCode::Invalid,
                    message,
                },
            ..
        }) => {
            debug!(%message, "system_schema.keyspaces unavailable, using the legacy schema table");
            let statement = Statement::new(LEGACY_KEYSPACE_QUERY).with_values((keyspace,));
            from_legacy_row(keyspace, session.first_row(statement).await?)?
        }
        Err(e) => return Err(e),
    };
    metadata.validate()?;
    info!(
        keyspace = %metadata.name,
        strategy = %metadata.strategy_class,
        "resolved keyspace metadata"
    );
    Ok(metadata)
}

fn check_name(requested: &str, row: &Row) -> Result<String> {
    let name: String = row.get_by_name("keyspace_name")?;
    if name != requested {
        return Err(MetadataError::NameMismatch {
            requested: requested.to_owned(),
            returned: name,
        }
        .into());
    }
    Ok(name)
}

fn from_current_row(requested: &str, row: Option<Row>) -> Result<KeyspaceMetadata> {
    let row = row.ok_or_else(|| MetadataError::KeyspaceNotFound(requested.to_owned()))?;
    let name = check_name(requested, &row)?;
    let durable_writes = row.get_by_name("durable_writes")?;
    let mut replication: HashMap<String, String> = row.get_by_name("replication")?;
    let strategy_class = replication
        .remove("class")
        .ok_or_else(|| MetadataError::MissingClass(name.clone()))?;
    Ok(KeyspaceMetadata {
        name,
        durable_writes,
        strategy_class,
        strategy_options: replication
            .into_iter()
            .map(|(k, v)| (k, StrategyValue::Text(v)))
            .collect(),
    })
}

fn from_legacy_row(requested: &str, row: Option<Row>) -> Result<KeyspaceMetadata> {
    let row = row.ok_or_else(|| MetadataError::KeyspaceNotFound(requested.to_owned()))?;
    let name = check_name(requested, &row)?;
    let strategy_class: String = row.get_by_name("strategy_class")?;
    if strategy_class.is_empty() {
        return Err(MetadataError::MissingClass(name).into());
    }
    // some servers expose the options as map<text, text> rather than JSON text
    let is_map = row
        .columns()
        .iter()
        .any(|c| c.name == "strategy_options" && c.typ.tag() == TypeTag::Map);
    let strategy_options = if is_map {
        row.get_by_name::<HashMap<String, String>>("strategy_options")?
            .into_iter()
            .map(|(k, v)| (k, StrategyValue::Text(v)))
            .collect()
    } else {
        parse_options_json(&row.get_by_name::<String>("strategy_options")?)?
    };
    Ok(KeyspaceMetadata {
        durable_writes: row.get_by_name("durable_writes")?,
        strategy_options,
        name,
        strategy_class,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn metadata(class: &str, options: &[(&str, StrategyValue)]) -> KeyspaceMetadata {
        KeyspaceMetadata {
            name: "gocql_test".to_owned(),
            durable_writes: true,
            strategy_class: class.to_owned(),
            strategy_options: options
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn simple_strategy_replication_factor() {
        let md = metadata(
            "org.apache.cassandra.locator.SimpleStrategy",
            &[(REPLICATION_FACTOR, StrategyValue::Text("3".to_owned()))],
        );
        assert_eq!(md.strategy_name(), "SimpleStrategy");
        assert_eq!(md.replication_factor().unwrap(), 3);
        assert_eq!(
            md.strategy().unwrap(),
            ReplicationStrategy::Simple {
                replication_factor: 3
            }
        );
        md.validate().unwrap();
    }

    #[test]
    fn simple_strategy_requires_replication_factor() {
        let md = metadata("SimpleStrategy", &[]);
        assert_eq!(
            md.validate().unwrap_err(),
            MetadataError::MissingOption {
                class: "SimpleStrategy".to_owned(),
                key: REPLICATION_FACTOR,
            }
        );

        let md = metadata(
            "SimpleStrategy",
            &[(REPLICATION_FACTOR, StrategyValue::Text("three".to_owned()))],
        );
        assert!(matches!(
            md.validate(),
            Err(MetadataError::InvalidReplicationFactor { .. })
        ));
    }

    #[test]
    fn network_topology_factors() {
        let md = metadata(
            "org.apache.cassandra.locator.NetworkTopologyStrategy",
            &[
                ("dc1", StrategyValue::Text("3".to_owned())),
                ("dc2", StrategyValue::Integer(0)),
            ],
        );
        md.validate().unwrap();
        assert_eq!(
            md.strategy().unwrap(),
            ReplicationStrategy::NetworkTopology {
                datacenter_factors: [("dc1".to_owned(), 3), ("dc2".to_owned(), 0)]
                    .into_iter()
                    .collect(),
            }
        );
    }

    #[test]
    fn transient_replication_counts_all_replicas() {
        let md = metadata(
            "NetworkTopologyStrategy",
            &[
                ("dc1", StrategyValue::Text("3/1".to_owned())),
                ("dc2", StrategyValue::Text("2".to_owned())),
            ],
        );
        md.validate().unwrap();
        assert_eq!(
            md.strategy().unwrap(),
            ReplicationStrategy::NetworkTopology {
                datacenter_factors: [("dc1".to_owned(), 3), ("dc2".to_owned(), 2)]
                    .into_iter()
                    .collect(),
            }
        );

        let md = metadata(
            "SimpleStrategy",
            &[(REPLICATION_FACTOR, StrategyValue::Text("3/1".to_owned()))],
        );
        assert_eq!(md.replication_factor().unwrap(), 3);
    }

    #[test]
    fn uninterpretable_options_only_fail_the_strategy_view() {
        let md = metadata(
            "NetworkTopologyStrategy",
            &[
                ("dc1", StrategyValue::Text("3".to_owned())),
                ("dc2", StrategyValue::Text("2/2".to_owned())),
            ],
        );
        md.validate().unwrap();
        assert_eq!(
            md.strategy().unwrap_err(),
            MetadataError::InvalidReplicationFactor {
                key: "dc2".to_owned(),
                value: "2/2".to_owned(),
            }
        );
        assert_eq!(
            md.strategy_options["dc2"],
            StrategyValue::Text("2/2".to_owned())
        );
    }

    #[test]
    fn simple_strategy_rejects_a_zero_factor() {
        let md = metadata(
            "SimpleStrategy",
            &[(REPLICATION_FACTOR, StrategyValue::Integer(0))],
        );
        assert!(matches!(
            md.validate(),
            Err(MetadataError::InvalidReplicationFactor { .. })
        ));
    }

    #[test]
    fn unknown_strategies_are_not_interpreted() {
        let md = metadata(
            "com.example.CustomStrategy",
            &[("anything", StrategyValue::Text("x".to_owned()))],
        );
        md.validate().unwrap();
        assert_eq!(
            md.strategy().unwrap(),
            ReplicationStrategy::Other {
                class: "com.example.CustomStrategy".to_owned()
            }
        );
    }

    #[test]
    fn legacy_options_json() {
        let options =
            parse_options_json(r#"{"replication_factor":"2","dc":{"rack1":1},"n":5}"#).unwrap();
        assert_eq!(
            options[REPLICATION_FACTOR],
            StrategyValue::Text("2".to_owned())
        );
        assert_eq!(options["n"], StrategyValue::Integer(5));
        assert_eq!(
            options["dc"],
            StrategyValue::Map(
                [("rack1".to_owned(), StrategyValue::Integer(1))]
                    .into_iter()
                    .collect()
            )
        );
        assert_eq!(options["dc"].to_string(), "{rack1: 1}");

        assert!(parse_options_json("").unwrap().is_empty());
        assert!(matches!(
            parse_options_json("[1, 2]"),
            Err(MetadataError::InvalidOptionsJson(_))
        ));
        assert!(matches!(
            parse_options_json("{not json"),
            Err(MetadataError::InvalidOptionsJson(_))
        ));
    }
}
