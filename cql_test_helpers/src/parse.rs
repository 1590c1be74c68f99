//! A small CQL dialect: enough DDL and DML to drive the client through realistic scenarios.

use std::{collections::BTreeMap, sync::LazyLock};

use cql_client::{DbErrorCode, DispatchError};
use cql_types::{ColumnSpec, ColumnType};
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Term {
    /// A `?` bind marker
    Marker,
    Null,
    /// A literal with any quoting removed
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Filter {
    pub(crate) column: String,
    pub(crate) value: Term,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    CreateKeyspace {
        name: String,
        if_not_exists: bool,
        class: String,
        options: BTreeMap<String, String>,
        durable_writes: bool,
    },
    DropKeyspace {
        name: String,
        if_exists: bool,
    },
    CreateTable {
        keyspace: String,
        table: String,
        if_not_exists: bool,
        columns: Vec<ColumnSpec>,
        primary_key: String,
    },
    DropTable {
        keyspace: String,
        table: String,
        if_exists: bool,
    },
    Insert {
        keyspace: String,
        table: String,
        columns: Vec<String>,
        values: Vec<Term>,
    },
    Delete {
        keyspace: String,
        table: String,
        filter: Filter,
    },
    Select {
        keyspace: String,
        table: String,
        projection: Projection,
        filter: Option<Filter>,
        limit: Option<usize>,
    },
}

impl Command {
    pub(crate) fn is_mutation(&self) -> bool {
        matches!(self, Self::Insert { .. } | Self::Delete { .. })
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("statement pattern must compile")
}

const TERM: &str = r"(\?|'(?:[^']|'')*'|\S+)";

static CREATE_KEYSPACE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)^CREATE\s+KEYSPACE\s+(IF\s+NOT\s+EXISTS\s+)?(\w+)\s+WITH\s+replication\s*=\s*(\{[^}]*\})(?:\s+AND\s+durable_writes\s*=\s*(true|false))?$")
});
static DROP_KEYSPACE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)^DROP\s+KEYSPACE\s+(IF\s+EXISTS\s+)?(\w+)$"));
static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)^CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(\w+)\.(\w+)\s*\((.*)\)(?:\s+WITH\s+[^()]*)?$")
});
static DROP_TABLE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)^DROP\s+TABLE\s+(IF\s+EXISTS\s+)?(\w+)\.(\w+)$"));
static INSERT: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?is)^INSERT\s+INTO\s+(\w+)\.(\w+)\s*\(([^)]*)\)\s*VALUES\s*\((.*)\)$")
});
static DELETE: LazyLock<Regex> = LazyLock::new(|| {
    re(&format!(
        r"(?is)^DELETE\s+FROM\s+(\w+)\.(\w+)\s+WHERE\s+(\w+)\s*=\s*{TERM}$"
    ))
});
static SELECT: LazyLock<Regex> = LazyLock::new(|| {
    re(&format!(
        r"(?is)^SELECT\s+(.+?)\s+FROM\s+(\w+)\.(\w+)(?:\s+WHERE\s+(\w+)\s*=\s*{TERM})?(?:\s+LIMIT\s+(\d+))?$"
    ))
});
static PRIMARY_KEY_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)^PRIMARY\s+KEY\s*\(\s*\(?\s*(\w+)"));
static COLUMN_DEFINITION: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)^(\w+)\s+(.+?)(\s+PRIMARY\s+KEY)?$"));

fn syntax_error(text: &str) -> DispatchError {
    DispatchError::server(
        DbErrorCode::SyntaxError,
        format!("line 1:0 no viable alternative at input '{text}'"),
    )
}

pub(crate) fn invalid(message: impl Into<String>) -> DispatchError {
    DispatchError::server(DbErrorCode::Invalid, message)
}

/// Parse one statement
pub(crate) fn parse(text: &str) -> Result<Command, DispatchError> {
    let text = text.trim().trim_end_matches(';').trim_end();

    if let Some(caps) = CREATE_KEYSPACE.captures(text) {
        let (class, options) = parse_replication(&caps[3]).ok_or_else(|| syntax_error(text))?;
        return Ok(Command::CreateKeyspace {
            name: caps[2].to_owned(),
            if_not_exists: caps.get(1).is_some(),
            class,
            options,
            durable_writes: caps
                .get(4)
                .is_none_or(|m| m.as_str().eq_ignore_ascii_case("true")),
        });
    }
    if let Some(caps) = DROP_KEYSPACE.captures(text) {
        return Ok(Command::DropKeyspace {
            name: caps[2].to_owned(),
            if_exists: caps.get(1).is_some(),
        });
    }
    if let Some(caps) = CREATE_TABLE.captures(text) {
        let (columns, primary_key) = parse_table_body(&caps[4])?;
        return Ok(Command::CreateTable {
            keyspace: caps[2].to_owned(),
            table: caps[3].to_owned(),
            if_not_exists: caps.get(1).is_some(),
            columns,
            primary_key,
        });
    }
    if let Some(caps) = DROP_TABLE.captures(text) {
        return Ok(Command::DropTable {
            keyspace: caps[2].to_owned(),
            table: caps[3].to_owned(),
            if_exists: caps.get(1).is_some(),
        });
    }
    if let Some(caps) = INSERT.captures(text) {
        let columns: Vec<_> = split_top_level(&caps[3])
            .into_iter()
            .map(str::to_owned)
            .collect();
        let values: Vec<_> = split_top_level(&caps[4])
            .into_iter()
            .map(parse_term)
            .collect();
        if columns.len() != values.len() {
            return Err(invalid("Unmatched column names/values"));
        }
        return Ok(Command::Insert {
            keyspace: caps[1].to_owned(),
            table: caps[2].to_owned(),
            columns,
            values,
        });
    }
    if let Some(caps) = DELETE.captures(text) {
        return Ok(Command::Delete {
            keyspace: caps[1].to_owned(),
            table: caps[2].to_owned(),
            filter: Filter {
                column: caps[3].to_owned(),
                value: parse_term(&caps[4]),
            },
        });
    }
    if let Some(caps) = SELECT.captures(text) {
        let projection = match caps[1].trim() {
            "*" => Projection::All,
            list => Projection::Columns(
                split_top_level(list)
                    .into_iter()
                    .map(str::to_owned)
                    .collect(),
            ),
        };
        let filter = caps.get(4).zip(caps.get(5)).map(|(column, value)| Filter {
            column: column.as_str().to_owned(),
            value: parse_term(value.as_str()),
        });
        let limit = caps
            .get(6)
            .map(|m| m.as_str().parse::<usize>())
            .transpose()
            .map_err(|_| syntax_error(text))?;
        return Ok(Command::Select {
            keyspace: caps[2].to_owned(),
            table: caps[3].to_owned(),
            projection,
            filter,
            limit,
        });
    }

    Err(syntax_error(text))
}

/// Parse a replication map literal such as `{'class': 'SimpleStrategy', 'replication_factor': 1}`
fn parse_replication(map: &str) -> Option<(String, BTreeMap<String, String>)> {
    let json = map.replace('\'', "\"");
    let serde_json::Value::Object(entries) = serde_json::from_str(&json).ok()? else {
        return None;
    };
    let mut options: BTreeMap<String, String> = entries
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect();
    let class = options.remove("class")?;
    Some((class, options))
}

fn parse_table_body(body: &str) -> Result<(Vec<ColumnSpec>, String), DispatchError> {
    let mut columns = Vec::new();
    let mut primary_key = None;
    for definition in split_top_level(body) {
        if let Some(caps) = PRIMARY_KEY_CLAUSE.captures(definition) {
            primary_key = Some(caps[1].to_owned());
            continue;
        }
        let caps = COLUMN_DEFINITION
            .captures(definition)
            .ok_or_else(|| syntax_error(definition))?;
        let typ: ColumnType = caps[2]
            .parse()
            .map_err(|e| invalid(format!("Unknown type: {e}")))?;
        if caps.get(3).is_some() {
            primary_key = Some(caps[1].to_owned());
        }
        columns.push(ColumnSpec::new(&caps[1], typ));
    }
    let primary_key = primary_key.ok_or_else(|| invalid("No PRIMARY KEY specified"))?;
    if !columns.iter().any(|c| c.name == primary_key) {
        return Err(invalid(format!(
            "Unknown definition {primary_key} referenced in PRIMARY KEY"
        )));
    }
    Ok((columns, primary_key))
}

fn parse_term(term: &str) -> Term {
    let term = term.trim();
    if term == "?" {
        Term::Marker
    } else if term.eq_ignore_ascii_case("null") {
        Term::Null
    } else if let Some(quoted) = term.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        Term::Literal(quoted.replace("''", "'"))
    } else {
        Term::Literal(term.to_owned())
    }
}

/// Split on commas that are not inside quotes, parentheses or type brackets
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' | '<' if !quoted => depth += 1,
            ')' | '>' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => (),
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn create_table_with_inline_key() {
        let command =
            parse("CREATE TABLE gocql_test.test_jsonb (id int PRIMARY KEY, my_jsonb jsonb);")
                .unwrap();
        assert_eq!(
            command,
            Command::CreateTable {
                keyspace: "gocql_test".to_owned(),
                table: "test_jsonb".to_owned(),
                if_not_exists: false,
                columns: vec![
                    ColumnSpec::new("id", ColumnType::Int),
                    ColumnSpec::new("my_jsonb", ColumnType::Jsonb),
                ],
                primary_key: "id".to_owned(),
            }
        );
    }

    #[test]
    fn create_table_with_key_clause_and_collection() {
        let Command::CreateTable {
            columns,
            primary_key,
            ..
        } = parse(
            "CREATE TABLE IF NOT EXISTS ks.t (k text, tags map<text, int>, PRIMARY KEY ((k)))",
        )
        .unwrap()
        else {
            panic!("expected a create table");
        };
        assert_eq!(primary_key, "k");
        assert_eq!(
            columns[1].typ,
            ColumnType::map(ColumnType::Text, ColumnType::Int)
        );
    }

    #[test]
    fn create_keyspace() {
        let command = parse(
            "CREATE KEYSPACE IF NOT EXISTS gocql_test WITH replication = \
             {'class': 'SimpleStrategy', 'replication_factor': 3} AND durable_writes = false",
        )
        .unwrap();
        assert_eq!(
            command,
            Command::CreateKeyspace {
                name: "gocql_test".to_owned(),
                if_not_exists: true,
                class: "SimpleStrategy".to_owned(),
                options: [("replication_factor".to_owned(), "3".to_owned())].into(),
                durable_writes: false,
            }
        );
    }

    #[test]
    fn insert_terms() {
        let Command::Insert { columns, values, .. } =
            parse("INSERT INTO ks.t (id, name, note) VALUES (?, 'it''s', null)").unwrap()
        else {
            panic!("expected an insert");
        };
        assert_eq!(columns, ["id", "name", "note"]);
        assert_eq!(
            values,
            vec![Term::Marker, Term::Literal("it's".to_owned()), Term::Null]
        );
    }

    #[test]
    fn select_shapes() {
        assert_eq!(
            parse("SELECT id, my_jsonb FROM ks.t WHERE id = ? LIMIT 1").unwrap(),
            Command::Select {
                keyspace: "ks".to_owned(),
                table: "t".to_owned(),
                projection: Projection::Columns(vec!["id".to_owned(), "my_jsonb".to_owned()]),
                filter: Some(Filter {
                    column: "id".to_owned(),
                    value: Term::Marker,
                }),
                limit: Some(1),
            }
        );
        assert!(matches!(
            parse("select * from ks.t").unwrap(),
            Command::Select {
                projection: Projection::All,
                filter: None,
                limit: None,
                ..
            }
        ));
    }

    #[test]
    fn unknown_statements_are_syntax_errors() {
        let err = parse("UPSERT ks.t").unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Server {
                code: DbErrorCode::SyntaxError,
                ..
            }
        ));
    }

    #[test]
    fn missing_primary_key_is_invalid() {
        let err = parse("CREATE TABLE ks.t (id int)").unwrap_err();
        assert_eq!(err, invalid("No PRIMARY KEY specified"));
    }
}
