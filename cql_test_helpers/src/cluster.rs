use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use cql_client::{
    BatchKind, BatchRequest, DbErrorCode, DispatchError, Dispatcher, PagingState, QueryRequest,
    Request, Response, RowsPage, Session,
};
use cql_types::{CodecRegistry, ColumnSpec, ColumnType, CqlValue};
use parking_lot::Mutex;
use tracing::debug;

use crate::parse::{Command, Filter, Projection, Term, invalid, parse};

const DEFAULT_LATENCY: Duration = Duration::from_millis(1);

type RawRow = Vec<Option<Bytes>>;

/// A single-node cluster that keeps its data in memory
///
/// Understands keyspace and table DDL, single-row inserts and deletes, batches of those, and
/// selects with an optional equality filter. Selects are paged with server-side cursors that
/// stay open until the last page is read or the paging state is released.
///
/// Responses can be scripted ahead of time with [`MemoryCluster::push_outcome`] to inject
/// failures.
#[derive(Debug)]
pub struct MemoryCluster {
    inner: Mutex<Inner>,
    registry: CodecRegistry,
    latency: Duration,
    dispatches: AtomicUsize,
    requests: Mutex<Vec<Request>>,
}

#[derive(Debug, Default)]
struct Inner {
    schema: Schema,
    cursors: HashMap<u64, Cursor>,
    next_cursor: u64,
    scripted: VecDeque<Result<Response, DispatchError>>,
}

#[derive(Debug, Clone, Default)]
struct Schema {
    keyspaces: BTreeMap<String, Keyspace>,
    tables: BTreeMap<(String, String), Table>,
    legacy: bool,
}

#[derive(Debug, Clone)]
struct Keyspace {
    durable_writes: bool,
    class: String,
    options: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<ColumnSpec>,
    primary_key: usize,
    rows: BTreeMap<Bytes, RawRow>,
}

impl Table {
    fn column(&self, name: &str) -> Result<usize, DispatchError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| invalid(format!("Undefined column name {name}")))
    }
}

#[derive(Debug)]
struct Cursor {
    columns: Vec<ColumnSpec>,
    rows: VecDeque<RawRow>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            registry: CodecRegistry::default(),
            latency: DEFAULT_LATENCY,
            dispatches: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Time every dispatch waits before it is served
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Create a durable keyspace with the given replication class and options
    pub fn with_keyspace(mut self, name: &str, class: &str, options: &[(&str, &str)]) -> Self {
        self.inner.get_mut().schema.keyspaces.insert(
            name.to_owned(),
            Keyspace {
                durable_writes: true,
                class: class.to_owned(),
                options: options
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
            },
        );
        self
    }

    /// Serve keyspace metadata from `system.schema_keyspaces` only, the way clusters that
    /// predate `system_schema` do
    pub fn with_legacy_schema(mut self) -> Self {
        self.inner.get_mut().schema.legacy = true;
        self
    }

    /// A session dispatching to this cluster
    pub fn session(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self) as Arc<dyn Dispatcher>)
    }

    /// Answer the next dispatch with `outcome` instead of executing it
    ///
    /// Outcomes are consumed in the order they were pushed.
    pub fn push_outcome(&self, outcome: Result<Response, DispatchError>) {
        self.inner.lock().scripted.push_back(outcome);
    }

    /// Fail the next dispatch with `error`
    pub fn fail_next(&self, error: DispatchError) {
        self.push_outcome(Err(error));
    }

    /// Number of requests dispatched so far, including scripted ones
    pub fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Number of paging cursors not yet exhausted or released
    pub fn open_cursors(&self) -> usize {
        self.inner.lock().cursors.len()
    }

    /// Number of rows stored in `keyspace.table`, if the table exists
    pub fn row_count(&self, keyspace: &str, table: &str) -> Option<usize> {
        self.inner
            .lock()
            .schema
            .tables
            .get(&(keyspace.to_owned(), table.to_owned()))
            .map(|t| t.rows.len())
    }

    fn execute(&self, inner: &mut Inner, request: &Request) -> Result<Response, DispatchError> {
        match request {
            Request::Query(query) => match &query.paging_state {
                Some(state) => inner.resume(state, query.page_size),
                None => self.query(inner, query),
            },
            Request::Batch(batch) => self.batch(inner, batch),
        }
    }

    fn query(&self, inner: &mut Inner, query: &QueryRequest) -> Result<Response, DispatchError> {
        let command = parse(&query.text)?;
        let mut binder = Binder::new(&self.registry, &query.values);
        let response = match command {
            Command::Select {
                keyspace,
                table,
                projection,
                filter,
                limit,
            } => {
                let source = inner.schema.readable(&keyspace, &table, &self.registry)?;
                let (columns, rows) =
                    select(&source, &projection, filter.as_ref(), limit, &mut binder)?;
                binder.finish()?;
                return Ok(inner.page(columns, rows.into(), query.page_size));
            }
            command if command.is_mutation() => {
                inner.schema.mutate(command, &mut binder)?;
                Response::Void
            }
            command => {
                inner.schema.alter(command)?;
                Response::SchemaChange
            }
        };
        binder.finish()?;
        Ok(response)
    }

    fn batch(&self, inner: &mut Inner, batch: &BatchRequest) -> Result<Response, DispatchError> {
        let mut schema = inner.schema.clone();
        for statement in &batch.statements {
            let command = parse(&statement.text)?;
            if !command.is_mutation() {
                return Err(invalid(
                    "Only INSERT, UPDATE and DELETE statements are allowed in a batch",
                ));
            }
            if batch.kind == BatchKind::Counter {
                return Err(invalid("Only counter mutations are allowed in COUNTER batches"));
            }
            let mut binder = Binder::new(&self.registry, &statement.values);
            schema.mutate(command, &mut binder)?;
            binder.finish()?;
        }
        inner.schema = schema;
        Ok(Response::Void)
    }
}

impl Inner {
    fn page(
        &mut self,
        columns: Vec<ColumnSpec>,
        mut rows: VecDeque<RawRow>,
        page_size: Option<NonZeroUsize>,
    ) -> Response {
        let take = page_size.map_or(rows.len(), |n| n.get().min(rows.len()));
        let page: Vec<_> = rows.drain(..take).collect();
        let paging_state = if rows.is_empty() {
            None
        } else {
            let id = self.next_cursor;
            self.next_cursor += 1;
            self.cursors.insert(
                id,
                Cursor {
                    columns: columns.clone(),
                    rows,
                },
            );
            Some(PagingState::new(id.to_be_bytes().to_vec()))
        };
        Response::Rows(RowsPage {
            columns,
            rows: page,
            paging_state,
        })
    }

    fn resume(
        &mut self,
        state: &PagingState,
        page_size: Option<NonZeroUsize>,
    ) -> Result<Response, DispatchError> {
        let cursor = cursor_id(state)
            .and_then(|id| self.cursors.remove(&id))
            .ok_or_else(|| {
                DispatchError::server(DbErrorCode::ProtocolError, "Invalid value for the paging state")
            })?;
        Ok(self.page(cursor.columns, cursor.rows, page_size))
    }
}

impl Schema {
    fn table(&self, keyspace: &str, table: &str) -> Result<&Table, DispatchError> {
        self.tables
            .get(&(keyspace.to_owned(), table.to_owned()))
            .ok_or_else(|| invalid(format!("unconfigured table {table}")))
    }

    fn table_mut(&mut self, keyspace: &str, table: &str) -> Result<&mut Table, DispatchError> {
        self.tables
            .get_mut(&(keyspace.to_owned(), table.to_owned()))
            .ok_or_else(|| invalid(format!("unconfigured table {table}")))
    }

    /// A table that can be selected from, including the schema tables describing keyspaces
    fn readable(
        &self,
        keyspace: &str,
        table: &str,
        registry: &CodecRegistry,
    ) -> Result<Table, DispatchError> {
        match (keyspace, table) {
            ("system_schema", "keyspaces") if !self.legacy => self.keyspaces_table(registry),
            ("system", "schema_keyspaces") if self.legacy => self.legacy_keyspaces_table(registry),
            _ => self.table(keyspace, table).cloned(),
        }
    }

    fn keyspaces_table(&self, registry: &CodecRegistry) -> Result<Table, DispatchError> {
        let replication = ColumnType::map(ColumnType::Text, ColumnType::Text);
        let columns = vec![
            ColumnSpec::new("keyspace_name", ColumnType::Text),
            ColumnSpec::new("durable_writes", ColumnType::Boolean),
            ColumnSpec::new("replication", replication.clone()),
        ];
        let mut rows = BTreeMap::new();
        for (name, keyspace) in &self.keyspaces {
            let entries = std::iter::once(("class", keyspace.class.as_str()))
                .chain(
                    keyspace
                        .options
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.as_str())),
                )
                .map(|(k, v)| (CqlValue::from(k), CqlValue::from(v)))
                .collect();
            let row = vec![
                encode(registry, &ColumnType::Text, &CqlValue::from(name.as_str()))?,
                encode(
                    registry,
                    &ColumnType::Boolean,
                    &CqlValue::Boolean(keyspace.durable_writes),
                )?,
                encode(registry, &replication, &CqlValue::Map(entries))?,
            ];
            rows.insert(Bytes::from(name.clone()), row);
        }
        Ok(Table {
            columns,
            primary_key: 0,
            rows,
        })
    }

    fn legacy_keyspaces_table(&self, registry: &CodecRegistry) -> Result<Table, DispatchError> {
        let columns = vec![
            ColumnSpec::new("keyspace_name", ColumnType::Text),
            ColumnSpec::new("durable_writes", ColumnType::Boolean),
            ColumnSpec::new("strategy_class", ColumnType::Text),
            ColumnSpec::new("strategy_options", ColumnType::Text),
        ];
        let mut rows = BTreeMap::new();
        for (name, keyspace) in &self.keyspaces {
            let options = serde_json::to_string(&keyspace.options)
                .map_err(|e| DispatchError::server(DbErrorCode::ServerError, e.to_string()))?;
            let row = vec![
                encode(registry, &ColumnType::Text, &CqlValue::from(name.as_str()))?,
                encode(
                    registry,
                    &ColumnType::Boolean,
                    &CqlValue::Boolean(keyspace.durable_writes),
                )?,
                encode(
                    registry,
                    &ColumnType::Text,
                    &CqlValue::from(keyspace.class.as_str()),
                )?,
                encode(registry, &ColumnType::Text, &CqlValue::Text(options))?,
            ];
            rows.insert(Bytes::from(name.clone()), row);
        }
        Ok(Table {
            columns,
            primary_key: 0,
            rows,
        })
    }

    fn alter(&mut self, command: Command) -> Result<(), DispatchError> {
        match command {
            Command::CreateKeyspace {
                name,
                if_not_exists,
                class,
                options,
                durable_writes,
            } => {
                if self.keyspaces.contains_key(&name) {
                    return already_exists(if_not_exists, format!("Keyspace {name} already exists"));
                }
                self.keyspaces.insert(
                    name,
                    Keyspace {
                        durable_writes,
                        class,
                        options,
                    },
                );
            }
            Command::DropKeyspace { name, if_exists } => {
                if self.keyspaces.remove(&name).is_none() {
                    return missing(if_exists, format!("Keyspace {name} doesn't exist"));
                }
                self.tables.retain(|(keyspace, _), _| *keyspace != name);
            }
            Command::CreateTable {
                keyspace,
                table,
                if_not_exists,
                columns,
                primary_key,
            } => {
                if !self.keyspaces.contains_key(&keyspace) {
                    return Err(invalid(format!("Keyspace {keyspace} doesn't exist")));
                }
                let key = (keyspace, table);
                if self.tables.contains_key(&key) {
                    return already_exists(
                        if_not_exists,
                        format!("Table {}.{} already exists", key.0, key.1),
                    );
                }
                let primary_key = columns
                    .iter()
                    .position(|c| c.name == primary_key)
                    .unwrap_or_default();
                self.tables.insert(
                    key,
                    Table {
                        columns,
                        primary_key,
                        rows: BTreeMap::new(),
                    },
                );
            }
            Command::DropTable {
                keyspace,
                table,
                if_exists,
            } => {
                if self.tables.remove(&(keyspace, table.clone())).is_none() {
                    return missing(if_exists, format!("unconfigured table {table}"));
                }
            }
            Command::Insert { .. } | Command::Delete { .. } | Command::Select { .. } => {
                return Err(invalid("not a schema statement"));
            }
        }
        Ok(())
    }

    fn mutate(&mut self, command: Command, binder: &mut Binder<'_>) -> Result<(), DispatchError> {
        match command {
            Command::Insert {
                keyspace,
                table,
                columns,
                values,
            } => {
                let table = self.table_mut(&keyspace, &table)?;
                let mut row = vec![None; table.columns.len()];
                for (name, term) in columns.iter().zip(&values) {
                    let index = table.column(name)?;
                    row[index] = binder.bind(term, &table.columns[index])?;
                }
                let key = primary_key(table, row[table.primary_key].clone())?;
                table.rows.insert(key, row);
            }
            Command::Delete {
                keyspace,
                table,
                filter,
            } => {
                let table = self.table_mut(&keyspace, &table)?;
                let index = table.column(&filter.column)?;
                if index != table.primary_key {
                    return Err(invalid(format!(
                        "Cannot delete by non-primary key column {}",
                        filter.column
                    )));
                }
                let value = binder.bind(&filter.value, &table.columns[index])?;
                let key = primary_key(table, value)?;
                table.rows.remove(&key);
            }
            _ => return Err(invalid("not a mutation")),
        }
        Ok(())
    }
}

fn primary_key(table: &Table, value: Option<Bytes>) -> Result<Bytes, DispatchError> {
    value.ok_or_else(|| {
        invalid(format!(
            "Invalid null value for partition key part {}",
            table.columns[table.primary_key].name
        ))
    })
}

fn already_exists(if_not_exists: bool, message: String) -> Result<(), DispatchError> {
    if if_not_exists {
        Ok(())
    } else {
        Err(DispatchError::server(DbErrorCode::AlreadyExists, message))
    }
}

fn missing(if_exists: bool, message: String) -> Result<(), DispatchError> {
    if if_exists { Ok(()) } else { Err(invalid(message)) }
}

fn select(
    table: &Table,
    projection: &Projection,
    filter: Option<&Filter>,
    limit: Option<usize>,
    binder: &mut Binder<'_>,
) -> Result<(Vec<ColumnSpec>, Vec<RawRow>), DispatchError> {
    let indices: Vec<usize> = match projection {
        Projection::All => (0..table.columns.len()).collect(),
        Projection::Columns(names) => names
            .iter()
            .map(|name| table.column(name))
            .collect::<Result<Vec<_>, _>>()?,
    };
    let filter = filter
        .map(|filter| {
            let index = table.column(&filter.column)?;
            let value = binder.bind(&filter.value, &table.columns[index])?;
            Ok::<_, DispatchError>((index, value))
        })
        .transpose()?;

    let columns = indices.iter().map(|&i| table.columns[i].clone()).collect();
    let rows = table
        .rows
        .values()
        .filter(|row| filter.as_ref().is_none_or(|(i, v)| row[*i] == *v))
        .take(limit.unwrap_or(usize::MAX))
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Ok((columns, rows))
}

fn cursor_id(state: &PagingState) -> Option<u64> {
    state.as_bytes().try_into().ok().map(u64::from_be_bytes)
}

fn encode(
    registry: &CodecRegistry,
    ty: &ColumnType,
    value: &CqlValue,
) -> Result<Option<Bytes>, DispatchError> {
    registry
        .encode(ty, value)
        .map(|raw| raw.map(Bytes::from))
        .map_err(|e| invalid(e.to_string()))
}

/// Hands out bound values to markers in statement order and checks them against the column
/// they are bound to
#[derive(Debug)]
struct Binder<'a> {
    registry: &'a CodecRegistry,
    values: &'a [Option<Bytes>],
    next: usize,
}

impl<'a> Binder<'a> {
    fn new(registry: &'a CodecRegistry, values: &'a [Option<Bytes>]) -> Self {
        Self {
            registry,
            values,
            next: 0,
        }
    }

    fn bind(&mut self, term: &Term, column: &ColumnSpec) -> Result<Option<Bytes>, DispatchError> {
        let raw = match term {
            Term::Null => None,
            Term::Marker => {
                let value = self.values.get(self.next).cloned().ok_or_else(|| {
                    invalid(format!(
                        "Not enough bound values: marker {} has no value",
                        self.next
                    ))
                })?;
                self.next += 1;
                value
            }
            Term::Literal(literal) => {
                let value = literal_value(&column.typ, literal).ok_or_else(|| {
                    invalid(format!(
                        "Invalid literal '{literal}' for column {} of type {}",
                        column.name, column.typ
                    ))
                })?;
                encode(self.registry, &column.typ, &value)?
            }
        };
        if let Some(raw) = &raw {
            self.check(column, raw)?;
        }
        Ok(raw)
    }

    fn check(&self, column: &ColumnSpec, raw: &[u8]) -> Result<(), DispatchError> {
        self.registry.decode(&column.typ, raw).map_err(|e| {
            invalid(format!(
                "Expected a value of type {} for column {}: {e}",
                column.typ, column.name
            ))
        })?;
        if column.typ == ColumnType::Jsonb {
            serde_json::from_slice::<serde_json::Value>(raw).map_err(|e| {
                invalid(format!("Could not decode JSON for column {}: {e}", column.name))
            })?;
        }
        Ok(())
    }

    fn finish(self) -> Result<(), DispatchError> {
        if self.next < self.values.len() {
            return Err(invalid(format!(
                "There were {} markers in the query but {} bound variables",
                self.next,
                self.values.len()
            )));
        }
        Ok(())
    }
}

fn literal_value(ty: &ColumnType, literal: &str) -> Option<CqlValue> {
    let value = match ty {
        ColumnType::Boolean => CqlValue::Boolean(literal.parse().ok()?),
        ColumnType::TinyInt => CqlValue::TinyInt(literal.parse().ok()?),
        ColumnType::SmallInt => CqlValue::SmallInt(literal.parse().ok()?),
        ColumnType::Int => CqlValue::Int(literal.parse().ok()?),
        ColumnType::BigInt | ColumnType::Counter => CqlValue::BigInt(literal.parse().ok()?),
        ColumnType::Timestamp => CqlValue::Timestamp(literal.parse().ok()?),
        ColumnType::Float => CqlValue::Float(literal.parse().ok()?),
        ColumnType::Double => CqlValue::Double(literal.parse().ok()?),
        ColumnType::Text | ColumnType::Ascii | ColumnType::Jsonb => {
            CqlValue::Text(literal.to_owned())
        }
        _ => return None,
    };
    Some(value)
}

#[async_trait]
impl Dispatcher for MemoryCluster {
    async fn dispatch(&self, request: &Request) -> Result<Response, DispatchError> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        tokio::time::sleep(self.latency).await;

        let mut inner = self.inner.lock();
        if let Some(outcome) = inner.scripted.pop_front() {
            return outcome;
        }
        let result = self.execute(&mut inner, request);
        if let Err(e) = &result {
            debug!(error = %e, request = request.kind(), "memory cluster rejected request");
        }
        result
    }

    async fn close_paging(&self, state: &PagingState) -> Result<(), DispatchError> {
        if let Some(id) = cursor_id(state) {
            self.inner.lock().cursors.remove(&id);
        }
        Ok(())
    }
}
