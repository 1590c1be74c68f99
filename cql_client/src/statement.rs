//! Statements and batches as built by callers.

use std::{num::NonZeroUsize, time::Duration};

use cql_types::{BindValues, Consistency, CqlValue};

use crate::session::ExecutionInfo;

/// The most statements a single batch request can carry
pub const MAX_BATCH_STATEMENTS: usize = u16::MAX as usize;

/// A query with positional `?` placeholders and the values bound to them
///
/// A statement is never modified by execution and can be executed any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    text: String,
    values: Vec<CqlValue>,
    consistency: Option<Consistency>,
    page_size: Option<NonZeroUsize>,
    idempotent: bool,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            values: Vec::new(),
            consistency: None,
            page_size: None,
            idempotent: true,
        }
    }

    /// Bind values to the statement's placeholders, replacing any bound before
    pub fn with_values(mut self, values: impl BindValues) -> Self {
        self.values = values.into_values();
        self
    }

    /// Override the session's default consistency for this statement
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    /// Override the session's default page size for this statement
    pub fn with_page_size(mut self, page_size: NonZeroUsize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Mark whether executing the statement more than once has the same effect as once
    ///
    /// Statements are assumed idempotent. Non-idempotent statements are only retried when
    /// the server certainly did not apply them.
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }

    pub fn consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    pub fn page_size(&self) -> Option<NonZeroUsize> {
        self.page_size
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }
}

impl From<&str> for Statement {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Statement {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// How the server should apply the statements of a [`Batch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BatchKind {
    /// Written to the batch log first, so either all statements eventually apply or none do
    #[default]
    Logged,
    Unlogged,
    /// Only counter updates, which are never idempotent
    Counter,
}

impl BatchKind {
    /// The native protocol batch type byte
    pub fn code(&self) -> u8 {
        match self {
            Self::Logged => 0,
            Self::Unlogged => 1,
            Self::Counter => 2,
        }
    }
}

/// An ordered group of statements sent as one request
///
/// Besides the statements, a batch records the accounting of its most recent execution:
/// how many times it was dispatched and how long the last dispatch took.
#[derive(Debug, Clone)]
pub struct Batch {
    kind: BatchKind,
    statements: Vec<Statement>,
    consistency: Option<Consistency>,
    serial_consistency: Option<Consistency>,
    attempts: u32,
    latency: Duration,
}

impl Batch {
    pub fn new(kind: BatchKind) -> Self {
        Self {
            kind,
            statements: Vec::new(),
            consistency: None,
            serial_consistency: None,
            attempts: 0,
            latency: Duration::ZERO,
        }
    }

    pub fn logged() -> Self {
        Self::new(BatchKind::Logged)
    }

    pub fn unlogged() -> Self {
        Self::new(BatchKind::Unlogged)
    }

    pub fn counter() -> Self {
        Self::new(BatchKind::Counter)
    }

    /// Append a query and its bound values
    pub fn query(&mut self, text: impl Into<String>, values: impl BindValues) -> &mut Self {
        self.append(Statement::new(text).with_values(values))
    }

    /// Append a statement. Only the statement's text, values and idempotence are used.
    pub fn append(&mut self, statement: Statement) -> &mut Self {
        self.statements.push(statement);
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    /// Set the consistency for the paxos phase of conditional statements in the batch
    pub fn with_serial_consistency(mut self, consistency: Consistency) -> Self {
        self.serial_consistency = Some(consistency);
        self
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    pub fn serial_consistency(&self) -> Option<Consistency> {
        self.serial_consistency
    }

    /// Counter batches never are; other batches are when all their statements are
    pub fn is_idempotent(&self) -> bool {
        self.kind != BatchKind::Counter && self.statements.iter().all(Statement::is_idempotent)
    }

    /// Number of dispatches made by the most recent execution, zero before any
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Duration of the final dispatch of the most recent execution, zero before any
    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub(crate) fn reset_accounting(&mut self) {
        self.attempts = 0;
        self.latency = Duration::ZERO;
    }

    pub(crate) fn record(&mut self, info: ExecutionInfo) {
        self.attempts = info.attempts;
        self.latency = info.latency;
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::logged()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn batch_preserves_statement_order() {
        let mut batch = Batch::logged();
        batch
            .query("INSERT INTO ks.t (id, doc) VALUES (?, ?)", (1, "true"))
            .query("INSERT INTO ks.t (id, doc) VALUES (?, ?)", (2, r#"{"foo":"bar"}"#))
            .append(Statement::new("DELETE FROM ks.t WHERE id = ?").with_values((3,)));

        let ids = batch
            .statements()
            .iter()
            .map(|s| s.values()[0].clone())
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![CqlValue::Int(1), CqlValue::Int(2), CqlValue::Int(3)]
        );
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn accounting_reads_zero_before_execution() {
        let batch = Batch::unlogged();
        assert_eq!(batch.attempts(), 0);
        assert_eq!(batch.latency(), Duration::ZERO);
    }

    #[test]
    fn idempotence_of_batches() {
        let mut batch = Batch::logged();
        batch.query("INSERT INTO ks.t (id) VALUES (?)", (1,));
        assert!(batch.is_idempotent());

        batch.append(Statement::new("UPDATE ks.t SET n = n + 1").with_idempotent(false));
        assert!(!batch.is_idempotent());

        let mut counters = Batch::counter();
        counters.query("UPDATE ks.c SET n = n + 1 WHERE id = ?", (1,));
        assert!(!counters.is_idempotent());
    }

    #[test]
    fn statement_builder() {
        let statement = Statement::from("SELECT * FROM ks.t")
            .with_consistency(Consistency::One)
            .with_page_size(NonZeroUsize::new(10).unwrap());
        assert_eq!(statement.consistency(), Some(Consistency::One));
        assert_eq!(statement.page_size().map(NonZeroUsize::get), Some(10));
        assert!(statement.values().is_empty());
        assert!(statement.is_idempotent());
    }
}
