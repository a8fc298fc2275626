//! Reply construction: the envelope around a result set, the id/status
//! bodies and the error replies.
//!
//! Slot order is postfix, so a successful reply starts with the
//! destination (and, for result sets, the `ok` atom and the column header)
//! before any row is stepped; the closing slots are appended once stepping
//! has terminated.

use std::sync::Arc;

use bytes::BytesMut;
use termite_term::{
    encode_term, Atom, Destination, Pools, TermBuffer, TermError, TermSlot, TermView,
};

use crate::stats::{ReleaseToken, Resource, ResourceStats};

pub const BUSY_MESSAGE: &str = "SQLite3 database is busy";

/// Final step code reported for statements without columns (SQLITE_DONE).
pub const STATUS_DONE: i64 = rusqlite::ffi::SQLITE_DONE as i64;

const OK: Atom = Atom::from_static("ok");
const ERROR: Atom = Atom::from_static("error");
const COLUMNS: Atom = Atom::from_static("columns");
const ROWS: Atom = Atom::from_static("rows");
const ID: Atom = Atom::from_static("id");
const STATUS: Atom = Atom::from_static("status");
const UNKNOWN_COMMAND: Atom = Atom::from_static("uknown_command");

/// How stepping ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEnd {
    Done,
    Busy,
    Failed(String),
}

impl StepEnd {
    pub fn from_error(err: &rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                StepEnd::Busy
            }
            other => StepEnd::Failed(other.to_string()),
        }
    }
}

/// Which reply a finished task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Pending,
    RowResult,
    InsertResult,
    PlainStatus,
    Error,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Pending => "pending",
            TaskOutcome::RowResult => "rows",
            TaskOutcome::InsertResult => "insert",
            TaskOutcome::PlainStatus => "status",
            TaskOutcome::Error => "error",
        }
    }
}

/// Pick the reply shape once stepping has terminated.
pub fn choose_outcome(column_count: usize, end: &StepEnd, sql: &str) -> TaskOutcome {
    match end {
        StepEnd::Busy | StepEnd::Failed(_) => TaskOutcome::Error,
        StepEnd::Done if column_count > 0 => TaskOutcome::RowResult,
        StepEnd::Done if is_insert_statement(sql) => TaskOutcome::InsertResult,
        StepEnd::Done => TaskOutcome::PlainStatus,
    }
}

/// Heuristic INSERT detection: `INSERT` anywhere in the text, ASCII
/// case-insensitive. Matches inside string literals and identifiers too,
/// e.g. `UPDATE t SET note = 'insert'` reports an id.
pub fn is_insert_statement(sql: &str) -> bool {
    sql.as_bytes()
        .windows(6)
        .any(|w| w.eq_ignore_ascii_case(b"INSERT"))
}

/// True when `sql` holds no statement: only whitespace, `;` separators,
/// `--` line comments and `/* */` block comments. An unterminated block
/// comment runs to the end of the text, as SQLite reads it.
pub fn is_blank_statement(sql: &str) -> bool {
    let mut rest = sql.as_bytes();
    loop {
        match rest {
            [] => return true,
            [b';', tail @ ..] => rest = tail,
            [c, tail @ ..] if c.is_ascii_whitespace() => rest = tail,
            [b'-', b'-', tail @ ..] => match tail.iter().position(|&c| c == b'\n') {
                Some(end) => rest = &tail[end + 1..],
                None => return true,
            },
            [b'/', b'*', tail @ ..] => match tail.windows(2).position(|w| w == b"*/") {
                Some(end) => rest = &tail[end + 2..],
                None => return true,
            },
            _ => return false,
        }
    }
}

/// A term buffer with its payload pools, ready for the transport.
#[derive(Debug, Default)]
pub struct Reply {
    buffer: TermBuffer,
    pools: Pools,
    _release: Option<ReleaseToken>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count this reply in `stats` until it is dropped.
    pub fn tracked(mut self, stats: &Arc<ResourceStats>) -> Self {
        self._release = Some(stats.acquire(Resource::Reply));
        self
    }

    /// `{error, Message}`
    pub fn error(message: &str) -> Self {
        let mut reply = Self::new();
        reply.set_error(message);
        reply
    }

    /// `{error, uknown_command}`
    pub fn unknown_command() -> Self {
        let mut reply = Self::new();
        reply.buffer.extend([
            TermSlot::Atom(ERROR),
            TermSlot::Atom(UNKNOWN_COMMAND),
            TermSlot::Tuple(2),
        ]);
        reply
    }

    /// Start `{Dest, {ok, {columns, [..]}, {rows, ` ahead of the first row.
    pub fn open_row_result(&mut self, dest: &Destination, columns: &[String]) {
        self.buffer.push(TermSlot::Port(dest.clone()));
        self.buffer.push(TermSlot::Atom(OK));
        self.buffer.push(TermSlot::Atom(COLUMNS));
        self.buffer
            .extend(columns.iter().map(|c| TermSlot::Atom(Atom::truncated(c))));
        self.buffer.extend([
            TermSlot::Nil,
            TermSlot::List(columns.len() as u32),
            TermSlot::Tuple(2),
            TermSlot::Atom(ROWS),
        ]);
    }

    /// Close the rows list, the `ok` body and the destination wrapper.
    pub fn close_row_result(&mut self, rows: u64) {
        let rows = u32::try_from(rows).unwrap_or(u32::MAX);
        self.buffer.extend([
            TermSlot::Nil,
            TermSlot::List(rows),
            TermSlot::Tuple(2),
            TermSlot::Tuple(3),
            TermSlot::Tuple(2),
        ]);
    }

    /// Start a reply for a statement without columns.
    pub fn open_reply(&mut self, dest: &Destination) {
        self.buffer.push(TermSlot::Port(dest.clone()));
    }

    /// `{ok, {id, RowId}}` inside the destination wrapper.
    pub fn close_insert(&mut self, rowid: i64) {
        self.close_ok_pair(ID, rowid);
    }

    /// `{ok, {status, Code}}` inside the destination wrapper.
    pub fn close_status(&mut self, code: i64) {
        self.close_ok_pair(STATUS, code);
    }

    fn close_ok_pair(&mut self, key: Atom, value: i64) {
        self.buffer.extend([
            TermSlot::Atom(OK),
            TermSlot::Atom(key),
            TermSlot::Int(value),
            TermSlot::Tuple(2),
            TermSlot::Tuple(2),
            TermSlot::Tuple(2),
        ]);
    }

    /// Discard anything written so far and hold `{error, Message}` instead.
    pub fn set_error(&mut self, message: &str) {
        self.reset();
        let msg = self.pools.blobs.push(message.as_bytes());
        self.buffer.extend([
            TermSlot::Atom(ERROR),
            TermSlot::String(msg),
            TermSlot::Tuple(2),
        ]);
    }

    /// Drop all slots and payloads.
    pub fn reset(&mut self) {
        self.buffer = TermBuffer::new();
        self.pools = Pools::new();
    }

    pub fn parts_mut(&mut self) -> (&mut TermBuffer, &mut Pools) {
        (&mut self.buffer, &mut self.pools)
    }

    pub fn slot_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn view(&self) -> TermView<'_> {
        self.buffer.view(&self.pools)
    }

    /// Serialize to ETF bytes (version byte included).
    pub fn encode(&self) -> Result<BytesMut, TermError> {
        encode_term(self.view())
    }
}
