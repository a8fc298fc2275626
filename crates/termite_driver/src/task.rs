//! Execution task: one SQL command from compilation to release.

use std::sync::Arc;
use std::time::Instant;

use termite_term::Destination;
use tracing::{debug, warn};

use crate::encoder::ResultEncoder;
use crate::envelope::{
    choose_outcome, is_blank_statement, Reply, StepEnd, TaskOutcome, BUSY_MESSAGE, STATUS_DONE,
};
use crate::error::DriverError;
use crate::registry::TaskRegistry;
use crate::stats::{ReleaseToken, Resource, ResourceStats};
use crate::transport::{deliver_reply, Transport};

pub type TaskId = u64;

/// Lifecycle of a task. `Encoding` alternates with `Stepping` once per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Preparing,
    Stepping,
    Encoding,
    Finalizing,
    Delivered,
    Freed,
}

/// What a task borrows from its connection.
#[derive(Clone, Copy)]
pub struct TaskContext<'a> {
    pub id: TaskId,
    pub destination: &'a Destination,
    pub registry: &'a TaskRegistry,
    pub stats: &'a Arc<ResourceStats>,
}

/// Result of compiling a command.
pub enum Prepared<'a> {
    Task(ExecutionTask<'a>),
    /// Compilation failed; no task exists and this error reply goes out as is.
    Rejected(Reply),
    /// Nothing but whitespace and comments; answered as a finished
    /// statement without compiling anything.
    Blank(Reply),
}

/// A compiled statement, counted until finalized.
struct TrackedStatement<'a> {
    stmt: rusqlite::Statement<'a>,
    _release: ReleaseToken,
}

pub struct ExecutionTask<'a> {
    id: TaskId,
    db: &'a rusqlite::Connection,
    // Field order matters: the statement is finalized before the task
    // token records the task as freed.
    statement: TrackedStatement<'a>,
    sql: &'a str,
    destination: &'a Destination,
    registry: &'a TaskRegistry,
    encoder: ResultEncoder,
    reply: Reply,
    state: TaskState,
    outcome: TaskOutcome,
    started_at: Instant,
    _release: ReleaseToken,
}

impl<'a> ExecutionTask<'a> {
    /// Compile `sql`. A compile failure yields the error reply directly.
    pub fn prepare(db: &'a rusqlite::Connection, sql: &'a str, ctx: TaskContext<'a>) -> Prepared<'a> {
        ctx.registry.set_state(ctx.id, TaskState::Preparing);
        if is_blank_statement(sql) {
            debug!(task = ctx.id, "blank statement");
            let mut reply = Reply::new().tracked(ctx.stats);
            reply.open_reply(ctx.destination);
            reply.close_status(STATUS_DONE);
            return Prepared::Blank(reply);
        }
        let stmt = match db.prepare(sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                debug!(task = ctx.id, error = %e, "prepare failed");
                ctx.stats.record_prepare_failure();
                termite_observability::record_prepare_failure();
                return Prepared::Rejected(Reply::error(&e.to_string()).tracked(ctx.stats));
            }
        };
        let statement = TrackedStatement {
            stmt,
            _release: ctx.stats.acquire(Resource::Statement),
        };
        let column_count = statement.stmt.column_count();

        Prepared::Task(ExecutionTask {
            id: ctx.id,
            db,
            statement,
            sql,
            destination: ctx.destination,
            registry: ctx.registry,
            encoder: ResultEncoder::new(column_count),
            reply: Reply::new().tracked(ctx.stats),
            state: TaskState::Preparing,
            outcome: TaskOutcome::Pending,
            started_at: Instant::now(),
            _release: ctx.stats.acquire(Resource::Task),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn outcome(&self) -> TaskOutcome {
        self.outcome
    }

    pub fn row_count(&self) -> u64 {
        self.encoder.rows()
    }

    pub fn column_count(&self) -> usize {
        self.encoder.column_count()
    }

    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    /// Step the statement to completion and build the reply.
    pub fn run(&mut self) {
        self.transition(TaskState::Stepping);

        let columns: Vec<String> = self
            .statement
            .stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        if columns.is_empty() {
            self.reply.open_reply(self.destination);
        } else {
            self.reply.open_row_result(self.destination, &columns);
        }

        let end = self.step_all();

        self.transition(TaskState::Finalizing);
        self.outcome = choose_outcome(columns.len(), &end, self.sql);
        match end {
            StepEnd::Busy => self.reply.set_error(BUSY_MESSAGE),
            StepEnd::Failed(msg) => self.reply.set_error(&msg),
            StepEnd::Done => match self.outcome {
                TaskOutcome::RowResult => self.reply.close_row_result(self.encoder.rows()),
                TaskOutcome::InsertResult => self.reply.close_insert(self.db.last_insert_rowid()),
                _ => self.reply.close_status(STATUS_DONE),
            },
        }
        debug!(
            task = self.id,
            outcome = self.outcome.as_str(),
            columns = columns.len(),
            rows = self.encoder.rows(),
            slots = self.reply.slot_count(),
            "task finalized"
        );
    }

    fn step_all(&mut self) -> StepEnd {
        let mut rows = match self.statement.stmt.query([]) {
            Ok(rows) => rows,
            Err(e) => return StepEnd::from_error(&e),
        };
        loop {
            match rows.next() {
                Ok(Some(row)) => {
                    self.state = TaskState::Encoding;
                    let (buf, pools) = self.reply.parts_mut();
                    if let Err(e) = self.encoder.encode_row(row, buf, pools) {
                        return StepEnd::from_error(&e);
                    }
                    self.state = TaskState::Stepping;
                }
                Ok(None) => return StepEnd::Done,
                Err(e) => return StepEnd::from_error(&e),
            }
        }
    }

    /// Hand the reply to the transport, or an error reply if it cannot be
    /// serialized. The task is released afterwards whatever the transport
    /// reports.
    pub fn deliver(mut self, transport: &dyn Transport) -> Result<(), DriverError> {
        let result = deliver_reply(transport, &self.reply);
        if let Err(e) = &result {
            warn!(task = self.id, error = %e, "reply delivery failed");
        }
        self.transition(TaskState::Delivered);
        result
    }

    fn transition(&mut self, state: TaskState) {
        self.state = state;
        self.registry.set_state(self.id, state);
    }
}

impl Drop for ExecutionTask<'_> {
    fn drop(&mut self) {
        self.state = TaskState::Freed;
        self.registry.remove(self.id);
        termite_observability::record_task_metrics(
            self.outcome.as_str(),
            self.started_at.elapsed().as_micros() as u64,
            self.encoder.rows(),
        );
        debug!(task = self.id, "task freed");
    }
}
