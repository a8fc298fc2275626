//! Driver connection: one SQLite handle, its task registry and, in deferred
//! mode, the worker thread that runs tasks in arrival order.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use termite_common::{ExecMode, TermiteConfig};
use termite_term::{Atom, Destination};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::envelope::Reply;
use crate::error::DriverError;
use crate::registry::TaskRegistry;
use crate::stats::{ResourceSnapshot, ResourceStats};
use crate::task::{ExecutionTask, Prepared, TaskContext, TaskId};
use crate::transport::{deliver_reply, Transport};

enum Job {
    Exec { id: TaskId, sql: String },
    Unknown(Option<u8>),
}

struct Worker {
    tx: mpsc::SyncSender<Job>,
    handle: JoinHandle<()>,
}

struct ConnectionInner {
    db: Mutex<rusqlite::Connection>,
    destination: Destination,
    registry: TaskRegistry,
    stats: Arc<ResourceStats>,
    transport: Arc<dyn Transport>,
}

pub struct Connection {
    inner: Arc<ConnectionInner>,
    mode: ExecMode,
    worker: Option<Worker>,
}

impl Connection {
    /// Open the configured database and, in deferred mode, start the worker.
    pub fn open(config: &TermiteConfig, transport: Arc<dyn Transport>) -> Result<Self, DriverError> {
        config.validate()?;
        let db = rusqlite::Connection::open(&config.database.path)?;
        // rusqlite installs its own default busy timeout on open; replace it.
        db.busy_timeout(Duration::from_millis(config.database.busy_timeout_ms))?;

        let dest = &config.driver.destination;
        let inner = Arc::new(ConnectionInner {
            db: Mutex::new(db),
            destination: Destination {
                node: Atom::truncated(&dest.node),
                id: dest.id,
                creation: dest.creation,
            },
            registry: TaskRegistry::new(),
            stats: ResourceStats::new(),
            transport,
        });

        let mode = config.driver.exec_mode;
        let worker = match mode {
            ExecMode::Sync => None,
            ExecMode::Deferred => Some(spawn_worker(&inner, config.driver.queue_depth)?),
        };

        info!(
            path = %config.database.path,
            mode = ?mode,
            busy_timeout_ms = config.database.busy_timeout_ms,
            "connection opened"
        );
        Ok(Self {
            inner,
            mode,
            worker,
        })
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn destination(&self) -> &Destination {
        &self.inner.destination
    }

    /// Route one inbound packet. In sync mode the reply has been delivered
    /// when this returns; in deferred mode the command has been queued.
    pub fn dispatch(&self, packet: &[u8]) -> Result<(), DriverError> {
        match Command::parse(packet) {
            Command::ExecSql(sql) => self.execute(sql),
            Command::Unknown(tag) => {
                debug!(tag = ?tag, "unknown command");
                self.submit(Job::Unknown(tag))
            }
        }
    }

    /// Execute one SQL command.
    pub fn execute(&self, sql: impl Into<String>) -> Result<(), DriverError> {
        let sql = sql.into();
        debug!(sql = %sql, "exec");
        let id = self.inner.registry.register(&sql);
        termite_observability::record_in_flight(self.inner.registry.count());
        self.submit(Job::Exec { id, sql })
    }

    fn submit(&self, job: Job) -> Result<(), DriverError> {
        match &self.worker {
            None => self.inner.run_job(job),
            Some(worker) => worker.tx.send(job).map_err(|mpsc::SendError(job)| {
                if let Job::Exec { id, .. } = job {
                    self.inner.registry.remove(id);
                }
                DriverError::WorkerGone
            }),
        }
    }

    pub fn stats(&self) -> ResourceSnapshot {
        self.inner.stats.snapshot()
    }

    /// Shared counters; stays readable after the connection is shut down.
    pub fn resource_stats(&self) -> Arc<ResourceStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Tasks dispatched but not yet freed.
    pub fn in_flight(&self) -> usize {
        self.inner.registry.count()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    /// Drain queued commands, stop the worker and close the database.
    pub fn shutdown(mut self) -> Result<(), DriverError> {
        self.stop_worker()?;
        let inner = Arc::clone(&self.inner);
        drop(self);
        match Arc::try_unwrap(inner) {
            Ok(inner) => {
                let snapshot = inner.stats.snapshot();
                inner
                    .db
                    .into_inner()
                    .close()
                    .map_err(|(_, e)| DriverError::Sqlite(e))?;
                info!(
                    tasks = snapshot.tasks_freed,
                    prepare_failures = snapshot.prepare_failures,
                    unknown_commands = snapshot.unknown_commands,
                    delivery_failures = snapshot.delivery_failures,
                    "connection closed"
                );
            }
            Err(_) => warn!("connection still referenced at shutdown; database closes on last drop"),
        }
        Ok(())
    }

    fn stop_worker(&mut self) -> Result<(), DriverError> {
        if let Some(Worker { tx, handle }) = self.worker.take() {
            drop(tx);
            handle.join().map_err(|_| DriverError::WorkerPanicked)?;
            debug!("worker stopped");
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.stop_worker() {
            warn!(error = %e, "worker shutdown failed");
        }
    }
}

fn spawn_worker(inner: &Arc<ConnectionInner>, queue_depth: usize) -> Result<Worker, DriverError> {
    let (tx, rx) = mpsc::sync_channel::<Job>(queue_depth);
    let inner = Arc::clone(inner);
    let handle = std::thread::Builder::new()
        .name("termite-worker".into())
        .spawn(move || {
            for job in rx {
                // Failures are logged and counted by run_job.
                let _ = inner.run_job(job);
            }
        })?;
    Ok(Worker { tx, handle })
}

impl ConnectionInner {
    fn run_job(&self, job: Job) -> Result<(), DriverError> {
        let result = match job {
            Job::Exec { id, sql } => self.run_exec(id, &sql),
            Job::Unknown(tag) => {
                self.stats.record_unknown_command();
                termite_observability::record_unknown_command(tag);
                let reply = Reply::unknown_command().tracked(&self.stats);
                self.deliver(&reply)
            }
        };
        if result.is_err() {
            self.stats.record_delivery_failure();
            termite_observability::record_delivery_failure();
        }
        termite_observability::record_in_flight(self.registry.count());
        result
    }

    fn run_exec(&self, id: TaskId, sql: &str) -> Result<(), DriverError> {
        let db = self.db.lock();
        let ctx = TaskContext {
            id,
            destination: &self.destination,
            registry: &self.registry,
            stats: &self.stats,
        };
        let prepared = ExecutionTask::prepare(&db, sql, ctx);
        match prepared {
            Prepared::Task(mut task) => {
                task.run();
                task.deliver(self.transport.as_ref())
            }
            Prepared::Rejected(reply) | Prepared::Blank(reply) => {
                self.registry.remove(id);
                self.deliver(&reply)
            }
        }
    }

    fn deliver(&self, reply: &Reply) -> Result<(), DriverError> {
        deliver_reply(self.transport.as_ref(), reply).map_err(|e| {
            warn!(error = %e, "reply delivery failed");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use termite_term::Term;

    fn memory_config(mode: ExecMode) -> TermiteConfig {
        let mut config = TermiteConfig::default();
        config.database.path = ":memory:".into();
        config.driver.exec_mode = mode;
        config
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn output_term(&self, _reply: &Reply) -> Result<(), DriverError> {
            Err(DriverError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "host went away",
            )))
        }
    }

    #[test]
    fn test_sync_dispatch_delivers_before_return() {
        let transport = Arc::new(MemoryTransport::new());
        let conn = Connection::open(&memory_config(ExecMode::Sync), transport.clone()).unwrap();
        conn.execute("SELECT 1").unwrap();
        assert_eq!(transport.len(), 1);
        assert_eq!(conn.in_flight(), 0);
        conn.shutdown().unwrap();
    }

    #[test]
    fn test_unknown_command_allocates_no_task() {
        let transport = Arc::new(MemoryTransport::new());
        let conn = Connection::open(&memory_config(ExecMode::Sync), transport.clone()).unwrap();
        conn.dispatch(&[9, b'x']).unwrap();
        let snap = conn.stats();
        assert_eq!(snap.tasks_started, 0);
        assert_eq!(snap.unknown_commands, 1);
        assert!(snap.is_balanced());
        assert_eq!(
            transport.take_terms().unwrap(),
            vec![Term::tuple([Term::atom("error"), Term::atom("uknown_command")])]
        );
    }

    #[test]
    fn test_delivery_failure_still_releases() {
        let conn = Connection::open(&memory_config(ExecMode::Sync), Arc::new(FailingTransport)).unwrap();
        assert!(conn.execute("SELECT 1").is_err());
        assert!(conn.dispatch(&[]).is_err());
        let snap = conn.stats();
        assert_eq!(snap.delivery_failures, 2);
        assert!(snap.is_balanced());
        assert_eq!(conn.in_flight(), 0);
    }

    #[test]
    fn test_deferred_shutdown_drains_queue() {
        let transport = Arc::new(MemoryTransport::new());
        let conn = Connection::open(&memory_config(ExecMode::Deferred), transport.clone()).unwrap();
        for i in 0..10 {
            conn.execute(format!("SELECT {}", i)).unwrap();
        }
        conn.shutdown().unwrap();
        assert_eq!(transport.len(), 10);
    }

    #[test]
    fn test_custom_destination_is_stamped() {
        let mut config = memory_config(ExecMode::Sync);
        config.driver.destination.node = "app@host".into();
        config.driver.destination.id = 7;
        let transport = Arc::new(MemoryTransport::new());
        let conn = Connection::open(&config, transport.clone()).unwrap();
        assert_eq!(conn.destination().id, 7);
        conn.execute("CREATE TABLE t(a)").unwrap();
        let terms = transport.take_terms().unwrap();
        assert_eq!(
            terms[0].as_tuple().unwrap()[0],
            Term::Port {
                node: "app@host".into(),
                id: 7,
                creation: 0,
            }
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = memory_config(ExecMode::Sync);
        config.driver.queue_depth = 0;
        let result = Connection::open(&config, Arc::new(MemoryTransport::new()));
        assert!(matches!(result, Err(DriverError::Config(_))));
    }
}
