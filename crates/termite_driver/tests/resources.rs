mod common;
use common::*;

const MIXED_WORKLOAD: &[&str] = &[
    "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT UNIQUE)",
    "INSERT INTO t (v) VALUES ('a')",
    "INSERT INTO t (v) VALUES ('a')",
    "SELECT * FROM t",
    "SELEC nonsense",
    "SELECT * FROM missing",
    "SELECT ?",
    "UPDATE t SET v = 'b'",
    "SELECT id, NULL FROM t",
];

fn run_workload(conn: &Connection) {
    for sql in MIXED_WORKLOAD {
        conn.dispatch(&exec_packet(sql)).unwrap();
    }
    conn.dispatch(&[0xFF]).unwrap();
}

#[test]
fn test_resources_balance_sync() {
    let (conn, transport) = setup(ExecMode::Sync);
    run_workload(&conn);
    assert_eq!(transport.len(), MIXED_WORKLOAD.len() + 1);

    let snap = conn.stats();
    assert_balanced(&snap);
    assert_eq!(snap.prepare_failures, 2);
    assert_eq!(snap.tasks_started, MIXED_WORKLOAD.len() as u64 - 2);
    assert_eq!(snap.replies_built, MIXED_WORKLOAD.len() as u64 + 1);
    assert_eq!(conn.in_flight(), 0);
}

#[test]
fn test_resources_balance_deferred() {
    let (conn, transport) = setup(ExecMode::Deferred);
    let stats = conn.resource_stats();
    run_workload(&conn);
    conn.shutdown().unwrap();

    assert_eq!(transport.len(), MIXED_WORKLOAD.len() + 1);
    let snap = stats.snapshot();
    assert_balanced(&snap);
    assert_eq!(snap.prepare_failures, 2);
    assert_eq!(snap.unknown_commands, 1);
    assert_eq!(snap.tasks_started, MIXED_WORKLOAD.len() as u64 - 2);
}

#[test]
fn test_busy_database_reports_busy_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.db");
    let path_str = path.to_str().unwrap();

    let (conn, transport) = setup_with(&config(path_str, ExecMode::Sync));
    run_sql(&conn, &transport, "CREATE TABLE t (a)");
    run_sql(&conn, &transport, "INSERT INTO t VALUES (1)");
    // Load the schema so the next statement compiles without touching the file.
    run_sql(&conn, &transport, "SELECT a FROM t");

    let locker = rusqlite::Connection::open(&path).unwrap();
    locker.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let reply = run_sql(&conn, &transport, "SELECT a FROM t");
    assert_eq!(error_message(&reply), termite_driver::BUSY_MESSAGE);
    assert_eq!(error_message(&reply), "SQLite3 database is busy");

    locker.execute_batch("ROLLBACK").unwrap();
    let reply = run_sql(&conn, &transport, "SELECT a FROM t");
    assert_eq!(rows(&reply), vec![vec![Term::Int(1)]]);

    assert_balanced(&conn.stats());
    conn.shutdown().unwrap();
}

#[test]
fn test_on_disk_database_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.db");
    let cfg = config(path.to_str().unwrap(), ExecMode::Sync);

    let (conn, transport) = setup_with(&cfg);
    run_sql(&conn, &transport, "CREATE TABLE kv (k TEXT, v BLOB)");
    run_sql(&conn, &transport, "INSERT INTO kv VALUES ('key', x'DEADBEEF')");
    conn.shutdown().unwrap();

    let (conn, transport) = setup_with(&cfg);
    let reply = run_sql(&conn, &transport, "SELECT v FROM kv WHERE k = 'key'");
    assert_eq!(rows(&reply), vec![vec![Term::binary(&[0xDE, 0xAD, 0xBE, 0xEF])]]);
    conn.shutdown().unwrap();
}
