#![allow(dead_code, unused_imports)]

pub use std::sync::Arc;

pub use termite_common::{ExecMode, TermiteConfig};
pub use termite_driver::{Connection, MemoryTransport, PacketTransport, ResourceSnapshot, CMD_SQL_EXEC};
pub use termite_term::{decode_term, read_packet, Term};

pub fn config(path: &str, mode: ExecMode) -> TermiteConfig {
    let mut config = TermiteConfig::default();
    config.database.path = path.to_string();
    config.driver.exec_mode = mode;
    config
}

pub fn setup(mode: ExecMode) -> (Connection, Arc<MemoryTransport>) {
    setup_with(&config(":memory:", mode))
}

pub fn setup_with(config: &TermiteConfig) -> (Connection, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let conn = Connection::open(config, transport.clone()).unwrap();
    (conn, transport)
}

pub fn exec_packet(sql: &str) -> Vec<u8> {
    let mut packet = vec![CMD_SQL_EXEC];
    packet.extend_from_slice(sql.as_bytes());
    packet
}

/// Run one statement in sync mode and decode its reply.
pub fn run_sql(conn: &Connection, transport: &MemoryTransport, sql: &str) -> Term {
    conn.dispatch(&exec_packet(sql)).unwrap();
    let mut terms = transport.take_terms().unwrap();
    assert_eq!(terms.len(), 1, "expected exactly one reply for {}", sql);
    terms.remove(0)
}

pub fn default_port() -> Term {
    Term::Port {
        node: "nonode@nohost".into(),
        id: 0,
        creation: 0,
    }
}

/// Body of a `{Dest, Body}` reply.
pub fn ok_body(reply: &Term) -> &[Term] {
    let outer = reply.as_tuple().expect("reply is a tuple");
    assert_eq!(outer.len(), 2);
    let body = outer[1].as_tuple().expect("body is a tuple");
    assert_eq!(body[0], Term::atom("ok"), "not an ok reply: {:?}", reply);
    body
}

pub fn columns(reply: &Term) -> Vec<String> {
    let body = ok_body(reply);
    let cols = body[1].as_tuple().unwrap();
    assert_eq!(cols[0], Term::atom("columns"));
    cols[1]
        .as_list()
        .unwrap()
        .iter()
        .map(|c| c.as_atom().unwrap().to_string())
        .collect()
}

pub fn rows(reply: &Term) -> Vec<Vec<Term>> {
    let body = ok_body(reply);
    let rows = body[2].as_tuple().unwrap();
    assert_eq!(rows[0], Term::atom("rows"));
    rows[1]
        .as_list()
        .unwrap()
        .iter()
        .map(|r| r.as_tuple().unwrap().to_vec())
        .collect()
}

/// Message text of an `{error, "..."}` reply.
pub fn error_message(reply: &Term) -> String {
    let items = reply.as_tuple().expect("reply is a tuple");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Term::atom("error"), "not an error reply: {:?}", reply);
    items[1].as_text().expect("error message is a string")
}

pub fn assert_balanced(snap: &ResourceSnapshot) {
    assert!(snap.is_balanced(), "unbalanced resources: {:?}", snap);
}
