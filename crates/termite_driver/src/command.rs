//! Inbound command framing: one tag byte followed by the payload.

/// Tag of the only supported command: execute the UTF-8 SQL that follows.
pub const CMD_SQL_EXEC: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ExecSql(String),
    /// Any other tag, or an empty packet (`None`).
    Unknown(Option<u8>),
}

impl Command {
    pub fn parse(packet: &[u8]) -> Self {
        match packet.split_first() {
            Some((&CMD_SQL_EXEC, sql)) => {
                Command::ExecSql(String::from_utf8_lossy(sql).into_owned())
            }
            Some((&tag, _)) => Command::Unknown(Some(tag)),
            None => Command::Unknown(None),
        }
    }
}
