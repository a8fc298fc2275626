//! Host channel abstraction: hands one finished reply to the host.

use std::io::Write;

use bytes::BytesMut;
use parking_lot::Mutex;
use termite_term::codec::write_packet_with_limit;
use termite_term::{decode_term, Term, TermError, MAX_PACKET_SIZE};
use tracing::warn;

use crate::envelope::Reply;
use crate::error::DriverError;

/// Delivers finished replies. Implementations serialize and send; the caller
/// releases the reply afterwards whether or not delivery succeeded.
pub trait Transport: Send + Sync {
    fn output_term(&self, reply: &Reply) -> Result<(), DriverError>;
}

/// `{packet, 4}` framed ETF over any writer (stdout for the port program).
pub struct PacketTransport<W: Write + Send> {
    writer: Mutex<W>,
    max_packet: usize,
}

impl<W: Write + Send> PacketTransport<W> {
    pub fn new(writer: W) -> Self {
        Self::with_max_packet(writer, MAX_PACKET_SIZE)
    }

    /// Refuse payloads above `max_packet` bytes (capped at what the
    /// 4-byte header can carry).
    pub fn with_max_packet(writer: W, max_packet: usize) -> Self {
        Self {
            writer: Mutex::new(writer),
            max_packet: max_packet.min(MAX_PACKET_SIZE),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> Transport for PacketTransport<W> {
    fn output_term(&self, reply: &Reply) -> Result<(), DriverError> {
        let payload = reply.encode()?;
        let mut writer = self.writer.lock();
        write_packet_with_limit(&mut *writer, &payload, self.max_packet)?;
        Ok(())
    }
}

/// Deliver `reply`; if it cannot be serialized or framed, deliver an error
/// reply naming the reason instead, so the host still gets one answer.
/// I/O failures are returned as is.
pub fn deliver_reply(transport: &dyn Transport, reply: &Reply) -> Result<(), DriverError> {
    match transport.output_term(reply) {
        Err(DriverError::Term(e)) => {
            warn!(error = %e, "reply not deliverable, sending error instead");
            transport.output_term(&Reply::error(&format!("reply not deliverable: {}", e)))
        }
        result => result,
    }
}

/// Keeps serialized replies in memory, in delivery order.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<BytesMut>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    /// Remove and decode everything delivered so far.
    pub fn take_terms(&self) -> Result<Vec<Term>, TermError> {
        let sent = std::mem::take(&mut *self.sent.lock());
        sent.iter().map(|bytes| decode_term(bytes)).collect()
    }
}

impl Transport for MemoryTransport {
    fn output_term(&self, reply: &Reply) -> Result<(), DriverError> {
        let payload = reply.encode()?;
        self.sent.lock().push(payload);
        Ok(())
    }
}
