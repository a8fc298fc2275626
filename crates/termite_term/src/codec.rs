//! External Term Format serialization of term buffers, decoding, and
//! `{packet, 4}` framing.
//!
//! Multi-byte integers on the wire are big-endian. A serialized reply is
//! `[131][term]`; a packet is `[length: u32 BE][payload]`.

use std::io::{ErrorKind, Read, Write};
use std::ops::Range;

use bytes::{BufMut, BytesMut};

use crate::buffer::TermView;
use crate::error::TermError;
use crate::types::*;

type Result<T> = std::result::Result<T, TermError>;

const NULL_ATOM: &str = "null";

/// Initial body allocation when reading a frame.
const READ_CHUNK: usize = 64 * 1024;

// ── Primitive writers ────────────────────────────────────────────────────

fn write_atom(out: &mut BytesMut, name: &str) {
    let bytes = name.as_bytes();
    if bytes.len() <= u8::MAX as usize {
        out.put_u8(TAG_SMALL_ATOM_UTF8);
        out.put_u8(bytes.len() as u8);
    } else {
        out.put_u8(TAG_ATOM_UTF8);
        out.put_u16(bytes.len().min(u16::MAX as usize) as u16);
    }
    out.put_slice(&bytes[..bytes.len().min(u16::MAX as usize)]);
}

fn write_int(out: &mut BytesMut, v: i64) {
    if (0..=u8::MAX as i64).contains(&v) {
        out.put_u8(TAG_SMALL_INTEGER);
        out.put_u8(v as u8);
    } else if let Ok(small) = i32::try_from(v) {
        out.put_u8(TAG_INTEGER);
        out.put_i32(small);
    } else {
        let magnitude = v.unsigned_abs().to_le_bytes();
        let n = magnitude.iter().rposition(|&b| b != 0).map_or(1, |i| i + 1);
        out.put_u8(TAG_SMALL_BIG);
        out.put_u8(n as u8);
        out.put_u8(u8::from(v < 0));
        out.put_slice(&magnitude[..n]);
    }
}

fn write_float(out: &mut BytesMut, v: f64) {
    out.put_u8(TAG_NEW_FLOAT);
    out.put_f64(v);
}

fn write_binary(out: &mut BytesMut, bytes: &[u8]) {
    out.put_u8(TAG_BINARY);
    out.put_u32(bytes.len() as u32);
    out.put_slice(bytes);
}

fn write_string(out: &mut BytesMut, bytes: &[u8]) {
    if bytes.is_empty() {
        out.put_u8(TAG_NIL);
    } else if bytes.len() <= MAX_STRING_EXT_LEN {
        out.put_u8(TAG_STRING);
        out.put_u16(bytes.len() as u16);
        out.put_slice(bytes);
    } else {
        // Too long for STRING_EXT: a proper list of small integers.
        out.put_u8(TAG_LIST);
        out.put_u32(bytes.len() as u32);
        for &b in bytes {
            out.put_u8(TAG_SMALL_INTEGER);
            out.put_u8(b);
        }
        out.put_u8(TAG_NIL);
    }
}

fn write_port(out: &mut BytesMut, dest: &Destination) {
    out.put_u8(TAG_NEW_PORT);
    write_atom(out, dest.node.as_str());
    out.put_u32(dest.id);
    out.put_u32(dest.creation);
}

fn write_tuple_header(out: &mut BytesMut, arity: usize) {
    if arity <= u8::MAX as usize {
        out.put_u8(TAG_SMALL_TUPLE);
        out.put_u8(arity as u8);
    } else {
        out.put_u8(TAG_LARGE_TUPLE);
        out.put_u32(arity as u32);
    }
}

fn atom_len(name: &str) -> usize {
    let n = name.len().min(u16::MAX as usize);
    if n <= u8::MAX as usize {
        2 + n
    } else {
        3 + n
    }
}

fn int_len(v: i64) -> usize {
    if (0..=u8::MAX as i64).contains(&v) {
        2
    } else if i32::try_from(v).is_ok() {
        5
    } else {
        let magnitude = v.unsigned_abs().to_le_bytes();
        3 + magnitude.iter().rposition(|&b| b != 0).map_or(1, |i| i + 1)
    }
}

fn string_len(len: usize) -> usize {
    if len == 0 {
        1
    } else if len <= MAX_STRING_EXT_LEN {
        3 + len
    } else {
        5 + 2 * len + 1
    }
}

fn tuple_header_len(arity: usize) -> usize {
    if arity <= u8::MAX as usize {
        2
    } else {
        5
    }
}

/// A reduced sub-term: the slot that produced it and its children in `kids`.
struct Node {
    slot: usize,
    kids: Range<usize>,
}

enum Work {
    Node(usize),
    Null,
}

/// Move the top `n` terms of the stack into `kids`, keeping their order.
fn pop_children(
    stack: &mut Vec<usize>,
    kids: &mut Vec<usize>,
    slot: usize,
    n: usize,
) -> Result<Range<usize>> {
    if stack.len() < n {
        return Err(TermError::StackUnderflow {
            slot,
            needed: n,
            available: stack.len(),
        });
    }
    let start = kids.len();
    let split = stack.len() - n;
    kids.extend(stack.drain(split..));
    Ok(start..kids.len())
}

fn check_null_positions(arity: u32, positions: &[u32]) -> Result<()> {
    let mut prev: Option<u32> = None;
    for &p in positions {
        if p >= arity || prev.is_some_and(|q| p <= q) {
            return Err(TermError::InvalidNullPosition { arity, position: p });
        }
        prev = Some(p);
    }
    Ok(())
}

// ── Buffer serialization ─────────────────────────────────────────────────

/// Serialize a finished term buffer into an external-format term.
///
/// The first pass reduces the postfix slot stream into a tree of slot
/// indices, resolving pool references and sizing the output. The second
/// walks the tree in prefix order and writes every byte once into a single
/// buffer. Pools only need to outlive this call.
pub fn encode_term(view: TermView<'_>) -> Result<BytesMut> {
    let mut nodes: Vec<Node> = Vec::with_capacity(view.slots.len());
    let mut kids: Vec<usize> = Vec::with_capacity(view.slots.len());
    let mut stack: Vec<usize> = Vec::with_capacity(16);
    let mut size = 0usize;

    for (pos, slot) in view.slots.iter().enumerate() {
        let mut children = 0..0;
        size += match slot {
            TermSlot::Atom(a) => atom_len(a.as_str()),
            TermSlot::Int(v) => int_len(*v),
            TermSlot::Float(r) => {
                view.pools.floats.get(*r)?;
                9
            }
            TermSlot::Binary(r) => 5 + view.pools.blobs.get(*r)?.len(),
            TermSlot::String(r) => string_len(view.pools.blobs.get(*r)?.len()),
            TermSlot::Nil => 1,
            TermSlot::Port(dest) => 1 + atom_len(dest.node.as_str()) + 8,
            TermSlot::List(0) => {
                // `[] ++ Tail` is just the tail, already on the stack.
                if stack.is_empty() {
                    return Err(TermError::StackUnderflow {
                        slot: pos,
                        needed: 1,
                        available: 0,
                    });
                }
                continue;
            }
            TermSlot::List(len) => {
                children = pop_children(&mut stack, &mut kids, pos, *len as usize + 1)?;
                5
            }
            TermSlot::Tuple(arity) => {
                children = pop_children(&mut stack, &mut kids, pos, *arity as usize)?;
                tuple_header_len(*arity as usize)
            }
            TermSlot::SparseTuple { arity, nulls } => {
                let positions = view.pools.nulls.get(*nulls)?;
                check_null_positions(*arity, positions)?;
                let present = *arity as usize - positions.len();
                children = pop_children(&mut stack, &mut kids, pos, present)?;
                tuple_header_len(*arity as usize) + positions.len() * atom_len(NULL_ATOM)
            }
        };
        stack.push(nodes.len());
        nodes.push(Node {
            slot: pos,
            kids: children,
        });
    }

    if stack.len() != 1 {
        return Err(TermError::Unbalanced(stack.len()));
    }

    let mut out = BytesMut::with_capacity(1 + size);
    out.put_u8(ETF_VERSION);
    let mut work = vec![Work::Node(stack[0])];
    while let Some(item) = work.pop() {
        let node = match item {
            Work::Null => {
                write_atom(&mut out, NULL_ATOM);
                continue;
            }
            Work::Node(id) => &nodes[id],
        };
        let children = &kids[node.kids.clone()];
        match &view.slots[node.slot] {
            TermSlot::Atom(a) => write_atom(&mut out, a.as_str()),
            TermSlot::Int(v) => write_int(&mut out, *v),
            TermSlot::Float(r) => write_float(&mut out, view.pools.floats.get(*r)?),
            TermSlot::Binary(r) => write_binary(&mut out, view.pools.blobs.get(*r)?),
            TermSlot::String(r) => write_string(&mut out, view.pools.blobs.get(*r)?),
            TermSlot::Nil => out.put_u8(TAG_NIL),
            TermSlot::Port(dest) => write_port(&mut out, dest),
            TermSlot::List(len) => {
                out.put_u8(TAG_LIST);
                out.put_u32(*len);
                work.extend(children.iter().rev().map(|&k| Work::Node(k)));
            }
            TermSlot::Tuple(arity) => {
                write_tuple_header(&mut out, *arity as usize);
                work.extend(children.iter().rev().map(|&k| Work::Node(k)));
            }
            TermSlot::SparseTuple { arity, nulls } => {
                write_tuple_header(&mut out, *arity as usize);
                let positions = view.pools.nulls.get(*nulls)?;
                let start = work.len();
                let mut values = children.iter();
                let mut holes = positions.iter().peekable();
                for col in 0..*arity {
                    if holes.next_if_eq(&&col).is_some() {
                        work.push(Work::Null);
                    } else if let Some(&v) = values.next() {
                        work.push(Work::Node(v));
                    }
                }
                work[start..].reverse();
            }
        }
    }
    Ok(out)
}

// ── Decoding ─────────────────────────────────────────────────────────────

fn ensure(buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(TermError::Truncated {
            expected: need,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    let v = buf[0];
    *buf = &buf[1..];
    Ok(v)
}

fn read_u16(buf: &mut &[u8]) -> Result<u16> {
    ensure(buf, 2)?;
    let v = u16::from_be_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    Ok(v)
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    let v = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    Ok(v)
}

fn read_bytes(buf: &mut &[u8], n: usize) -> Result<Vec<u8>> {
    ensure(buf, n)?;
    let v = buf[..n].to_vec();
    *buf = &buf[n..];
    Ok(v)
}

fn read_atom_name(buf: &mut &[u8]) -> Result<String> {
    let len = match read_u8(buf)? {
        TAG_SMALL_ATOM_UTF8 => read_u8(buf)? as usize,
        TAG_ATOM_UTF8 | TAG_ATOM => read_u16(buf)? as usize,
        other => return Err(TermError::UnknownTag(other)),
    };
    Ok(String::from_utf8(read_bytes(buf, len)?)?)
}

fn decode_big(buf: &mut &[u8]) -> Result<i64> {
    let n = read_u8(buf)? as usize;
    let negative = read_u8(buf)? != 0;
    let digits = read_bytes(buf, n)?;
    if n > 8 {
        return Err(TermError::IntegerOverflow(n));
    }
    let mut arr = [0u8; 8];
    arr[..n].copy_from_slice(&digits);
    let magnitude = u64::from_le_bytes(arr);
    let v = if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    };
    v.ok_or(TermError::IntegerOverflow(n))
}

fn decode_value(buf: &mut &[u8]) -> Result<Term> {
    ensure(buf, 1)?;
    if matches!(buf[0], TAG_SMALL_ATOM_UTF8 | TAG_ATOM_UTF8 | TAG_ATOM) {
        return Ok(Term::Atom(read_atom_name(buf)?));
    }
    let tag = read_u8(buf)?;
    match tag {
        TAG_SMALL_INTEGER => Ok(Term::Int(read_u8(buf)? as i64)),
        TAG_INTEGER => Ok(Term::Int(read_u32(buf)? as i32 as i64)),
        TAG_SMALL_BIG => Ok(Term::Int(decode_big(buf)?)),
        TAG_NEW_FLOAT => {
            ensure(buf, 8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&buf[..8]);
            *buf = &buf[8..];
            Ok(Term::Float(f64::from_be_bytes(arr)))
        }
        TAG_BINARY => {
            let len = read_u32(buf)? as usize;
            Ok(Term::Binary(read_bytes(buf, len)?))
        }
        TAG_STRING => {
            let len = read_u16(buf)? as usize;
            Ok(Term::Charlist(read_bytes(buf, len)?))
        }
        TAG_NIL => Ok(Term::List(Vec::new())),
        TAG_LIST => {
            let len = read_u32(buf)? as usize;
            let mut items = Vec::with_capacity(len.min(65536));
            for _ in 0..len {
                items.push(decode_value(buf)?);
            }
            match decode_value(buf)? {
                Term::List(tail) if tail.is_empty() => Ok(Term::List(items)),
                // Improper lists keep the tail as a trailing element.
                tail => {
                    items.push(tail);
                    Ok(Term::List(items))
                }
            }
        }
        TAG_SMALL_TUPLE | TAG_LARGE_TUPLE => {
            let arity = if tag == TAG_SMALL_TUPLE {
                read_u8(buf)? as usize
            } else {
                read_u32(buf)? as usize
            };
            let mut items = Vec::with_capacity(arity.min(65536));
            for _ in 0..arity {
                items.push(decode_value(buf)?);
            }
            Ok(Term::Tuple(items))
        }
        TAG_NEW_PORT => {
            let node = read_atom_name(buf)?;
            let id = read_u32(buf)?;
            let creation = read_u32(buf)?;
            Ok(Term::Port { node, id, creation })
        }
        other => Err(TermError::UnknownTag(other)),
    }
}

/// Decode one versioned external-format term occupying all of `input`.
pub fn decode_term(input: &[u8]) -> Result<Term> {
    let mut buf = input;
    let version = read_u8(&mut buf)?;
    if version != ETF_VERSION {
        return Err(TermError::BadVersion(version));
    }
    let term = decode_value(&mut buf)?;
    if !buf.is_empty() {
        return Err(TermError::TrailingBytes(buf.len()));
    }
    Ok(term)
}

// ── Packet framing ───────────────────────────────────────────────────────

/// Frame `payload` with a 4-byte big-endian length header.
pub fn encode_packet(payload: &[u8]) -> Result<BytesMut> {
    encode_packet_with_limit(payload, MAX_PACKET_SIZE)
}

/// Frame `payload`, refusing payloads longer than `max` bytes.
pub fn encode_packet_with_limit(payload: &[u8], max: usize) -> Result<BytesMut> {
    let max = max.min(MAX_PACKET_SIZE);
    if payload.len() > max {
        return Err(TermError::PacketTooLarge {
            size: payload.len(),
            max,
        });
    }
    let mut frame = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    Ok(frame)
}

/// Write one framed packet and flush.
pub fn write_packet<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    write_packet_with_limit(writer, payload, MAX_PACKET_SIZE)
}

/// Write one framed packet of at most `max` payload bytes and flush. Nothing
/// is written when the payload is too large.
pub fn write_packet_with_limit<W: Write>(writer: &mut W, payload: &[u8], max: usize) -> Result<()> {
    let frame = encode_packet_with_limit(payload, max)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one framed packet. Returns `Ok(None)` on a clean end of stream
/// before any header byte.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; PACKET_HEADER_SIZE];
    let mut filled = 0;
    while filled < PACKET_HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(TermError::Truncated {
                    expected: PACKET_HEADER_SIZE,
                    actual: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    // Grow with the data actually received rather than trusting the header.
    let mut payload = Vec::with_capacity(len.min(READ_CHUNK));
    reader.by_ref().take(len as u64).read_to_end(&mut payload)?;
    if payload.len() != len {
        return Err(TermError::Truncated {
            expected: len,
            actual: payload.len(),
        });
    }
    Ok(Some(payload))
}
