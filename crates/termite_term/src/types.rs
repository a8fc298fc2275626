//! Term slot model, pool references and External Term Format constants.

use std::borrow::Cow;
use std::fmt;

/// External term format version byte that prefixes every encoded term.
pub const ETF_VERSION: u8 = 131;

/// Largest payload a 4-byte length header can describe.
pub const MAX_PACKET_SIZE: usize = u32::MAX as usize;

/// Packet header size: 4 bytes big-endian length.
pub const PACKET_HEADER_SIZE: usize = 4;

/// Longest atom the receiving runtime accepts, in characters.
pub const MAX_ATOM_CHARS: usize = 255;

/// Longest byte string that fits a `STRING_EXT`.
pub const MAX_STRING_EXT_LEN: usize = u16::MAX as usize;

// ── Term tags ────────────────────────────────────────────────────────────

pub const TAG_NEW_FLOAT: u8 = 70;
pub const TAG_NEW_PORT: u8 = 89;
pub const TAG_SMALL_INTEGER: u8 = 97;
pub const TAG_INTEGER: u8 = 98;
pub const TAG_ATOM: u8 = 100;
pub const TAG_SMALL_TUPLE: u8 = 104;
pub const TAG_LARGE_TUPLE: u8 = 105;
pub const TAG_NIL: u8 = 106;
pub const TAG_STRING: u8 = 107;
pub const TAG_LIST: u8 = 108;
pub const TAG_BINARY: u8 = 109;
pub const TAG_SMALL_BIG: u8 = 110;
pub const TAG_ATOM_UTF8: u8 = 118;
pub const TAG_SMALL_ATOM_UTF8: u8 = 119;

// ── Atoms ────────────────────────────────────────────────────────────────

/// An atom name. Static names cost nothing; column names are owned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom(Cow<'static, str>);

impl Atom {
    pub const fn from_static(name: &'static str) -> Self {
        Atom(Cow::Borrowed(name))
    }

    /// Build an atom from arbitrary text, cutting it to `MAX_ATOM_CHARS`
    /// characters so the receiving side can always intern it.
    pub fn truncated(name: &str) -> Self {
        match name.char_indices().nth(MAX_ATOM_CHARS) {
            Some((cut, _)) => Atom(Cow::Owned(name[..cut].to_string())),
            None => Atom(Cow::Owned(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Pool references ──────────────────────────────────────────────────────

/// Index of a value in the float pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatRef(pub u32);

/// Index of a byte buffer in the blob pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobRef(pub u32);

/// Index of a null-position list in the null pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NullsRef(pub u32);

/// Opaque reply address on the host channel, encoded as a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub node: Atom,
    pub id: u32,
    pub creation: u32,
}

impl Default for Destination {
    fn default() -> Self {
        Self {
            node: Atom::from_static("nonode@nohost"),
            id: 0,
            creation: 0,
        }
    }
}

// ── Slots ────────────────────────────────────────────────────────────────

/// One primitive unit of a term buffer.
///
/// Buffers are postfix: container headers follow their elements. `List(n)`
/// consumes `n` elements followed by a tail term (usually `Nil`).
/// `SparseTuple` closes a row whose NULL cells were omitted; it consumes
/// `arity - nulls` terms and the serializer fills the gaps.
#[derive(Debug, Clone, PartialEq)]
pub enum TermSlot {
    Atom(Atom),
    Int(i64),
    Float(FloatRef),
    Binary(BlobRef),
    String(BlobRef),
    Nil,
    List(u32),
    Tuple(u32),
    SparseTuple { arity: u32, nulls: NullsRef },
    Port(Destination),
}

// ── Decoded terms ────────────────────────────────────────────────────────

/// Owned term tree produced by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Atom(String),
    Int(i64),
    Float(f64),
    Binary(Vec<u8>),
    /// A `STRING_EXT` charlist.
    Charlist(Vec<u8>),
    List(Vec<Term>),
    Tuple(Vec<Term>),
    Port {
        node: String,
        id: u32,
        creation: u32,
    },
}

impl Term {
    pub fn atom(name: &str) -> Self {
        Term::Atom(name.to_string())
    }

    pub fn tuple(items: impl IntoIterator<Item = Term>) -> Self {
        Term::Tuple(items.into_iter().collect())
    }

    pub fn list(items: impl IntoIterator<Item = Term>) -> Self {
        Term::List(items.into_iter().collect())
    }

    pub fn binary(bytes: &[u8]) -> Self {
        Term::Binary(bytes.to_vec())
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::List(items) => Some(items),
            _ => None,
        }
    }

    /// Charlists and small-integer lists both read back as text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Term::Charlist(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Term::List(items) => items
                .iter()
                .map(|t| match t {
                    Term::Int(b) => u8::try_from(*b).ok(),
                    _ => None,
                })
                .collect::<Option<Vec<u8>>>()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            _ => None,
        }
    }
}
