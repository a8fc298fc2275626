pub mod buffer;
pub mod codec;
pub mod error;
pub mod pool;
pub mod types;

pub use buffer::{TermBuffer, TermView};
pub use codec::{decode_term, encode_packet, encode_term, read_packet, write_packet};
pub use error::TermError;
pub use pool::{BlobPool, FloatPool, NullPool, Pools};
pub use types::*;
