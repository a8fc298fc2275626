//! Auxiliary payload pools referenced by index from term slots.
//!
//! Slots never hold addresses into a pool. A pool may reallocate freely while
//! a buffer is being built; references are resolved only when the finished
//! buffer is serialized.

use bytes::Bytes;

use crate::error::TermError;
use crate::types::{BlobRef, FloatRef, NullsRef};

fn next_index(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Owned 64-bit floats.
#[derive(Debug, Default)]
pub struct FloatPool {
    values: Vec<f64>,
}

impl FloatPool {
    pub fn push(&mut self, value: f64) -> FloatRef {
        let idx = next_index(self.values.len());
        self.values.push(value);
        FloatRef(idx)
    }

    pub fn get(&self, r: FloatRef) -> Result<f64, TermError> {
        self.values
            .get(r.0 as usize)
            .copied()
            .ok_or(TermError::DanglingRef {
                pool: "float",
                index: r.0,
                len: self.values.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Owned, independently allocated byte buffers (TEXT, BLOB, strings).
#[derive(Debug, Default)]
pub struct BlobPool {
    blobs: Vec<Bytes>,
    total_bytes: usize,
}

impl BlobPool {
    /// Copy `bytes` into a fresh buffer owned by the pool.
    pub fn push(&mut self, bytes: &[u8]) -> BlobRef {
        let idx = next_index(self.blobs.len());
        self.total_bytes += bytes.len();
        self.blobs.push(Bytes::copy_from_slice(bytes));
        BlobRef(idx)
    }

    pub fn get(&self, r: BlobRef) -> Result<&[u8], TermError> {
        self.blobs
            .get(r.0 as usize)
            .map(|b| b.as_ref())
            .ok_or(TermError::DanglingRef {
                pool: "blob",
                index: r.0,
                len: self.blobs.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Sum of the lengths of all owned buffers.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

/// Column positions of NULL cells, one entry per sparse row.
#[derive(Debug, Default)]
pub struct NullPool {
    rows: Vec<Box<[u32]>>,
}

impl NullPool {
    pub fn push(&mut self, positions: Vec<u32>) -> NullsRef {
        let idx = next_index(self.rows.len());
        self.rows.push(positions.into_boxed_slice());
        NullsRef(idx)
    }

    pub fn get(&self, r: NullsRef) -> Result<&[u32], TermError> {
        self.rows
            .get(r.0 as usize)
            .map(|p| p.as_ref())
            .ok_or(TermError::DanglingRef {
                pool: "null",
                index: r.0,
                len: self.rows.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// All payload pools owned alongside one term buffer.
#[derive(Debug, Default)]
pub struct Pools {
    pub floats: FloatPool,
    pub blobs: BlobPool,
    pub nulls: NullPool,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_refs_survive_growth() {
        let mut pool = FloatPool::default();
        let first = pool.push(0.1);
        for i in 0..10_000 {
            pool.push(i as f64);
        }
        assert_eq!(pool.get(first).unwrap().to_bits(), 0.1f64.to_bits());
        assert_eq!(pool.len(), 10_001);
    }

    #[test]
    fn test_blob_pool_copies_exact_bytes() {
        let mut pool = BlobPool::default();
        let mut src = vec![0u8, 1, 0, 2];
        let r = pool.push(&src);
        let empty = pool.push(&[]);
        src[0] = 9;
        assert_eq!(pool.get(r).unwrap(), &[0, 1, 0, 2]);
        assert!(pool.get(empty).unwrap().is_empty());
        assert_eq!(pool.total_bytes(), 4);
    }

    #[test]
    fn test_dangling_ref_is_an_error() {
        let pool = BlobPool::default();
        match pool.get(BlobRef(3)) {
            Err(TermError::DanglingRef { pool, index, len }) => {
                assert_eq!(pool, "blob");
                assert_eq!(index, 3);
                assert_eq!(len, 0);
            }
            other => panic!("expected DanglingRef, got {:?}", other),
        }
    }

    #[test]
    fn test_null_pool_roundtrip() {
        let mut pool = NullPool::default();
        let r = pool.push(vec![1, 3]);
        assert_eq!(pool.get(r).unwrap(), &[1, 3]);
        assert!(pool.get(NullsRef(1)).is_err());
    }
}
