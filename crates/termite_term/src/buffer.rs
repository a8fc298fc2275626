//! Growable postfix term buffer.

use crate::pool::Pools;
use crate::types::TermSlot;

/// Append-only sequence of term slots.
///
/// Single writer. Slots are addressed by position; growth may move the
/// backing storage but never changes a slot's value.
#[derive(Debug, Default)]
pub struct TermBuffer {
    slots: Vec<TermSlot>,
}

impl TermBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, slot: TermSlot) {
        self.slots.push(slot);
    }

    pub fn extend(&mut self, slots: impl IntoIterator<Item = TermSlot>) {
        self.slots.extend(slots);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop everything written so far, keeping the allocation.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Slot count and an immutable view of the slots.
    pub fn finalize(&self) -> (usize, &[TermSlot]) {
        (self.slots.len(), &self.slots)
    }

    /// Pair the buffer with the pools its slots reference.
    pub fn view<'a>(&'a self, pools: &'a Pools) -> TermView<'a> {
        TermView {
            slots: &self.slots,
            pools,
        }
    }
}

/// A finished buffer together with its pools, ready for serialization.
#[derive(Debug, Clone, Copy)]
pub struct TermView<'a> {
    pub slots: &'a [TermSlot],
    pub pools: &'a Pools,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Atom;

    #[test]
    fn test_append_and_finalize() {
        let mut buf = TermBuffer::with_capacity(2);
        buf.push(TermSlot::Atom(Atom::from_static("ok")));
        buf.extend([TermSlot::Int(1), TermSlot::Tuple(2)]);
        let (count, slots) = buf.finalize();
        assert_eq!(count, 3);
        assert_eq!(slots[1], TermSlot::Int(1));
        assert_eq!(slots[2], TermSlot::Tuple(2));
    }

    #[test]
    fn test_growth_preserves_values() {
        let mut buf = TermBuffer::new();
        for i in 0..5_000 {
            buf.push(TermSlot::Int(i));
        }
        let (count, slots) = buf.finalize();
        assert_eq!(count, 5_000);
        assert_eq!(slots[0], TermSlot::Int(0));
        assert_eq!(slots[4_999], TermSlot::Int(4_999));
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut buf = TermBuffer::new();
        buf.push(TermSlot::Nil);
        buf.clear();
        assert!(buf.is_empty());
    }
}
