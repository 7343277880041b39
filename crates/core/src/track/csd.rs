use crate::error::{Result, RtspError};

/// Default number of CSD slots.
pub const DEFAULT_CSD_CAPACITY: usize = 20;

/// Codec-specific data: out-of-band parameter sets a decoder needs before
/// the first frame.
///
/// A fixed number of optional byte blobs. For H.264, slot 0 holds the SPS
/// and slot 1 the PPS; for AAC, slot 0 holds the `AudioSpecificConfig`.
/// The capacity is set at construction and never changes; indexing outside
/// `[0, capacity)` fails with [`RtspError::CsdIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Csd {
    slots: Vec<Option<Vec<u8>>>,
}

impl Csd {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    fn check(&self, index: usize) -> Result<()> {
        if index >= self.slots.len() {
            return Err(RtspError::CsdIndex {
                index,
                capacity: self.slots.len(),
            });
        }
        Ok(())
    }

    /// Store `data` in slot `index`, replacing what was there.
    pub fn set(&mut self, index: usize, data: Vec<u8>) -> Result<()> {
        self.check(index)?;
        self.slots[index] = Some(data);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<Option<&[u8]>> {
        self.check(index)?;
        Ok(self.slots[index].as_deref())
    }

    /// Empty slot `index`. Returns whether it held data.
    pub fn remove(&mut self, index: usize) -> Result<bool> {
        self.check(index)?;
        Ok(self.slots[index].take().is_some())
    }

    /// Whether slot `index` holds data. Out-of-range indices are simply absent.
    pub fn has(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|slot| slot.is_some())
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// Number of occupied slots.
    pub fn size(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total length in bytes of all stored blobs.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().map(Vec::len).sum()
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_deref().map(|data| (index, data)))
    }

    /// Copy every occupied slot into `target`, which must be at least as large.
    pub fn write_to(&self, target: &mut Csd) -> Result<()> {
        if target.capacity() < self.capacity() {
            return Err(RtspError::CsdIndex {
                index: self.capacity().saturating_sub(1),
                capacity: target.capacity(),
            });
        }
        for (index, data) in self.iter() {
            target.slots[index] = Some(data.to_vec());
        }
        Ok(())
    }
}

impl Default for Csd {
    fn default() -> Self {
        Self::new(DEFAULT_CSD_CAPACITY)
    }
}
