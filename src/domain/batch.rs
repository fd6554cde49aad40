//! Fixed-size batches over the insert queue.

use super::ObjectId;

/// A fixed slice of the insert queue; the unit of retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position among the run's batches.
    pub number: usize,
    /// Offset of the first id within the full queue.
    pub offset: usize,
    pub ids: Vec<ObjectId>,
}

impl Batch {
    /// Builds the batch that starts at `offset`, or `None` past the end.
    pub fn at(queue: &[ObjectId], offset: usize, batch_size: usize) -> Option<Self> {
        if offset >= queue.len() || batch_size == 0 {
            return None;
        }
        let end = (offset + batch_size).min(queue.len());
        Some(Self {
            number: offset / batch_size + 1,
            offset,
            ids: queue[offset..end].to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Number of batches needed to cover `total` ids.
pub const fn batch_count(total: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    total.div_ceil(batch_size)
}

/// Splits the whole queue into consecutive batches.
pub fn partition(queue: &[ObjectId], batch_size: usize) -> Vec<Batch> {
    let mut batches = Vec::with_capacity(batch_count(queue.len(), batch_size));
    let mut offset = 0;
    while let Some(batch) = Batch::at(queue, offset, batch_size) {
        offset += batch.len();
        batches.push(batch);
    }
    batches
}
