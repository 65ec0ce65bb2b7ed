use super::DemandError;

/// Fixed-capacity segment tree over signed running values.
///
/// Node `n` covers a contiguous slot range; its children are `2n + 1` and
/// `2n + 2`. Every internal node holds the sum of its two children, leaves
/// hold the net value recorded for a single slot.
#[derive(Debug, Clone)]
pub struct AggregateIndex {
    tree: Vec<i64>,
    capacity: usize,
}

impl AggregateIndex {
    pub fn new(capacity: usize) -> Result<Self, DemandError> {
        if capacity == 0 {
            return Err(DemandError::InvalidCapacity(capacity));
        }
        Ok(Self {
            tree: vec![0; 4 * capacity],
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add `delta` to the value at `index`. Values may go negative.
    pub fn update(&mut self, index: usize, delta: i64) -> Result<(), DemandError> {
        if index >= self.capacity {
            return Err(DemandError::IndexOutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        self.update_node(0, 0, self.capacity - 1, index, delta);
        Ok(())
    }

    fn update_node(&mut self, node: usize, start: usize, end: usize, index: usize, delta: i64) {
        if start == end {
            self.tree[node] += delta;
            return;
        }
        let mid = start + (end - start) / 2;
        if index <= mid {
            self.update_node(2 * node + 1, start, mid, index, delta);
        } else {
            self.update_node(2 * node + 2, mid + 1, end, index, delta);
        }
        self.tree[node] = self.tree[2 * node + 1] + self.tree[2 * node + 2];
    }

    /// Sum of slots in `[lo, hi]`, clipped to `[0, capacity - 1]`.
    /// Empty or fully out-of-bounds ranges sum to 0.
    pub fn query(&self, lo: i64, hi: i64) -> i64 {
        let last = (self.capacity - 1) as i64;
        if lo > hi || hi < 0 || lo > last {
            return 0;
        }
        let lo = lo.max(0) as usize;
        let hi = hi.min(last) as usize;
        self.query_node(0, 0, self.capacity - 1, lo, hi)
    }

    fn query_node(&self, node: usize, start: usize, end: usize, lo: usize, hi: usize) -> i64 {
        if hi < start || end < lo {
            return 0;
        }
        if lo <= start && end <= hi {
            return self.tree[node];
        }
        let mid = start + (end - start) / 2;
        self.query_node(2 * node + 1, start, mid, lo, hi)
            + self.query_node(2 * node + 2, mid + 1, end, lo, hi)
    }

    /// Sum over every slot. Reads the root directly.
    pub fn total(&self) -> i64 {
        self.tree[0]
    }
}
