//! Server-wide position allocation.

use parking_lot::Mutex;

/// The position space ran out. Fatal; operationally unreachable with 64-bit
/// positions.
#[derive(Debug, thiserror::Error)]
#[error("feed position space exhausted")]
pub struct AllocationExhausted;

/// Hands out the strictly increasing sequence position for appended entries.
///
/// One allocator is shared by every feed a [`FeedStore`](crate::FeedStore)
/// hosts, so positions are unique across the whole server. Allocation is
/// serialized; concurrent writers never observe the same position twice.
pub struct PositionAllocator {
    last: Mutex<i64>,
}

impl PositionAllocator {
    /// Allocator whose first position is 1.
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Allocator resuming after a previously allocated position.
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }

    /// Allocate the next position, strictly greater than every prior one.
    pub fn allocate(&self) -> Result<i64, AllocationExhausted> {
        let mut last = self.last.lock();
        if *last == i64::MAX {
            return Err(AllocationExhausted);
        }
        *last += 1;
        Ok(*last)
    }

    /// Highest position handed out so far.
    pub fn last_allocated(&self) -> i64 {
        *self.last.lock()
    }
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self::new()
    }
}
