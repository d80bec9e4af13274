use std::sync::atomic::{AtomicU32, Ordering};

use codec::FrameId;

use crate::error::TChannelError;
use crate::op_table::OutboundTable;

/// Assigns frame ids for outbound operations on one connection.
///
/// Ids are a monotonically increasing, wrapping 32-bit counter. Reuse of an
/// id still present in the outbound table is refused rather than silently
/// colliding with the operation already using it; the caller treats this the
/// same as any other `send` failure.
#[derive(Default)]
pub struct FrameIdAllocator {
    next: AtomicU32,
}

impl FrameIdAllocator {
    pub fn alloc(&self, outbound: &OutboundTable) -> Result<FrameId, TChannelError> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut candidate = start;
        loop {
            if !outbound.contains_key(&candidate) {
                return Ok(candidate);
            }
            candidate = candidate.wrapping_add(1);
            if candidate == start {
                return Err(TChannelError::InvalidArg(
                    "no free frame id: outbound table is full".into(),
                ));
            }
            self.next.store(candidate.wrapping_add(1), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_distinct_ids() {
        let allocator = FrameIdAllocator::default();
        let outbound = OutboundTable::with_capacity(0);
        let a = allocator.alloc(&outbound).unwrap();
        let b = allocator.alloc(&outbound).unwrap();
        assert_ne!(a, b);
    }
}
