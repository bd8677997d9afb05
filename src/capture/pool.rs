//! Ownership ledger for the hardware buffer ring.
//!
//! Buffers themselves move by value between the stream engine and the
//! transport; the pool only records where each slot currently is so the
//! engine can prove nothing leaked or got queued twice.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::warn;

use crate::transport::{BufferId, HardwareBuffer};

pub const DEFAULT_POOL_SIZE: usize = 10;

static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Handed to the transport, waiting for the hardware to fill it
    Queued,
    /// Dequeued and owned by the stream engine
    Held,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("buffer {0:?} does not belong to this pool")]
    Foreign(BufferId),
    #[error("buffer {0:?} is already {1:?}")]
    WrongState(BufferId, SlotState),
}

#[derive(Debug)]
pub struct BufferPool {
    generation: u32,
    buffer_size: usize,
    slots: Vec<SlotState>,
}

impl BufferPool {
    /// Allocate `count` buffers of `buffer_size` bytes, all initially held
    pub fn allocate(count: usize, buffer_size: usize) -> (Self, Vec<HardwareBuffer>) {
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let buffers = (0..count)
            .map(|index| HardwareBuffer::new(BufferId { generation, index }, buffer_size))
            .collect();
        let pool = Self {
            generation,
            buffer_size,
            slots: vec![SlotState::Held; count],
        };
        (pool, buffers)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn queued(&self) -> usize {
        self.count(SlotState::Queued)
    }

    pub fn held(&self) -> usize {
        self.count(SlotState::Held)
    }

    pub fn state(&self, id: BufferId) -> Option<SlotState> {
        if id.generation != self.generation {
            return None;
        }
        self.slots.get(id.index).copied()
    }

    /// Record a buffer coming back from the transport
    pub fn check_out(&mut self, id: BufferId) -> Result<(), PoolError> {
        self.transition(id, SlotState::Queued, SlotState::Held)
    }

    /// Record a buffer being handed to the transport
    pub fn check_in(&mut self, id: BufferId) -> Result<(), PoolError> {
        self.transition(id, SlotState::Held, SlotState::Queued)
    }

    fn transition(&mut self, id: BufferId, from: SlotState, to: SlotState) -> Result<(), PoolError> {
        if id.generation != self.generation {
            return Err(PoolError::Foreign(id));
        }
        let slot = self.slots.get_mut(id.index).ok_or(PoolError::Foreign(id))?;
        if *slot != from {
            warn!(?id, state = ?*slot, "Buffer ownership violation");
            return Err(PoolError::WrongState(id, *slot));
        }
        *slot = to;
        Ok(())
    }

    fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| **s == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_slot_is_in_exactly_one_place() {
        let (mut pool, buffers) = BufferPool::allocate(4, 64);
        assert_eq!((pool.queued(), pool.held()), (0, 4));

        for b in &buffers {
            pool.check_in(b.id()).unwrap();
        }
        assert_eq!((pool.queued(), pool.held()), (4, 0));

        pool.check_out(buffers[2].id()).unwrap();
        assert_eq!(pool.queued() + pool.held(), pool.len());
        assert_eq!(pool.state(buffers[2].id()), Some(SlotState::Held));
    }

    #[test]
    fn double_check_in_is_refused() {
        let (mut pool, buffers) = BufferPool::allocate(1, 8);
        let id = buffers[0].id();
        pool.check_in(id).unwrap();
        assert_eq!(
            pool.check_in(id),
            Err(PoolError::WrongState(id, SlotState::Queued))
        );
    }

    #[test]
    fn buffers_from_an_older_pool_are_foreign() {
        let (_old, old_buffers) = BufferPool::allocate(2, 8);
        let (mut pool, _) = BufferPool::allocate(2, 8);
        let stale = old_buffers[0].id();
        assert_eq!(pool.check_out(stale), Err(PoolError::Foreign(stale)));
        assert_eq!(pool.state(stale), None);
    }
}
