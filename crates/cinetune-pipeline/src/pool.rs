//! Fixed arena of decoded-frame buffers.
//!
//! Each output stage owns one pool and lends every slot to its decoder at
//! stream open. A slot circulates decoder -> output queue -> sink -> decoder
//! as a move-only [`FrameLease`]; the pool records which station currently
//! holds each slot. Slot identities survive a flush, only their contents
//! are invalidated. Conservation: free + checked-out == slot count for the
//! pool's whole lifetime.

use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStation {
    Free,
    Decoder,
    Queued,
    Sink,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("lease belongs to pool {lease_pool}, not pool {pool}")]
    ForeignLease { lease_pool: u32, pool: u32 },
    #[error("slot {0} is already free")]
    AlreadyFree(u32),
}

/// Move-only checkout of one pool slot. Exactly one owner at a time,
/// enforced by ownership, not by reference counting.
#[derive(Debug)]
pub struct FrameLease<T> {
    pool_id: u32,
    slot: u32,
    pub data: T,
}

impl<T> FrameLease<T> {
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

#[derive(Debug)]
pub struct FramePool<T> {
    id: u32,
    stations: Vec<SlotStation>,
    free: Vec<FrameLease<T>>,
}

fn next_pool_id() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

impl<T: Default> FramePool<T> {
    pub fn new(slots: usize) -> Self {
        let id = next_pool_id();
        let free = (0..slots as u32)
            .map(|slot| FrameLease {
                pool_id: id,
                slot,
                data: T::default(),
            })
            .collect();
        Self {
            id,
            stations: vec![SlotStation::Free; slots],
            free,
        }
    }
}

impl<T> FramePool<T> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn slots(&self) -> usize {
        self.stations.len()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn outstanding(&self) -> usize {
        self.stations.len() - self.free.len()
    }

    pub fn checkout(&mut self, station: SlotStation) -> Option<FrameLease<T>> {
        let lease = self.free.pop()?;
        self.stations[lease.slot as usize] = station;
        Some(lease)
    }

    /// Checks out every free slot at once (the open-time hand-off to the
    /// decoder).
    pub fn checkout_all(&mut self, station: SlotStation) -> Vec<FrameLease<T>> {
        let leases = std::mem::take(&mut self.free);
        for lease in &leases {
            self.stations[lease.slot as usize] = station;
        }
        leases
    }

    /// Records a station change of a lease held elsewhere.
    pub fn note_station(&mut self, lease: &FrameLease<T>, station: SlotStation) {
        if lease.pool_id != self.id {
            warn!(
                lease_pool = lease.pool_id,
                pool = self.id,
                "station noted for a foreign lease"
            );
            return;
        }
        self.stations[lease.slot as usize] = station;
    }

    pub fn station(&self, slot: u32) -> Option<SlotStation> {
        self.stations.get(slot as usize).copied()
    }

    pub fn check_in(&mut self, lease: FrameLease<T>) -> Result<(), PoolError> {
        if lease.pool_id != self.id {
            return Err(PoolError::ForeignLease {
                lease_pool: lease.pool_id,
                pool: self.id,
            });
        }
        if self.stations[lease.slot as usize] == SlotStation::Free {
            return Err(PoolError::AlreadyFree(lease.slot));
        }
        self.stations[lease.slot as usize] = SlotStation::Free;
        self.free.push(lease);
        Ok(())
    }
}
