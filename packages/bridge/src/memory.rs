//! Shared flag cells.
//!
//! A [`SharedMemory`] region is a fixed array of words visible to the
//! guest-hosting thread and the delegate. Each word packs a generation
//! (high 32 bits) and a completion value (low 32 bits):
//!
//! ```text
//!   63            32 31             0
//!  +----------------+----------------+
//!  |   generation   |  0 = pending   |
//!  |                |  1 = completed |
//!  +----------------+----------------+
//! ```
//!
//! A cell is completed with a compare-and-swap from `(gen, pending)` to
//! `(gen, completed)`, so it transitions at most once per allocation. The
//! swap happens before the waiter is notified; a waiter that wakes always
//! sees the completed value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const PENDING: u32 = 0;
const COMPLETED: u32 = 1;

fn pack(generation: u32, value: u32) -> u64 {
    ((generation as u64) << 32) | value as u64
}

fn generation_of(word: u64) -> u32 {
    (word >> 32) as u32
}

/// Errors from completing a flag cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("flag cell {0} does not exist in this region")]
    Unknown(FlagCellRef),

    #[error("flag cell {0} has been released or reallocated")]
    Stale(FlagCellRef),

    #[error("flag cell {0} was already completed")]
    AlreadyCompleted(FlagCellRef),
}

/// A reference to one flag cell, as carried in an operation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagCellRef {
    pub index: u32,
    pub generation: u32,
}

impl std::fmt::Display for FlagCellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.index, self.generation)
    }
}

struct Word {
    state: AtomicU64,
    lock: Mutex<()>,
    signal: Condvar,
}

struct Region {
    words: Box<[Word]>,
    free: Mutex<Vec<u32>>,
}

/// A region of flag cells shared between the guest thread and the delegate.
#[derive(Clone)]
pub struct SharedMemory {
    region: Arc<Region>,
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

impl SharedMemory {
    /// Create a region with `cells` flag cells.
    pub fn new(cells: usize) -> Self {
        let words = (0..cells)
            .map(|_| Word {
                state: AtomicU64::new(pack(0, PENDING)),
                lock: Mutex::new(()),
                signal: Condvar::new(),
            })
            .collect();
        // Reversed so allocation hands out low indices first.
        let free = (0..cells as u32).rev().collect();
        Self {
            region: Arc::new(Region {
                words,
                free: Mutex::new(free),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.region.words.len()
    }

    /// Number of cells not currently allocated.
    pub fn available(&self) -> usize {
        self.free_list().len()
    }

    /// Allocate a fresh pending cell, or `None` if every cell is in use.
    ///
    /// The cell's generation is advanced, so completions aimed at any
    /// earlier use of the same slot are rejected as stale.
    pub fn allocate(&self) -> Option<FlagCell> {
        let index = self.free_list().pop()?;
        let word = &self.region.words[index as usize];
        let generation = generation_of(word.state.load(Ordering::Acquire)).wrapping_add(1);
        word.state.store(pack(generation, PENDING), Ordering::Release);
        Some(FlagCell {
            memory: self.clone(),
            cell: FlagCellRef { index, generation },
        })
    }

    /// Mark a cell completed and wake its waiter.
    pub fn complete(&self, cell: FlagCellRef) -> Result<(), CellError> {
        let word = self
            .region
            .words
            .get(cell.index as usize)
            .ok_or(CellError::Unknown(cell))?;

        match word.state.compare_exchange(
            pack(cell.generation, PENDING),
            pack(cell.generation, COMPLETED),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let _guard = word.lock.lock().unwrap_or_else(PoisonError::into_inner);
                word.signal.notify_all();
                Ok(())
            }
            Err(actual) if generation_of(actual) != cell.generation => Err(CellError::Stale(cell)),
            Err(_) => Err(CellError::AlreadyCompleted(cell)),
        }
    }

    /// Whether the referenced cell is completed. Stale references read as
    /// not completed.
    pub fn is_completed(&self, cell: FlagCellRef) -> bool {
        self.region
            .words
            .get(cell.index as usize)
            .map(|word| word.state.load(Ordering::Acquire) == pack(cell.generation, COMPLETED))
            .unwrap_or(false)
    }

    /// Whether the referenced cell is allocated and still awaiting
    /// completion. Released, reallocated and unknown cells read as false.
    pub fn is_pending(&self, cell: FlagCellRef) -> bool {
        self.region
            .words
            .get(cell.index as usize)
            .map(|word| word.state.load(Ordering::Acquire) == pack(cell.generation, PENDING))
            .unwrap_or(false)
    }

    fn wait(&self, cell: FlagCellRef, timeout: Duration) -> bool {
        let Some(word) = self.region.words.get(cell.index as usize) else {
            return false;
        };
        let completed = pack(cell.generation, COMPLETED);
        let deadline = Instant::now() + timeout;

        let mut guard = word.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if word.state.load(Ordering::Acquire) == completed {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            guard = word
                .signal
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn release(&self, cell: FlagCellRef) {
        let word = &self.region.words[cell.index as usize];
        word.state.store(
            pack(cell.generation.wrapping_add(1), PENDING),
            Ordering::Release,
        );
        self.free_list().push(cell.index);
    }

    fn free_list(&self) -> std::sync::MutexGuard<'_, Vec<u32>> {
        self.region.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An allocated flag cell, owned by the one waiter that allocated it.
///
/// Dropping the cell returns its slot to the region. The slot's generation
/// moves on, so a late completion for this use is rejected as stale.
#[derive(Debug)]
pub struct FlagCell {
    memory: SharedMemory,
    cell: FlagCellRef,
}

impl FlagCell {
    pub fn cell_ref(&self) -> FlagCellRef {
        self.cell
    }

    pub fn is_completed(&self) -> bool {
        self.memory.is_completed(self.cell)
    }

    /// Block until the cell is completed or `timeout` passes. Returns
    /// whether the cell was completed.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.memory.wait(self.cell, timeout)
    }
}

impl Drop for FlagCell {
    fn drop(&mut self) {
        self.memory.release(self.cell);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn complete_wakes_waiter() {
        let memory = SharedMemory::new(4);
        let cell = memory.allocate().unwrap();
        let cell_ref = cell.cell_ref();

        let completer = {
            let memory = memory.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                memory.complete(cell_ref).unwrap();
            })
        };

        let start = Instant::now();
        assert!(cell.wait(Duration::from_secs(5)));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(cell.is_completed());
        completer.join().unwrap();
    }

    #[test]
    fn wait_times_out_when_nobody_completes() {
        let memory = SharedMemory::new(1);
        let cell = memory.allocate().unwrap();
        let start = Instant::now();
        assert!(!cell.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn completion_happens_once() {
        let memory = SharedMemory::new(1);
        let cell = memory.allocate().unwrap();
        memory.complete(cell.cell_ref()).unwrap();
        assert_eq!(
            memory.complete(cell.cell_ref()),
            Err(CellError::AlreadyCompleted(cell.cell_ref()))
        );
    }

    #[test]
    fn released_cell_rejects_late_completion() {
        let memory = SharedMemory::new(1);
        let first = memory.allocate().unwrap();
        let old = first.cell_ref();
        drop(first);

        let second = memory.allocate().unwrap();
        assert_eq!(second.cell_ref().index, old.index);
        assert_ne!(second.cell_ref().generation, old.generation);

        assert_eq!(memory.complete(old), Err(CellError::Stale(old)));
        assert!(!second.is_completed());
    }

    #[test]
    fn pending_tracks_the_current_generation() {
        let memory = SharedMemory::new(1);
        let first = memory.allocate().unwrap();
        let old = first.cell_ref();
        assert!(memory.is_pending(old));

        memory.complete(old).unwrap();
        assert!(!memory.is_pending(old));
        drop(first);

        let second = memory.allocate().unwrap();
        assert!(memory.is_pending(second.cell_ref()));
        assert!(!memory.is_pending(old));
        assert!(!memory.is_pending(FlagCellRef {
            index: 5,
            generation: 1,
        }));
    }

    #[test]
    fn garbage_reference_is_rejected() {
        let memory = SharedMemory::new(2);
        let garbage = FlagCellRef {
            index: 99,
            generation: 7,
        };
        assert_eq!(memory.complete(garbage), Err(CellError::Unknown(garbage)));
        assert!(!memory.is_completed(garbage));

        // An in-range slot that was never allocated is stale, not completable.
        let unallocated = FlagCellRef {
            index: 1,
            generation: 1,
        };
        assert_eq!(memory.complete(unallocated), Err(CellError::Stale(unallocated)));
    }

    #[test]
    fn exhausted_region_returns_none() {
        let memory = SharedMemory::new(1);
        let held = memory.allocate().unwrap();
        assert!(memory.allocate().is_none());
        assert_eq!(memory.available(), 0);
        drop(held);
        assert_eq!(memory.available(), 1);
        assert!(memory.allocate().is_some());
    }

    #[test]
    fn independent_cells_do_not_cross_talk() {
        let memory = SharedMemory::new(2);
        let a = memory.allocate().unwrap();
        let b = memory.allocate().unwrap();
        assert_ne!(a.cell_ref(), b.cell_ref());

        memory.complete(a.cell_ref()).unwrap();
        assert!(a.is_completed());
        assert!(!b.wait(Duration::from_millis(10)));
    }
}
