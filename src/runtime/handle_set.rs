//! Fixed-capacity set of socket handles.
//!
//! A bitset over `0..capacity`, mirroring the shape of a `select(2)`
//! `fd_set`: O(1) membership, a hard ceiling on the handle values it can
//! hold, and a tracked maximum that bounds the readiness scan.

use std::fmt;
use std::os::unix::io::RawFd;

/// OS-level identifier of an open socket.
pub type Handle = RawFd;

const WORD_BITS: usize = u64::BITS as usize;

/// Returned when a handle does not fit the set's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError {
    pub handle: Handle,
    pub capacity: usize,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handle {} is outside the watchable range 0..{}",
            self.handle, self.capacity
        )
    }
}

impl std::error::Error for CapacityError {}

/// Set of small non-negative handles with a fixed capacity.
///
/// Cloning produces an independent snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleSet {
    words: Vec<u64>,
    capacity: usize,
    len: usize,
    max: Option<Handle>,
}

impl HandleSet {
    /// Create an empty set able to hold handles `0..capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
            len: 0,
            max: None,
        }
    }

    /// Add a handle.
    ///
    /// Handles that are negative or `>= capacity` are rejected and the set is
    /// left untouched.
    pub fn insert(&mut self, handle: Handle) -> Result<(), CapacityError> {
        let (word, mask) = self.locate(handle).ok_or(CapacityError {
            handle,
            capacity: self.capacity,
        })?;

        if self.words[word] & mask == 0 {
            self.words[word] |= mask;
            self.len += 1;
            if self.max.map_or(true, |max| handle > max) {
                self.max = Some(handle);
            }
        }
        Ok(())
    }

    /// Remove a handle. Returns whether it was a member.
    pub fn remove(&mut self, handle: Handle) -> bool {
        let Some((word, mask)) = self.locate(handle) else {
            return false;
        };
        if self.words[word] & mask == 0 {
            return false;
        }

        self.words[word] &= !mask;
        self.len -= 1;
        if self.max == Some(handle) {
            self.max = self.highest_member();
        }
        true
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.locate(handle)
            .is_some_and(|(word, mask)| self.words[word] & mask != 0)
    }

    /// Largest member, if any.
    pub fn max(&self) -> Option<Handle> {
        self.max
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Handle> + '_ {
        self.words.iter().enumerate().flat_map(|(idx, &word)| {
            (0..WORD_BITS)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| (idx * WORD_BITS + bit) as Handle)
        })
    }

    fn locate(&self, handle: Handle) -> Option<(usize, u64)> {
        let idx = usize::try_from(handle).ok()?;
        if idx >= self.capacity {
            return None;
        }
        Some((idx / WORD_BITS, 1u64 << (idx % WORD_BITS)))
    }

    fn highest_member(&self) -> Option<Handle> {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, &word)| word != 0)
            .map(|(idx, &word)| {
                let bit = WORD_BITS - 1 - word.leading_zeros() as usize;
                (idx * WORD_BITS + bit) as Handle
            })
    }
}
