//! Monotonic identifier allocation.
//!
//! Registration and metrics records used to draw random small integers and
//! retry on collision; a counter scoped to the owning collection removes the
//! retry loop while keeping ids short and stable within one run.

/// Monotonic id allocator scoped to one owning collection.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id with the given single-letter prefix (`P0`, `M1`, ...).
    pub fn allocate(&mut self, prefix: char) -> String {
        let id = format!("{}{}", prefix, self.next);
        self.next += 1;
        id
    }
}
