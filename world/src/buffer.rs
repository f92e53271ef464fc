use std::num::NonZeroUsize;

/// Fixed-capacity FIFO window ordered oldest-first.
///
/// The window is always full: pushing evicts the oldest entry, shifts the
/// rest one slot towards the front and writes the new entry last.
#[derive(Clone, Debug, PartialEq)]
pub struct RollingBuffer<T> {
    slots: Vec<T>,
}

impl<T: Clone> RollingBuffer<T> {
    /// Creates a window of `capacity` copies of `value`.
    #[must_use]
    pub fn filled(capacity: NonZeroUsize, value: T) -> Self {
        Self {
            slots: vec![value; capacity.get()],
        }
    }
}

impl<T> RollingBuffer<T> {
    /// Adopts `slots` as a full window; `None` when empty.
    #[must_use]
    pub fn from_vec(slots: Vec<T>) -> Option<Self> {
        if slots.is_empty() {
            return None;
        }
        Some(Self { slots })
    }

    /// Appends `value`, discarding the oldest entry.
    pub fn push(&mut self, value: T) {
        self.slots.rotate_left(1);
        if let Some(last) = self.slots.last_mut() {
            *last = value;
        }
    }

    /// Number of entries held; constant for the buffer's lifetime.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Entries oldest-first.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.slots
    }

    /// Most recently pushed entry.
    #[must_use]
    pub fn newest(&self) -> &T {
        &self.slots[self.slots.len() - 1]
    }

    /// Replaces the most recently pushed entry without rolling.
    pub fn replace_newest(&mut self, value: T) {
        if let Some(last) = self.slots.last_mut() {
            *last = value;
        }
    }

    /// Iterates entries oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}
