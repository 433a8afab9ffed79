use crate::sync::{AtomicU32, Ordering};

/// Like `AtomicU32`, but holding an `f32`.
///
/// Values are stored as their bit patterns, so every `f32` including NaN round-trips exactly.  There is no
/// read-modify-write arithmetic: parameters written by a control thread are last-writer-wins and that is all the audio
/// thread needs.
#[derive(Debug, Default)]
pub struct AtomicF32 {
    inner: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            inner: AtomicU32::new(value.to_bits()),
        }
    }

    pub fn load(&self, ordering: Ordering) -> f32 {
        f32::from_bits(self.inner.load(ordering))
    }

    pub fn store(&self, value: f32, ordering: Ordering) {
        self.inner.store(value.to_bits(), ordering)
    }
}
