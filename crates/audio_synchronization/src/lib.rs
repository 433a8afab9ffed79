//! Primitives for moving audio and control values between threads in realtime contexts.
//!
//! Everything here obeys one rule: the audio side of a communication never blocks, never enters the kernel and never
//! allocates.  The control side may be slow, but it must never be able to stall a device callback.  This rules out
//! mutexes and most channel implementations, which may park or deallocate on either side.
//!
//! Two things live here:
//!
//! - [spsc_ring], a bounded single-producer single-consumer ring of samples, used between a capture callback and an
//!   output callback running on different driver threads.
//! - [atomic_f32], a lock-free `f32` cell for parameters such as volume and direction which a UI thread writes and an
//!   audio thread reads once per block.
pub mod atomic_f32;
pub mod spsc_ring;
mod sync;

pub use atomic_f32::AtomicF32;
pub use spsc_ring::{create_ring, RingReader, RingWriter};
