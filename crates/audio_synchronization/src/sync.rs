//! Switches the atomics this crate uses between std and loom, so that `RUSTFLAGS="--cfg loom"` model-checks the
//! tests which can be model-checked.
#[cfg(not(loom))]
mod std_backed {
    pub use std::sync::atomic::*;
    pub use std::sync::*;
    pub use std::thread::spawn;

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        what()
    }
}

#[cfg(not(loom))]
pub(crate) use std_backed::*;

#[cfg(loom)]
mod loom_backed {
    pub use loom::sync::atomic::*;
    pub use loom::sync::*;
    pub use loom::thread::spawn;

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        loom::model(what)
    }
}

#[cfg(loom)]
pub(crate) use loom_backed::*;
