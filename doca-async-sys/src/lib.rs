//! Contract surface of the DOCA SDK as used by `doca-async`.
//!
//! Two interchangeable backends provide the same `ffi` module:
//!
//! - the default **emulation** backend: a single-threaded, in-process software
//!   model of the SDK contract (progress engine with an eventfd notification
//!   handle, context state machines, task completion queues, and enough of
//!   the data path to run every wrapper code path without hardware). This is
//!   the moral equivalent of running a network stack against a virtual ring
//!   device instead of a NIC: same API, no silicon.
//! - the **system** backend (`--features system`): bindgen-generated
//!   declarations against the installed DOCA libraries.
//!
//! Everything in `ffi` is `unsafe` and pointer-based on both backends, so the
//! wrapper crate compiles identically against either.

#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

#[cfg(not(feature = "system"))]
mod emu;

#[cfg(not(feature = "system"))]
pub mod testing {
    //! Hooks for exercising contract behavior that hardware would produce
    //! spontaneously. Only present on the emulation backend.
    pub use crate::emu::testing::*;
}

pub mod ffi {
    #[cfg(feature = "system")]
    include!(concat!(env!("OUT_DIR"), "/bindings.rs"));

    #[cfg(not(feature = "system"))]
    pub use crate::emu::*;
}
