//! Handler sources for the resolver.
//!
//! Handlers are either linked into the executor and listed in a
//! `HandlerRegistry`, or exported from shared libraries found under a
//! registered handler directory and loaded through the C ABI in `abi`.

mod registry;

pub mod abi;
pub mod native;

pub use native::{NativeHandler, NativeModule};
pub use registry::{Handler, HandlerRegistry};
