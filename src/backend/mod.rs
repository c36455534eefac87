//! Buffer memory, synchronization and transport helpers
//!
//! This module contains the low level building blocks the surface code is composed of:
//!
//! - [`allocator`] describes pixel formats and maps buffers into memory
//! - [`sync`] handles kernel sync files and GPU fences
//! - [`channel`] is the interface of the virtualization transport allocating host buffers

pub mod allocator;
pub mod channel;
pub(crate) mod ioctl;
pub mod sync;
