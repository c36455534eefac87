//! Buffer layout and memory management.
//!
//! Collection of types describing and accessing the memory backing guest and host buffers:
//!
//! - [`format`] is the catalog of pixel formats the proxy can copy, and their layout
//! - [`MappedBuffer`] is a shared CPU mapping of a buffer with its per-plane layout
//! - [`dmabuf`] contains the helpers to synchronize CPU access to dma-bufs

pub mod dmabuf;
pub mod format;
mod mmap;

pub use mmap::{BufferLayout, MapError, MappedBuffer, PlaneLayout, WriteSync};

pub use drm_fourcc::{DrmFourcc as Fourcc, UnrecognizedFourcc};
