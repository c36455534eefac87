//! Protocol-related utilities
//!
//! This module contains the client facing half of the proxy. Clients talk to the proxy as if
//! it was their compositor, every object they create is mirrored on the host:
//!
//! - [`compositor`] proxies surfaces and regions, and is where client content gets prepared
//!   for the host
//! - [`shm`] and [`dmabuf`] create the [`buffer`]s clients attach to their surfaces
//! - [`viewporter`] keeps the client side viewport state of surfaces
//! - [`transform`] translates between guest and host coordinates
//!
//! None of these modules talks to a socket. Requests are handed to them already decoded by
//! the protocol layer, and everything towards the host goes through the traits found in
//! [`compositor::host`].

pub mod buffer;
pub mod compositor;
pub mod dmabuf;
pub mod shm;
pub mod transform;
pub mod viewporter;
