#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # Surface buffer core of a guest side wayland proxy
//!
//! Virtual machines present their wayland clients on the desktop of the host through a proxy
//! compositor running in the guest. The proxy accepts clients like a regular compositor and
//! forwards their objects to the compositor of the host, over a virtualization transport.
//!
//! Most objects can be forwarded as they are. Surfaces can not: memory shared by a guest client
//! is invisible to the host, so the proxy copies the damaged parts of client content into
//! buffers the transport allocated for the host, translates coordinates between guest and host
//! scale, synchronizes GPU rendering, and stamps the shape of X11 windows out of their content.
//! This crate implements that part.
//!
//! ## Structure of the crate
//!
//! - [`backend`] contains helpers for interacting with the operating
//!   system: pixel format layouts, memory mappings, dma-buf and GPU fence synchronization,
//!   and the interface to the virtualization transport.
//! - [`wayland`] contains the state of client objects and the logic translating their
//!   requests for the host.
//! - [`xwayland`] contains what surfaces need to know about the X11 windows they display.
//!
//! ## General principles
//!
//! ### The event loop and state handling
//!
//! The proxy is built around [`calloop`], a callback-oriented event loop. All state lives in a
//! [`CompositorState`](wayland::compositor::CompositorState) passed down to the callbacks, events
//! from the host are delivered through a
//! [`HostEventSource`](wayland::compositor::HostEventSource). No state is global: everything the
//! surfaces interact with, the host compositor, the client, the transport and the X11 window
//! manager, is handed in as a trait object through the
//! [`ProxyContext`](wayland::compositor::ProxyContext).
//!
//! ### Logging
//!
//! This crate makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```
//!
//! If you do not want to use [`tracing`], refer to [`log compatibility`](tracing#log-compatibility)
//! for how to forward the debug output to other `log` compatible frameworks.

pub mod backend;
pub mod config;
pub mod utils;
pub mod wayland;
pub mod xwayland;

pub mod reexports;
