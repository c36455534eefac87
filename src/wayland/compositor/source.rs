//! Delivery of host events through the event loop
//!
//! The connection to the host lives on its own, [`HostEventSender`]s queue the events it
//! receives and the [`HostEventSource`] hands them to the event loop in order:
//!
//! ```no_run
//! # use guest_proxy::wayland::compositor::*;
//! # use guest_proxy::reexports::calloop::EventLoop;
//! # fn ctx() -> ProxyContext { unimplemented!() }
//! let mut event_loop = EventLoop::<CompositorState>::try_new().unwrap();
//! let (sender, source) = HostEventSource::new();
//! event_loop
//!     .handle()
//!     .insert_source(source, |event, _, state| state.handle_host_event(event))
//!     .unwrap();
//!
//! sender.send(HostEvent::BufferRelease(HostBufferId(1)));
//! # let mut state = CompositorState::new(ctx());
//! event_loop.dispatch(None, &mut state).unwrap();
//! ```

use calloop::{
    channel::{self, Channel, ChannelError, Sender},
    EventSource, Poll, PostAction, Readiness, Token, TokenFactory,
};
use tracing::{debug, trace};

use super::HostEvent;

/// Queues host events for a [`HostEventSource`]
#[derive(Debug, Clone)]
pub struct HostEventSender {
    sender: Sender<HostEvent>,
}

impl HostEventSender {
    /// Queue an event
    ///
    /// Events sent after the source was dropped are discarded.
    pub fn send(&self, event: HostEvent) {
        if self.sender.send(event).is_err() {
            debug!(?event, "Host event source is gone, dropping event");
        }
    }
}

/// Event source of host events
///
/// This implements [`EventSource`] and may be inserted into an event loop.
#[derive(Debug)]
pub struct HostEventSource {
    channel: Channel<HostEvent>,
}

impl HostEventSource {
    /// Create a new source and the sender feeding it
    pub fn new() -> (HostEventSender, HostEventSource) {
        let (sender, channel) = channel::channel();
        (HostEventSender { sender }, HostEventSource { channel })
    }
}

impl EventSource for HostEventSource {
    type Event = HostEvent;
    type Metadata = ();
    type Ret = ();
    type Error = ChannelError;

    fn process_events<F>(
        &mut self,
        readiness: Readiness,
        token: Token,
        mut callback: F,
    ) -> Result<PostAction, Self::Error>
    where
        F: FnMut(Self::Event, &mut Self::Metadata) -> Self::Ret,
    {
        self.channel.process_events(readiness, token, |event, _| match event {
            channel::Event::Msg(event) => {
                trace!(?event, "Dispatching host event");
                callback(event, &mut ());
            }
            channel::Event::Closed => debug!("All host event senders are gone"),
        })
    }

    fn register(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.channel.register(poll, token_factory)
    }

    fn reregister(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.channel.reregister(poll, token_factory)
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        self.channel.unregister(poll)
    }
}
