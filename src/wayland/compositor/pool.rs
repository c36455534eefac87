//! Host buffers client content is copied into
//!
//! Every surface owns a pool of [`OutputBuffer`]s. A buffer is either busy, attached to the
//! host surface and possibly read by the host, or released and free to be reused for new
//! content. Both lists are ordered with the most recently moved buffer first.

use std::collections::{HashMap, VecDeque};

use tracing::trace;
use wayland_server::protocol::wl_shm;

use super::HostBufferId;
use crate::{
    backend::allocator::MappedBuffer,
    utils::{Buffer, Logical, Region, Size},
    xwayland::shape::ShapeImage,
};

/// Handle of a buffer in an [`OutputBufferPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputBufferId(u64);

/// A host visible buffer content gets copied into
#[derive(Debug)]
pub struct OutputBuffer {
    pub(crate) size: Size<i32, Buffer>,
    pub(crate) format: wl_shm::Format,
    pub(crate) host_buffer: HostBufferId,
    pub(crate) mapping: MappedBuffer,
    /// Damage in surface coordinates, since the buffer was last written
    pub(crate) surface_damage: Region<Logical>,
    /// Damage in buffer coordinates, since the buffer was last written
    pub(crate) buffer_damage: Region<Buffer>,
    /// Stamped out image of shaped content
    pub(crate) shape_image: Option<ShapeImage>,
}

impl OutputBuffer {
    /// Size in pixels
    pub fn size(&self) -> Size<i32, Buffer> {
        self.size
    }

    /// Pixel format
    pub fn format(&self) -> wl_shm::Format {
        self.format
    }

    /// The matching buffer of the host
    pub fn host_buffer(&self) -> HostBufferId {
        self.host_buffer
    }

    /// Mapping of the host buffer
    pub fn mapping(&self) -> &MappedBuffer {
        &self.mapping
    }

    /// Accumulated damage in surface coordinates
    pub fn surface_damage(&self) -> &Region<Logical> {
        &self.surface_damage
    }

    /// Accumulated damage in buffer coordinates
    pub fn buffer_damage(&self) -> &Region<Buffer> {
        &self.buffer_damage
    }

    /// Whether the buffer holds shaped content
    pub fn is_shaped(&self) -> bool {
        self.shape_image.is_some()
    }
}

/// Whether a pooled buffer may be in use by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Attached to the host surface
    Busy,
    /// Free to be written
    Released,
}

/// The host buffers of a surface
#[derive(Debug, Default)]
pub struct OutputBufferPool {
    buffers: HashMap<OutputBufferId, OutputBuffer>,
    busy: VecDeque<OutputBufferId>,
    released: VecDeque<OutputBufferId>,
    next_id: u64,
}

impl OutputBufferPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new buffer as the most recently released one
    pub fn insert_released(&mut self, buffer: OutputBuffer) -> OutputBufferId {
        let id = OutputBufferId(self.next_id);
        self.next_id += 1;
        trace!(?id, host_buffer = ?buffer.host_buffer, size = ?buffer.size, "New output buffer");
        self.buffers.insert(id, buffer);
        self.released.push_front(id);
        id
    }

    /// Look for a released buffer matching `pred`
    ///
    /// Released buffers are visited from the most recently released one. Every buffer visited
    /// before a match is removed from the pool and handed to `evict`. The matching buffer stays
    /// released.
    pub fn select_released(
        &mut self,
        pred: impl Fn(&OutputBuffer) -> bool,
        mut evict: impl FnMut(OutputBuffer),
    ) -> Option<OutputBufferId> {
        while let Some(&id) = self.released.front() {
            let Some(buffer) = self.buffers.get(&id) else {
                self.released.pop_front();
                continue;
            };
            if pred(buffer) {
                return Some(id);
            }
            self.released.pop_front();
            if let Some(buffer) = self.buffers.remove(&id) {
                trace!(?id, host_buffer = ?buffer.host_buffer, "Evicting output buffer");
                evict(buffer);
            }
        }
        None
    }

    fn unlink(&mut self, id: OutputBufferId) {
        self.busy.retain(|b| *b != id);
        self.released.retain(|b| *b != id);
    }

    /// Move a buffer to the front of the busy list
    pub fn mark_busy(&mut self, id: OutputBufferId) {
        if !self.buffers.contains_key(&id) {
            return;
        }
        self.unlink(id);
        self.busy.push_front(id);
    }

    /// Move a buffer to the front of the released list
    pub fn mark_released(&mut self, id: OutputBufferId) {
        if !self.buffers.contains_key(&id) {
            return;
        }
        self.unlink(id);
        self.released.push_front(id);
    }

    /// Handle a release of the host, returns false if the buffer is not part of the pool
    pub fn release_host(&mut self, host_buffer: HostBufferId) -> bool {
        let id = self
            .buffers
            .iter()
            .find(|(_, buffer)| buffer.host_buffer == host_buffer)
            .map(|(id, _)| *id);
        match id {
            Some(id) => {
                trace!(?id, ?host_buffer, "Output buffer released by host");
                self.mark_released(id);
                true
            }
            None => false,
        }
    }

    /// State of a buffer of the pool
    pub fn state(&self, id: OutputBufferId) -> Option<BufferState> {
        if self.busy.contains(&id) {
            Some(BufferState::Busy)
        } else if self.released.contains(&id) {
            Some(BufferState::Released)
        } else {
            None
        }
    }

    /// Access a buffer
    pub fn get(&self, id: OutputBufferId) -> Option<&OutputBuffer> {
        self.buffers.get(&id)
    }

    /// Mutably access a buffer
    pub fn get_mut(&mut self, id: OutputBufferId) -> Option<&mut OutputBuffer> {
        self.buffers.get_mut(&id)
    }

    /// Visit every buffer, busy or not
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut OutputBuffer)) {
        self.buffers.values_mut().for_each(|buffer| f(buffer));
    }

    /// Busy buffers, most recent first
    pub fn busy(&self) -> impl Iterator<Item = OutputBufferId> + '_ {
        self.busy.iter().copied()
    }

    /// Released buffers, most recent first
    pub fn released(&self) -> impl Iterator<Item = OutputBufferId> + '_ {
        self.released.iter().copied()
    }

    /// Amount of buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the pool holds no buffers
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Remove all buffers, released ones first
    pub fn drain(&mut self) -> Vec<OutputBuffer> {
        let order: Vec<_> = self.released.drain(..).chain(self.busy.drain(..)).collect();
        order
            .into_iter()
            .filter_map(|id| self.buffers.remove(&id))
            .collect()
    }
}
