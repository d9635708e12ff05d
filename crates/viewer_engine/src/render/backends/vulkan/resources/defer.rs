//! Deferred destruction
//!
//! Resources that an in-flight frame may still reference are pushed here
//! instead of being dropped. The queue holds K = buffering + 1 rows; a
//! resource pushed while row `r` is current is dropped when `next()` makes
//! `r` current again, i.e. on the K-th rotation after the push.
//!
//! `next()` must be called once per presented frame, after the fence of the
//! frame being reused has been waited on. The cadence is not checked.
//!
//! Long-lived resources owned by callers, such as mesh buffers and texture
//! images, are wrapped in [`Deferred`] so that dropping them routes through
//! the queue as well.

use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use ash::vk;

use super::buffer::Buffer;
use super::handle::{Owned, Sampler};
use super::image::Image;
use crate::render::backends::vulkan::state::swapchain::SwapchainHandle;

/// A resource waiting for destruction
pub enum Retired {
    /// Buffer and its allocation
    Buffer(Buffer),
    /// Image, its allocation and its default view
    Image(Image),
    /// Replaced swapchain and its image views
    Swapchain(SwapchainHandle),
    /// Reference to a shared sampler; the last one destroys it
    Sampler(Arc<Sampler>),
    /// Framebuffer
    Framebuffer(Owned<vk::Framebuffer>),
    /// Render pass
    RenderPass(Owned<vk::RenderPass>),
    /// Graphics pipeline
    Pipeline(Owned<vk::Pipeline>),
    /// Pipeline layout
    PipelineLayout(Owned<vk::PipelineLayout>),
    /// Descriptor set layout
    DescriptorSetLayout(Owned<vk::DescriptorSetLayout>),
    /// Descriptor pool and every set allocated from it
    DescriptorPool(Owned<vk::DescriptorPool>),
}

macro_rules! retired_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Retired {
                fn from(resource: $ty) -> Self {
                    Self::$variant(resource)
                }
            }
        )*
    };
}

retired_from! {
    Buffer => Buffer,
    Image => Image,
    Swapchain => SwapchainHandle,
    Sampler => Arc<Sampler>,
    Framebuffer => Owned<vk::Framebuffer>,
    RenderPass => Owned<vk::RenderPass>,
    Pipeline => Owned<vk::Pipeline>,
    PipelineLayout => Owned<vk::PipelineLayout>,
    DescriptorSetLayout => Owned<vk::DescriptorSetLayout>,
    DescriptorPool => Owned<vk::DescriptorPool>,
}

struct Rows<T> {
    rows: Vec<Vec<T>>,
    current: usize,
}

/// Ring of graveyards, one per rotation
pub struct DeferQueue<T = Retired> {
    inner: Mutex<Rows<T>>,
}

impl<T> DeferQueue<T> {
    /// Queue for `buffering` frames in flight
    pub fn new(buffering: usize) -> Self {
        let depth = buffering + 1;
        Self {
            inner: Mutex::new(Rows {
                rows: (0..depth).map(|_| Vec::new()).collect(),
                current: 0,
            }),
        }
    }

    /// Number of rows (buffering + 1)
    pub fn depth(&self) -> usize {
        self.lock().rows.len()
    }

    /// Retire a resource into the current row
    pub fn push(&self, resource: T) {
        self.lock().rows_current().push(resource);
    }

    /// Advance one rotation and drop the row that is now K rotations old
    pub fn next(&self) {
        let expired = {
            let mut inner = self.lock();
            inner.current = (inner.current + 1) % inner.rows.len();
            std::mem::take(inner.rows_current())
        };
        // drop outside the lock
        drop(expired);
    }

    /// Drop every pending resource
    pub fn flush(&self) {
        let expired: Vec<Vec<T>> = {
            let mut inner = self.lock();
            inner.rows.iter_mut().map(std::mem::take).collect()
        };
        drop(expired);
    }

    /// Resources still waiting
    pub fn len(&self) -> usize {
        self.lock().rows.iter().map(Vec::len).sum()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Rows<T>> {
        // rows stay consistent even if a destructor panicked mid-drop
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T> Rows<T> {
    fn rows_current(&mut self) -> &mut Vec<T> {
        &mut self.rows[self.current]
    }
}

impl<T> Drop for DeferQueue<T> {
    fn drop(&mut self) {
        let pending = self.len();
        if pending > 0 {
            log::debug!("Dropping {pending} deferred resources at shutdown");
        }
    }
}

/// A resource handed to a [`DeferQueue`] instead of being dropped
pub struct Deferred<T: Into<R>, R = Retired> {
    queue: Arc<DeferQueue<R>>,
    resource: ManuallyDrop<T>,
}

impl<T: Into<R>, R> Deferred<T, R> {
    /// Wrap `resource`; dropping the wrapper pushes it into `queue`
    pub fn new(queue: Arc<DeferQueue<R>>, resource: T) -> Self {
        Self {
            queue,
            resource: ManuallyDrop::new(resource),
        }
    }
}

impl<T: Into<R>, R> Deref for Deferred<T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T: Into<R>, R> Drop for Deferred<T, R> {
    fn drop(&mut self) {
        // SAFETY: `resource` is taken exactly once and never read afterwards
        let resource = unsafe { ManuallyDrop::take(&mut self.resource) };
        self.queue.push(resource.into());
    }
}
