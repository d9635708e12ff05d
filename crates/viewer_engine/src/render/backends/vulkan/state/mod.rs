//! Per-frame and presentation state

pub mod frame_ring;
pub mod swapchain;
pub mod sync;
