//! Window platform
//!
//! [`Platform`] owns the GLFW context and the one window. Event handling
//! writes into a [`WindowState`] owned by the platform and handed to whoever
//! needs it, so there is no global window registry.

use ash::vk;
use thiserror::Error;

use crate::render::backends::vulkan::initialization::{VulkanError, VulkanResult};

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("GLFW initialization failed")]
    InitializationFailed,

    #[error("Window creation failed")]
    CreationFailed,

    #[error("GLFW error: {0}")]
    GlfwError(String),
}

pub type WindowResult<T> = Result<T, WindowError>;

impl From<WindowError> for VulkanError {
    fn from(error: WindowError) -> Self {
        VulkanError::Window(error.to_string())
    }
}

/// What the renderer needs from a window system
pub trait SurfaceProvider {
    /// Instance extensions required to present to this window
    fn required_extensions(&self) -> VulkanResult<Vec<String>>;

    /// Create a presentation surface; the caller takes ownership
    fn create_surface(&self, instance: &ash::Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels; zero area means minimized
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

/// Window state updated from events
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowState {
    pub framebuffer: vk::Extent2D,
    pub position: (i32, i32),
    pub cursor: (f64, f64),
    /// Set when the framebuffer size changed since the last `take_resized`
    pub resized: bool,
    pub close_requested: bool,
}

impl WindowState {
    /// Apply one event
    pub fn apply(&mut self, event: &glfw::WindowEvent) {
        match *event {
            glfw::WindowEvent::FramebufferSize(width, height) => {
                let extent = vk::Extent2D {
                    width: width.max(0) as u32,
                    height: height.max(0) as u32,
                };
                if extent != self.framebuffer {
                    self.framebuffer = extent;
                    self.resized = true;
                }
            }
            glfw::WindowEvent::Pos(x, y) => self.position = (x, y),
            glfw::WindowEvent::CursorPos(x, y) => self.cursor = (x, y),
            glfw::WindowEvent::Close => self.close_requested = true,
            glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => self.close_requested = true,
            _ => {}
        }
    }

    /// Whether the framebuffer was resized; clears the flag
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    /// Zero-area framebuffers are not rendered to
    pub fn is_minimized(&self) -> bool {
        self.framebuffer.width == 0 || self.framebuffer.height == 0
    }
}

/// Window creation parameters
#[derive(Debug, Clone)]
pub struct WindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub position: Option<(i32, i32)>,
    pub visible: bool,
}

impl WindowDesc {
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            width,
            height,
            position: None,
            visible: true,
        }
    }

    pub fn with_position(mut self, x: i32, y: i32) -> Self {
        self.position = Some((x, y));
        self
    }

    /// Hidden windows still get a presentable surface
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// GLFW context, the window and its event state
pub struct Platform {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    state: WindowState,
}

impl Platform {
    pub fn new(desc: &WindowDesc) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::GlfwError("Vulkan loader not found".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));
        glfw.window_hint(glfw::WindowHint::Visible(desc.visible));

        let (mut window, events) = glfw
            .create_window(desc.width, desc.height, &desc.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        if let Some((x, y)) = desc.position {
            window.set_pos(x, y);
        }

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_pos_polling(true);
        window.set_cursor_pos_polling(true);
        window.set_framebuffer_size_polling(true);

        let (width, height) = window.get_framebuffer_size();
        let state = WindowState {
            framebuffer: vk::Extent2D {
                width: width.max(0) as u32,
                height: height.max(0) as u32,
            },
            position: window.get_pos(),
            ..WindowState::default()
        };

        log::info!("Window '{}' {}x{} created", desc.title, desc.width, desc.height);
        Ok(Self {
            glfw,
            window,
            events,
            state,
        })
    }

    /// Poll GLFW and fold the events into the window state
    ///
    /// Events are also returned for input handling.
    pub fn poll(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.poll_events();
        let events: Vec<_> = glfw::flush_messages(&self.events).map(|(_, event)| event).collect();
        for event in &events {
            self.state.apply(event);
        }
        if self.state.close_requested {
            self.window.set_should_close(true);
        }
        events
    }

    /// Block until an event arrives, e.g. while minimized
    pub fn wait(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.wait_events();
        self.poll()
    }

    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut WindowState {
        &mut self.state
    }

    /// Window size in screen coordinates
    pub fn window_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }
}

impl SurfaceProvider for Platform {
    fn required_extensions(&self) -> VulkanResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()).into())
    }

    fn create_surface(&self, instance: &ash::Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance.handle(), std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {result:?}")).into())
        }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        self.state.framebuffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_sets_flag_once() {
        let mut state = WindowState::default();
        state.apply(&glfw::WindowEvent::FramebufferSize(800, 600));
        assert_eq!(state.framebuffer, vk::Extent2D { width: 800, height: 600 });
        assert!(state.take_resized());
        assert!(!state.take_resized());

        state.apply(&glfw::WindowEvent::FramebufferSize(800, 600));
        assert!(!state.take_resized(), "same size is not a resize");
    }

    #[test]
    fn test_minimized_window() {
        let mut state = WindowState::default();
        assert!(state.is_minimized());
        state.apply(&glfw::WindowEvent::FramebufferSize(0, 300));
        assert!(state.is_minimized());
        state.apply(&glfw::WindowEvent::FramebufferSize(400, 300));
        assert!(!state.is_minimized());
    }

    #[test]
    fn test_close_and_position_events() {
        let mut state = WindowState::default();
        state.apply(&glfw::WindowEvent::Pos(10, 20));
        assert_eq!(state.position, (10, 20));
        assert!(!state.close_requested);
        state.apply(&glfw::WindowEvent::Close);
        assert!(state.close_requested);
    }
}
