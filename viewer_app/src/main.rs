//! Scene viewer demo
//!
//! Draws a triangle with the `default` shader pair. Pass an image path to
//! texture it.
//!
//! Keys: `M` cycles MSAA, `P` cycles present modes, `C` toggles the
//! colour space, `L` toggles lighting, `Escape` quits.

mod scene;
mod settings;

use glfw::{Action, Key, WindowEvent};
use thiserror::Error;
use viewer_engine::core::config::{ColorSpace, Config, ConfigError, PresentMode};
use viewer_engine::foundation::math::{Mat4, Point3};
use viewer_engine::render::backends::vulkan::DEFAULT_SHADER;
use viewer_engine::render::{
    Platform, RenderState, Renderer, Resource, StaticMesh, Texture, VulkanError, VulkanResult, WindowDesc, WindowError,
};
use viewer_engine::vk;

use scene::{Camera, Component, Material, Node, Scene};
use settings::{ViewerConfig, SETTINGS_FILE};

const MSAA_STEPS: [u32; 4] = [1, 2, 4, 8];
const PRESENT_MODES: [PresentMode; 4] = [
    PresentMode::Fifo,
    PresentMode::Mailbox,
    PresentMode::Immediate,
    PresentMode::FifoRelaxed,
];

#[derive(Error, Debug)]
enum ViewerError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Render(#[from] VulkanError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

struct Viewer {
    // dropped first: waits for the GPU; meshes and textures retire afterwards
    renderer: Renderer,
    meshes: Vec<StaticMesh>,
    texture: Texture,
    scene: Scene,
    settings: ViewerConfig,
    platform: Platform,
}

impl Viewer {
    fn new(mut settings: ViewerConfig, image_path: Option<String>) -> Result<Self, ViewerError> {
        let mut desc = WindowDesc::new("Scene Viewer", settings.window.width, settings.window.height);
        if let Some((x, y)) = settings.window.position {
            desc = desc.with_position(x, y);
        }
        let platform = Platform::new(&desc)?;
        let renderer = Renderer::new(&platform, settings.renderer_config())?;
        if !renderer.shaders().contains(DEFAULT_SHADER) {
            return Err(VulkanError::ShaderNotFound(format!(
                "{DEFAULT_SHADER} (build with VULKAN_SDK set to compile resources/shaders)"
            ))
            .into());
        }

        let (vertices, indices) = scene::triangle();
        let meshes = vec![StaticMesh::new(renderer.gfx(), &vertices, &indices)?];

        let texture = match image_path {
            Some(path) => {
                let pixels = image::open(&path)?.to_rgba8();
                let extent = vk::Extent2D {
                    width: pixels.width(),
                    height: pixels.height(),
                };
                log::info!("Loaded {path} ({}x{})", extent.width, extent.height);
                settings.add_recent(path);
                Texture::from_pixels(
                    renderer.gfx(),
                    pixels.as_raw(),
                    extent,
                    ColorSpace::Srgb,
                    renderer.sampler().clone(),
                )?
            }
            None => Texture::solid(renderer.gfx(), [255; 4], renderer.sampler().clone())?,
        };

        let mut scene = Scene::default();
        scene.add(Node::new("camera", Mat4::identity()).with(Component::Camera(Camera::looking_at(
            Point3::new(0.0, 0.0, 3.0),
            Point3::origin(),
        ))));
        scene.add(Node::new("triangle", Mat4::identity()).with(Component::Mesh {
            mesh: 0,
            material: Material::Unlit { color: [1.0; 4] },
        }));

        let mut viewer = Self {
            renderer,
            meshes,
            texture,
            scene,
            settings,
            platform,
        };
        viewer.update_title();
        Ok(viewer)
    }

    fn run(&mut self) -> Result<(), ViewerError> {
        while !self.platform.should_close() {
            let events = if self.platform.state().is_minimized() {
                self.platform.wait()
            } else {
                self.platform.poll()
            };
            for event in &events {
                self.handle_event(event);
            }
            if self.platform.state_mut().take_resized() {
                let extent = self.platform.state().framebuffer;
                log::debug!("Framebuffer resized to {}x{}", extent.width, extent.height);
            }

            self.frame()?;
        }

        self.renderer.wait_idle()?;
        let stats = self.renderer.stats();
        log::info!("{} frame(s) rendered, {} skipped", stats.frames, stats.skipped);

        self.settings.remember_window(self.platform.window_size(), self.platform.state().position);
        self.settings.save_to_file(SETTINGS_FILE)?;
        Ok(())
    }

    fn handle_event(&mut self, event: &WindowEvent) {
        let WindowEvent::Key(key, _, Action::Press, _) = *event else {
            return;
        };
        match key {
            Key::M => self.cycle_msaa(),
            Key::P => self.cycle_present_mode(),
            Key::C => {
                let next = match self.renderer.color_space() {
                    ColorSpace::Srgb => ColorSpace::Linear,
                    ColorSpace::Linear => ColorSpace::Srgb,
                };
                self.renderer.set_color_space(next);
                self.settings.color_space = next;
            }
            Key::L => self.scene.toggle_lighting(),
            _ => return,
        }
        self.update_title();
    }

    fn cycle_msaa(&mut self) {
        let current = self.renderer.msaa_samples();
        let next = MSAA_STEPS
            .iter()
            .position(|&s| s == current)
            .map_or(MSAA_STEPS[0], |i| MSAA_STEPS[(i + 1) % MSAA_STEPS.len()]);
        match self.renderer.set_msaa(next) {
            Ok(actual) => {
                if actual != next {
                    log::info!("{next}x MSAA unsupported, using {actual}x");
                }
                self.settings.msaa_samples = actual;
            }
            Err(e) => log::warn!("MSAA change rejected: {e}"),
        }
    }

    fn cycle_present_mode(&mut self) {
        let current = self.renderer.present_mode();
        let start = PRESENT_MODES.iter().position(|&m| m == current).unwrap_or(0);
        for step in 1..=PRESENT_MODES.len() {
            let mode = PRESENT_MODES[(start + step) % PRESENT_MODES.len()];
            match self.renderer.set_present_mode(mode) {
                Ok(()) => {
                    self.settings.present_mode = mode;
                    return;
                }
                Err(e) => log::debug!("Skipping present mode: {e}"),
            }
        }
    }

    fn update_title(&mut self) {
        let title = format!(
            "Scene Viewer - {}x MSAA, {:?}, {:?}",
            self.renderer.msaa_samples(),
            self.renderer.present_mode(),
            self.renderer.color_space()
        );
        self.platform.set_title(&title);
    }

    fn frame(&mut self) -> VulkanResult<()> {
        let extent = self.platform.state().framebuffer;
        if !self.renderer.next_frame(extent)? {
            return Ok(());
        }

        let aspect = extent.width as f32 / extent.height as f32;
        let camera = self
            .scene
            .camera()
            .unwrap_or_else(|| Camera::looking_at(Point3::new(0.0, 0.0, 3.0), Point3::origin()));

        let cmd = self.renderer.command_buffer()?;
        {
            let mut pipeline = self.renderer.bind_pipeline(cmd, RenderState::default(), DEFAULT_SHADER)?;
            pipeline.next_set(0)?.write_pod(0, &camera.uniform(aspect))?;

            for item in self.scene.draws() {
                let Some(mesh) = self.meshes.get(item.mesh) else {
                    log::warn!("Node references missing mesh {}", item.mesh);
                    continue;
                };
                pipeline
                    .next_set(1)?
                    .write_pod(0, &item.material.uniform())?
                    .update(1, Resource::Texture(&self.texture))?;
                pipeline.draw(mesh.view(), &[item.transform])?;
            }
        }

        self.renderer.render()?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    viewer_engine::foundation::logging::init();
    log::info!("Starting scene viewer");

    let settings = ViewerConfig::load_or_default(SETTINGS_FILE)?;
    let image_path = std::env::args().nth(1);

    let mut viewer = Viewer::new(settings, image_path)?;
    viewer.run()?;

    log::info!("Scene viewer finished");
    Ok(())
}
