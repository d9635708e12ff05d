//! End-to-end frames against a real device
//!
//! These need a Vulkan driver, a display and the compiled `default` shader
//! pair, so they are ignored by default:
//!
//! ```text
//! cargo test -p viewer_engine --test gpu_roundtrip -- --ignored
//! ```

use viewer_engine::core::config::{RendererConfig, ShaderConfig};
use viewer_engine::foundation::math::Mat4;
use viewer_engine::render::backends::vulkan::state::swapchain::{Swapchain, SwapchainSpec};
use viewer_engine::render::backends::vulkan::{InstanceCore, SurfaceCore, Gfx, DEFAULT_SHADER};
use viewer_engine::render::{Platform, RenderState, Renderer, StaticMesh, SurfaceProvider, Vertex, WindowDesc};
use viewer_engine::vk;

fn shader_config() -> ShaderConfig {
    let root = concat!(env!("CARGO_MANIFEST_DIR"), "/../../target/shaders/");
    let mut config = ShaderConfig::default();
    config.search_dirs.insert(0, root.to_string());
    config
}

fn hidden_window(width: u32, height: u32) -> Platform {
    viewer_engine::foundation::logging::init_for_tests();
    Platform::new(&WindowDesc::new("gpu test", width, height).hidden()).unwrap()
}

#[test]
#[ignore = "needs a Vulkan device and display"]
fn test_triangle_frame_roundtrip() {
    let platform = hidden_window(1, 1);
    let config = RendererConfig::new("gpu roundtrip")
        .with_msaa(1)
        .with_shaders(shader_config());
    let mut renderer = Renderer::new(&platform, config).unwrap();

    let vertices = [
        Vertex::new([0.0, 0.5, 0.0], [1.0; 4], [0.0, 0.0, 1.0], [0.5, 0.0]),
        Vertex::new([-0.5, -0.5, 0.0], [1.0; 4], [0.0, 0.0, 1.0], [0.0, 1.0]),
        Vertex::new([0.5, -0.5, 0.0], [1.0; 4], [0.0, 0.0, 1.0], [1.0, 1.0]),
    ];
    let mesh = StaticMesh::new(renderer.gfx(), &vertices, &[]).unwrap();
    let texture =
        viewer_engine::render::Texture::solid(renderer.gfx(), [255; 4], renderer.sampler().clone()).unwrap();

    // the first call may only rebuild the swapchain
    let mut started = false;
    for _ in 0..3 {
        if renderer.next_frame(vk::Extent2D { width: 1, height: 1 }).unwrap() {
            started = true;
            break;
        }
    }
    assert!(started, "no frame could be started");

    {
        let cmd = renderer.command_buffer().unwrap();
        let mut pipeline = renderer.bind_pipeline(cmd, RenderState::default(), DEFAULT_SHADER).unwrap();
        let identity: [[f32; 4]; 4] = Mat4::identity().into();
        pipeline.next_set(0).unwrap().write_pod(0, &identity).unwrap();
        let material = [[1.0_f32; 4], [0.0, 0.0, 1.0, 0.0]];
        pipeline
            .next_set(1)
            .unwrap()
            .write_pod(0, &material)
            .unwrap()
            .update(1, viewer_engine::render::Resource::Texture(&texture))
            .unwrap();
        pipeline.draw(mesh.view(), &[Mat4::identity()]).unwrap();
    }

    let frames_before = renderer.stats().frames;
    renderer.render().unwrap();
    assert_eq!(renderer.stats().frames, frames_before + 1);
    assert!(!renderer.is_recording());

    // the submitted frame may still read these; they wait in the queue
    let pending = renderer.gfx().deferred_len();
    drop(mesh);
    drop(texture);
    assert_eq!(renderer.gfx().deferred_len(), pending + 3);
}

#[test]
#[ignore = "needs a Vulkan device and display"]
fn test_render_without_frame_is_noop() {
    let platform = hidden_window(64, 64);
    let config = RendererConfig::new("gpu noop").with_shaders(shader_config());
    let mut renderer = Renderer::new(&platform, config).unwrap();

    assert!(!renderer.render().unwrap());
    assert!(!renderer.next_frame(vk::Extent2D { width: 0, height: 0 }).unwrap());
    assert_eq!(renderer.stats().skipped, 1);
    assert_eq!(renderer.stats().frames, 0);
}

fn start_frame(renderer: &mut Renderer, extent: vk::Extent2D) -> bool {
    (0..3).any(|_| renderer.next_frame(extent).unwrap())
}

#[test]
#[ignore = "needs a Vulkan device and display"]
fn test_cancelled_frame_does_not_stall_the_next() {
    let platform = hidden_window(64, 64);
    let config = RendererConfig::new("gpu cancel").with_shaders(shader_config());
    let mut renderer = Renderer::new(&platform, config).unwrap();
    let extent = vk::Extent2D { width: 64, height: 64 };

    assert!(!renderer.cancel_frame());
    assert!(start_frame(&mut renderer, extent));
    renderer.begin_secondary().unwrap();
    let skipped = renderer.stats().skipped;
    assert!(renderer.cancel_frame());
    assert!(!renderer.is_recording());
    assert_eq!(renderer.stats().skipped, skipped + 1);

    // the same slot's fence and semaphore are reused without hanging
    for _ in 0..4 {
        assert!(start_frame(&mut renderer, extent), "no frame after cancelling");
        renderer.render().unwrap();
    }
    assert_eq!(renderer.stats().frames, 4);
    assert!(renderer.swapchain_generation() > 1, "cancelling should rebuild the swapchain");
}

#[test]
#[ignore = "needs a Vulkan device and display"]
fn test_resize_retires_previous_swapchain() {
    let platform = hidden_window(800, 600);
    let instance = InstanceCore::new("gpu resize", &platform.required_extensions().unwrap(), false).unwrap();
    let raw = platform.create_surface(&instance.instance).unwrap();
    let surface = SurfaceCore::new(instance, raw);
    let gfx = Gfx::new(&surface, 2).unwrap();

    let large = SwapchainSpec::new(vk::Extent2D { width: 800, height: 600 });
    let small = SwapchainSpec::new(vk::Extent2D { width: 400, height: 300 });
    let mut swapchain = Swapchain::new(gfx.clone(), surface, large);

    swapchain.refresh(large).unwrap();
    assert_eq!(swapchain.generation(), 1);
    let retired = gfx.deferred_len();

    swapchain.refresh(small).unwrap();
    assert_eq!(swapchain.generation(), 2);
    assert_eq!(gfx.deferred_len(), retired + 1);
    assert!(swapchain.is_ready());

    // the old swapchain outlives `buffering` rotations and is then destroyed
    gfx.rotate_deferred();
    gfx.rotate_deferred();
    gfx.rotate_deferred();
    assert_eq!(gfx.deferred_len(), 0);
}
