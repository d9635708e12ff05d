//! Minimal scene model for the viewer
//!
//! A scene is a flat list of nodes. Each node has a transform and a closed set
//! of components; the viewer dispatches on them with `match`.

use bytemuck::{Pod, Zeroable};
use viewer_engine::foundation::math::{look_at, perspective, Mat4, Point3, Vec3};
use viewer_engine::render::Vertex;

/// Uniform block of the `default` vertex shader, set 0 binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
}

/// Uniform block of the `default` fragment shader, set 1 binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub base_color: [f32; 4],
    /// xyz towards the light, w = 1.0 enables lighting
    pub light: [f32; 4],
}

/// Surface appearance
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Material {
    /// Flat colour
    Unlit { color: [f32; 4] },
    /// Colour with one directional light
    Lit { color: [f32; 4], light_dir: Vec3 },
}

impl Material {
    /// Uniform data written to the material set
    pub fn uniform(&self) -> MaterialUniform {
        match *self {
            Self::Unlit { color } => MaterialUniform {
                base_color: color,
                light: [0.0, 0.0, 1.0, 0.0],
            },
            Self::Lit { color, light_dir } => {
                let dir = light_dir.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::z);
                MaterialUniform {
                    base_color: color,
                    light: [dir.x, dir.y, dir.z, 1.0],
                }
            }
        }
    }

    /// Switch between lit and unlit keeping the colour
    pub fn toggled(&self) -> Self {
        match *self {
            Self::Unlit { color } => Self::Lit {
                color,
                light_dir: Vec3::new(0.3, -0.6, 1.0),
            },
            Self::Lit { color, .. } => Self::Unlit { color },
        }
    }
}

/// Perspective camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Point3,
    pub target: Point3,
    /// Vertical field of view in radians
    pub fovy: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn looking_at(eye: Point3, target: Point3) -> Self {
        Self {
            eye,
            target,
            fovy: 45.0_f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        perspective(self.fovy, aspect.max(f32::EPSILON), self.near, self.far)
            * look_at(&self.eye, &self.target, &Vec3::y())
    }

    pub fn uniform(&self, aspect: f32) -> CameraUniform {
        CameraUniform {
            view_proj: self.view_proj(aspect).into(),
        }
    }
}

/// What a node carries
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    /// Index into the viewer's mesh list, drawn with `material`
    Mesh { mesh: usize, material: Material },
    Camera(Camera),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub transform: Mat4,
    pub components: Vec<Component>,
}

impl Node {
    pub fn new(name: impl Into<String>, transform: Mat4) -> Self {
        Self {
            name: name.into(),
            transform,
            components: Vec::new(),
        }
    }

    pub fn with(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }
}

/// One mesh draw collected from the scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    pub mesh: usize,
    pub material: Material,
    pub transform: Mat4,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    pub nodes: Vec<Node>,
}

impl Scene {
    pub fn add(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// First camera in the scene, placed by its node
    pub fn camera(&self) -> Option<Camera> {
        self.nodes.iter().find_map(|node| {
            node.components.iter().find_map(|component| match component {
                Component::Camera(camera) => Some(Camera {
                    eye: node.transform.transform_point(&camera.eye),
                    target: node.transform.transform_point(&camera.target),
                    ..*camera
                }),
                Component::Mesh { .. } => None,
            })
        })
    }

    /// Every mesh component with its node transform
    pub fn draws(&self) -> Vec<DrawItem> {
        let mut draws = Vec::new();
        for node in &self.nodes {
            for component in &node.components {
                match component {
                    Component::Mesh { mesh, material } => draws.push(DrawItem {
                        mesh: *mesh,
                        material: *material,
                        transform: node.transform,
                    }),
                    Component::Camera(_) => {}
                }
            }
        }
        draws
    }

    /// Toggle lighting on every material
    pub fn toggle_lighting(&mut self) {
        for node in &mut self.nodes {
            for component in &mut node.components {
                if let Component::Mesh { material, .. } = component {
                    *material = material.toggled();
                }
            }
        }
    }
}

/// A single RGB triangle facing +Z
pub fn triangle() -> (Vec<Vertex>, Vec<u32>) {
    let normal = [0.0, 0.0, 1.0];
    let vertices = vec![
        Vertex::new([0.0, 0.8, 0.0], [1.0, 0.2, 0.2, 1.0], normal, [0.5, 0.0]),
        Vertex::new([-0.8, -0.6, 0.0], [0.2, 1.0, 0.2, 1.0], normal, [0.0, 1.0]),
        Vertex::new([0.8, -0.6, 0.0], [0.2, 0.2, 1.0, 1.0], normal, [1.0, 1.0]),
    ];
    (vertices, vec![0, 1, 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_material_uniforms() {
        let unlit = Material::Unlit { color: [1.0, 0.0, 0.0, 1.0] };
        assert_eq!(unlit.uniform().base_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(unlit.uniform().light[3], 0.0);

        let lit = Material::Lit {
            color: [1.0; 4],
            light_dir: Vec3::new(0.0, 2.0, 0.0),
        };
        let uniform = lit.uniform();
        assert_relative_eq!(uniform.light[1], 1.0);
        assert_eq!(uniform.light[3], 1.0);
    }

    #[test]
    fn test_degenerate_light_direction() {
        let lit = Material::Lit {
            color: [1.0; 4],
            light_dir: Vec3::zeros(),
        };
        assert_eq!(lit.uniform().light, [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_toggle_keeps_color() {
        let color = [0.1, 0.2, 0.3, 1.0];
        let lit = Material::Unlit { color }.toggled();
        assert!(matches!(lit, Material::Lit { color: c, .. } if c == color));
        assert_eq!(lit.toggled(), Material::Unlit { color });
    }

    #[test]
    fn test_draws_follow_nodes() {
        let mut scene = Scene::default();
        let shift = Mat4::new_translation(&Vec3::new(1.0, 0.0, 0.0));
        scene.add(
            Node::new("camera", Mat4::identity())
                .with(Component::Camera(Camera::looking_at(Point3::new(0.0, 0.0, 3.0), Point3::origin()))),
        );
        scene.add(Node::new("tri", shift).with(Component::Mesh {
            mesh: 0,
            material: Material::Unlit { color: [1.0; 4] },
        }));

        let draws = scene.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].transform, shift);
        assert!(scene.camera().is_some());

        scene.toggle_lighting();
        assert!(matches!(scene.draws()[0].material, Material::Lit { .. }));
    }

    #[test]
    fn test_camera_placed_by_node() {
        let mut scene = Scene::default();
        let lift = Mat4::new_translation(&Vec3::new(0.0, 2.0, 0.0));
        scene.add(Node::new("camera", lift).with(Component::Camera(Camera::looking_at(
            Point3::new(0.0, 0.0, 3.0),
            Point3::origin(),
        ))));
        let camera = scene.camera().unwrap();
        assert_relative_eq!(camera.eye.y, 2.0);
        assert_relative_eq!(camera.target.y, 2.0);
    }

    #[test]
    fn test_triangle_in_front_of_camera() {
        let (vertices, indices) = triangle();
        assert_eq!(vertices.len(), 3);
        assert_eq!(indices, vec![0, 1, 2]);

        let camera = Camera::looking_at(Point3::new(0.0, 0.0, 3.0), Point3::origin());
        let clip = camera.view_proj(1.0) * nalgebra::Vector4::new(0.0, 0.0, 0.0, 1.0);
        let depth = clip.z / clip.w;
        assert!(depth > 0.0 && depth < 1.0);
    }
}
