//! Math utilities and types

pub use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Right-handed perspective projection for Vulkan clip space
///
/// Y points down in framebuffer space and depth maps to `[0, 1]`.
pub fn perspective(fovy: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fovy * 0.5).tan();
    let mut m = Mat4::zeros();
    m[(0, 0)] = f / aspect;
    m[(1, 1)] = -f;
    m[(2, 2)] = far / (near - far);
    m[(2, 3)] = (near * far) / (near - far);
    m[(3, 2)] = -1.0;
    m
}

/// View matrix looking from `eye` towards `target`
pub fn look_at(eye: &Point3, target: &Point3, up: &Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, target, up)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project(m: &Mat4, p: Vec3) -> Vec3 {
        let clip = m * Vec4::new(p.x, p.y, p.z, 1.0);
        clip.xyz() / clip.w
    }

    #[test]
    fn test_perspective_depth_range() {
        let proj = perspective(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        assert_relative_eq!(project(&proj, Vec3::new(0.0, 0.0, -0.1)).z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(project(&proj, Vec3::new(0.0, 0.0, -100.0)).z, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_perspective_flips_y() {
        let proj = perspective(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        let p = project(&proj, Vec3::new(0.0, 1.0, -1.0));
        assert_relative_eq!(p.y, -1.0, epsilon = 1e-5);
    }
}
