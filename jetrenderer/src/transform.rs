use glam::{Mat4, Vec3};

/// Local transform of a mesh. Rotation is Euler angles in radians.
///
/// The model matrix is rebuilt on every call; meshes are animated every frame
/// so there is nothing worth caching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub scale: Vec3,
    pub rotation: Vec3,
}

impl Transform {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// `translate · scale · rotateX · rotateY · rotateZ`
    pub fn model(&self) -> Mat4 {
        let translation = Mat4::from_translation(self.position);
        let scale = Mat4::from_scale(self.scale);
        let rotation = Mat4::from_rotation_x(self.rotation.x)
            * Mat4::from_rotation_y(self.rotation.y)
            * Mat4::from_rotation_z(self.rotation.z);
        translation * scale * rotation
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Vec3::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn default_is_identity() {
        assert_eq!(Transform::default().model(), Mat4::IDENTITY);
    }

    #[test]
    fn scale_applies_before_translation() {
        let transform = Transform {
            position: Vec3::new(1.0, 0.0, 0.0),
            scale: Vec3::splat(2.0),
            rotation: Vec3::ZERO,
        };
        let p = transform.model().transform_point3(Vec3::new(1.0, 1.0, 1.0));
        assert!(p.abs_diff_eq(Vec3::new(3.0, 2.0, 2.0), 1e-6));
    }

    #[test]
    fn rotation_order_is_x_then_y_then_z() {
        let transform = Transform {
            rotation: Vec3::new(FRAC_PI_2, FRAC_PI_2, 0.0),
            ..Default::default()
        };
        // Rx · Ry applied to +X: Ry sends it to -Z, Rx then sends -Z to +Y.
        let p = transform.model().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::Y, 1e-6), "{p}");

        let swapped = Mat4::from_rotation_y(FRAC_PI_2) * Mat4::from_rotation_x(FRAC_PI_2);
        assert!(!swapped.transform_point3(Vec3::X).abs_diff_eq(Vec3::Y, 1e-3));
    }
}
