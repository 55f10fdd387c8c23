use glam::{Mat4, Vec3, Vec4};

/// Remaps OpenGL clip depth (`[-1, 1]`) to the `[0, 1]` range wgpu expects.
#[rustfmt::skip]
const GL_TO_WGPU_DEPTH: Mat4 = Mat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionParams {
    /// Vertical field of view in radians.
    pub fov: f32,
    /// width / height
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            fov: 45.0_f32.to_radians(),
            aspect_ratio: 1.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// Partial look-at update. Omitted fields keep the camera's last value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViewParams {
    pub eye: Option<Vec3>,
    pub target: Option<Vec3>,
    pub up: Option<Vec3>,
}

#[derive(Debug, Clone, Copy)]
pub struct Camera {
    perspective: Mat4,
    orthographic: Mat4,
    view: Mat4,
    projection_params: ProjectionParams,
    eye: Vec3,
    target: Vec3,
    up: Vec3,
}

impl Camera {
    pub fn perspective(&self) -> Mat4 {
        self.perspective
    }

    pub fn orthographic(&self) -> Mat4 {
        self.orthographic
    }

    /// Perspective projection with depth remapped for wgpu clip space.
    pub fn clip_projection(&self) -> Mat4 {
        GL_TO_WGPU_DEPTH * self.perspective
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn projection_params(&self) -> ProjectionParams {
        self.projection_params
    }

    pub fn update_projection_matrix(&mut self, params: ProjectionParams) {
        self.perspective = perspective_matrix(&params);
        self.orthographic = orthographic_matrix(&params);
        self.projection_params = params;
    }

    pub fn update_view_matrix(&mut self, params: ViewParams) {
        let eye = params.eye.unwrap_or(self.eye);
        let target = params.target.unwrap_or(self.target);
        let up = params.up.unwrap_or(self.up);

        match look_at(eye, target, up) {
            Some(view) => {
                self.view = view;
                self.eye = eye;
                self.target = target;
                self.up = up;
            }
            None => log::warn!(
                "degenerate camera pose (eye {eye}, target {target}, up {up}), \
                 keeping previous view"
            ),
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        let projection_params = ProjectionParams::default();
        let eye = Vec3::new(0.0, 0.0, 1.0);
        let target = Vec3::ZERO;
        let up = Vec3::Y;

        Self {
            perspective: perspective_matrix(&projection_params),
            orthographic: orthographic_matrix(&projection_params),
            view: look_at(eye, target, up).unwrap_or(Mat4::IDENTITY),
            projection_params,
            eye,
            target,
            up,
        }
    }
}

/// Symmetric frustum extents `(right, top)` at the near plane.
fn frustum_extents(params: &ProjectionParams) -> (f32, f32) {
    let top = params.near * (params.fov / 2.0).tan();
    (top * params.aspect_ratio, top)
}

/// OpenGL-style perspective projection, column-major.
pub fn perspective_matrix(params: &ProjectionParams) -> Mat4 {
    let (r, t) = frustum_extents(params);
    let (l, b) = (-r, -t);
    let (n, f) = (params.near, params.far);

    let mut out = [0.0_f32; 16];
    out[0] = (2.0 * n) / (r - l);
    out[5] = (2.0 * n) / (t - b);
    out[8] = (r + l) / (r - l);
    out[9] = (t + b) / (t - b);
    out[10] = -(f + n) / (f - n);
    out[11] = -1.0;
    out[14] = -(2.0 * f * n) / (f - n);
    Mat4::from_cols_array(&out)
}

/// Orthographic projection using the same near-plane extents as
/// [`perspective_matrix`].
pub fn orthographic_matrix(params: &ProjectionParams) -> Mat4 {
    let (r, t) = frustum_extents(params);
    let (l, b) = (-r, -t);
    let (n, f) = (params.near, params.far);

    let mut out = [0.0_f32; 16];
    out[0] = 2.0 / (r - l);
    out[5] = 2.0 / (t - b);
    out[10] = -2.0 / (f - n);
    out[12] = -(r + l) / (r - l);
    out[13] = -(t + b) / (t - b);
    out[14] = -(f + n) / (f - n);
    out[15] = 1.0;
    Mat4::from_cols_array(&out)
}

/// Right-handed look-at matrix. `None` when the basis is degenerate.
pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Option<Mat4> {
    let forward = (eye - target).try_normalize()?;
    let right = up.cross(forward).try_normalize()?;
    let true_up = forward.cross(right);

    Some(Mat4::from_cols(
        Vec4::new(right.x, true_up.x, forward.x, 0.0),
        Vec4::new(right.y, true_up.y, forward.y, 0.0),
        Vec4::new(right.z, true_up.z, forward.z, 0.0),
        Vec4::new(-right.dot(eye), -true_up.dot(eye), -forward.dot(eye), 1.0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn perspective_identity_holds() {
        let mut camera = Camera::default();
        camera.update_projection_matrix(ProjectionParams {
            fov: FRAC_PI_2,
            aspect_ratio: 1.0,
            near: 1.0,
            far: 100.0,
        });

        let m = camera.perspective().to_cols_array();
        assert!(approx(m[10], -(100.0 + 1.0) / (100.0 - 1.0)));
        assert_eq!(m[11], -1.0);
        assert_eq!(m[15], 0.0);
        // tan(45°) == 1, so the near plane spans [-1, 1]
        assert!(approx(m[0], 1.0));
        assert!(approx(m[5], 1.0));
    }

    #[test]
    fn aspect_ratio_scales_horizontal_extent() {
        let params = ProjectionParams {
            fov: FRAC_PI_2,
            aspect_ratio: 2.0,
            near: 1.0,
            far: 10.0,
        };
        let perspective = perspective_matrix(&params).to_cols_array();
        let orthographic = orthographic_matrix(&params).to_cols_array();

        assert!(approx(perspective[0], 0.5));
        assert!(approx(orthographic[0], 2.0 / 4.0));
        assert!(approx(orthographic[10], -2.0 / 9.0));
        assert!(approx(orthographic[14], -11.0 / 9.0));
        assert_eq!(orthographic[15], 1.0);
    }

    #[test]
    fn view_maps_eye_to_origin() {
        let mut camera = Camera::default();
        camera.update_view_matrix(ViewParams {
            eye: Some(Vec3::new(0.0, 0.0, 1.0)),
            target: Some(Vec3::ZERO),
            up: Some(Vec3::Y),
        });

        let eye_in_camera = camera.view().transform_point3(Vec3::new(0.0, 0.0, 1.0));
        assert!(eye_in_camera.length() < 1e-6);

        let target_in_camera = camera.view().transform_point3(Vec3::ZERO);
        assert!(approx(target_in_camera.z, -1.0));
    }

    #[test]
    fn view_matches_glam_look_at() {
        let eye = Vec3::new(3.0, 2.0, 5.0);
        let target = Vec3::new(-1.0, 0.5, 0.0);
        let ours = look_at(eye, target, Vec3::Y).unwrap();
        let glam = Mat4::look_at_rh(eye, target, Vec3::Y);
        assert!(ours.abs_diff_eq(glam, 1e-5));
    }

    #[test]
    fn partial_update_keeps_previous_pose() {
        let mut camera = Camera::default();
        camera.update_view_matrix(ViewParams {
            eye: Some(Vec3::new(0.0, 1.0, 4.0)),
            ..Default::default()
        });
        camera.update_view_matrix(ViewParams {
            target: Some(Vec3::new(0.0, 1.0, 0.0)),
            ..Default::default()
        });

        assert_eq!(camera.eye(), Vec3::new(0.0, 1.0, 4.0));
        assert_eq!(camera.target(), Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(camera.up(), Vec3::Y);
    }

    #[test]
    fn degenerate_pose_is_ignored() {
        let mut camera = Camera::default();
        let before = camera.view();
        camera.update_view_matrix(ViewParams {
            eye: Some(Vec3::ZERO),
            target: Some(Vec3::ZERO),
            up: None,
        });
        assert_eq!(camera.view(), before);
        assert_eq!(camera.eye(), Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn clip_projection_maps_near_plane_to_zero_depth() {
        let mut camera = Camera::default();
        camera.update_projection_matrix(ProjectionParams {
            fov: FRAC_PI_2,
            aspect_ratio: 1.0,
            near: 1.0,
            far: 100.0,
        });

        let near = camera.clip_projection() * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = camera.clip_projection() * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert!(approx(near.z / near.w, 0.0));
        assert!(approx(far.z / far.w, 1.0));
    }
}
