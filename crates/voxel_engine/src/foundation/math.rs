//! Math utilities and types
//!
//! Thin aliases over `nalgebra` plus the two spatial primitives the
//! orchestrator passes around: [`Transform`] for volume placement and
//! [`Bounds`] for the axis-aligned extents of volumes and forms.

pub use nalgebra::{Matrix4, Quaternion, Unit, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Builder pattern: Set rotation from Euler angles (radians, XYZ order)
    #[must_use]
    pub fn with_rotation_euler(mut self, x: f32, y: f32, z: f32) -> Self {
        self.rotation = Quat::from_euler_angles(x, y, z);
        self
    }

    /// Builder pattern: Set scale (uniform)
    #[must_use]
    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::new(scale, scale, scale);
        self
    }

    /// Convert to a transformation matrix (TRS order)
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Axis-aligned bounds in local volume space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Bounds {
    /// Create bounds from two corners. Returns `None` when any axis of `min`
    /// exceeds `max` or a component is not finite.
    pub fn new(min: Vec3, max: Vec3) -> Option<Self> {
        let finite = min.iter().chain(max.iter()).all(|c| c.is_finite());
        let ordered = min.iter().zip(max.iter()).all(|(lo, hi)| lo <= hi);
        (finite && ordered).then_some(Self { min, max })
    }

    /// Cube centred on the origin with the given half extent
    pub fn cube(half_extent: f32) -> Self {
        let h = Vec3::new(half_extent, half_extent, half_extent);
        Self { min: -h, max: h }
    }

    /// Extent along each axis
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Centre point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Distance from `point` to the closest point of the box (zero inside).
    pub fn distance_to(&self, point: &Vec3) -> f32 {
        let clamped = Vec3::new(
            point.x.clamp(self.min.x, self.max.x),
            point.y.clamp(self.min.y, self.max.y),
            point.z.clamp(self.min.z, self.max.z),
        );
        (point - clamped).magnitude()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bounds_rejects_inverted_axes() {
        assert!(Bounds::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 1.0)).is_none());
        assert!(Bounds::new(Vec3::new(0.0, 0.0, f32::NAN), Vec3::new(1.0, 1.0, 1.0)).is_none());
        assert!(Bounds::new(Vec3::zeros(), Vec3::zeros()).is_some());
    }

    #[test]
    fn test_bounds_distance() {
        let bounds = Bounds::cube(128.0);
        assert_relative_eq!(bounds.distance_to(&Vec3::zeros()), 0.0);
        assert_relative_eq!(bounds.distance_to(&Vec3::new(130.0, 0.0, 0.0)), 2.0);
        assert_relative_eq!(bounds.size().x, 256.0);
        assert_relative_eq!(bounds.center().magnitude(), 0.0);
    }

    #[test]
    fn test_transform_matrix_translation() {
        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0)).with_uniform_scale(2.0);
        let matrix = transform.to_matrix();
        let moved = matrix.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(moved.x, 3.0);
        assert_relative_eq!(moved.y, 2.0);
        assert_relative_eq!(moved.z, 3.0);
    }
}
