//! Transform decomposition and composition
//!
//! The application side describes placements as flat 4x4 matrices in
//! column-major order. Native engines want scale, position and a rotation
//! quaternion instead, expressed in their own model coordinate convention.
//! This module converts between the two. All intermediate math is done in
//! double precision; [`RenderTransform`] is the single-precision view that
//! gets handed to a renderer.

use glam::{DMat4, DQuat, DVec3, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Flat 4x4 matrix, column-major (elements 12, 13, 14 hold the translation)
pub type Matrix4 = [f64; 16];

/// Identity matrix
pub const IDENTITY: Matrix4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Degenerate transform: scale along {axis} axis is zero")]
    DegenerateTransform { axis: Axis },
    #[error("Transform contains a non-finite element at index {0}")]
    NonFinite(usize),
}

/// Basis axis of a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

/// Corrective rotation between the application's canonical model
/// convention and a rendering engine's.
///
/// The correction is engine-specific, so it is selected per engine instead
/// of being baked into the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinateCorrection {
    /// 180 degrees about +Y followed by 180 degrees about +Z
    #[default]
    EngineDefault,
    /// Engine shares the application's convention
    None,
}

impl CoordinateCorrection {
    /// The correction as a unit quaternion
    pub fn quat(self) -> DQuat {
        match self {
            CoordinateCorrection::EngineDefault => {
                DQuat::from_rotation_y(PI) * DQuat::from_rotation_z(PI)
            }
            CoordinateCorrection::None => DQuat::IDENTITY,
        }
    }
}

/// Decomposed transform: scale, position and a unit rotation quaternion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub scale: DVec3,
    pub position: DVec3,
    pub rotation: DQuat,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        scale: DVec3::ONE,
        position: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
    };

    /// Pose part of this transform (scale dropped)
    pub fn pose(&self) -> Pose {
        Pose {
            position: self.position,
            rotation: self.rotation,
        }
    }

    /// Narrow to single precision for the rendering engine
    pub fn to_render(&self) -> RenderTransform {
        RenderTransform {
            scale: self.scale.as_vec3(),
            position: self.position.as_vec3(),
            rotation: Quat::from_xyzw(
                self.rotation.x as f32,
                self.rotation.y as f32,
                self.rotation.z as f32,
                self.rotation.w as f32,
            ),
        }
    }
}

/// Position and orientation without scale, as anchors carry it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: DVec3,
    pub rotation: DQuat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
        }
    }
}

impl Pose {
    pub fn new(position: DVec3, rotation: DQuat) -> Self {
        Self { position, rotation }
    }

    /// Pose at a position with no rotation
    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            rotation: DQuat::IDENTITY,
        }
    }
}

/// Single-precision transform for the renderer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderTransform {
    pub scale: Vec3,
    pub position: Vec3,
    pub rotation: Quat,
}

/// Decompose a column-major matrix, applying the default engine correction
pub fn decompose(matrix: &Matrix4) -> Result<Transform, TransformError> {
    decompose_with(matrix, CoordinateCorrection::default())
}

/// Compose a column-major matrix, undoing the default engine correction
pub fn compose(transform: &Transform) -> Matrix4 {
    compose_with(transform, CoordinateCorrection::default())
}

/// Decompose a column-major matrix into scale, position and rotation
///
/// Scale is the length of each basis column, position is the fourth
/// column, and rotation comes from the scale-normalized 3x3 block. A
/// mirrored block (negative determinant) carries the reflection on the X
/// scale so the remaining block is a proper rotation.
pub fn decompose_with(
    matrix: &Matrix4,
    correction: CoordinateCorrection,
) -> Result<Transform, TransformError> {
    if let Some(index) = matrix.iter().position(|v| !v.is_finite()) {
        return Err(TransformError::NonFinite(index));
    }

    let columns = [
        DVec3::new(matrix[0], matrix[1], matrix[2]),
        DVec3::new(matrix[4], matrix[5], matrix[6]),
        DVec3::new(matrix[8], matrix[9], matrix[10]),
    ];
    let axes = [Axis::X, Axis::Y, Axis::Z];

    let mut scale = [0.0; 3];
    for (i, column) in columns.iter().enumerate() {
        let length = column.length();
        if length <= f64::EPSILON {
            return Err(TransformError::DegenerateTransform { axis: axes[i] });
        }
        scale[i] = length;
    }
    if columns[0].dot(columns[1].cross(columns[2])) < 0.0 {
        scale[0] = -scale[0];
    }

    let position = DVec3::new(matrix[12], matrix[13], matrix[14]);

    // r[row][col] of the orthonormal rotation block
    let mut r = [[0.0f64; 3]; 3];
    for (col, column) in columns.iter().enumerate() {
        let unit = *column / scale[col];
        r[0][col] = unit.x;
        r[1][col] = unit.y;
        r[2][col] = unit.z;
    }

    let rotation = quat_from_rotation(&r) * correction.quat();

    Ok(Transform {
        scale: DVec3::from_array(scale),
        position,
        rotation: rotation.normalize(),
    })
}

/// Build a column-major matrix (translation * rotation * scale)
pub fn compose_with(transform: &Transform, correction: CoordinateCorrection) -> Matrix4 {
    let rotation = (transform.rotation * correction.quat().inverse()).normalize();
    DMat4::from_scale_rotation_translation(transform.scale, rotation, transform.position)
        .to_cols_array()
}

/// Identity rotation and scale with a translation
pub fn identity_with_translation(x: f64, y: f64, z: f64) -> Matrix4 {
    let mut m = IDENTITY;
    m[12] = x;
    m[13] = y;
    m[14] = z;
    m
}

/// Trace-based conversion, switching to the largest diagonal element when
/// the trace is not positive so the divisor stays away from zero.
fn quat_from_rotation(r: &[[f64; 3]; 3]) -> DQuat {
    let trace = r[0][0] + r[1][1] + r[2][2];

    let (x, y, z, w) = if trace > 0.0 {
        let s = (trace + 1.0).sqrt() * 2.0;
        (
            (r[2][1] - r[1][2]) / s,
            (r[0][2] - r[2][0]) / s,
            (r[1][0] - r[0][1]) / s,
            0.25 * s,
        )
    } else if r[0][0] > r[1][1] && r[0][0] > r[2][2] {
        let s = (1.0 + r[0][0] - r[1][1] - r[2][2]).sqrt() * 2.0;
        (
            0.25 * s,
            (r[0][1] + r[1][0]) / s,
            (r[0][2] + r[2][0]) / s,
            (r[2][1] - r[1][2]) / s,
        )
    } else if r[1][1] > r[2][2] {
        let s = (1.0 + r[1][1] - r[0][0] - r[2][2]).sqrt() * 2.0;
        (
            (r[0][1] + r[1][0]) / s,
            0.25 * s,
            (r[1][2] + r[2][1]) / s,
            (r[0][2] - r[2][0]) / s,
        )
    } else {
        let s = (1.0 + r[2][2] - r[0][0] - r[1][1]).sqrt() * 2.0;
        (
            (r[0][2] + r[2][0]) / s,
            (r[1][2] + r[2][1]) / s,
            0.25 * s,
            (r[1][0] - r[0][1]) / s,
        )
    };

    DQuat::from_xyzw(x, y, z, w).normalize()
}
