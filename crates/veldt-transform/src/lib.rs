//! Rigid-body transform values for the Veldt environment model.
//!
//! This is the leaf crate with zero internal Veldt dependencies. It defines
//! the value types the kernel composes when resolving transforms across the
//! frame tree: [`Transform`] (an SE(3) rigid motion) and
//! [`TransformWithUncertainty`] (the same motion with an optional 6×6
//! covariance propagated to first order).

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

use nalgebra::{Isometry3, Matrix3, Matrix6, Point3, Quaternion, UnitQuaternion, Vector3};

/// A rigid motion in 3-D space.
///
/// `Transform` values follow the child-to-parent convention used by the
/// frame tree: the transform stored on a frame maps coordinates in that
/// frame into its parent's frame.
pub type Transform = Isometry3<f64>;

/// A 6×6 covariance over an se(3) twist, ordered rotation-then-translation.
pub type Covariance = Matrix6<f64>;

/// The SE(3) adjoint of a transform, for twist order `(ω, v)`.
///
/// Maps a twist expressed after `t` to the equivalent twist expressed
/// before it, which is what first-order covariance propagation needs when
/// moving uncertainty across a composition.
pub fn adjoint(t: &Transform) -> Matrix6<f64> {
    let r: Matrix3<f64> = t.rotation.to_rotation_matrix().into_inner();
    let p = t.translation.vector;
    let pr = p.cross_matrix() * r;

    let mut adj = Matrix6::zeros();
    adj.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    adj.fixed_view_mut::<3, 3>(3, 0).copy_from(&pr);
    adj.fixed_view_mut::<3, 3>(3, 3).copy_from(&r);
    adj
}

/// A rigid motion with optional first-order uncertainty.
///
/// The covariance is over a left-multiplied se(3) perturbation of the
/// transform, twist order `(ω, v)`. Values without covariance compose on a
/// fast path that never touches the 6×6 algebra; the uncertainty only
/// appears once some link in a chain carries one.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformWithUncertainty {
    transform: Transform,
    covariance: Option<Covariance>,
}

impl TransformWithUncertainty {
    /// The identity motion with no uncertainty.
    pub fn identity() -> Self {
        Self::certain(Transform::identity())
    }

    /// Wrap a transform that carries no uncertainty.
    pub fn certain(transform: Transform) -> Self {
        Self {
            transform,
            covariance: None,
        }
    }

    /// Wrap a transform together with its covariance.
    pub fn with_covariance(transform: Transform, covariance: Covariance) -> Self {
        Self {
            transform,
            covariance: Some(covariance),
        }
    }

    /// The rigid motion itself.
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// The attached covariance, if any.
    pub fn covariance(&self) -> Option<&Covariance> {
        self.covariance.as_ref()
    }

    /// The attached covariance, or the zero matrix when none is attached.
    pub fn covariance_or_zero(&self) -> Covariance {
        self.covariance.unwrap_or_else(Covariance::zeros)
    }

    /// Whether a covariance is attached.
    pub fn has_covariance(&self) -> bool {
        self.covariance.is_some()
    }

    /// Replace the rigid motion, keeping the covariance untouched.
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Compose `self ∘ other`: apply `other` first, then `self`.
    ///
    /// With covariances `Σ₁` on `self` and `Σ₂` on `other`, the result
    /// carries `Σ₁ + Ad(T₁) Σ₂ Ad(T₁)ᵀ`. When neither side carries a
    /// covariance the composition stays on the fast path and the result
    /// carries none either.
    pub fn compose(&self, other: &Self) -> Self {
        let transform = self.transform * other.transform;
        let covariance = match (self.covariance, other.covariance) {
            (None, None) => None,
            (sigma1, sigma2) => {
                let adj = adjoint(&self.transform);
                let mapped = adj * sigma2.unwrap_or_else(Covariance::zeros) * adj.transpose();
                Some(sigma1.unwrap_or_else(Covariance::zeros) + mapped)
            }
        };
        Self {
            transform,
            covariance,
        }
    }

    /// The inverse motion, with the covariance mapped through `Ad(T⁻¹)`.
    pub fn inverse(&self) -> Self {
        let inv = self.transform.inverse();
        let covariance = self.covariance.map(|sigma| {
            let adj = adjoint(&inv);
            adj * sigma * adj.transpose()
        });
        Self {
            transform: inv,
            covariance,
        }
    }

    /// Apply the motion to a point.
    pub fn apply(&self, point: &Point3<f64>) -> Point3<f64> {
        self.transform * point
    }
}

impl From<Transform> for TransformWithUncertainty {
    fn from(t: Transform) -> Self {
        Self::certain(t)
    }
}

/// Build a pure translation.
pub fn translation(x: f64, y: f64, z: f64) -> Transform {
    Transform::translation(x, y, z)
}

/// Rebuild a unit quaternion from scalar-first components.
///
/// Inverse of reading `(w, i, j, k)` out of a transform's rotation, used by
/// the serializers.
pub fn quaternion_from_wijk(w: f64, i: f64, j: f64, k: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(w, i, j, k))
}

/// Scalar-first components `(w, i, j, k)` of a transform's rotation.
pub fn quaternion_wijk(t: &Transform) -> [f64; 4] {
    let c = t.rotation.as_ref().coords;
    [c[3], c[0], c[1], c[2]]
}

/// Translation components `(x, y, z)` of a transform.
pub fn translation_xyz(t: &Transform) -> [f64; 3] {
    let v = t.translation.vector;
    [v[0], v[1], v[2]]
}

/// Rebuild a transform from translation and scalar-first rotation parts.
pub fn transform_from_parts(xyz: [f64; 3], wijk: [f64; 4]) -> Transform {
    Transform::from_parts(
        Vector3::new(xyz[0], xyz[1], xyz[2]).into(),
        quaternion_from_wijk(wijk[0], wijk[1], wijk[2], wijk[3]),
    )
}
