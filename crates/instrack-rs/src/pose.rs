use crate::TrackError;
use ndarray::*;

/// Largest deviation from an exact rigid transform accepted by [`Pose::new`].
const RIGID_TOLERANCE: f64 = 1e-4;

/// Determinant of a 3x3 matrix.
fn determinant(m: &ArrayView2<f64>) -> f64 {
    m[[0, 0]] * (m[[1, 1]] * m[[2, 2]] - m[[1, 2]] * m[[2, 1]])
        - m[[0, 1]] * (m[[1, 0]] * m[[2, 2]] - m[[1, 2]] * m[[2, 0]])
        + m[[0, 2]] * (m[[1, 0]] * m[[2, 1]] - m[[1, 1]] * m[[2, 0]])
}

/// A rigid-body transform stored as a homogeneous 4x4 matrix `[R | t; 0 0 0 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    matrix: Array2<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Returns a new Pose
    ///
    /// # Parameters
    ///
    /// * `matrix`: A 4x4 homogeneous rigid transform.
    ///
    /// # Errors
    ///
    /// `TrackError::InvalidPose` if the matrix is not 4x4, `TrackError::NonRigidPose` if it has
    /// non-finite entries, a bottom row other than `[0, 0, 0, 1]`, or a rotation block that is not
    /// orthonormal with determinant 1.
    pub fn new(matrix: Array2<f64>) -> Result<Pose, TrackError> {
        let (rows, cols) = matrix.dim();
        if rows != 4 || cols != 4 {
            return Err(TrackError::InvalidPose { rows, cols });
        }
        if !matrix.iter().all(|v| v.is_finite()) {
            return Err(TrackError::NonRigidPose("non-finite entry"));
        }

        let bottom = matrix.row(3);
        if !bottom
            .iter()
            .zip([0.0, 0.0, 0.0, 1.0])
            .all(|(a, b)| (a - b).abs() <= RIGID_TOLERANCE)
        {
            return Err(TrackError::NonRigidPose("bottom row is not [0, 0, 0, 1]"));
        }

        let rotation = matrix.slice(s![0..3, 0..3]);
        let gram = rotation.t().dot(&rotation);
        if !gram
            .iter()
            .zip(Array2::<f64>::eye(3).iter())
            .all(|(a, b)| (a - b).abs() <= RIGID_TOLERANCE)
        {
            return Err(TrackError::NonRigidPose("rotation is not orthonormal"));
        }
        if (determinant(&rotation) - 1.0).abs() > RIGID_TOLERANCE {
            return Err(TrackError::NonRigidPose("rotation is a reflection"));
        }

        Ok(Pose { matrix })
    }

    /// Returns the identity transform
    pub fn identity() -> Pose {
        Pose {
            matrix: Array2::eye(4),
        }
    }

    /// Returns a pure translation
    pub fn from_translation(x: f64, y: f64, z: f64) -> Pose {
        let mut matrix = Array2::eye(4);
        matrix[[0, 3]] = x;
        matrix[[1, 3]] = y;
        matrix[[2, 3]] = z;
        Pose { matrix }
    }

    /// Returns a rotation of `angle` radians about the z axis followed by a translation.
    pub fn from_yaw_translation(angle: f64, x: f64, y: f64, z: f64) -> Pose {
        let (sin, cos) = angle.sin_cos();
        Pose {
            matrix: array![
                [cos, -sin, 0.0, x],
                [sin, cos, 0.0, y],
                [0.0, 0.0, 1.0, z],
                [0.0, 0.0, 0.0, 1.0]
            ],
        }
    }

    /// Returns the underlying 4x4 matrix
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Returns the rotation block
    pub fn rotation(&self) -> ArrayView2<f64> {
        self.matrix.slice(s![0..3, 0..3])
    }

    /// Returns the translation column
    pub fn translation(&self) -> ArrayView1<f64> {
        self.matrix.slice(s![0..3, 3])
    }

    /// Returns the inverse transform `[R^T | -R^T t]`.
    pub fn inverse(&self) -> Pose {
        let rotation_t = self.rotation().t().to_owned();
        let translation = -rotation_t.dot(&self.translation());

        let mut matrix = Array2::eye(4);
        matrix.slice_mut(s![0..3, 0..3]).assign(&rotation_t);
        matrix.slice_mut(s![0..3, 3]).assign(&translation);
        Pose { matrix }
    }

    /// Returns `self · other`.
    pub fn compose(&self, other: &Pose) -> Pose {
        Pose {
            matrix: self.matrix.dot(&other.matrix),
        }
    }

    /// Returns this pose expressed in the frame of `base`, i.e. `inverse(base) · self`.
    pub fn relative_to(&self, base: &Pose) -> Pose {
        base.inverse().compose(self)
    }

    /// Euclidean distance between the translations of the two poses.
    pub fn translation_distance(&self, other: &Pose) -> f64 {
        (&self.translation() - &other.translation())
            .mapv(|v| v * v)
            .sum()
            .sqrt()
    }

    /// Angle in radians of the rotation taking `self` to `other`.
    pub fn rotation_angle(&self, other: &Pose) -> f64 {
        let relative = self.rotation().t().dot(&other.rotation());
        let cos = ((relative.diag().sum() - 1.0) / 2.0).clamp(-1.0, 1.0);
        cos.acos()
    }

    /// Returns true if every entry differs by at most `epsilon`.
    pub fn approx_eq(&self, other: &Pose, epsilon: f64) -> bool {
        self.matrix
            .iter()
            .zip(other.matrix.iter())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}
