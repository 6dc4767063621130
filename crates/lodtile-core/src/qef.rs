//! Quadric error function minimization for placing dual contouring vertices.

use crate::glam::{Mat3A, Vec3A};

/// Off-diagonal mass below this fraction of the matrix norm ends the Jacobi iteration.
const SVD_TOLERANCE: f32 = 1e-6;
const SVD_MAX_SWEEPS: usize = 8;
/// Singular values smaller than this fraction of the largest one are treated as zero by the pseudoinverse.
const PINV_TOLERANCE: f32 = 0.1;

/// Accumulates planes `(point, normal)` and finds the point minimizing the summed squared distance to all of them.
///
/// Only the normal equations are stored (`AᵀA`, `Aᵀb`, `bᵀb`) plus the mass point, so adding a plane is O(1) and the solver
/// never holds on to the planes themselves. The solve is regularized by truncating small singular values, which pulls
/// under-determined directions toward the mass point.
#[derive(Clone, Copy, Debug, Default)]
pub struct QefSolver {
    ata: SymMat3,
    atb: Vec3A,
    btb: f32,
    point_sum: Vec3A,
    count: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct SymMat3 {
    m00: f32,
    m01: f32,
    m02: f32,
    m11: f32,
    m12: f32,
    m22: f32,
}

impl SymMat3 {
    fn add_outer(&mut self, n: Vec3A) {
        self.m00 += n.x * n.x;
        self.m01 += n.x * n.y;
        self.m02 += n.x * n.z;
        self.m11 += n.y * n.y;
        self.m12 += n.y * n.z;
        self.m22 += n.z * n.z;
    }

    fn to_mat3a(self) -> Mat3A {
        Mat3A::from_cols(
            Vec3A::new(self.m00, self.m01, self.m02),
            Vec3A::new(self.m01, self.m11, self.m12),
            Vec3A::new(self.m02, self.m12, self.m22),
        )
    }
}

impl QefSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Adds the plane through `point` with normal `normal`. The normal does not need to be unit length; degenerate normals are
    /// ignored.
    pub fn add(&mut self, point: Vec3A, normal: Vec3A) {
        let n = normal.normalize_or_zero();
        if n == Vec3A::ZERO {
            return;
        }
        let d = n.dot(point);
        self.ata.add_outer(n);
        self.atb += n * d;
        self.btb += d * d;
        self.point_sum += point;
        self.count += 1;
    }

    /// The average of all points added so far.
    pub fn mass_point(&self) -> Option<Vec3A> {
        (self.count > 0).then(|| self.point_sum / self.count as f32)
    }

    /// Returns the minimizing position, or `None` if no planes were added.
    pub fn solve(&self) -> Option<Vec3A> {
        let mass_point = self.mass_point()?;
        let ata = self.ata.to_mat3a();

        // Solve relative to the mass point so truncated directions fall back to it.
        let atb = self.atb - ata * mass_point;
        let x = solve_symmetric_pinv(ata, atb);
        Some(x + mass_point)
    }

    /// Sum of squared distances from `x` to every accumulated plane.
    pub fn error(&self, x: Vec3A) -> f32 {
        let atax = self.ata.to_mat3a() * x;
        (x.dot(atax) - 2.0 * x.dot(self.atb) + self.btb).max(0.0)
    }
}

/// Solves `A x = b` for symmetric `A` via an eigendecomposition (cyclic Jacobi) and a truncated pseudoinverse.
fn solve_symmetric_pinv(a: Mat3A, b: Vec3A) -> Vec3A {
    let (sigma, v) = symmetric_eigen(a);

    let max_sigma = sigma.abs().max_element();
    if max_sigma <= f32::EPSILON {
        return Vec3A::ZERO;
    }
    let inv = Vec3A::select(
        sigma.abs().cmplt(Vec3A::splat(PINV_TOLERANCE * max_sigma)),
        Vec3A::ZERO,
        Vec3A::ONE / sigma,
    );

    // x = V diag(inv) Vᵀ b
    v * (inv * (v.transpose() * b))
}

/// Returns the eigenvalues of `a` and a matrix whose columns are the corresponding eigenvectors.
fn symmetric_eigen(mut a: Mat3A) -> (Vec3A, Mat3A) {
    let mut v = Mat3A::IDENTITY;

    let norm = frobenius_norm(a);
    for _ in 0..SVD_MAX_SWEEPS {
        if off_diagonal_norm(a) <= SVD_TOLERANCE * norm {
            break;
        }
        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            let a_pq = a.col(q)[p];
            if a_pq == 0.0 {
                continue;
            }
            let (c, s) = givens_coefficients(a.col(p)[p], a_pq, a.col(q)[q]);
            let j = rotation(p, q, c, s);
            a = j.transpose() * a * j;
            v *= j;
        }
    }

    (Vec3A::new(a.x_axis.x, a.y_axis.y, a.z_axis.z), v)
}

/// Coefficients of the Jacobi rotation that zeroes `a_pq`.
fn givens_coefficients(a_pp: f32, a_pq: f32, a_qq: f32) -> (f32, f32) {
    let tau = (a_qq - a_pp) / (2.0 * a_pq);
    let stt = (1.0 + tau * tau).sqrt();
    let t = if tau >= 0.0 { 1.0 / (tau + stt) } else { 1.0 / (tau - stt) };
    let c = 1.0 / (1.0 + t * t).sqrt();
    (c, t * c)
}

fn rotation(p: usize, q: usize, c: f32, s: f32) -> Mat3A {
    let mut cols = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    cols[p][p] = c;
    cols[q][q] = c;
    // Row p, column q.
    cols[q][p] = s;
    cols[p][q] = -s;
    Mat3A::from_cols_array_2d(&cols)
}

fn frobenius_norm(a: Mat3A) -> f32 {
    (a.x_axis.length_squared() + a.y_axis.length_squared() + a.z_axis.length_squared()).sqrt()
}

fn off_diagonal_norm(a: Mat3A) -> f32 {
    (2.0 * (a.y_axis.x * a.y_axis.x + a.z_axis.x * a.z_axis.x + a.z_axis.y * a.z_axis.y)).sqrt()
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
