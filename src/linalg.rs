//! Sparse linear algebra: Krylov solvers and their preconditioners.
use log::trace;
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};

use crate::error::LinalgError;
use crate::Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Conjugate gradients; symmetric positive definite systems only.
    Cg,
    Bicgstab,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preconditioner {
    None,
    Jacobi,
    Ilu0,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub method: Method,
    pub preconditioner: Preconditioner,
    #[serde(default = "default_relative_tolerance")]
    pub relative_tolerance: Float,
    #[serde(default = "default_absolute_tolerance")]
    pub absolute_tolerance: Float,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_relative_tolerance() -> Float {
    1e-10
}

fn default_absolute_tolerance() -> Float {
    1e-14
}

fn default_max_iterations() -> usize {
    2000
}

impl SolverSettings {
    pub fn new(method: Method, preconditioner: Preconditioner) -> Self {
        Self {
            method,
            preconditioner,
            relative_tolerance: default_relative_tolerance(),
            absolute_tolerance: default_absolute_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }

    pub fn bicgstab_ilu() -> Self {
        Self::new(Method::Bicgstab, Preconditioner::Ilu0)
    }

    pub fn with_tolerance(mut self, relative: Float) -> Self {
        self.relative_tolerance = relative;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolveStats {
    pub iterations: usize,
    pub residual: Float,
}

/// Solves `A x = b` in place. `x` holds the initial guess on entry.
pub trait LinearSolver {
    fn solve(
        &self,
        a: &CsrMatrix<Float>,
        x: &mut DVector<Float>,
        b: &DVector<Float>,
        settings: &SolverSettings,
    ) -> Result<SolveStats, LinalgError>;
}

impl<T: LinearSolver + ?Sized> LinearSolver for &T {
    fn solve(
        &self,
        a: &CsrMatrix<Float>,
        x: &mut DVector<Float>,
        b: &DVector<Float>,
        settings: &SolverSettings,
    ) -> Result<SolveStats, LinalgError> {
        (**self).solve(a, x, b, settings)
    }
}

/// Preconditioned Krylov subspace solvers.
#[derive(Debug, Clone, Copy, Default)]
pub struct KrylovSolver;

impl LinearSolver for KrylovSolver {
    fn solve(
        &self,
        a: &CsrMatrix<Float>,
        x: &mut DVector<Float>,
        b: &DVector<Float>,
        settings: &SolverSettings,
    ) -> Result<SolveStats, LinalgError> {
        if a.nrows() != a.ncols() || a.nrows() != b.len() || b.len() != x.len() {
            return Err(LinalgError::Dimension {
                rows: a.nrows(),
                cols: a.ncols(),
                len: b.len(),
            });
        }
        if !b.iter().all(|v| v.is_finite()) {
            return Err(LinalgError::NonFinite("right-hand side"));
        }
        if !x.iter().all(|v| v.is_finite()) {
            x.fill(0.0);
        }

        let preconditioner = Precond::build(a, settings.preconditioner)?;
        let stats = match settings.method {
            Method::Cg => conjugate_gradient(a, x, b, &preconditioner, settings)?,
            Method::Bicgstab => bicgstab(a, x, b, &preconditioner, settings)?,
        };
        trace!(
            "{:?}/{:?}: {} iterations, residual {:.3e}",
            settings.method, settings.preconditioner, stats.iterations, stats.residual
        );
        Ok(stats)
    }
}

enum Precond {
    Identity,
    Jacobi(DVector<Float>),
    Ilu0(Ilu0),
}

impl Precond {
    fn build(a: &CsrMatrix<Float>, kind: Preconditioner) -> Result<Self, LinalgError> {
        match kind {
            Preconditioner::None => Ok(Precond::Identity),
            Preconditioner::Jacobi => {
                let mut inverse = DVector::zeros(a.nrows());
                for (i, row) in a.row_iter().enumerate() {
                    let diag = row
                        .col_indices()
                        .iter()
                        .zip(row.values())
                        .find(|(j, _)| **j == i)
                        .map(|(_, v)| *v)
                        .unwrap_or(0.0);
                    if diag == 0.0 {
                        return Err(LinalgError::SingularPreconditioner { row: i });
                    }
                    inverse[i] = 1.0 / diag;
                }
                Ok(Precond::Jacobi(inverse))
            }
            Preconditioner::Ilu0 => Ok(Precond::Ilu0(Ilu0::factor(a)?)),
        }
    }

    fn apply(&self, r: &DVector<Float>, z: &mut DVector<Float>) {
        match self {
            Precond::Identity => z.copy_from(r),
            Precond::Jacobi(inverse) => {
                for i in 0..r.len() {
                    z[i] = inverse[i] * r[i];
                }
            }
            Precond::Ilu0(ilu) => ilu.solve(r, z),
        }
    }
}

/// Incomplete LU factorization with the sparsity pattern of `A`.
struct Ilu0 {
    offsets: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<Float>,
    diag: Vec<usize>,
}

impl Ilu0 {
    fn factor(a: &CsrMatrix<Float>) -> Result<Self, LinalgError> {
        let n = a.nrows();
        let offsets = a.row_offsets().to_vec();
        let cols = a.col_indices().to_vec();
        let mut values = a.values().to_vec();

        let mut diag = Vec::with_capacity(n);
        for i in 0..n {
            let row = &cols[offsets[i]..offsets[i + 1]];
            match row.binary_search(&i) {
                Ok(k) => diag.push(offsets[i] + k),
                Err(_) => return Err(LinalgError::SingularPreconditioner { row: i }),
            }
        }

        for i in 0..n {
            let end = offsets[i + 1];
            for kk in offsets[i]..diag[i] {
                let k = cols[kk];
                let pivot = values[diag[k]];
                if pivot == 0.0 {
                    return Err(LinalgError::SingularPreconditioner { row: k });
                }
                values[kk] /= pivot;
                let factor = values[kk];
                if factor == 0.0 {
                    continue;
                }
                let k_upper = &cols[diag[k] + 1..offsets[k + 1]];
                for jj in kk + 1..end {
                    if let Ok(pos) = k_upper.binary_search(&cols[jj]) {
                        values[jj] -= factor * values[diag[k] + 1 + pos];
                    }
                }
            }
            if values[diag[i]] == 0.0 {
                return Err(LinalgError::SingularPreconditioner { row: i });
            }
        }

        Ok(Self {
            offsets,
            cols,
            values,
            diag,
        })
    }

    fn solve(&self, r: &DVector<Float>, z: &mut DVector<Float>) {
        let n = r.len();
        for i in 0..n {
            let mut sum = r[i];
            for kk in self.offsets[i]..self.diag[i] {
                sum -= self.values[kk] * z[self.cols[kk]];
            }
            z[i] = sum;
        }
        for i in (0..n).rev() {
            let mut sum = z[i];
            for kk in self.diag[i] + 1..self.offsets[i + 1] {
                sum -= self.values[kk] * z[self.cols[kk]];
            }
            z[i] = sum / self.values[self.diag[i]];
        }
    }
}

fn target(b: &DVector<Float>, settings: &SolverSettings) -> Float {
    (settings.relative_tolerance * b.norm()).max(settings.absolute_tolerance)
}

fn conjugate_gradient(
    a: &CsrMatrix<Float>,
    x: &mut DVector<Float>,
    b: &DVector<Float>,
    m: &Precond,
    settings: &SolverSettings,
) -> Result<SolveStats, LinalgError> {
    let tol = target(b, settings);
    let mut r = b - a * &*x;
    let mut residual = r.norm();
    if residual <= tol {
        return Ok(SolveStats {
            iterations: 0,
            residual,
        });
    }

    let mut z = DVector::zeros(b.len());
    m.apply(&r, &mut z);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for iteration in 1..=settings.max_iterations {
        let q = a * &p;
        let pq = p.dot(&q);
        if pq == 0.0 || !pq.is_finite() {
            return Err(LinalgError::Breakdown {
                method: "cg",
                iteration,
            });
        }
        let alpha = rz / pq;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &q, 1.0);

        residual = r.norm();
        if !residual.is_finite() {
            return Err(LinalgError::NonFinite("residual"));
        }
        if residual <= tol {
            return Ok(SolveStats {
                iterations: iteration,
                residual,
            });
        }

        m.apply(&r, &mut z);
        let rz_next = r.dot(&z);
        let beta = rz_next / rz;
        rz = rz_next;
        p.axpy(1.0, &z, beta);
    }

    Err(LinalgError::NotConverged {
        iterations: settings.max_iterations,
        residual,
        target: tol,
    })
}

fn bicgstab(
    a: &CsrMatrix<Float>,
    x: &mut DVector<Float>,
    b: &DVector<Float>,
    m: &Precond,
    settings: &SolverSettings,
) -> Result<SolveStats, LinalgError> {
    let tol = target(b, settings);
    let n = b.len();
    let mut r = b - a * &*x;
    let mut residual = r.norm();
    if residual <= tol {
        return Ok(SolveStats {
            iterations: 0,
            residual,
        });
    }

    let r_hat = r.clone();
    let mut rho = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;
    let mut v = DVector::zeros(n);
    let mut p = DVector::zeros(n);
    let mut y = DVector::zeros(n);
    let mut z = DVector::zeros(n);

    for iteration in 1..=settings.max_iterations {
        let rho_next = r_hat.dot(&r);
        if rho_next == 0.0 || !rho_next.is_finite() {
            return Err(LinalgError::Breakdown {
                method: "bicgstab",
                iteration,
            });
        }
        let beta = (rho_next / rho) * (alpha / omega);
        rho = rho_next;

        // p = r + beta (p - omega v)
        p.axpy(-omega, &v, 1.0);
        p.axpy(1.0, &r, beta);

        m.apply(&p, &mut y);
        v = a * &y;
        let denom = r_hat.dot(&v);
        if denom == 0.0 || !denom.is_finite() {
            return Err(LinalgError::Breakdown {
                method: "bicgstab",
                iteration,
            });
        }
        alpha = rho / denom;

        let mut s = r.clone();
        s.axpy(-alpha, &v, 1.0);
        let s_norm = s.norm();
        if s_norm <= tol {
            x.axpy(alpha, &y, 1.0);
            return Ok(SolveStats {
                iterations: iteration,
                residual: s_norm,
            });
        }

        m.apply(&s, &mut z);
        let t = a * &z;
        let tt = t.dot(&t);
        if tt == 0.0 || !tt.is_finite() {
            return Err(LinalgError::Breakdown {
                method: "bicgstab",
                iteration,
            });
        }
        omega = t.dot(&s) / tt;

        x.axpy(alpha, &y, 1.0);
        x.axpy(omega, &z, 1.0);
        r = s;
        r.axpy(-omega, &t, 1.0);

        residual = r.norm();
        if !residual.is_finite() {
            return Err(LinalgError::NonFinite("residual"));
        }
        if residual <= tol {
            return Ok(SolveStats {
                iterations: iteration,
                residual,
            });
        }
        if omega == 0.0 {
            return Err(LinalgError::Breakdown {
                method: "bicgstab",
                iteration,
            });
        }
    }

    Err(LinalgError::NotConverged {
        iterations: settings.max_iterations,
        residual,
        target: tol,
    })
}

/// Appends `scale * A` to a coordinate matrix.
pub fn push_scaled(coo: &mut CooMatrix<Float>, a: &CsrMatrix<Float>, scale: Float) {
    for (i, j, v) in a.triplet_iter() {
        coo.push(i, j, scale * v);
    }
}
