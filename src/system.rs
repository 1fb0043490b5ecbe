//! A linear sub-problem `a(u, v) = L(v)` with its cached, boundary-conditioned matrix.
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::assembly::{Assemble, Coefficients};
use crate::boundary::{self, ResolvedBc};
use crate::error::{FlowError, Result, Stage};
use crate::form::Form;
use crate::linalg::{LinearSolver, SolveStats, SolverSettings};
use crate::Float;

/// Assembled matrix plus whether it still matches the forms it was built from.
#[derive(Debug, Clone)]
pub struct CachedMatrix {
    pub matrix: CsrMatrix<Float>,
    pub valid: bool,
}

#[derive(Debug, Clone)]
pub struct LinearSystem {
    stage: Stage,
    a: Form,
    l: Form,
    cache: CachedMatrix,
}

impl LinearSystem {
    /// Splits a residual form into its bilinear and linear parts and assembles the matrix with
    /// `bcs` applied.
    pub fn from_residual<A: Assemble>(
        stage: Stage,
        residual: &Form,
        assembler: &A,
        bcs: &[ResolvedBc],
    ) -> Result<Self> {
        let a = residual.lhs();
        let l = residual.rhs();
        if !a.has_trial() {
            return Err(FlowError::Assembly(format!(
                "{stage} residual has no term in the unknown"
            )));
        }
        let matrix = assemble(assembler, &a, bcs)?;
        debug!("{stage}: assembled {}x{} system, nnz = {}", matrix.nrows(), matrix.ncols(), matrix.nnz());
        Ok(Self {
            stage,
            a,
            l,
            cache: CachedMatrix { matrix, valid: true },
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn matrix(&self) -> &CsrMatrix<Float> {
        &self.cache.matrix
    }

    pub fn is_valid(&self) -> bool {
        self.cache.valid
    }

    pub fn invalidate(&mut self) {
        self.cache.valid = false;
    }

    /// Replaces both forms, e.g. after a parameter change, and marks the matrix stale.
    pub fn set_residual(&mut self, residual: &Form) {
        self.a = residual.lhs();
        self.l = residual.rhs();
        self.invalidate();
    }

    /// Reassembles the matrix when `reassemble` is set or the cache is stale.
    pub fn refresh<A: Assemble>(&mut self, assembler: &A, bcs: &[ResolvedBc], reassemble: bool) -> Result<()> {
        if reassemble || !self.cache.valid {
            self.cache.matrix = assemble(assembler, &self.a, bcs)?;
            self.cache.valid = true;
            debug!("{}: reassembled matrix", self.stage);
        }
        Ok(())
    }

    /// Assembles the right-hand side from `coefficients`, applies `bcs` to it and solves into
    /// `x`, whose contents serve as the initial guess.
    pub fn solve<A: Assemble, S: LinearSolver>(
        &self,
        assembler: &A,
        solver: &S,
        settings: &SolverSettings,
        bcs: &[ResolvedBc],
        coefficients: &dyn Coefficients,
        x: &mut DVector<Float>,
    ) -> Result<SolveStats> {
        let mut b = assembler.assemble_vector(&self.l, coefficients)?;
        boundary::apply_vector(bcs, &mut b);
        solver
            .solve(&self.cache.matrix, x, &b, settings)
            .map_err(|source| FlowError::SolveDivergence {
                stage: self.stage,
                source,
            })
    }
}

fn assemble<A: Assemble>(assembler: &A, a: &Form, bcs: &[ResolvedBc]) -> Result<CsrMatrix<Float>> {
    let mut matrix = assembler.assemble_matrix(a)?;
    boundary::apply_matrix(bcs, &mut matrix);
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::StaggeredAssembler;
    use crate::boundary::DirichletBc;
    use crate::form::{Operand, Operator, Slot};
    use crate::geometry::Geometry;
    use crate::linalg::KrylovSolver;
    use crate::space::SpaceKind;
    use crate::state::Fields;

    fn poisson(shift: Float) -> Form {
        Form::new(SpaceKind::Pressure)
            .term(-1.0, Operator::Laplacian, Operand::Trial)
            .term(shift, Operator::Mass, Operand::Trial)
            .term(-1.0, Operator::Mass, Operand::Field(Slot::PreviousPressure))
    }

    #[test]
    fn test_solve_applies_conditions_to_rhs() {
        let geometry = Geometry::channel(1.0, 0.5, 6, None).unwrap();
        let assembler = StaggeredAssembler::new(&geometry, 0.5);
        let space = assembler.space(SpaceKind::Pressure).clone();
        let outlet = DirichletBc::pressure("outlet", 2.0, |x, on_boundary| on_boundary && x.x > 1.0 - 1e-9)
            .resolve(&space)
            .unwrap();
        let bcs = vec![outlet];

        let system = LinearSystem::from_residual(Stage::Pressure, &poisson(0.0), &assembler, &bcs).unwrap();
        let velocity = assembler.space(SpaceKind::Velocity);
        let fields = Fields::zeros(velocity, &space);
        let mut p = space.zeros();
        system
            .solve(&assembler, &KrylovSolver, &SolverSettings::bicgstab_ilu(), &bcs, &fields, &mut p)
            .unwrap();

        // Neumann everywhere except the outlet and no sources: p is the outlet value.
        let l = space.layout();
        assert!((p[l.p(3, 3)] - 2.0).abs() < 1e-6);
        assert!((p[l.p(1, 1)] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_stale_matrix_until_refreshed() {
        let geometry = Geometry::channel(1.0, 0.5, 4, None).unwrap();
        let assembler = StaggeredAssembler::new(&geometry, 0.5);
        let mut system = LinearSystem::from_residual(Stage::Pressure, &poisson(1.0), &assembler, &[]).unwrap();
        let before = system.matrix().clone();

        system.set_residual(&poisson(5.0));
        assert!(!system.is_valid());
        assert_eq!(system.matrix().values(), before.values());

        system.refresh(&assembler, &[], false).unwrap();
        assert!(system.is_valid());
        assert_ne!(system.matrix().values(), before.values());
    }

    #[test]
    fn test_residual_without_unknown_is_rejected() {
        let geometry = Geometry::channel(1.0, 0.5, 4, None).unwrap();
        let assembler = StaggeredAssembler::new(&geometry, 0.5);
        let residual = Form::new(SpaceKind::Pressure).term(1.0, Operator::Mass, Operand::Field(Slot::Pressure));
        let err = LinearSystem::from_residual(Stage::Pressure, &residual, &assembler, &[]).unwrap_err();
        assert!(matches!(err, FlowError::Assembly(_)));
    }
}
