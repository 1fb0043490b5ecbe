//! First sub-step: momentum without the incompressibility constraint.
//!
//! Every variant writes the residual
//!
//! ```text
//! F = rho/dt (u - u_prev) + rho (w·∇)w - diffusion + ∇p_prev - rho (0, -g)
//! ```
//!
//! with `w` the previous velocity (or the latest Picard iterate) and differs only in how the
//! viscous term `mu ∇·(∇u + ∇uᵀ)` is discretized in time. Convection is explicit in every
//! variant, so all of them are bounded by a Courant condition.
use log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::assembly::Assemble;
use crate::error::{Result, Stage};
use crate::form::{Form, Operand, Operator, Slot};
use crate::linalg::{LinearSolver, SolveStats, SolverSettings};
use crate::space::SpaceKind;
use crate::state::{PhysicalParameters, SimulationState};
use crate::system::LinearSystem;
use crate::Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TentativeScheme {
    /// Viscous stress at the previous velocity.
    Explicit,
    /// Viscous stress on the unknown with Picard-linearized convection.
    #[default]
    Implicit,
    /// Viscous stress at the midpoint `(u + u_prev) / 2`.
    SemiImplicit,
}

/// Largest local Courant number `C = U dt / h` at which the explicit variant stays bounded,
/// for the cell Péclet number `Pe = U h / nu` and the donor-cell blend of the convection
/// stencil.
///
/// The forward-Euler update keeps a nonnegative centre weight while `blend C + 4 C / Pe <= 1`,
/// and the central part of the convection stencil stays damped while `C <= blend + 2 / Pe`.
pub fn explicit_courant_limit(cell_peclet: Float, upwind_blend: Float) -> Float {
    let gamma = upwind_blend.clamp(0.0, 1.0);
    let inverse_peclet = 1.0 / cell_peclet;
    (1.0 / (gamma + 4.0 * inverse_peclet)).min(gamma + 2.0 * inverse_peclet)
}

/// Terms common to all variants.
fn momentum(params: &PhysicalParameters, convecting: Slot) -> Form {
    let PhysicalParameters { rho, g, dt, .. } = *params;
    Form::new(SpaceKind::Velocity)
        .term(rho / dt, Operator::Mass, Operand::Trial)
        .term(-rho / dt, Operator::Mass, Operand::Field(Slot::PreviousVelocity))
        .term(rho, Operator::Convection, Operand::Field(convecting))
        .term(1.0, Operator::Gradient, Operand::Field(Slot::PreviousPressure))
        .term(-rho, Operator::Source(Vector2::new(0.0, -g)), Operand::Unit)
}

#[derive(Debug, Clone)]
pub struct ExplicitStep {
    system: LinearSystem,
}

impl ExplicitStep {
    pub fn residual(params: &PhysicalParameters) -> Form {
        momentum(params, Slot::PreviousVelocity).term(
            -params.mu,
            Operator::StressDivergence,
            Operand::Field(Slot::PreviousVelocity),
        )
    }

    pub fn new<A: Assemble>(state: &SimulationState, assembler: &A) -> Result<Self> {
        let system = LinearSystem::from_residual(
            Stage::Tentative,
            &Self::residual(&state.params),
            assembler,
            &state.bcu,
        )?;
        Ok(Self { system })
    }
}

#[derive(Debug, Clone)]
pub struct ImplicitStep {
    system: LinearSystem,
    picard_iterations: usize,
}

impl ImplicitStep {
    pub fn residual(params: &PhysicalParameters) -> Form {
        momentum(params, Slot::IterateVelocity).term(-params.mu, Operator::StressDivergence, Operand::Trial)
    }

    pub fn new<A: Assemble>(state: &SimulationState, assembler: &A, picard_iterations: usize) -> Result<Self> {
        let system = LinearSystem::from_residual(
            Stage::Tentative,
            &Self::residual(&state.params),
            assembler,
            &state.bcu,
        )?;
        Ok(Self {
            system,
            picard_iterations: picard_iterations.max(1),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SemiImplicitStep {
    system: LinearSystem,
}

impl SemiImplicitStep {
    pub fn residual(params: &PhysicalParameters) -> Form {
        let half_mu = 0.5 * params.mu;
        momentum(params, Slot::PreviousVelocity)
            .term(-half_mu, Operator::StressDivergence, Operand::Trial)
            .term(
                -half_mu,
                Operator::StressDivergence,
                Operand::Field(Slot::PreviousVelocity),
            )
    }

    pub fn new<A: Assemble>(state: &SimulationState, assembler: &A) -> Result<Self> {
        let system = LinearSystem::from_residual(
            Stage::Tentative,
            &Self::residual(&state.params),
            assembler,
            &state.bcu,
        )?;
        Ok(Self { system })
    }
}

#[derive(Debug, Clone)]
pub enum TentativeVelocityStep {
    Explicit(ExplicitStep),
    Implicit(ImplicitStep),
    SemiImplicit(SemiImplicitStep),
}

impl TentativeVelocityStep {
    /// Builds the variant's forms from the state's current parameters and assembles its matrix.
    pub fn new<A: Assemble>(
        scheme: TentativeScheme,
        state: &SimulationState,
        assembler: &A,
        picard_iterations: usize,
    ) -> Result<Self> {
        Ok(match scheme {
            TentativeScheme::Explicit => Self::Explicit(ExplicitStep::new(state, assembler)?),
            TentativeScheme::Implicit => {
                Self::Implicit(ImplicitStep::new(state, assembler, picard_iterations)?)
            }
            TentativeScheme::SemiImplicit => {
                Self::SemiImplicit(SemiImplicitStep::new(state, assembler)?)
            }
        })
    }

    /// Computes the tentative velocity.
    ///
    /// Reads `u_prev`, `p_prev` and `params`; writes `u` (and `u_iter` for the implicit
    /// variant). With `reassemble` the forms are rebuilt from the current parameters and the
    /// matrix is reassembled; otherwise the cached matrix is reused.
    pub fn solve<A: Assemble, S: LinearSolver>(
        &mut self,
        state: &mut SimulationState,
        assembler: &A,
        solver: &S,
        settings: &SolverSettings,
        reassemble: bool,
    ) -> Result<SolveStats> {
        let residual = match self {
            Self::Explicit(_) => ExplicitStep::residual(&state.params),
            Self::Implicit(_) => ImplicitStep::residual(&state.params),
            Self::SemiImplicit(_) => SemiImplicitStep::residual(&state.params),
        };
        let passes = match self {
            Self::Implicit(step) => step.picard_iterations,
            _ => 1,
        };
        let system = match self {
            Self::Explicit(step) => &mut step.system,
            Self::Implicit(step) => &mut step.system,
            Self::SemiImplicit(step) => &mut step.system,
        };
        if reassemble {
            system.set_residual(&residual);
        }
        system.refresh(assembler, &state.bcu, false)?;

        let mut stats = SolveStats::default();
        state.fields.u_iter.copy_from(&state.fields.u_prev);
        for pass in 0..passes {
            let mut u = state.fields.u.clone();
            let pass_stats = system.solve(assembler, solver, settings, &state.bcu, &state.fields, &mut u)?;
            state.fields.u = u;
            state.fields.u_iter.copy_from(&state.fields.u);
            stats.iterations += pass_stats.iterations;
            stats.residual = pass_stats.residual;
            if passes > 1 {
                debug!(
                    "Picard pass {}/{}: {} iterations",
                    pass + 1,
                    passes,
                    pass_stats.iterations
                );
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::StaggeredAssembler;
    use crate::geometry::Geometry;
    use crate::linalg::KrylovSolver;
    use crate::sweep::boundary_conditions;

    fn params() -> PhysicalParameters {
        PhysicalParameters {
            rho: 2.0,
            mu: 0.1,
            g: 9.81,
            dt: 0.5,
        }
    }

    #[test]
    fn test_residual_split() {
        let explicit = ExplicitStep::residual(&params());
        assert_eq!(explicit.lhs().terms.len(), 1);
        assert!((explicit.lhs().terms[0].coefficient - 4.0).abs() < 1e-12);

        let implicit = ImplicitStep::residual(&params());
        let a = implicit.lhs();
        assert_eq!(a.terms.len(), 2);
        assert!(a.terms.iter().any(|t| t.operator == Operator::StressDivergence && (t.coefficient + 0.1).abs() < 1e-12));

        let semi = SemiImplicitStep::residual(&params());
        let stress: Vec<_> = semi
            .terms
            .iter()
            .filter(|t| t.operator == Operator::StressDivergence)
            .collect();
        assert_eq!(stress.len(), 2);
        assert!(stress.iter().all(|t| (t.coefficient + 0.05).abs() < 1e-12));
    }

    #[test]
    fn test_gravity_on_fluid_at_rest() {
        // No walls, no pressure: one step of free fall gives u_y = -g dt everywhere inside.
        let geometry = Geometry::channel(1.0, 0.5, 5, None).unwrap();
        let assembler = StaggeredAssembler::new(&geometry, 0.5);
        let mut state = SimulationState::new(geometry, params(), &[], &[]).unwrap();
        let mut step = TentativeVelocityStep::new(TentativeScheme::Implicit, &state, &assembler, 1).unwrap();

        step.solve(&mut state, &assembler, &KrylovSolver, &SolverSettings::bicgstab_ilu(), false)
            .unwrap();

        let l = state.velocity_space.layout();
        assert!((state.fields.u[l.v(3, 2)] + 9.81 * 0.5).abs() < 1e-8);
        assert!(state.fields.u[l.u(3, 2)].abs() < 1e-8);
    }

    fn tentative_with_passes(passes: usize) -> crate::state::Fields {
        let geometry = Geometry::channel(1.0, 0.4, 8, None).unwrap();
        let assembler = StaggeredAssembler::new(&geometry, 0.5);
        let (bcu, bcp) = boundary_conditions(&geometry, 1.0, 0.0);
        let mut state = SimulationState::new(geometry, params(), &bcu, &bcp).unwrap();
        let mut step = TentativeVelocityStep::new(TentativeScheme::Implicit, &state, &assembler, passes).unwrap();

        step.solve(&mut state, &assembler, &KrylovSolver, &SolverSettings::bicgstab_ilu(), false)
            .unwrap();
        state.fields
    }

    #[test]
    fn test_picard_passes_relinearize_convection() {
        let once = tentative_with_passes(1);
        let thrice = tentative_with_passes(3);
        assert_eq!(thrice.u_iter, thrice.u);
        assert_eq!(once.u_prev, thrice.u_prev);
        // later passes convect with the previous pass's velocity instead of u_prev
        assert!((&thrice.u - &once.u).amax() > 1e-6);
    }

    #[test]
    fn test_explicit_courant_limit() {
        // Pe = 5: the centre weight binds
        assert!((explicit_courant_limit(5.0, 0.5) - 1.0 / 1.3).abs() < 1e-12);
        // Pe = 50: the central convection part binds
        assert!((explicit_courant_limit(50.0, 0.5) - 0.54).abs() < 1e-12);
        // inviscid donor cell
        assert!((explicit_courant_limit(Float::INFINITY, 1.0) - 1.0).abs() < 1e-12);
        assert_eq!(explicit_courant_limit(Float::INFINITY, 0.0), 0.0);
    }
}
