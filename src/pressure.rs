use crate::assembly::Assemble;
use crate::error::{Result, Stage};
use crate::form::{Form, Operand, Operator, Slot};
use crate::linalg::{LinearSolver, SolveStats, SolverSettings};
use crate::space::SpaceKind;
use crate::state::{PhysicalParameters, SimulationState};
use crate::system::LinearSystem;

/// Second sub-step: the incremental pressure Poisson problem
/// `-Δp = -Δp_prev - rho/dt ∇·u` with the pressure conditions applied.
#[derive(Debug, Clone)]
pub struct PressureCorrectionStep {
    system: LinearSystem,
}

impl PressureCorrectionStep {
    pub fn residual(params: &PhysicalParameters) -> Form {
        Form::new(SpaceKind::Pressure)
            .term(-1.0, Operator::Laplacian, Operand::Trial)
            .term(1.0, Operator::Laplacian, Operand::Field(Slot::PreviousPressure))
            .term(
                params.rho / params.dt,
                Operator::Divergence,
                Operand::Field(Slot::Velocity),
            )
    }

    pub fn new<A: Assemble>(state: &SimulationState, assembler: &A) -> Result<Self> {
        let system = LinearSystem::from_residual(
            Stage::Pressure,
            &Self::residual(&state.params),
            assembler,
            &state.bcp,
        )?;
        Ok(Self { system })
    }

    /// Reads the tentative `u`, `p_prev` and `params`; writes `p`.
    pub fn solve<A: Assemble, S: LinearSolver>(
        &mut self,
        state: &mut SimulationState,
        assembler: &A,
        solver: &S,
        settings: &SolverSettings,
        reassemble: bool,
    ) -> Result<SolveStats> {
        if reassemble {
            self.system.set_residual(&Self::residual(&state.params));
        }
        self.system.refresh(assembler, &state.bcp, false)?;

        let mut p = state.fields.p.clone();
        let stats = self
            .system
            .solve(assembler, solver, settings, &state.bcp, &state.fields, &mut p)?;
        state.fields.p = p;
        Ok(stats)
    }
}
