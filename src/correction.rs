use serde::{Deserialize, Serialize};

use crate::assembly::Assemble;
use crate::error::{Result, Stage};
use crate::form::{Form, Operand, Operator, Slot};
use crate::linalg::{LinearSolver, SolveStats, SolverSettings};
use crate::space::SpaceKind;
use crate::state::{PhysicalParameters, SimulationState};
use crate::system::LinearSystem;
use crate::Float;

/// Factor `s` in `u = u_tentative - s ∇(p - p_prev)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionScaling {
    /// `s = dt / rho`, consistent with the pressure step for any density.
    #[default]
    DtOverRho,
    /// `s = dt`; only consistent with the pressure step when `rho = 1`.
    Dt,
}

impl CorrectionScaling {
    pub fn factor(&self, params: &PhysicalParameters) -> Float {
        match self {
            CorrectionScaling::DtOverRho => params.dt / params.rho,
            CorrectionScaling::Dt => params.dt,
        }
    }
}

/// Third sub-step: projects the tentative velocity with the pressure increment.
#[derive(Debug, Clone)]
pub struct VelocityCorrectionStep {
    system: LinearSystem,
    scaling: CorrectionScaling,
}

impl VelocityCorrectionStep {
    pub fn residual(params: &PhysicalParameters, scaling: CorrectionScaling) -> Form {
        let s = scaling.factor(params);
        Form::new(SpaceKind::Velocity)
            .term(1.0, Operator::Mass, Operand::Trial)
            .term(-1.0, Operator::Mass, Operand::Field(Slot::Velocity))
            .term(s, Operator::Gradient, Operand::Field(Slot::Pressure))
            .term(-s, Operator::Gradient, Operand::Field(Slot::PreviousPressure))
    }

    pub fn new<A: Assemble>(state: &SimulationState, assembler: &A, scaling: CorrectionScaling) -> Result<Self> {
        let system = LinearSystem::from_residual(
            Stage::Correction,
            &Self::residual(&state.params, scaling),
            assembler,
            &state.bcu,
        )?;
        Ok(Self { system, scaling })
    }

    /// Reads the tentative `u`, `p` and `p_prev`; overwrites `u` with the corrected velocity.
    pub fn solve<A: Assemble, S: LinearSolver>(
        &mut self,
        state: &mut SimulationState,
        assembler: &A,
        solver: &S,
        settings: &SolverSettings,
        reassemble: bool,
    ) -> Result<SolveStats> {
        if reassemble {
            self.system
                .set_residual(&Self::residual(&state.params, self.scaling));
        }
        self.system.refresh(assembler, &state.bcu, false)?;

        let mut u = state.fields.u.clone();
        let stats = self
            .system
            .solve(assembler, solver, settings, &state.bcu, &state.fields, &mut u)?;
        state.fields.u = u;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling_factors() {
        let params = PhysicalParameters {
            rho: 4.0,
            mu: 0.01,
            g: 0.0,
            dt: 0.2,
        };
        assert!((CorrectionScaling::DtOverRho.factor(&params) - 0.05).abs() < 1e-14);
        assert!((CorrectionScaling::Dt.factor(&params) - 0.2).abs() < 1e-14);

        let residual = VelocityCorrectionStep::residual(&params, CorrectionScaling::Dt);
        let l = residual.rhs();
        assert_eq!(l.terms.len(), 3);
        assert!((l.terms[1].coefficient + 0.2).abs() < 1e-14);
    }

    #[test]
    fn test_scaling_from_config_names() {
        let scaling: CorrectionScaling = serde_json::from_str("\"dt_over_rho\"").unwrap();
        assert_eq!(scaling, CorrectionScaling::DtOverRho);
        let scaling: CorrectionScaling = serde_json::from_str("\"dt\"").unwrap();
        assert_eq!(scaling, CorrectionScaling::Dt);
    }
}
