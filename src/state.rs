use log::info;
use nalgebra::DVector;

use crate::assembly::Coefficients;
use crate::boundary::{self, DirichletBc, ResolvedBc};
use crate::error::Result;
use crate::form::Slot;
use crate::geometry::Geometry;
use crate::space::FunctionSpace;
use crate::Float;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalParameters {
    pub rho: Float,
    pub mu: Float,
    /// Gravitational acceleration, acting in `-y`.
    pub g: Float,
    pub dt: Float,
}

impl PhysicalParameters {
    pub fn kinematic_viscosity(&self) -> Float {
        self.mu / self.rho
    }
}

/// Discrete fields of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Fields {
    /// Tentative velocity after the first sub-step, corrected velocity after the third.
    pub u: DVector<Float>,
    pub u_prev: DVector<Float>,
    /// Picard iterate used to linearize convection.
    pub u_iter: DVector<Float>,
    pub p: DVector<Float>,
    pub p_prev: DVector<Float>,
}

impl Fields {
    pub fn zeros(velocity: &FunctionSpace, pressure: &FunctionSpace) -> Self {
        Self {
            u: velocity.zeros(),
            u_prev: velocity.zeros(),
            u_iter: velocity.zeros(),
            p: pressure.zeros(),
            p_prev: pressure.zeros(),
        }
    }

    /// Promotes the current fields to the previous-step slots.
    pub fn commit(&mut self) {
        self.u_prev.copy_from(&self.u);
        self.p_prev.copy_from(&self.p);
    }
}

impl Coefficients for Fields {
    fn field(&self, slot: Slot) -> &DVector<Float> {
        match slot {
            Slot::Velocity => &self.u,
            Slot::PreviousVelocity => &self.u_prev,
            Slot::IterateVelocity => &self.u_iter,
            Slot::Pressure => &self.p,
            Slot::PreviousPressure => &self.p_prev,
        }
    }
}

/// Everything the splitting steps read and write during a run.
///
/// The steps receive `&mut SimulationState` and touch only the field slots; spaces, boundary
/// conditions and geometry are fixed for the lifetime of the run. Physical parameters may be
/// changed between steps, after which the implicit tentative step must be reassembled.
#[derive(Debug)]
pub struct SimulationState {
    pub geometry: Geometry,
    pub velocity_space: FunctionSpace,
    pub pressure_space: FunctionSpace,
    pub params: PhysicalParameters,
    pub bcu: Vec<ResolvedBc>,
    pub bcp: Vec<ResolvedBc>,
    pub fields: Fields,
    pub time: Float,
    pub step: usize,
}

impl SimulationState {
    /// Resolves the boundary conditions (a condition matching no DOF fails here, before any
    /// solve) and starts from rest with the conditions imposed.
    pub fn new(
        geometry: Geometry,
        params: PhysicalParameters,
        bcu: &[DirichletBc],
        bcp: &[DirichletBc],
    ) -> Result<Self> {
        let velocity_space = FunctionSpace::velocity(&geometry);
        let pressure_space = FunctionSpace::pressure(&geometry);
        let bcu = boundary::resolve_all(bcu, &velocity_space)?;
        let bcp = boundary::resolve_all(bcp, &pressure_space)?;

        let mut fields = Fields::zeros(&velocity_space, &pressure_space);
        boundary::impose(&bcu, &mut fields.u);
        boundary::impose(&bcp, &mut fields.p);
        fields.commit();
        fields.u_iter.copy_from(&fields.u);

        info!(
            "State: {} velocity DOFs, {} pressure DOFs, {} velocity and {} pressure conditions",
            velocity_space.dim(),
            pressure_space.dim(),
            bcu.len(),
            bcp.len()
        );

        Ok(Self {
            geometry,
            velocity_space,
            pressure_space,
            params,
            bcu,
            bcp,
            fields,
            time: 0.0,
            step: 0,
        })
    }

    /// Largest velocity magnitude over cell centres.
    pub fn max_velocity(&self) -> Float {
        let mut max: Float = 0.0;
        for j in 0..self.geometry.ny {
            for i in 0..self.geometry.nx {
                if self.geometry.is_fluid(i, j) {
                    let u = self.velocity_space.cell_velocity(&self.fields.u, i, j);
                    max = max.max(u.norm());
                }
            }
        }
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use nalgebra::Vector2;

    fn params() -> PhysicalParameters {
        PhysicalParameters {
            rho: 1.0,
            mu: 0.01,
            g: 0.0,
            dt: 0.01,
        }
    }

    #[test]
    fn test_initial_fields_satisfy_conditions() {
        let geometry = Geometry::channel(1.0, 0.4, 8, None).unwrap();
        let inflow = DirichletBc::velocity(
            "inflow",
            |_| Vector2::new(1.0, 0.0),
            |x, on_boundary| on_boundary && x.x < 1e-9,
        );
        let state = SimulationState::new(geometry, params(), &[inflow], &[]).unwrap();

        let l = state.velocity_space.layout();
        assert_eq!(state.fields.u[l.u(0, 3)], 1.0);
        assert_eq!(state.fields.u_prev, state.fields.u);
        assert_eq!(state.fields.u_iter, state.fields.u);
        assert_eq!(state.step, 0);
    }

    #[test]
    fn test_unmatched_condition_fails_construction() {
        let geometry = Geometry::channel(1.0, 0.4, 8, None).unwrap();
        let outlet = DirichletBc::pressure("outlet", 0.0, |x, _| x.x > 2.0);
        let err = SimulationState::new(geometry, params(), &[], &[outlet]).unwrap_err();
        assert!(matches!(err, FlowError::BoundaryConditionMismatch { .. }));
    }

    #[test]
    fn test_commit_copies_current_fields() {
        let geometry = Geometry::channel(1.0, 0.4, 4, None).unwrap();
        let mut state = SimulationState::new(geometry, params(), &[], &[]).unwrap();
        state.fields.u.fill(2.0);
        state.fields.p.fill(-1.0);
        state.fields.commit();
        assert_eq!(state.fields.u_prev, state.fields.u);
        assert_eq!(state.fields.p_prev, state.fields.p);
    }
}
