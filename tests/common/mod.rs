#![allow(dead_code)]

use ipcs_flow::config::SolversConfig;
use ipcs_flow::solver::ProjectionOptions;
use ipcs_flow::sweep;
use ipcs_flow::{
    Float, Geometry, KrylovSolver, Obstacle, PhysicalParameters, ProjectionSolver,
    SimulationState, StaggeredAssembler, TentativeScheme,
};
use nalgebra::Point2;

pub type Driver = ProjectionSolver<StaggeredAssembler, KrylovSolver>;

/// 1.0 x 0.4 channel, 8 cells across.
pub fn plain_channel() -> Geometry {
    Geometry::channel(1.0, 0.4, 8, None).unwrap()
}

/// Same channel with a small cylinder near the inlet.
pub fn cylinder_channel() -> Geometry {
    let obstacle = Obstacle::Cylinder {
        center: Point2::new(0.2, 0.2),
        radius: 0.06,
    };
    Geometry::channel(1.0, 0.4, 8, Some(obstacle)).unwrap()
}

pub fn state(geometry: Geometry, u_max: Float, mu: Float, dt: Float) -> SimulationState {
    let (bcu, bcp) = sweep::boundary_conditions(&geometry, u_max, 0.0);
    let params = PhysicalParameters {
        rho: 1.0,
        mu,
        g: 0.0,
        dt,
    };
    SimulationState::new(geometry, params, &bcu, &bcp).unwrap()
}

pub fn tight_solvers() -> SolversConfig {
    let mut solvers = SolversConfig::default();
    solvers.tentative = solvers.tentative.with_tolerance(1e-12);
    solvers.pressure = solvers.pressure.with_tolerance(1e-12);
    solvers.correction = solvers.correction.with_tolerance(1e-12);
    solvers
}

pub fn driver(state: SimulationState, options: ProjectionOptions) -> Driver {
    let assembler = StaggeredAssembler::new(&state.geometry, 0.5);
    ProjectionSolver::new(state, assembler, KrylovSolver, options).unwrap()
}

pub fn options(n_steps: usize, scheme: TentativeScheme) -> ProjectionOptions {
    let mut options = ProjectionOptions::new(n_steps, scheme);
    options.solvers = tight_solvers();
    options
}
