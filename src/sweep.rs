//! Channel flow cases (with or without an obstacle) and the Reynolds-number sweep.
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use nalgebra::{Point2, Vector2};

use crate::assembly::StaggeredAssembler;
use crate::boundary::DirichletBc;
use crate::config::{CaseParameters, Config};
use crate::diagnostics;
use crate::error::{FlowError, Result};
use crate::geometry::{Geometry, Obstacle};
use crate::linalg::KrylovSolver;
use crate::monitor::{Monitor, ProbeMonitor, ProgressMonitor, VtkMonitor};
use crate::solver::{ProjectionOptions, ProjectionSolver};
use crate::state::{PhysicalParameters, SimulationState};
use crate::tentative::TentativeScheme;
use crate::Float;

/// Velocity and pressure conditions of the channel: parabolic inflow with peak `u_max` at
/// `x = 0`, no-slip on both walls and on the obstacle, reference pressure at the outlet.
pub fn boundary_conditions(
    geometry: &Geometry,
    u_max: Float,
    outlet_pressure: Float,
) -> (Vec<DirichletBc>, Vec<DirichletBc>) {
    let (length, height) = (geometry.length(), geometry.height());
    let tol = 0.25 * geometry.h;

    let inflow = DirichletBc::velocity(
        "inflow",
        move |x| Vector2::new(4.0 * u_max * x.y * (height - x.y) / (height * height), 0.0),
        move |x, on_boundary| on_boundary && x.x < tol,
    );
    let walls = DirichletBc::velocity(
        "walls",
        |_| Vector2::zeros(),
        move |x, on_boundary| on_boundary && (x.y < tol || x.y > height - tol),
    );
    let mut bcu = vec![inflow, walls];

    match geometry.obstacle.clone() {
        Some(obstacle) if geometry.solid_count() > 0 => {
            let margin = geometry.h;
            bcu.push(DirichletBc::velocity(
                "obstacle",
                |_| Vector2::zeros(),
                move |x, on_boundary| on_boundary && obstacle.near(x, margin),
            ));
        }
        Some(_) => warn!("Obstacle covers no cells; no obstacle wall condition"),
        None => {}
    }

    let outflow = DirichletBc::pressure("outflow", outlet_pressure, move |x, on_boundary| {
        on_boundary && x.x > length - tol
    });

    (bcu, vec![outflow])
}

/// Default probe location: two diameters behind the obstacle, on its axis.
pub fn wake_probe(geometry: &Geometry) -> Option<Point2<Float>> {
    geometry.obstacle.as_ref().map(|obstacle| match obstacle {
        Obstacle::Cylinder { center, radius } => {
            Point2::new(center.x + 5.0 * radius, center.y)
        }
    })
}

/// Result of one completed case.
#[derive(Debug, Clone)]
pub struct CaseSummary {
    pub reynolds: Float,
    pub mu: Float,
    pub dt: Float,
    pub cfl: Float,
    pub n_steps: usize,
    pub velocity_dofs: usize,
    pub pressure_dofs: usize,
    pub final_time: Float,
    pub max_divergence: Float,
    pub max_velocity: Float,
    pub strouhal: Option<Float>,
    pub wall_time: Duration,
}

impl fmt::Display for CaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Re = {}, mu = {:.4}, dt = {:.3e}, CFL = {}, {} steps, {} + {} DOFs, t = {:.3}, \
             max |div u| = {:.2e}, max |u| = {:.3}, ",
            self.reynolds,
            self.mu,
            self.dt,
            self.cfl,
            self.n_steps,
            self.velocity_dofs,
            self.pressure_dofs,
            self.final_time,
            self.max_divergence,
            self.max_velocity
        )?;
        match self.strouhal {
            Some(st) => write!(f, "St = {:.4}, ", st)?,
            None => write!(f, "no shedding detected, ")?,
        }
        write!(f, "wall time {:.2?}", self.wall_time)
    }
}

/// Outcome of one case of a sweep; a failed case does not stop the others.
#[derive(Debug)]
pub struct CaseOutcome {
    pub reynolds: Float,
    pub result: Result<CaseSummary>,
}

/// Builds geometry, boundary conditions and initial state for one case.
pub fn build_state(config: &Config, case: &CaseParameters, geometry: Geometry) -> Result<SimulationState> {
    let (bcu, bcp) = boundary_conditions(
        &geometry,
        config.physics.inflow_max_velocity,
        config.physics.outlet_pressure,
    );
    let params = PhysicalParameters {
        rho: config.physics.density,
        mu: case.mu,
        g: config.physics.gravity,
        dt: case.dt,
    };
    SimulationState::new(geometry, params, &bcu, &bcp)
}

pub fn projection_options(config: &Config, n_steps: usize) -> ProjectionOptions {
    let simulation = &config.simulation;
    ProjectionOptions {
        n_steps,
        scheme: simulation.scheme,
        picard_iterations: simulation.picard_iterations,
        correction_scaling: simulation.correction_scaling,
        solvers: config.solvers.clone(),
        reassemble_interval: simulation.reassemble_interval,
        log_interval: config.output.log_interval,
    }
}

/// Runs one Reynolds number to the configured end time.
pub fn run_case(config: &Config, reynolds: Float) -> Result<CaseSummary> {
    let started = Instant::now();
    let geometry = Geometry::from_config(&config.domain)?;
    let case = config.case(reynolds, geometry.h_min())?;
    info!(
        "Case Re = {}: mu = {:.4}, dt = {:.3e}, {} steps, output to {}",
        reynolds, case.mu, case.dt, case.n_steps, case.output_directory
    );

    let assembler = StaggeredAssembler::new(&geometry, config.simulation.upwind_blend);
    let probe_point = config
        .output
        .probe
        .map(|[x, y]| Point2::new(x, y))
        .or_else(|| wake_probe(&geometry));
    let diameter = geometry.obstacle.as_ref().map(|o| o.diameter());
    let state = build_state(config, &case, geometry)?;
    let (velocity_dofs, pressure_dofs) = (state.velocity_space.dim(), state.pressure_space.dim());

    if config.simulation.scheme == TentativeScheme::Explicit {
        let limit = config.explicit_cfl_limit(state.params.kinematic_viscosity(), state.geometry.h_min());
        if config.simulation.cfl > limit {
            warn!(
                "Case Re = {}: CFL {} exceeds the explicit stability limit {:.3}; expect divergence",
                reynolds, config.simulation.cfl, limit
            );
        }
    }

    let output_directory = Path::new(&case.output_directory);
    let mut progress = if config.output.progress {
        ProgressMonitor::new(case.n_steps)
    } else {
        ProgressMonitor::hidden()
    };
    let mut vtk = (config.output.output_frequency > 0)
        .then(|| VtkMonitor::new(output_directory, config.output.output_frequency, &state));
    let mut probe = probe_point.map(|point| {
        let monitor = ProbeMonitor::new(point);
        if config.output.output_frequency > 0 {
            monitor.with_output(output_directory.join("probe.csv"))
        } else {
            monitor
        }
    });

    let mut solver = ProjectionSolver::new(
        state,
        assembler,
        KrylovSolver,
        projection_options(config, case.n_steps),
    )?;

    let mut monitors: Vec<&mut dyn Monitor> = vec![&mut progress];
    if let Some(vtk) = vtk.as_mut() {
        monitors.push(vtk);
    }
    if let Some(probe) = probe.as_mut() {
        monitors.push(probe);
    }
    let report = solver.run(&mut monitors)?;

    let strouhal = match (probe.as_ref().and_then(|p| p.frequency(0.5)), diameter) {
        (Some(frequency), Some(diameter)) => Some(diagnostics::strouhal(
            frequency,
            diameter,
            case.mean_velocity,
        )),
        _ => None,
    };

    Ok(CaseSummary {
        reynolds,
        mu: case.mu,
        dt: case.dt,
        cfl: config.simulation.cfl,
        n_steps: case.n_steps,
        velocity_dofs,
        pressure_dofs,
        final_time: report.final_time,
        max_divergence: report.max_divergence,
        max_velocity: report.max_velocity,
        strouhal,
        wall_time: started.elapsed(),
    })
}

/// Runs every configured Reynolds number in turn. A failing case is logged and reported in
/// its outcome; the remaining cases still run.
pub fn run_sweep(config: &Config) -> Vec<CaseOutcome> {
    run_sweep_with(config, run_case)
}

/// Runs `run` for every configured Reynolds number. An error or a panic inside one case
/// becomes that case's outcome and does not affect the others.
pub fn run_sweep_with<F>(config: &Config, mut run: F) -> Vec<CaseOutcome>
where
    F: FnMut(&Config, Float) -> Result<CaseSummary>,
{
    config
        .physics
        .reynolds_numbers
        .iter()
        .map(|&reynolds| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| run(config, reynolds)))
                .unwrap_or_else(|payload| Err(FlowError::Panicked(panic_message(payload.as_ref()))));
            match &result {
                Ok(summary) => info!("{}", summary),
                Err(e) => error!("Case Re = {} failed: {}", reynolds, e),
            }
            CaseOutcome { reynolds, result }
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::FunctionSpace;

    #[test]
    fn test_conditions_resolve_on_cylinder_channel() {
        let obstacle = Obstacle::Cylinder {
            center: Point2::new(0.2, 0.2),
            radius: 0.06,
        };
        let geometry = Geometry::channel(1.0, 0.4, 10, Some(obstacle)).unwrap();
        let (bcu, bcp) = boundary_conditions(&geometry, 1.5, 0.0);
        assert_eq!(bcu.len(), 3);

        let velocity = FunctionSpace::velocity(&geometry);
        let pressure = FunctionSpace::pressure(&geometry);
        for bc in &bcu {
            assert!(!bc.resolve(&velocity).unwrap().constraints().is_empty());
        }
        let outflow = bcp[0].resolve(&pressure).unwrap();
        // one ghost per row plus the two outlet corners
        assert_eq!(outflow.constraints().len(), geometry.ny + 2);
    }

    #[test]
    fn test_inflow_profile_peaks_mid_channel() {
        let geometry = Geometry::channel(1.0, 0.4, 10, None).unwrap();
        let (bcu, _) = boundary_conditions(&geometry, 1.5, 0.0);
        let velocity = FunctionSpace::velocity(&geometry);
        let inflow = bcu[0].resolve(&velocity).unwrap();
        let peak = inflow
            .constraints()
            .iter()
            .map(|c| c.value)
            .fold(0.0, Float::max);
        // cell faces sit half a cell off the centreline
        assert!(peak > 1.45 && peak <= 1.5);
    }

    #[test]
    fn test_wake_probe_behind_cylinder() {
        let obstacle = Obstacle::Cylinder {
            center: Point2::new(0.2, 0.2),
            radius: 0.05,
        };
        let geometry = Geometry::channel(2.2, 0.41, 10, Some(obstacle)).unwrap();
        let probe = wake_probe(&geometry).unwrap();
        assert!((probe.x - 0.45).abs() < 1e-12);
    }
}
