use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::assembly::Assemble;
use crate::config::SolversConfig;
use crate::correction::{CorrectionScaling, VelocityCorrectionStep};
use crate::diagnostics::{self, DivergenceNorms};
use crate::error::{FlowError, Result};
use crate::form::Slot;
use crate::linalg::{LinearSolver, SolveStats};
use crate::monitor::Monitor;
use crate::pressure::PressureCorrectionStep;
use crate::state::SimulationState;
use crate::tentative::{TentativeScheme, TentativeVelocityStep};
use crate::Float;

/// Where the time loop stands. Steps are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ready { next: usize },
    Completed,
    Failed { step: usize },
}

/// Scheme choices and run length for a [`ProjectionSolver`].
#[derive(Debug, Clone)]
pub struct ProjectionOptions {
    pub n_steps: usize,
    pub scheme: TentativeScheme,
    pub picard_iterations: usize,
    pub correction_scaling: CorrectionScaling,
    pub solvers: SolversConfig,
    pub reassemble_interval: Option<usize>,
    pub log_interval: usize,
}

impl ProjectionOptions {
    pub fn new(n_steps: usize, scheme: TentativeScheme) -> Self {
        Self {
            n_steps,
            scheme,
            picard_iterations: 1,
            correction_scaling: CorrectionScaling::default(),
            solvers: SolversConfig::default(),
            reassemble_interval: None,
            log_interval: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: usize,
    pub time: Float,
    pub tentative: SolveStats,
    pub pressure: SolveStats,
    pub correction: SolveStats,
    pub divergence: DivergenceNorms,
    pub max_velocity: Float,
    pub reassembled: bool,
    pub wall_time: Duration,
}

impl StepReport {
    pub fn linear_iterations(&self) -> usize {
        self.tentative.iterations + self.pressure.iterations + self.correction.iterations
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub steps: usize,
    pub final_time: Float,
    pub linear_iterations: usize,
    /// Largest divergence max-norm seen over all steps.
    pub max_divergence: Float,
    pub max_velocity: Float,
    pub wall_time: Duration,
}

/// Time-stepping driver for the three-stage projection scheme.
///
/// Each step runs tentative velocity, pressure correction and velocity correction in that
/// order and only then promotes `u`, `p` to `u_prev`, `p_prev`. A failure in any stage leaves
/// the previous-step fields at their last converged values and moves the driver to
/// [`Phase::Failed`].
pub struct ProjectionSolver<A: Assemble, S: LinearSolver> {
    state: SimulationState,
    assembler: A,
    solver: S,
    solvers: SolversConfig,
    tentative: TentativeVelocityStep,
    pressure: PressureCorrectionStep,
    correction: VelocityCorrectionStep,
    n_steps: usize,
    phase: Phase,
    reassemble_interval: Option<usize>,
    reassembly_requested: bool,
    log_interval: usize,
}

impl<A: Assemble, S: LinearSolver> ProjectionSolver<A, S> {
    /// Builds the three steps, assembling their matrices. Assembly errors surface here, before
    /// any time step is taken.
    pub fn new(state: SimulationState, assembler: A, solver: S, options: ProjectionOptions) -> Result<Self> {
        info!(
            "Initializing projection solver: {:?} tentative step, {} steps of dt = {:.3e}",
            options.scheme, options.n_steps, state.params.dt
        );
        let tentative =
            TentativeVelocityStep::new(options.scheme, &state, &assembler, options.picard_iterations)?;
        let pressure = PressureCorrectionStep::new(&state, &assembler)?;
        let correction = VelocityCorrectionStep::new(&state, &assembler, options.correction_scaling)?;

        let phase = if options.n_steps == 0 {
            Phase::Completed
        } else {
            Phase::Ready { next: state.step + 1 }
        };

        Ok(Self {
            state,
            assembler,
            solver,
            solvers: options.solvers,
            tentative,
            pressure,
            correction,
            n_steps: options.n_steps,
            phase,
            reassemble_interval: options.reassemble_interval.filter(|&interval| interval > 0),
            reassembly_requested: false,
            log_interval: options.log_interval.max(1),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Mutable access between steps, e.g. to change physical parameters. Follow a parameter
    /// change with [`request_reassembly`](Self::request_reassembly).
    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    pub fn into_state(self) -> SimulationState {
        self.state
    }

    /// Rebuild all matrices from the current parameters before the next step.
    pub fn request_reassembly(&mut self) {
        self.reassembly_requested = true;
    }

    fn take_reassembly(&mut self, step: usize) -> bool {
        let periodic = self
            .reassemble_interval
            .is_some_and(|interval| step % interval == 0);
        let requested = std::mem::take(&mut self.reassembly_requested);
        periodic || requested
    }

    fn run_stages(&mut self, reassemble: bool) -> Result<(SolveStats, SolveStats, SolveStats)> {
        let tentative = self.tentative.solve(
            &mut self.state,
            &self.assembler,
            &self.solver,
            &self.solvers.tentative,
            reassemble,
        )?;
        let pressure = self.pressure.solve(
            &mut self.state,
            &self.assembler,
            &self.solver,
            &self.solvers.pressure,
            reassemble,
        )?;
        let correction = self.correction.solve(
            &mut self.state,
            &self.assembler,
            &self.solver,
            &self.solvers.correction,
            reassemble,
        )?;
        Ok((tentative, pressure, correction))
    }

    /// Advances one time step. Returns `Ok(None)` once all steps are done.
    pub fn advance(&mut self) -> Result<Option<StepReport>> {
        let step = match self.phase {
            Phase::Completed => return Ok(None),
            Phase::Failed { step } => return Err(FlowError::RunAborted { step }),
            Phase::Ready { next } => next,
        };

        let started = Instant::now();
        let time = self.state.time + self.state.params.dt;
        let reassemble = self.take_reassembly(step);

        let outcome = self.run_stages(reassemble).and_then(|stats| {
            let divergence = diagnostics::divergence(
                &self.assembler,
                &self.state.pressure_space,
                &self.state.fields,
                Slot::Velocity,
            )?;
            Ok((stats, divergence))
        });

        let ((tentative, pressure, correction), divergence) = match outcome {
            Ok(result) => result,
            Err(source) => {
                self.phase = Phase::Failed { step };
                warn!("Time step {} failed: {}", step, source);
                return Err(FlowError::TimeStep {
                    step,
                    time,
                    source: Box::new(source),
                });
            }
        };

        self.state.fields.commit();
        self.state.time = time;
        self.state.step = step;
        self.phase = if step >= self.n_steps {
            Phase::Completed
        } else {
            Phase::Ready { next: step + 1 }
        };

        let report = StepReport {
            step,
            time,
            tentative,
            pressure,
            correction,
            divergence,
            max_velocity: self.state.max_velocity(),
            reassembled: reassemble,
            wall_time: started.elapsed(),
        };

        debug!(
            "Step {}: t = {:.5}, iterations {}/{}/{}, |div u| = {:.3e}, max |u| = {:.4}",
            step,
            time,
            tentative.iterations,
            pressure.iterations,
            correction.iterations,
            divergence.max,
            report.max_velocity
        );
        if step % self.log_interval == 0 {
            info!(
                "Step {}/{}: t = {:.4}, max |u| = {:.4}, |div u|_2 = {:.3e}",
                step, self.n_steps, time, report.max_velocity, divergence.l2
            );
        }

        Ok(Some(report))
    }

    /// Steps until completion, notifying `monitors` after every step.
    pub fn run(&mut self, monitors: &mut [&mut dyn Monitor]) -> Result<RunReport> {
        info!("Starting time loop for {} steps", self.n_steps);
        let started = Instant::now();
        let mut report = RunReport::default();

        for monitor in monitors.iter_mut() {
            monitor.start(&self.state)?;
        }

        loop {
            let step = match self.advance() {
                Ok(Some(step)) => step,
                Ok(None) => break,
                Err(e) => {
                    for monitor in monitors.iter_mut() {
                        if let Err(finish_error) = monitor.finish(&self.state) {
                            warn!("Monitor failed to finish after error: {}", finish_error);
                        }
                    }
                    return Err(e);
                }
            };

            report.steps += 1;
            report.linear_iterations += step.linear_iterations();
            report.max_divergence = report.max_divergence.max(step.divergence.max);
            report.max_velocity = step.max_velocity;
            report.final_time = step.time;

            for monitor in monitors.iter_mut() {
                monitor.on_step(&self.state, &step)?;
            }
        }

        for monitor in monitors.iter_mut() {
            monitor.finish(&self.state)?;
        }

        report.wall_time = started.elapsed();
        info!(
            "Time loop finished: {} steps to t = {:.4} in {:.2?}, {} linear iterations",
            report.steps, report.final_time, report.wall_time, report.linear_iterations
        );
        Ok(report)
    }
}
