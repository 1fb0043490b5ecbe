use std::fmt;

use thiserror::Error;

use crate::Float;

/// Sub-step of the projection scheme that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Tentative,
    Pressure,
    Correction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Tentative => "tentative velocity",
            Stage::Pressure => "pressure correction",
            Stage::Correction => "velocity correction",
        };
        f.write_str(name)
    }
}

/// Failures reported by the sparse linear solvers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("no convergence after {iterations} iterations (residual {residual:.3e}, target {target:.3e})")]
    NotConverged {
        iterations: usize,
        residual: Float,
        target: Float,
    },

    #[error("{method} broke down at iteration {iteration}")]
    Breakdown {
        method: &'static str,
        iteration: usize,
    },

    #[error("non-finite values in {0}")]
    NonFinite(&'static str),

    #[error("preconditioner has a zero pivot in row {row}")]
    SingularPreconditioner { row: usize },

    #[error("dimension mismatch: matrix is {rows}x{cols}, vector has {len} entries")]
    Dimension { rows: usize, cols: usize, len: usize },
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("{stage} solve diverged: {source}")]
    SolveDivergence {
        stage: Stage,
        #[source]
        source: LinalgError,
    },

    #[error("boundary condition '{name}' matches no {space} degrees of freedom")]
    BoundaryConditionMismatch { name: String, space: String },

    #[error("time step {step} (t = {time:.5}) failed: {source}")]
    TimeStep {
        step: usize,
        time: Float,
        #[source]
        source: Box<FlowError>,
    },

    #[error("run was aborted at time step {step}")]
    RunAborted { step: usize },

    #[error("case panicked: {0}")]
    Panicked(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Sub-step responsible for this error, looking through time-step wrappers.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            FlowError::SolveDivergence { stage, .. } => Some(*stage),
            FlowError::TimeStep { source, .. } => source.stage(),
            _ => None,
        }
    }

    /// Time-step index the error occurred at, if it happened while stepping.
    pub fn step(&self) -> Option<usize> {
        match self {
            FlowError::TimeStep { step, .. } | FlowError::RunAborted { step } => Some(*step),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
