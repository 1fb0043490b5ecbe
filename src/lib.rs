pub mod assembly;
pub mod boundary;
pub mod config;
pub mod correction;
pub mod diagnostics;
pub mod error;
pub mod form;
pub mod geometry;
pub mod linalg;
pub mod monitor;
pub mod output;
pub mod pressure;
pub mod solver;
pub mod space;
pub mod state;
pub mod sweep;
pub mod system;
pub mod tentative;

pub use assembly::{Assemble, StaggeredAssembler};
pub use boundary::{DirichletBc, ResolvedBc};
pub use config::Config;
pub use correction::{CorrectionScaling, VelocityCorrectionStep};
pub use error::{FlowError, LinalgError, Stage};
pub use form::{Form, Operand, Operator, Slot};
pub use geometry::{Geometry, Obstacle};
pub use linalg::{KrylovSolver, LinearSolver, Method, Preconditioner, SolveStats, SolverSettings};
pub use monitor::{Monitor, ProbeMonitor, ProgressMonitor, VtkMonitor};
pub use output::VTKWriter;
pub use pressure::PressureCorrectionStep;
pub use solver::{Phase, ProjectionOptions, ProjectionSolver, RunReport, StepReport};
pub use space::{FunctionSpace, SpaceKind};
pub use state::{Fields, PhysicalParameters, SimulationState};
pub use sweep::{CaseOutcome, CaseSummary};
pub use tentative::{TentativeScheme, TentativeVelocityStep};

pub type Float = f64;
