use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::correction::CorrectionScaling;
use crate::error::{FlowError, Result};
use crate::linalg::{Method, Preconditioner, SolverSettings};
use crate::tentative::{explicit_courant_limit, TentativeScheme};
use crate::Float;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub domain: DomainConfig,
    pub physics: PhysicsConfig,
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub solvers: SolversConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub length: Float,
    pub height: Float,
    /// Cells across the channel height.
    pub resolution: usize,
    #[serde(default)]
    pub obstacle: Option<ObstacleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstacleConfig {
    pub center: [Float; 2],
    pub radius: Float,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    pub density: Float,
    /// Peak of the parabolic inflow profile.
    pub inflow_max_velocity: Float,
    /// Length scale of the Reynolds number (cylinder diameter for the benchmark).
    pub characteristic_length: Float,
    #[serde(default)]
    pub gravity: Float,
    pub reynolds_numbers: Vec<Float>,
    #[serde(default)]
    pub outlet_pressure: Float,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub end_time: Float,
    pub cfl: Float,
    #[serde(default)]
    pub scheme: TentativeScheme,
    #[serde(default = "default_picard_iterations")]
    pub picard_iterations: usize,
    #[serde(default)]
    pub correction_scaling: CorrectionScaling,
    #[serde(default = "default_upwind_blend")]
    pub upwind_blend: Float,
    /// Reassemble every step's matrix every this many steps.
    #[serde(default)]
    pub reassemble_interval: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolversConfig {
    pub tentative: SolverSettings,
    pub pressure: SolverSettings,
    pub correction: SolverSettings,
}

impl Default for SolversConfig {
    fn default() -> Self {
        Self {
            tentative: SolverSettings::new(Method::Bicgstab, Preconditioner::Ilu0),
            pressure: SolverSettings::new(Method::Bicgstab, Preconditioner::Ilu0),
            correction: SolverSettings::new(Method::Bicgstab, Preconditioner::Jacobi),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// May contain `{mu}` and `{re}` placeholders.
    pub output_directory: String,
    /// Steps between VTK snapshots; 0 disables field output.
    #[serde(default)]
    pub output_frequency: usize,
    #[serde(default)]
    pub progress: bool,
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
    /// Point at which the velocity history is recorded.
    #[serde(default)]
    pub probe: Option<[Float; 2]>,
}

fn default_picard_iterations() -> usize {
    1
}

fn default_upwind_blend() -> Float {
    0.5
}

fn default_log_interval() -> usize {
    100
}

/// Parameters derived for one Reynolds number of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseParameters {
    pub reynolds: Float,
    pub mu: Float,
    pub dt: Float,
    pub n_steps: usize,
    pub mean_velocity: Float,
    pub output_directory: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("domain.length", self.domain.length),
            ("domain.height", self.domain.height),
            ("physics.density", self.physics.density),
            ("physics.inflow_max_velocity", self.physics.inflow_max_velocity),
            ("physics.characteristic_length", self.physics.characteristic_length),
            ("simulation.end_time", self.simulation.end_time),
            ("simulation.cfl", self.simulation.cfl),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(FlowError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.domain.resolution < 2 {
            return Err(FlowError::Config("domain.resolution must be at least 2".to_string()));
        }
        if self.physics.reynolds_numbers.is_empty() {
            return Err(FlowError::Config("physics.reynolds_numbers is empty".to_string()));
        }
        if let Some(re) = self.physics.reynolds_numbers.iter().find(|re| !(**re > 0.0)) {
            return Err(FlowError::Config(format!("Reynolds number must be positive, got {re}")));
        }
        if self.simulation.picard_iterations == 0 {
            return Err(FlowError::Config("simulation.picard_iterations must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.simulation.upwind_blend) {
            return Err(FlowError::Config(format!(
                "simulation.upwind_blend must lie in [0, 1], got {}",
                self.simulation.upwind_blend
            )));
        }
        if self.simulation.reassemble_interval == Some(0) {
            return Err(FlowError::Config("simulation.reassemble_interval must be at least 1".to_string()));
        }
        if let Some(obstacle) = &self.domain.obstacle {
            let [x, y] = obstacle.center;
            let r = obstacle.radius;
            if !(r > 0.0) || x - r <= 0.0 || x + r >= self.domain.length || y - r <= 0.0 || y + r >= self.domain.height {
                return Err(FlowError::Config(format!(
                    "obstacle at ({x}, {y}) with radius {r} does not fit inside the channel"
                )));
            }
        }
        Ok(())
    }

    /// Mean of the parabolic inflow profile.
    pub fn mean_inflow_velocity(&self) -> Float {
        2.0 / 3.0 * self.physics.inflow_max_velocity
    }

    /// `mu = rho U L / Re`
    pub fn calculate_viscosity(&self, reynolds: Float) -> Float {
        self.physics.density * self.mean_inflow_velocity() * self.physics.characteristic_length / reynolds
    }

    /// CFL number up to which the explicit tentative step stays bounded on cells of size
    /// `h_min`. The local Courant number is taken at the peak inflow speed, which is 3/2 of the
    /// mean speed the CFL relation uses.
    pub fn explicit_cfl_limit(&self, kinematic_viscosity: Float, h_min: Float) -> Float {
        let u_max = self.physics.inflow_max_velocity;
        let peclet = u_max * h_min / kinematic_viscosity;
        explicit_courant_limit(peclet, self.simulation.upwind_blend) * self.mean_inflow_velocity() / u_max
    }

    /// Derives viscosity, time step (CFL relation) and step count for one Reynolds number.
    pub fn case(&self, reynolds: Float, h_min: Float) -> Result<CaseParameters> {
        if !(reynolds > 0.0) {
            return Err(FlowError::Config(format!("Reynolds number must be positive, got {reynolds}")));
        }
        let mean_velocity = self.mean_inflow_velocity();
        let mu = self.calculate_viscosity(reynolds);
        let dt = self.simulation.cfl * h_min / mean_velocity;
        let n_steps = (self.simulation.end_time / dt).floor() as usize;
        if n_steps == 0 {
            return Err(FlowError::Config(format!(
                "end time {} is shorter than one time step ({dt:.3e})",
                self.simulation.end_time
            )));
        }
        let output_directory = self
            .output
            .output_directory
            .replace("{mu}", &format!("{mu:.4}"))
            .replace("{re}", &format!("{reynolds}"));

        Ok(CaseParameters {
            reynolds,
            mu,
            dt,
            n_steps,
            mean_velocity,
            output_directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BENCHMARK: &str = r#"{
        "domain": {
            "length": 2.2,
            "height": 0.41,
            "resolution": 41,
            "obstacle": { "center": [0.2, 0.2], "radius": 0.05 }
        },
        "physics": {
            "density": 1.0,
            "inflow_max_velocity": 1.5,
            "characteristic_length": 0.1,
            "reynolds_numbers": [20, 100]
        },
        "simulation": { "end_time": 8.0, "cfl": 0.05, "scheme": "implicit" },
        "output": { "output_directory": "output/mu({mu})" }
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config: Config = serde_json::from_str(BENCHMARK).unwrap();
        config.validate().unwrap();
        assert_eq!(config.simulation.scheme, TentativeScheme::Implicit);
        assert_eq!(config.simulation.picard_iterations, 1);
        assert_eq!(config.simulation.correction_scaling, CorrectionScaling::DtOverRho);
        assert_eq!(config.solvers.pressure.method, Method::Bicgstab);
        assert_eq!(config.output.output_frequency, 0);
        assert!(config.physics.gravity.abs() < 1e-14);
    }

    #[test]
    fn test_case_derivation() {
        let config: Config = serde_json::from_str(BENCHMARK).unwrap();
        let case = config.case(20.0, 0.01).unwrap();
        // U_mean = 1.0, L = 0.1
        assert!((case.mu - 0.005).abs() < 1e-12);
        assert!((case.dt - 0.0005).abs() < 1e-12);
        assert_eq!(case.n_steps, 16000);
        assert_eq!(case.output_directory, "output/mu(0.0050)");
    }

    #[test]
    fn test_explicit_cfl_limit() {
        let config: Config = serde_json::from_str(BENCHMARK).unwrap();
        let case = config.case(20.0, 0.01).unwrap();
        // Pe = 1.5 * 0.01 / 0.005 = 3, C = 1 / (0.5 + 4/3) = 6/11, cfl = 2/3 C
        let limit = config.explicit_cfl_limit(case.mu / config.physics.density, 0.01);
        assert!((limit - 4.0 / 11.0).abs() < 1e-12);
        assert!(config.simulation.cfl < limit);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config: Config = serde_json::from_str(BENCHMARK).unwrap();
        config.simulation.cfl = 0.0;
        assert!(matches!(config.validate(), Err(FlowError::Config(_))));

        let mut config: Config = serde_json::from_str(BENCHMARK).unwrap();
        config.domain.obstacle = Some(ObstacleConfig {
            center: [0.2, 0.4],
            radius: 0.05,
        });
        assert!(config.validate().is_err());
    }
}
