//! Observers called by the time loop. They read the state and never change it.
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use nalgebra::{Point2, Vector2};

use crate::diagnostics;
use crate::error::Result;
use crate::output::VTKWriter;
use crate::solver::StepReport;
use crate::state::SimulationState;
use crate::Float;

pub trait Monitor {
    /// Called once before the first step.
    fn start(&mut self, _state: &SimulationState) -> Result<()> {
        Ok(())
    }

    fn on_step(&mut self, state: &SimulationState, report: &StepReport) -> Result<()>;

    /// Called once after the last step, or after a failed step.
    fn finish(&mut self, _state: &SimulationState) -> Result<()> {
        Ok(())
    }
}

pub struct ProgressMonitor {
    bar: ProgressBar,
}

impl ProgressMonitor {
    pub fn new(n_steps: usize) -> Self {
        let bar = ProgressBar::new(n_steps as u64);
        let style = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} steps (eta {eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }

    /// A monitor that tracks progress without drawing anything.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Monitor for ProgressMonitor {
    fn on_step(&mut self, _state: &SimulationState, report: &StepReport) -> Result<()> {
        self.bar.set_position(report.step as u64);
        self.bar.set_message(format!(
            "t = {:.3}, max |u| = {:.3}",
            report.time, report.max_velocity
        ));
        Ok(())
    }

    fn finish(&mut self, state: &SimulationState) -> Result<()> {
        self.bar
            .finish_with_message(format!("done at t = {:.3}", state.time));
        Ok(())
    }
}

/// Writes a VTK snapshot every `frequency` steps and a `.pvd` collection at the end.
pub struct VtkMonitor {
    writer: VTKWriter,
    directory: PathBuf,
    frequency: usize,
}

impl VtkMonitor {
    pub fn new<P: AsRef<Path>>(directory: P, frequency: usize, state: &SimulationState) -> Self {
        Self {
            writer: VTKWriter::new(&state.geometry),
            directory: directory.as_ref().to_path_buf(),
            frequency: frequency.max(1),
        }
    }

    fn snapshot(&mut self, state: &SimulationState) -> Result<()> {
        let filename = self.directory.join(format!("output_{:06}.vtk", state.step));
        self.writer.write(&filename, state)
    }
}

impl Monitor for VtkMonitor {
    fn start(&mut self, state: &SimulationState) -> Result<()> {
        fs::create_dir_all(&self.directory)?;
        self.writer
            .write_geometry(&self.directory.join("geometry.vtk"))?;
        self.snapshot(state)
    }

    fn on_step(&mut self, state: &SimulationState, report: &StepReport) -> Result<()> {
        if report.step % self.frequency == 0 {
            self.snapshot(state)?;
        }
        Ok(())
    }

    fn finish(&mut self, _state: &SimulationState) -> Result<()> {
        let collection = self.directory.join("solution.pvd");
        self.writer.write_collection(&collection)?;
        info!(
            "Wrote {} snapshots to {}",
            self.writer.get_file_count(),
            self.directory.display()
        );
        Ok(())
    }
}

/// Records the velocity at a fixed point, e.g. in the wake of an obstacle.
pub struct ProbeMonitor {
    point: Point2<Float>,
    times: Vec<Float>,
    values: Vec<Vector2<Float>>,
    output: Option<PathBuf>,
}

impl ProbeMonitor {
    pub fn new(point: Point2<Float>) -> Self {
        Self {
            point,
            times: Vec::new(),
            values: Vec::new(),
            output: None,
        }
    }

    /// Also write the history as CSV when the run finishes.
    pub fn with_output<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output = Some(path.as_ref().to_path_buf());
        self
    }

    /// Dominant frequency of the cross-flow velocity after discarding the first
    /// `skip_fraction` of the record as transient. Oscillations below 0.1% of the peak speed
    /// seen at the probe count as steady.
    pub fn frequency(&self, skip_fraction: Float) -> Option<Float> {
        let skip = ((self.times.len() as Float) * skip_fraction.clamp(0.0, 1.0)) as usize;
        let peak = self.values.iter().map(|v| v.norm()).fold(0.0, Float::max);
        let cross: Vec<Float> = self.values[skip..].iter().map(|v| v.y).collect();
        diagnostics::dominant_frequency(&self.times[skip..], &cross, 1e-3 * peak)
    }

    fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "time,u,v")?;
        for (t, value) in self.times.iter().zip(&self.values) {
            writeln!(file, "{:.6},{:.8},{:.8}", t, value.x, value.y)?;
        }
        file.flush()?;
        Ok(())
    }
}

impl Monitor for ProbeMonitor {
    fn on_step(&mut self, state: &SimulationState, report: &StepReport) -> Result<()> {
        self.times.push(report.time);
        self.values
            .push(state.velocity_space.sample_velocity(&state.fields.u, &self.point));
        Ok(())
    }

    fn finish(&mut self, _state: &SimulationState) -> Result<()> {
        if let Some(path) = &self.output {
            self.write_csv(path)?;
        }
        Ok(())
    }
}
