use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use nalgebra::Vector2;

use crate::error::Result;
use crate::geometry::Geometry;
use crate::state::SimulationState;
use crate::Float;

/// Legacy VTK writer for cell-centred fields on the channel grid.
pub struct VTKWriter {
    geometry: Geometry,
    collection_entries: Vec<(usize, Float, PathBuf)>, // (step, time, filename)
}

impl VTKWriter {
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            geometry: geometry.clone(),
            collection_entries: Vec::new(),
        }
    }

    fn write_header(&self, file: &mut impl Write, title: &str) -> Result<()> {
        let (nx, ny) = (self.geometry.nx, self.geometry.ny);
        writeln!(file, "# vtk DataFile Version 3.0")?;
        writeln!(file, "{}", title)?;
        writeln!(file, "ASCII")?;
        writeln!(file, "DATASET STRUCTURED_GRID")?;
        writeln!(file, "DIMENSIONS {} {} 1", nx, ny)?;

        writeln!(file, "POINTS {} float", nx * ny)?;
        for j in 0..ny {
            for i in 0..nx {
                let c = self.geometry.cell_center(i, j);
                writeln!(file, "{} {} 0", c.x, c.y)?;
            }
        }
        writeln!(file, "POINT_DATA {}", nx * ny)?;
        Ok(())
    }

    fn write_solid(&self, file: &mut impl Write) -> Result<()> {
        writeln!(file, "SCALARS Solid float")?;
        writeln!(file, "LOOKUP_TABLE default")?;
        for j in 0..self.geometry.ny {
            for i in 0..self.geometry.nx {
                let value = if self.geometry.is_fluid(i, j) { 0.0 } else { 1.0 };
                writeln!(file, "{:.1}", value)?;
            }
        }
        Ok(())
    }

    /// Writes velocity, pressure, vorticity and divergence of the current fields.
    pub fn write(&mut self, filename: &Path, state: &SimulationState) -> Result<()> {
        let (nx, ny) = (self.geometry.nx, self.geometry.ny);
        let space = &state.velocity_space;
        let u = &state.fields.u;

        let mut velocity = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                velocity.push(space.cell_velocity(u, i, j));
            }
        }

        let mut file = BufWriter::new(File::create(filename)?);
        let title = format!("IPCS solution - step {} time {:.5}", state.step, state.time);
        self.write_header(&mut file, &title)?;

        writeln!(file, "VECTORS Velocity float")?;
        for v in &velocity {
            writeln!(file, "{:.6} {:.6} 0", v.x, v.y)?;
        }

        writeln!(file, "SCALARS VelocityMagnitude float")?;
        writeln!(file, "LOOKUP_TABLE default")?;
        for v in &velocity {
            writeln!(file, "{:.6}", v.norm())?;
        }

        writeln!(file, "SCALARS Pressure float")?;
        writeln!(file, "LOOKUP_TABLE default")?;
        for j in 0..ny {
            for i in 0..nx {
                writeln!(file, "{:.6}", state.pressure_space.cell_pressure(&state.fields.p, i, j))?;
            }
        }

        writeln!(file, "SCALARS Vorticity float")?;
        writeln!(file, "LOOKUP_TABLE default")?;
        for value in self.calculate_vorticity(&velocity) {
            writeln!(file, "{:.6}", value)?;
        }

        writeln!(file, "SCALARS Divergence float")?;
        writeln!(file, "LOOKUP_TABLE default")?;
        let l = space.layout();
        let h = self.geometry.h;
        for j in 1..=ny {
            for i in 1..=nx {
                let div = if self.geometry.is_fluid(i - 1, j - 1) {
                    (u[l.u(i, j)] - u[l.u(i - 1, j)] + u[l.v(i, j)] - u[l.v(i, j - 1)]) / h
                } else {
                    0.0
                };
                writeln!(file, "{:.3e}", div)?;
            }
        }

        self.write_solid(&mut file)?;
        file.flush()?;

        self.collection_entries
            .push((state.step, state.time, filename.to_path_buf()));
        debug!("Wrote output file: {}", filename.display());
        Ok(())
    }

    /// `dv/dx - du/dy` from cell-centred velocities, one-sided at the channel edges.
    fn calculate_vorticity(&self, velocity: &[Vector2<Float>]) -> Vec<Float> {
        let (nx, ny) = (self.geometry.nx, self.geometry.ny);
        let h = self.geometry.h;
        let at = |i: usize, j: usize| velocity[j * nx + i];
        let mut vorticity = vec![0.0; nx * ny];

        for j in 0..ny {
            for i in 0..nx {
                if !self.geometry.is_fluid(i, j) {
                    continue;
                }
                let (im, ip) = (i.saturating_sub(1), (i + 1).min(nx - 1));
                let (jm, jp) = (j.saturating_sub(1), (j + 1).min(ny - 1));
                let dvdx = (at(ip, j).y - at(im, j).y) / ((ip - im) as Float * h);
                let dudy = (at(i, jp).x - at(i, jm).x) / ((jp - jm) as Float * h);
                vorticity[j * nx + i] = dvdx - dudy;
            }
        }

        vorticity
    }

    pub fn write_geometry(&self, filename: &Path) -> Result<()> {
        let mut file = BufWriter::new(File::create(filename)?);
        self.write_header(&mut file, "IPCS geometry")?;
        self.write_solid(&mut file)?;
        file.flush()?;
        Ok(())
    }

    /// Write a ParaView collection file that groups all VTK files with time information
    pub fn write_collection(&self, collection_filename: &Path) -> Result<()> {
        let mut file = BufWriter::new(File::create(collection_filename)?);

        writeln!(file, "<?xml version=\"1.0\"?>")?;
        writeln!(file, "<VTKFile type=\"Collection\" version=\"0.1\">")?;
        writeln!(file, "  <Collection>")?;

        for (_step, time, filename) in &self.collection_entries {
            let basename = filename
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            writeln!(
                file,
                "    <DataSet timestep=\"{:.6}\" part=\"0\" file=\"{}\"/>",
                time, basename
            )?;
        }

        writeln!(file, "  </Collection>")?;
        writeln!(file, "</VTKFile>")?;
        file.flush()?;
        Ok(())
    }

    pub fn get_file_count(&self) -> usize {
        self.collection_entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PhysicalParameters;

    #[test]
    fn test_write_snapshot_and_collection() {
        let geometry = Geometry::channel(0.5, 0.25, 4, None).unwrap();
        let params = PhysicalParameters {
            rho: 1.0,
            mu: 0.01,
            g: 0.0,
            dt: 0.1,
        };
        let state = SimulationState::new(geometry.clone(), params, &[], &[]).unwrap();
        let dir = std::env::temp_dir().join(format!("ipcs_vtk_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut writer = VTKWriter::new(&geometry);
        writer.write(&dir.join("output_000000.vtk"), &state).unwrap();
        writer.write_collection(&dir.join("solution.pvd")).unwrap();
        assert_eq!(writer.get_file_count(), 1);

        let vtk = std::fs::read_to_string(dir.join("output_000000.vtk")).unwrap();
        assert!(vtk.contains("DIMENSIONS 8 4 1"));
        assert!(vtk.contains("SCALARS Vorticity float"));
        let pvd = std::fs::read_to_string(dir.join("solution.pvd")).unwrap();
        assert!(pvd.contains("file=\"output_000000.vtk\""));

        std::fs::remove_dir_all(&dir).ok();
    }
}
