use log::{info, warn};
use nalgebra::Point2;

use crate::config::DomainConfig;
use crate::error::{FlowError, Result};
use crate::Float;

/// Solid body immersed in the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Obstacle {
    Cylinder { center: Point2<Float>, radius: Float },
}

impl Obstacle {
    pub fn contains(&self, point: &Point2<Float>) -> bool {
        match self {
            Obstacle::Cylinder { center, radius } => (point - center).norm_squared() < radius * radius,
        }
    }

    /// Characteristic size used for Strouhal numbers.
    pub fn diameter(&self) -> Float {
        match self {
            Obstacle::Cylinder { radius, .. } => 2.0 * radius,
        }
    }

    /// Whether `point` lies within `margin` of the obstacle surface or inside it.
    pub fn near(&self, point: &Point2<Float>, margin: Float) -> bool {
        match self {
            Obstacle::Cylinder { center, radius } => (point - center).norm() < radius + margin,
        }
    }
}

/// Uniform Cartesian discretization of a rectangular channel `[0, length] x [0, height]`.
///
/// Cells are squares of size `h`. Cells whose centre lies inside the obstacle are solid.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub nx: usize,
    pub ny: usize,
    pub h: Float,
    pub obstacle: Option<Obstacle>,
    solid: Vec<bool>,
}

impl Geometry {
    pub fn from_config(domain: &DomainConfig) -> Result<Self> {
        let obstacle = domain.obstacle.as_ref().map(|o| Obstacle::Cylinder {
            center: Point2::new(o.center[0], o.center[1]),
            radius: o.radius,
        });
        Self::channel(domain.length, domain.height, domain.resolution, obstacle)
    }

    /// Channel with `resolution` cells across its height.
    pub fn channel(
        length: Float,
        height: Float,
        resolution: usize,
        obstacle: Option<Obstacle>,
    ) -> Result<Self> {
        if resolution < 2 {
            return Err(FlowError::Config(format!(
                "resolution must be at least 2 cells, got {resolution}"
            )));
        }
        if !(length > 0.0 && height > 0.0) {
            return Err(FlowError::Config(format!(
                "domain extents must be positive, got {length} x {height}"
            )));
        }

        let h = height / resolution as Float;
        let nx = (length / h).round().max(2.0) as usize;
        if ((nx as Float) * h - length).abs() > 1e-9 * length.max(1.0) {
            warn!(
                "Channel length {} is not a multiple of h = {:.5}; using {:.5}",
                length,
                h,
                nx as Float * h
            );
        }

        let mut geometry = Self {
            nx,
            ny: resolution,
            h,
            obstacle,
            solid: vec![false; nx * resolution],
        };

        if let Some(obstacle) = geometry.obstacle.clone() {
            for j in 0..geometry.ny {
                for i in 0..geometry.nx {
                    if obstacle.contains(&geometry.cell_center(i, j)) {
                        geometry.solid[j * nx + i] = true;
                    }
                }
            }
            if geometry.solid_count() == 0 {
                warn!("Obstacle {:?} does not cover any cell centre", obstacle);
            }
        }

        info!(
            "Geometry: {}x{} cells, h = {:.5}, {} solid cells",
            geometry.nx,
            geometry.ny,
            geometry.h,
            geometry.solid_count()
        );

        Ok(geometry)
    }

    pub fn length(&self) -> Float {
        self.nx as Float * self.h
    }

    pub fn height(&self) -> Float {
        self.ny as Float * self.h
    }

    /// Minimum element size, used by the CFL relation.
    pub fn h_min(&self) -> Float {
        self.h
    }

    pub fn cell_center(&self, i: usize, j: usize) -> Point2<Float> {
        Point2::new((i as Float + 0.5) * self.h, (j as Float + 0.5) * self.h)
    }

    /// Solid test in unpadded cell indices; cells outside the domain are fluid.
    pub fn is_solid(&self, i: isize, j: isize) -> bool {
        if i < 0 || j < 0 || i >= self.nx as isize || j >= self.ny as isize {
            return false;
        }
        self.solid[j as usize * self.nx + i as usize]
    }

    pub fn is_fluid(&self, i: usize, j: usize) -> bool {
        !self.is_solid(i as isize, j as isize)
    }

    pub fn solid_count(&self) -> usize {
        self.solid.iter().filter(|s| **s).count()
    }
}
