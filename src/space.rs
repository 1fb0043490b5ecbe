//! Discrete function spaces on the staggered grid.
//!
//! All indices used here are *padded*: cell `(i, j)` of the geometry is cell `(i + 1, j + 1)`
//! of the pressure space, whose outer ring holds ghost values. Velocity x-components live on
//! vertical faces, `u(i, j)` sitting at `x = i h, y = (j - 1/2) h` with ghost rows `j = 0` and
//! `j = ny + 1`; y-components live on horizontal faces, `v(i, j)` at
//! `x = (i - 1/2) h, y = j h` with ghost columns `i = 0` and `i = nx + 1`.
use std::fmt;

use nalgebra::{DVector, Point2, Vector2};

use crate::geometry::Geometry;
use crate::Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Velocity,
    Pressure,
}

impl fmt::Display for SpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceKind::Velocity => f.write_str("velocity"),
            SpaceKind::Pressure => f.write_str("pressure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    X,
    Y,
    Scalar,
}

/// How a degree of freedom participates in assembled systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DofKind {
    /// Carries operator rows.
    Interior,
    /// Value outside the domain, tied to `mirror` by a zero-gradient row unless constrained.
    Ghost { mirror: usize },
    /// Carries no physics (ghost corners, cells inside an obstacle); identity row.
    Inert,
}

#[derive(Debug, Clone)]
pub struct Dof {
    /// Point used for boundary predicates. Ghosts report the boundary point between
    /// themselves and their mirror.
    pub location: Point2<Float>,
    pub component: Component,
    pub on_boundary: bool,
    pub kind: DofKind,
}

/// Index arithmetic shared by both spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub nx: usize,
    pub ny: usize,
}

impl Layout {
    pub fn u(&self, i: usize, j: usize) -> usize {
        debug_assert!(i <= self.nx && j <= self.ny + 1);
        j * (self.nx + 1) + i
    }

    pub fn v(&self, i: usize, j: usize) -> usize {
        debug_assert!(i <= self.nx + 1 && j <= self.ny);
        self.u_len() + j * (self.nx + 2) + i
    }

    pub fn p(&self, i: usize, j: usize) -> usize {
        debug_assert!(i <= self.nx + 1 && j <= self.ny + 1);
        j * (self.nx + 2) + i
    }

    pub fn u_len(&self) -> usize {
        (self.nx + 1) * (self.ny + 2)
    }

    pub fn v_len(&self) -> usize {
        (self.nx + 2) * (self.ny + 1)
    }

    pub fn velocity_len(&self) -> usize {
        self.u_len() + self.v_len()
    }

    pub fn pressure_len(&self) -> usize {
        (self.nx + 2) * (self.ny + 2)
    }
}

#[derive(Debug, Clone)]
pub struct FunctionSpace {
    kind: SpaceKind,
    layout: Layout,
    h: Float,
    dofs: Vec<Dof>,
}

impl FunctionSpace {
    pub fn velocity(geometry: &Geometry) -> Self {
        let (nx, ny, h) = (geometry.nx, geometry.ny, geometry.h);
        let layout = Layout { nx, ny };
        let (length, height) = (geometry.length(), geometry.height());
        let solid = |i: usize, j: usize| geometry.is_solid(i as isize - 1, j as isize - 1);
        let mut dofs = Vec::with_capacity(layout.velocity_len());

        for j in 0..ny + 2 {
            for i in 0..=nx {
                let x = i as Float * h;
                let dof = if j == 0 || j == ny + 1 {
                    let (y, mirror) = if j == 0 { (0.0, 1) } else { (height, ny) };
                    Dof {
                        location: Point2::new(x, y),
                        component: Component::X,
                        on_boundary: true,
                        kind: DofKind::Ghost {
                            mirror: layout.u(i, mirror),
                        },
                    }
                } else {
                    Dof {
                        location: Point2::new(x, (j as Float - 0.5) * h),
                        component: Component::X,
                        on_boundary: i == 0 || i == nx || solid(i, j) || solid(i + 1, j),
                        kind: DofKind::Interior,
                    }
                };
                dofs.push(dof);
            }
        }

        for j in 0..=ny {
            for i in 0..nx + 2 {
                let y = j as Float * h;
                let dof = if i == 0 || i == nx + 1 {
                    let (x, mirror) = if i == 0 { (0.0, 1) } else { (length, nx) };
                    Dof {
                        location: Point2::new(x, y),
                        component: Component::Y,
                        on_boundary: true,
                        kind: DofKind::Ghost {
                            mirror: layout.v(mirror, j),
                        },
                    }
                } else {
                    Dof {
                        location: Point2::new((i as Float - 0.5) * h, y),
                        component: Component::Y,
                        on_boundary: j == 0 || j == ny || solid(i, j) || solid(i, j + 1),
                        kind: DofKind::Interior,
                    }
                };
                dofs.push(dof);
            }
        }

        Self {
            kind: SpaceKind::Velocity,
            layout,
            h,
            dofs,
        }
    }

    pub fn pressure(geometry: &Geometry) -> Self {
        let (nx, ny, h) = (geometry.nx, geometry.ny, geometry.h);
        let layout = Layout { nx, ny };
        let (length, height) = (geometry.length(), geometry.height());
        let mut dofs = Vec::with_capacity(layout.pressure_len());

        for j in 0..ny + 2 {
            for i in 0..nx + 2 {
                let ghost_x = i == 0 || i == nx + 1;
                let ghost_y = j == 0 || j == ny + 1;
                let edge_x = if i == 0 { 0.0 } else { length };
                let edge_y = if j == 0 { 0.0 } else { height };
                let center = Point2::new((i as Float - 0.5) * h, (j as Float - 0.5) * h);

                let dof = match (ghost_x, ghost_y) {
                    (true, true) => Dof {
                        location: Point2::new(edge_x, edge_y),
                        component: Component::Scalar,
                        on_boundary: true,
                        kind: DofKind::Inert,
                    },
                    (true, false) => Dof {
                        location: Point2::new(edge_x, center.y),
                        component: Component::Scalar,
                        on_boundary: true,
                        kind: DofKind::Ghost {
                            mirror: layout.p(if i == 0 { 1 } else { nx }, j),
                        },
                    },
                    (false, true) => Dof {
                        location: Point2::new(center.x, edge_y),
                        component: Component::Scalar,
                        on_boundary: true,
                        kind: DofKind::Ghost {
                            mirror: layout.p(i, if j == 0 { 1 } else { ny }),
                        },
                    },
                    (false, false) => {
                        let solid = geometry.is_solid(i as isize - 1, j as isize - 1);
                        Dof {
                            location: center,
                            component: Component::Scalar,
                            on_boundary: solid,
                            kind: if solid { DofKind::Inert } else { DofKind::Interior },
                        }
                    }
                };
                dofs.push(dof);
            }
        }

        Self {
            kind: SpaceKind::Pressure,
            layout,
            h,
            dofs,
        }
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn h(&self) -> Float {
        self.h
    }

    pub fn dim(&self) -> usize {
        self.dofs.len()
    }

    pub fn dofs(&self) -> &[Dof] {
        &self.dofs
    }

    pub fn dof(&self, index: usize) -> &Dof {
        &self.dofs[index]
    }

    pub fn zeros(&self) -> DVector<Float> {
        DVector::zeros(self.dim())
    }

    pub fn is_interior(&self, index: usize) -> bool {
        self.dofs[index].kind == DofKind::Interior
    }

    /// Velocity interpolated to the centre of geometry cell `(i, j)`.
    pub fn cell_velocity(&self, u: &DVector<Float>, i: usize, j: usize) -> Vector2<Float> {
        let l = self.layout;
        let (pi, pj) = (i + 1, j + 1);
        Vector2::new(
            0.5 * (u[l.u(pi - 1, pj)] + u[l.u(pi, pj)]),
            0.5 * (u[l.v(pi, pj - 1)] + u[l.v(pi, pj)]),
        )
    }

    /// Pressure value of geometry cell `(i, j)`.
    pub fn cell_pressure(&self, p: &DVector<Float>, i: usize, j: usize) -> Float {
        p[self.layout.p(i + 1, j + 1)]
    }

    /// Bilinear interpolation of the velocity at an arbitrary point of the domain.
    pub fn sample_velocity(&self, u: &DVector<Float>, point: &Point2<Float>) -> Vector2<Float> {
        let l = self.layout;
        let h = self.h;

        let (i, j, tx, ty) = locate(point.x / h, point.y / h + 0.5, l.nx - 1, l.ny);
        let ux = (1.0 - tx) * (1.0 - ty) * u[l.u(i, j)]
            + tx * (1.0 - ty) * u[l.u(i + 1, j)]
            + (1.0 - tx) * ty * u[l.u(i, j + 1)]
            + tx * ty * u[l.u(i + 1, j + 1)];

        let (i, j, tx, ty) = locate(point.x / h + 0.5, point.y / h, l.nx, l.ny - 1);
        let uy = (1.0 - tx) * (1.0 - ty) * u[l.v(i, j)]
            + tx * (1.0 - ty) * u[l.v(i + 1, j)]
            + (1.0 - tx) * ty * u[l.v(i, j + 1)]
            + tx * ty * u[l.v(i + 1, j + 1)];

        Vector2::new(ux, uy)
    }
}

fn locate(fx: Float, fy: Float, max_i: usize, max_j: usize) -> (usize, usize, Float, Float) {
    let i = (fx.floor().max(0.0) as usize).min(max_i);
    let j = (fy.floor().max(0.0) as usize).min(max_j);
    let tx = (fx - i as Float).clamp(0.0, 1.0);
    let ty = (fy - j as Float).clamp(0.0, 1.0);
    (i, j, tx, ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Geometry {
        Geometry::channel(1.0, 0.25, 5, None).unwrap()
    }

    #[test]
    fn test_space_dimensions() {
        let geometry = channel();
        let velocity = FunctionSpace::velocity(&geometry);
        let pressure = FunctionSpace::pressure(&geometry);
        assert_eq!(velocity.dim(), 21 * 7 + 22 * 6);
        assert_eq!(pressure.dim(), 22 * 7);
    }

    #[test]
    fn test_ghosts_point_at_mirrors() {
        let geometry = channel();
        let velocity = FunctionSpace::velocity(&geometry);
        let l = velocity.layout();
        let ghost = velocity.dof(l.u(3, 0));
        assert_eq!(ghost.kind, DofKind::Ghost { mirror: l.u(3, 1) });
        assert!(ghost.location.y.abs() < 1e-14);

        let pressure = FunctionSpace::pressure(&geometry);
        let corner = pressure.dof(l.p(0, 0));
        assert_eq!(corner.kind, DofKind::Inert);
        let outlet = pressure.dof(l.p(l.nx + 1, 2));
        assert_eq!(outlet.kind, DofKind::Ghost { mirror: l.p(l.nx, 2) });
        assert!((outlet.location.x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_uniform_field() {
        let geometry = channel();
        let velocity = FunctionSpace::velocity(&geometry);
        let l = velocity.layout();
        let mut u = velocity.zeros();
        for k in 0..l.u_len() {
            u[k] = 2.0;
        }
        for k in l.u_len()..l.velocity_len() {
            u[k] = -1.0;
        }
        let sample = velocity.sample_velocity(&u, &Point2::new(0.33, 0.11));
        assert!((sample.x - 2.0).abs() < 1e-12);
        assert!((sample.y + 1.0).abs() < 1e-12);
        let centre = velocity.cell_velocity(&u, 2, 2);
        assert!((centre.x - 2.0).abs() < 1e-12);
    }
}
