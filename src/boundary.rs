use std::fmt;
use std::sync::Arc;

use log::debug;
use nalgebra::{DVector, Point2, Vector2};
use nalgebra_sparse::CsrMatrix;

use crate::error::{FlowError, Result};
use crate::space::{Component, DofKind, FunctionSpace, SpaceKind};
use crate::Float;

pub type Predicate = Arc<dyn Fn(&Point2<Float>, bool) -> bool + Send + Sync>;
pub type Profile = Arc<dyn Fn(&Point2<Float>) -> Vector2<Float> + Send + Sync>;

/// Dirichlet condition: a predicate over DOF coordinates (and boundary membership) plus the
/// value prescribed there. Scalar conditions store their value in the x component.
#[derive(Clone)]
pub struct DirichletBc {
    pub name: String,
    pub space: SpaceKind,
    value: Profile,
    predicate: Predicate,
}

impl fmt::Debug for DirichletBc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirichletBc")
            .field("name", &self.name)
            .field("space", &self.space)
            .finish_non_exhaustive()
    }
}

impl DirichletBc {
    pub fn velocity<V, P>(name: &str, value: V, predicate: P) -> Self
    where
        V: Fn(&Point2<Float>) -> Vector2<Float> + Send + Sync + 'static,
        P: Fn(&Point2<Float>, bool) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            space: SpaceKind::Velocity,
            value: Arc::new(value),
            predicate: Arc::new(predicate),
        }
    }

    pub fn pressure<P>(name: &str, value: Float, predicate: P) -> Self
    where
        P: Fn(&Point2<Float>, bool) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            space: SpaceKind::Pressure,
            value: Arc::new(move |_| Vector2::new(value, 0.0)),
            predicate: Arc::new(predicate),
        }
    }

    /// Locates the constrained DOFs. A predicate that matches nothing is a configuration
    /// error.
    pub fn resolve(&self, space: &FunctionSpace) -> Result<ResolvedBc> {
        if space.kind() != self.space {
            return Err(FlowError::Config(format!(
                "boundary condition '{}' is defined on the {} space but applied to the {} space",
                self.name,
                self.space,
                space.kind()
            )));
        }

        let mut constraints = Vec::new();
        for (index, dof) in space.dofs().iter().enumerate() {
            if !(self.predicate)(&dof.location, dof.on_boundary) {
                continue;
            }
            let prescribed = (self.value)(&dof.location);
            let value = match dof.component {
                Component::X | Component::Scalar => prescribed.x,
                Component::Y => prescribed.y,
            };
            let mirror = match dof.kind {
                DofKind::Ghost { mirror } => Some(mirror),
                _ => None,
            };
            constraints.push(Constraint {
                dof: index,
                mirror,
                value,
            });
        }

        if constraints.is_empty() {
            return Err(FlowError::BoundaryConditionMismatch {
                name: self.name.clone(),
                space: self.space.to_string(),
            });
        }

        debug!(
            "Boundary condition '{}' constrains {} {} DOFs",
            self.name,
            constraints.len(),
            self.space
        );

        Ok(ResolvedBc {
            name: self.name.clone(),
            constraints,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub dof: usize,
    /// Set for ghost DOFs: the condition holds at the midpoint between ghost and mirror.
    pub mirror: Option<usize>,
    pub value: Float,
}

/// A Dirichlet condition bound to the DOFs of one space.
#[derive(Debug, Clone)]
pub struct ResolvedBc {
    pub name: String,
    constraints: Vec<Constraint>,
}

impl ResolvedBc {
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Row elimination: each constrained row becomes `x = value`, or
    /// `(x + x_mirror) / 2 = value` for ghosts. The matrix must already store the mirror entry,
    /// which the assembler guarantees for ghost rows.
    pub fn apply_matrix(&self, a: &mut CsrMatrix<Float>) {
        for c in &self.constraints {
            let weight = if c.mirror.is_some() { 0.5 } else { 1.0 };
            let mut row = a.row_mut(c.dof);
            let (cols, values) = row.cols_and_values_mut();
            for (col, value) in cols.iter().zip(values.iter_mut()) {
                *value = if *col == c.dof || Some(*col) == c.mirror {
                    weight
                } else {
                    0.0
                };
            }
        }
    }

    pub fn apply_vector(&self, b: &mut DVector<Float>) {
        for c in &self.constraints {
            b[c.dof] = c.value;
        }
    }

    /// Makes a field satisfy the condition, e.g. for initial data.
    pub fn impose(&self, x: &mut DVector<Float>) {
        for c in &self.constraints {
            x[c.dof] = match c.mirror {
                Some(mirror) => 2.0 * c.value - x[mirror],
                None => c.value,
            };
        }
    }
}

/// Resolves a list of conditions against one space.
pub fn resolve_all(bcs: &[DirichletBc], space: &FunctionSpace) -> Result<Vec<ResolvedBc>> {
    bcs.iter().map(|bc| bc.resolve(space)).collect()
}

pub fn apply_matrix(bcs: &[ResolvedBc], a: &mut CsrMatrix<Float>) {
    for bc in bcs {
        bc.apply_matrix(a);
    }
}

pub fn apply_vector(bcs: &[ResolvedBc], b: &mut DVector<Float>) {
    for bc in bcs {
        bc.apply_vector(b);
    }
}

pub fn impose(bcs: &[ResolvedBc], x: &mut DVector<Float>) {
    for bc in bcs {
        bc.impose(x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{Assemble, StaggeredAssembler};
    use crate::form::{Form, Operand, Operator};
    use crate::geometry::Geometry;

    fn walls() -> DirichletBc {
        DirichletBc::velocity(
            "walls",
            |_| Vector2::zeros(),
            |x, on_boundary| on_boundary && (x.y < 1e-6 || x.y > 0.25 - 1e-6),
        )
    }

    #[test]
    fn test_resolve_finds_wall_dofs() {
        let geometry = Geometry::channel(1.0, 0.25, 5, None).unwrap();
        let space = FunctionSpace::velocity(&geometry);
        let bc = walls().resolve(&space).unwrap();
        // tangential ghosts (2 rows of nx + 1) plus normal faces (2 rows of nx) plus
        // the four corner ghosts of the y-component
        let nx = geometry.nx;
        assert_eq!(bc.constraints().len(), 2 * (nx + 1) + 2 * nx + 4);
    }

    #[test]
    fn test_mismatch_is_reported() {
        let geometry = Geometry::channel(1.0, 0.25, 5, None).unwrap();
        let space = FunctionSpace::pressure(&geometry);
        let bc = DirichletBc::pressure("nowhere", 0.0, |x, _| x.x > 5.0);
        let err = bc.resolve(&space).unwrap_err();
        assert!(matches!(err, FlowError::BoundaryConditionMismatch { .. }));
    }

    #[test]
    fn test_application_is_idempotent() {
        let geometry = Geometry::channel(1.0, 0.25, 5, None).unwrap();
        let assembler = StaggeredAssembler::new(&geometry, 0.5);
        let space = FunctionSpace::velocity(&geometry);
        let bc = walls().resolve(&space).unwrap();

        let form = Form::new(SpaceKind::Velocity)
            .term(10.0, Operator::Mass, Operand::Trial)
            .term(-0.1, Operator::Laplacian, Operand::Trial);
        let mut a = assembler.assemble_matrix(&form).unwrap();
        bc.apply_matrix(&mut a);
        let once = a.clone();
        bc.apply_matrix(&mut a);
        assert_eq!(once.values(), a.values());

        let mut b = DVector::from_element(space.dim(), 3.0);
        bc.apply_vector(&mut b);
        let once = b.clone();
        bc.apply_vector(&mut b);
        assert_eq!(once, b);
    }

    #[test]
    fn test_ghost_row_averages_to_value() {
        let geometry = Geometry::channel(1.0, 0.25, 5, None).unwrap();
        let space = FunctionSpace::velocity(&geometry);
        let lid = DirichletBc::velocity(
            "lid",
            |_| Vector2::new(1.0, 0.0),
            |x, on_boundary| on_boundary && x.y > 0.25 - 1e-6,
        )
        .resolve(&space)
        .unwrap();

        let mut u = DVector::from_element(space.dim(), 0.3);
        lid.impose(&mut u);
        let l = space.layout();
        let (ghost, mirror) = (l.u(4, l.ny + 1), l.u(4, l.ny));
        assert!(((u[ghost] + u[mirror]) / 2.0 - 1.0).abs() < 1e-14);
    }
}
