//! Turns residual forms into sparse matrices and vectors on the staggered grid.
use log::debug;
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::error::{FlowError, Result};
use crate::form::{Form, Operand, Operator, Slot};
use crate::geometry::Geometry;
use crate::linalg::push_scaled;
use crate::space::{Component, DofKind, FunctionSpace, SpaceKind};
use crate::Float;

/// Source of the known fields a linear form refers to.
pub trait Coefficients {
    fn field(&self, slot: Slot) -> &DVector<Float>;
}

/// Discretization service consumed by the splitting steps.
pub trait Assemble {
    /// Assembles a bilinear form (every term acts on the trial function). Ghost and inert
    /// rows receive their default rows so that boundary conditions can be applied afterwards.
    fn assemble_matrix(&self, form: &Form) -> Result<CsrMatrix<Float>>;

    /// Assembles a linear form against known fields. Rows that carry no operator are zero.
    fn assemble_vector(&self, form: &Form, coefficients: &dyn Coefficients) -> Result<DVector<Float>>;
}

impl<T: Assemble + ?Sized> Assemble for &T {
    fn assemble_matrix(&self, form: &Form) -> Result<CsrMatrix<Float>> {
        (**self).assemble_matrix(form)
    }

    fn assemble_vector(&self, form: &Form, coefficients: &dyn Coefficients) -> Result<DVector<Float>> {
        (**self).assemble_vector(form, coefficients)
    }
}

/// Finite-difference assembly on a uniform MAC grid.
///
/// Linear operators are assembled once into raw matrices holding interior rows only; forms are
/// linear combinations of these. The pressure Laplacian is the product `D G` of the discrete
/// divergence and gradient, so a velocity projected with `G` is divergence-free in `D`.
pub struct StaggeredAssembler {
    velocity: FunctionSpace,
    pressure: FunctionSpace,
    h: Float,
    upwind_blend: Float,
    mass_v: CsrMatrix<Float>,
    mass_q: CsrMatrix<Float>,
    laplacian_v: CsrMatrix<Float>,
    laplacian_q: CsrMatrix<Float>,
    stress: CsrMatrix<Float>,
    gradient: CsrMatrix<Float>,
    divergence: CsrMatrix<Float>,
}

impl StaggeredAssembler {
    /// `upwind_blend` weights the donor-cell part of the convection stencil: 0 is central
    /// differencing, 1 is full upwinding.
    pub fn new(geometry: &Geometry, upwind_blend: Float) -> Self {
        let velocity = FunctionSpace::velocity(geometry);
        let pressure = FunctionSpace::pressure(geometry);
        let h = geometry.h;

        let mass_v = identity_on_interior(&velocity);
        let mass_q = identity_on_interior(&pressure);
        let laplacian_v = vector_laplacian(&velocity, h);
        let gradient = gradient(geometry, &velocity, &pressure);
        let divergence = divergence(&velocity, &pressure, h);
        let laplacian_q = &divergence * &gradient;
        let stress = &laplacian_v + &(&gradient * &divergence);

        debug!(
            "Assembled operators: {} velocity DOFs, {} pressure DOFs, nnz(Δu) = {}, nnz(DG) = {}",
            velocity.dim(),
            pressure.dim(),
            laplacian_v.nnz(),
            laplacian_q.nnz()
        );

        Self {
            velocity,
            pressure,
            h,
            upwind_blend: upwind_blend.clamp(0.0, 1.0),
            mass_v,
            mass_q,
            laplacian_v,
            laplacian_q,
            stress,
            gradient,
            divergence,
        }
    }

    pub fn space(&self, kind: SpaceKind) -> &FunctionSpace {
        match kind {
            SpaceKind::Velocity => &self.velocity,
            SpaceKind::Pressure => &self.pressure,
        }
    }

    fn operator(&self, operator: Operator, test: SpaceKind) -> Option<&CsrMatrix<Float>> {
        match (operator, test) {
            (Operator::Mass, SpaceKind::Velocity) => Some(&self.mass_v),
            (Operator::Mass, SpaceKind::Pressure) => Some(&self.mass_q),
            (Operator::Laplacian, SpaceKind::Velocity) => Some(&self.laplacian_v),
            (Operator::Laplacian, SpaceKind::Pressure) => Some(&self.laplacian_q),
            (Operator::StressDivergence, SpaceKind::Velocity) => Some(&self.stress),
            (Operator::Gradient, SpaceKind::Velocity) => Some(&self.gradient),
            (Operator::Divergence, SpaceKind::Pressure) => Some(&self.divergence),
            _ => None,
        }
    }

    /// `(w·∇)w` on interior faces, central differences blended with donor-cell upwinding.
    fn convection(&self, w: &DVector<Float>) -> DVector<Float> {
        let l = self.velocity.layout();
        let (nx, ny) = (l.nx, l.ny);
        let two_h = 2.0 * self.h;
        let gamma = self.upwind_blend;
        let advect = |a: Float, minus: Float, centre: Float, plus: Float| {
            a * (plus - minus) / two_h - gamma * a.abs() * (plus - 2.0 * centre + minus) / two_h
        };

        let mut out = DVector::zeros(self.velocity.dim());
        for j in 1..=ny {
            for i in 0..=nx {
                let k = l.u(i, j);
                let c = w[k];
                let west = if i > 0 { w[l.u(i - 1, j)] } else { c };
                let east = if i < nx { w[l.u(i + 1, j)] } else { c };
                let south = w[l.u(i, j - 1)];
                let north = w[l.u(i, j + 1)];
                let v_bar = 0.25
                    * (w[l.v(i, j - 1)] + w[l.v(i + 1, j - 1)] + w[l.v(i, j)] + w[l.v(i + 1, j)]);
                out[k] = advect(c, west, c, east) + advect(v_bar, south, c, north);
            }
        }
        for j in 0..=ny {
            for i in 1..=nx {
                let k = l.v(i, j);
                let c = w[k];
                let west = w[l.v(i - 1, j)];
                let east = w[l.v(i + 1, j)];
                let south = if j > 0 { w[l.v(i, j - 1)] } else { c };
                let north = if j < ny { w[l.v(i, j + 1)] } else { c };
                let u_bar = 0.25
                    * (w[l.u(i - 1, j)] + w[l.u(i, j)] + w[l.u(i - 1, j + 1)] + w[l.u(i, j + 1)]);
                out[k] = advect(u_bar, west, c, east) + advect(c, south, c, north);
            }
        }
        out
    }

    fn source(&self, force: &nalgebra::Vector2<Float>) -> DVector<Float> {
        let mut out = DVector::zeros(self.velocity.dim());
        for (k, dof) in self.velocity.dofs().iter().enumerate() {
            if dof.kind != DofKind::Interior {
                continue;
            }
            out[k] = match dof.component {
                Component::X => force.x,
                Component::Y => force.y,
                Component::Scalar => 0.0,
            };
        }
        out
    }
}

impl Assemble for StaggeredAssembler {
    fn assemble_matrix(&self, form: &Form) -> Result<CsrMatrix<Float>> {
        if form.is_empty() {
            return Err(FlowError::Assembly("empty bilinear form".to_string()));
        }

        let space = self.space(form.test);
        let n = space.dim();
        let mut coo = CooMatrix::new(n, n);

        for term in &form.terms {
            if term.operand != Operand::Trial {
                return Err(FlowError::Assembly(format!(
                    "{:?} of {:?} has no trial function; split the form with lhs()",
                    term.operator, term.operand
                )));
            }
            if !term.operator.is_linear() {
                return Err(FlowError::Assembly(format!(
                    "{:?} is nonlinear and cannot act on the trial function",
                    term.operator
                )));
            }
            match term.operator.domain(form.test) {
                Some(domain) if domain == form.test => {}
                Some(domain) => {
                    return Err(FlowError::Assembly(format!(
                        "{:?} maps {} to {}; bilinear forms must be square",
                        term.operator, domain, form.test
                    )));
                }
                None => {
                    return Err(FlowError::Assembly(format!(
                        "{:?} is not defined on the {} test space",
                        term.operator, form.test
                    )));
                }
            }
            let matrix = self.operator(term.operator, form.test).ok_or_else(|| {
                FlowError::Assembly(format!("no discrete operator for {:?}", term.operator))
            })?;
            push_scaled(&mut coo, matrix, term.coefficient);
        }

        for (i, dof) in space.dofs().iter().enumerate() {
            match dof.kind {
                DofKind::Interior => coo.push(i, i, 0.0),
                DofKind::Ghost { mirror } => {
                    coo.push(i, i, 1.0);
                    coo.push(i, mirror, -1.0);
                }
                DofKind::Inert => coo.push(i, i, 1.0),
            }
        }

        Ok(CsrMatrix::from(&coo))
    }

    fn assemble_vector(&self, form: &Form, coefficients: &dyn Coefficients) -> Result<DVector<Float>> {
        let mut b = DVector::zeros(self.space(form.test).dim());

        for term in &form.terms {
            let domain = term.operator.domain(form.test).ok_or_else(|| {
                FlowError::Assembly(format!(
                    "{:?} is not defined on the {} test space",
                    term.operator, form.test
                ))
            })?;

            let contribution = match (term.operator, term.operand) {
                (_, Operand::Trial) => {
                    return Err(FlowError::Assembly(format!(
                        "{:?} acts on the trial function inside a linear form",
                        term.operator
                    )));
                }
                (Operator::Source(force), Operand::Unit) => self.source(&force),
                (Operator::Source(_), operand) => {
                    return Err(FlowError::Assembly(format!(
                        "body force takes no operand, got {operand:?}"
                    )));
                }
                (_, Operand::Unit) => {
                    return Err(FlowError::Assembly(format!(
                        "{:?} needs a field operand",
                        term.operator
                    )));
                }
                (operator, Operand::Field(slot)) => {
                    if slot.space() != domain {
                        return Err(FlowError::Assembly(format!(
                            "{:?} expects a {} field, got {:?}",
                            operator, domain, slot
                        )));
                    }
                    let field = coefficients.field(slot);
                    let expected = self.space(domain).dim();
                    if field.len() != expected {
                        return Err(FlowError::Assembly(format!(
                            "{:?} has {} values, the {} space has {}",
                            slot,
                            field.len(),
                            domain,
                            expected
                        )));
                    }
                    if operator == Operator::Convection {
                        self.convection(field)
                    } else {
                        let matrix = self.operator(operator, form.test).ok_or_else(|| {
                            FlowError::Assembly(format!("no discrete operator for {operator:?}"))
                        })?;
                        matrix * field
                    }
                }
            };
            b.axpy(term.coefficient, &contribution, 1.0);
        }

        Ok(b)
    }
}

fn identity_on_interior(space: &FunctionSpace) -> CsrMatrix<Float> {
    let n = space.dim();
    let mut coo = CooMatrix::new(n, n);
    for (i, dof) in space.dofs().iter().enumerate() {
        if dof.kind == DofKind::Interior {
            coo.push(i, i, 1.0);
        }
    }
    CsrMatrix::from(&coo)
}

/// Five-point Laplacian per component. Neighbours outside the padded grid are dropped, which
/// is a zero-gradient condition; ghost neighbours carry wall conditions.
fn vector_laplacian(space: &FunctionSpace, h: Float) -> CsrMatrix<Float> {
    let l = space.layout();
    let (nx, ny) = (l.nx, l.ny);
    let n = space.dim();
    let w = 1.0 / (h * h);
    let mut coo = CooMatrix::new(n, n);

    let mut stencil = |row: usize, neighbours: &[Option<usize>]| {
        for neighbour in neighbours.iter().flatten() {
            coo.push(row, *neighbour, w);
            coo.push(row, row, -w);
        }
    };

    for j in 1..=ny {
        for i in 0..=nx {
            stencil(
                l.u(i, j),
                &[
                    (i > 0).then(|| l.u(i - 1, j)),
                    (i < nx).then(|| l.u(i + 1, j)),
                    Some(l.u(i, j - 1)),
                    Some(l.u(i, j + 1)),
                ],
            );
        }
    }
    for j in 0..=ny {
        for i in 1..=nx {
            stencil(
                l.v(i, j),
                &[
                    Some(l.v(i - 1, j)),
                    Some(l.v(i + 1, j)),
                    (j > 0).then(|| l.v(i, j - 1)),
                    (j < ny).then(|| l.v(i, j + 1)),
                ],
            );
        }
    }

    CsrMatrix::from(&coo)
}

/// Pressure gradient on interior faces. Faces touching the obstacle carry no gradient, so no
/// pressure flux crosses the solid surface.
fn gradient(geometry: &Geometry, velocity: &FunctionSpace, pressure: &FunctionSpace) -> CsrMatrix<Float> {
    let l = velocity.layout();
    let (nx, ny) = (l.nx, l.ny);
    let w = 1.0 / geometry.h;
    let solid = |i: usize, j: usize| geometry.is_solid(i as isize - 1, j as isize - 1);
    let mut coo = CooMatrix::new(velocity.dim(), pressure.dim());

    for j in 1..=ny {
        for i in 0..=nx {
            if solid(i, j) || solid(i + 1, j) {
                continue;
            }
            coo.push(l.u(i, j), l.p(i + 1, j), w);
            coo.push(l.u(i, j), l.p(i, j), -w);
        }
    }
    for j in 0..=ny {
        for i in 1..=nx {
            if solid(i, j) || solid(i, j + 1) {
                continue;
            }
            coo.push(l.v(i, j), l.p(i, j + 1), w);
            coo.push(l.v(i, j), l.p(i, j), -w);
        }
    }

    CsrMatrix::from(&coo)
}

/// Net outflow per unit area of every fluid cell.
fn divergence(velocity: &FunctionSpace, pressure: &FunctionSpace, h: Float) -> CsrMatrix<Float> {
    let l = pressure.layout();
    let w = 1.0 / h;
    let mut coo = CooMatrix::new(pressure.dim(), velocity.dim());

    for j in 1..=l.ny {
        for i in 1..=l.nx {
            let row = l.p(i, j);
            if !pressure.is_interior(row) {
                continue;
            }
            coo.push(row, l.u(i, j), w);
            coo.push(row, l.u(i - 1, j), -w);
            coo.push(row, l.v(i, j), w);
            coo.push(row, l.v(i, j - 1), -w);
        }
    }

    CsrMatrix::from(&coo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::Slot;
    use nalgebra::Vector2;

    struct OneField {
        velocity: DVector<Float>,
        pressure: DVector<Float>,
    }

    impl Coefficients for OneField {
        fn field(&self, slot: Slot) -> &DVector<Float> {
            match slot.space() {
                SpaceKind::Velocity => &self.velocity,
                SpaceKind::Pressure => &self.pressure,
            }
        }
    }

    fn setup() -> (Geometry, StaggeredAssembler) {
        let geometry = Geometry::channel(1.0, 0.5, 10, None).unwrap();
        let assembler = StaggeredAssembler::new(&geometry, 0.5);
        (geometry, assembler)
    }

    fn fields(assembler: &StaggeredAssembler) -> OneField {
        OneField {
            velocity: assembler.space(SpaceKind::Velocity).zeros(),
            pressure: assembler.space(SpaceKind::Pressure).zeros(),
        }
    }

    #[test]
    fn test_uniform_flow_is_divergence_free() {
        let (_, assembler) = setup();
        let mut coefficients = fields(&assembler);
        let l = assembler.space(SpaceKind::Velocity).layout();
        for k in 0..l.u_len() {
            coefficients.velocity[k] = 1.5;
        }
        let form = Form::new(SpaceKind::Pressure).term(
            1.0,
            Operator::Divergence,
            Operand::Field(Slot::Velocity),
        );
        let div = assembler.assemble_vector(&form, &coefficients).unwrap();
        assert!(div.amax() < 1e-12);
    }

    #[test]
    fn test_gradient_of_linear_pressure() {
        let (geometry, assembler) = setup();
        let mut coefficients = fields(&assembler);
        let l = assembler.space(SpaceKind::Pressure).layout();
        for j in 0..l.ny + 2 {
            for i in 0..l.nx + 2 {
                coefficients.pressure[l.p(i, j)] = 3.0 * (i as Float - 0.5) * geometry.h;
            }
        }
        let form = Form::new(SpaceKind::Velocity).term(
            1.0,
            Operator::Gradient,
            Operand::Field(Slot::Pressure),
        );
        let grad = assembler.assemble_vector(&form, &coefficients).unwrap();
        assert!((grad[l.u(4, 3)] - 3.0).abs() < 1e-10);
        assert!(grad[l.v(4, 3)].abs() < 1e-10);
    }

    #[test]
    fn test_laplacian_annihilates_linear_profile() {
        let (geometry, assembler) = setup();
        let mut coefficients = fields(&assembler);
        let velocity = assembler.space(SpaceKind::Velocity);
        let l = velocity.layout();
        for j in 0..l.ny + 2 {
            for i in 0..=l.nx {
                coefficients.velocity[l.u(i, j)] = (j as Float - 0.5) * geometry.h;
            }
        }
        let form = Form::new(SpaceKind::Velocity).term(
            1.0,
            Operator::Laplacian,
            Operand::Field(Slot::Velocity),
        );
        let lap = assembler.assemble_vector(&form, &coefficients).unwrap();
        assert!(lap.amax() < 1e-9);
    }

    #[test]
    fn test_convection_of_uniform_flow_vanishes() {
        let (_, assembler) = setup();
        let mut coefficients = fields(&assembler);
        coefficients.velocity.fill(0.7);
        let form = Form::new(SpaceKind::Velocity).term(
            1.0,
            Operator::Convection,
            Operand::Field(Slot::PreviousVelocity),
        );
        let conv = assembler.assemble_vector(&form, &coefficients).unwrap();
        assert!(conv.amax() < 1e-12);
    }

    #[test]
    fn test_body_force_on_interior_faces() {
        let (_, assembler) = setup();
        let coefficients = fields(&assembler);
        let form = Form::new(SpaceKind::Velocity).term(
            2.0,
            Operator::Source(Vector2::new(0.0, -9.81)),
            Operand::Unit,
        );
        let b = assembler.assemble_vector(&form, &coefficients).unwrap();
        let l = assembler.space(SpaceKind::Velocity).layout();
        assert!((b[l.v(3, 3)] + 19.62).abs() < 1e-12);
        assert_eq!(b[l.u(3, 3)], 0.0);
        // ghost rows stay empty
        assert_eq!(b[l.v(0, 3)], 0.0);
    }

    #[test]
    fn test_pressure_laplacian_is_div_grad() {
        let (_, assembler) = setup();
        let a = assembler
            .assemble_matrix(&Form::new(SpaceKind::Pressure).term(1.0, Operator::Laplacian, Operand::Trial))
            .unwrap();
        let l = assembler.space(SpaceKind::Pressure).layout();
        let row = l.p(5, 5);
        let r = a.row(row);
        let diag = r
            .col_indices()
            .iter()
            .zip(r.values())
            .find(|(c, _)| **c == row)
            .map(|(_, v)| *v)
            .unwrap();
        assert!((diag + 4.0 / (0.05 * 0.05)).abs() < 1e-8);
    }

    #[test]
    fn test_malformed_forms_fail() {
        let (_, assembler) = setup();
        let coefficients = fields(&assembler);

        let nonlinear = Form::new(SpaceKind::Velocity).term(1.0, Operator::Convection, Operand::Trial);
        assert!(matches!(
            assembler.assemble_matrix(&nonlinear),
            Err(FlowError::Assembly(_))
        ));

        let rectangular = Form::new(SpaceKind::Velocity).term(1.0, Operator::Gradient, Operand::Trial);
        assert!(matches!(
            assembler.assemble_matrix(&rectangular),
            Err(FlowError::Assembly(_))
        ));

        let wrong_field = Form::new(SpaceKind::Velocity).term(
            1.0,
            Operator::Mass,
            Operand::Field(Slot::PreviousPressure),
        );
        assert!(matches!(
            assembler.assemble_vector(&wrong_field, &coefficients),
            Err(FlowError::Assembly(_))
        ));

        let mixed = Form::new(SpaceKind::Velocity)
            .term(1.0, Operator::Mass, Operand::Trial)
            .term(1.0, Operator::Mass, Operand::Field(Slot::Velocity));
        assert!(matches!(assembler.assemble_matrix(&mixed), Err(FlowError::Assembly(_))));
    }
}
