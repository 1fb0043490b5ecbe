//! Symbolic residual forms.
//!
//! A [`Form`] is a linear combination of discrete operators applied either to the unknown
//! (trial) function or to a known field. Writing a sub-problem as a residual `F = 0` and
//! splitting it with [`Form::lhs`] / [`Form::rhs`] yields the bilinear part `a` (assembled into
//! a matrix) and the linear part `L` (assembled into a vector every time step).
use nalgebra::Vector2;

use crate::space::SpaceKind;
use crate::Float;

/// Known field referenced by a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Current velocity (`u_`): tentative, then corrected.
    Velocity,
    /// Converged velocity of the previous time step (`u_1`).
    PreviousVelocity,
    /// Latest Picard iterate (`u_k`).
    IterateVelocity,
    /// Current pressure (`p_`).
    Pressure,
    /// Converged pressure of the previous time step (`p_1`).
    PreviousPressure,
}

impl Slot {
    pub fn space(&self) -> SpaceKind {
        match self {
            Slot::Velocity | Slot::PreviousVelocity | Slot::IterateVelocity => SpaceKind::Velocity,
            Slot::Pressure | Slot::PreviousPressure => SpaceKind::Pressure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operator {
    /// Identity on interior degrees of freedom.
    Mass,
    /// `Δ` on the test space.
    Laplacian,
    /// `∇·(∇w + ∇wᵀ) = Δw + ∇(∇·w)`.
    StressDivergence,
    /// Pressure to velocity faces.
    Gradient,
    /// Velocity faces to cells.
    Divergence,
    /// `(w·∇)w`; nonlinear, only evaluated on known fields.
    Convection,
    /// Uniform body force.
    Source(Vector2<Float>),
}

impl Operator {
    /// Space the operator acts on, given the test space it is tested against.
    /// `None` when the pairing is not defined.
    pub fn domain(&self, test: SpaceKind) -> Option<SpaceKind> {
        use SpaceKind::*;
        match (self, test) {
            (Operator::Mass, Velocity) | (Operator::Mass, Pressure) => Some(test),
            (Operator::Laplacian, _) => Some(test),
            (Operator::StressDivergence, Velocity) => Some(Velocity),
            (Operator::Gradient, Velocity) => Some(Pressure),
            (Operator::Divergence, Pressure) => Some(Velocity),
            (Operator::Convection, Velocity) => Some(Velocity),
            (Operator::Source(_), Velocity) => Some(Velocity),
            _ => None,
        }
    }

    pub fn is_linear(&self) -> bool {
        !matches!(self, Operator::Convection | Operator::Source(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Trial,
    Field(Slot),
    /// No argument, used by [`Operator::Source`].
    Unit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term {
    pub coefficient: Float,
    pub operator: Operator,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub test: SpaceKind,
    pub terms: Vec<Term>,
}

impl Form {
    pub fn new(test: SpaceKind) -> Self {
        Self {
            test,
            terms: Vec::new(),
        }
    }

    pub fn term(mut self, coefficient: Float, operator: Operator, operand: Operand) -> Self {
        self.terms.push(Term {
            coefficient,
            operator,
            operand,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn has_trial(&self) -> bool {
        self.terms.iter().any(|t| t.operand == Operand::Trial)
    }

    /// Bilinear part: every term acting on the trial function.
    pub fn lhs(&self) -> Form {
        Form {
            test: self.test,
            terms: self
                .terms
                .iter()
                .filter(|t| t.operand == Operand::Trial)
                .copied()
                .collect(),
        }
    }

    /// Linear part, moved to the right-hand side (`a(u) = L` for `F = a(u) - L`).
    pub fn rhs(&self) -> Form {
        Form {
            test: self.test,
            terms: self
                .terms
                .iter()
                .filter(|t| t.operand != Operand::Trial)
                .map(|t| Term {
                    coefficient: -t.coefficient,
                    ..*t
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lhs_rhs_split() {
        let dt = 0.1;
        let f = Form::new(SpaceKind::Velocity)
            .term(1.0 / dt, Operator::Mass, Operand::Trial)
            .term(-1.0 / dt, Operator::Mass, Operand::Field(Slot::PreviousVelocity))
            .term(1.0, Operator::Gradient, Operand::Field(Slot::PreviousPressure));

        let a = f.lhs();
        assert_eq!(a.terms.len(), 1);
        assert!((a.terms[0].coefficient - 10.0).abs() < 1e-12);

        let l = f.rhs();
        assert_eq!(l.terms.len(), 2);
        assert!((l.terms[0].coefficient - 10.0).abs() < 1e-12);
        assert!((l.terms[1].coefficient + 1.0).abs() < 1e-12);
        assert!(!l.has_trial());
    }

    #[test]
    fn test_operator_domains() {
        assert_eq!(
            Operator::Gradient.domain(SpaceKind::Velocity),
            Some(SpaceKind::Pressure)
        );
        assert_eq!(Operator::Gradient.domain(SpaceKind::Pressure), None);
        assert_eq!(
            Operator::Divergence.domain(SpaceKind::Pressure),
            Some(SpaceKind::Velocity)
        );
        assert!(!Operator::Convection.is_linear());
    }
}
