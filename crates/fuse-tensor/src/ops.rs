//! Operation tags carried by expression nodes.

use std::fmt;

use crate::element::{Element, Lanes};
use crate::error::{Result, TensorError};

/// Element-wise unary operations.
#[derive(Clone, Copy)]
pub enum UnaryOp<T> {
    Identity,
    Negate,
    Abs,
    Square,
    /// A user functor, e.g. ReLU.
    Map(fn(T) -> T),
}

impl<T: Element> UnaryOp<T> {
    #[inline]
    pub fn apply(&self, v: T) -> T {
        match self {
            UnaryOp::Identity => v,
            UnaryOp::Negate => v.neg(),
            UnaryOp::Abs => v.abs(),
            UnaryOp::Square => v.mul(v),
            UnaryOp::Map(f) => f(v),
        }
    }

    pub fn vectorizable(&self) -> bool {
        matches!(self, UnaryOp::Identity | UnaryOp::Negate | UnaryOp::Square)
    }

    /// Lane-wise form. Only defined for vectorizable ops.
    #[inline]
    pub(crate) fn apply_vec(&self, v: T::Vector) -> Option<T::Vector> {
        match self {
            UnaryOp::Identity => Some(v),
            UnaryOp::Negate => Some(<T::Vector as Lanes<T>>::splat(T::zero()).sub(v)),
            UnaryOp::Square => Some(v.mul(v)),
            UnaryOp::Abs | UnaryOp::Map(_) => None,
        }
    }
}

impl<T> fmt::Debug for UnaryOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Identity => write!(f, "Identity"),
            UnaryOp::Negate => write!(f, "Negate"),
            UnaryOp::Abs => write!(f, "Abs"),
            UnaryOp::Square => write!(f, "Square"),
            UnaryOp::Map(_) => write!(f, "Map"),
        }
    }
}

/// Element-wise binary operations. `Left` and `Right` select one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Mul,
    Div,
    Left,
    Right,
}

impl BinaryOp {
    #[inline]
    pub fn apply<T: Element>(&self, a: T, b: T) -> T {
        match self {
            BinaryOp::Plus => a.add(b),
            BinaryOp::Minus => a.sub(b),
            BinaryOp::Mul => a.mul(b),
            BinaryOp::Div => a.div(b),
            BinaryOp::Left => a,
            BinaryOp::Right => b,
        }
    }

    #[inline]
    pub fn apply_vec<T: Element>(&self, a: T::Vector, b: T::Vector) -> T::Vector {
        match self {
            BinaryOp::Plus => a.add(b),
            BinaryOp::Minus => a.sub(b),
            BinaryOp::Mul => a.mul(b),
            BinaryOp::Div => a.div(b),
            BinaryOp::Left => a,
            BinaryOp::Right => b,
        }
    }

    pub fn vectorizable<T: Element>(&self) -> bool {
        match self {
            BinaryOp::Div => T::VECTOR_DIV,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TernaryOp {
    /// `a * b + c`
    MulAdd,
    /// `a` clamped to `[b, c]`
    Clamp,
}

impl TernaryOp {
    #[inline]
    pub fn apply<T: Element>(&self, a: T, b: T, c: T) -> T {
        match self {
            TernaryOp::MulAdd => a.mul(b).add(c),
            TernaryOp::Clamp => {
                if a < b {
                    b
                } else if a > c {
                    c
                } else {
                    a
                }
            }
        }
    }

    pub fn vectorizable(&self) -> bool {
        matches!(self, TernaryOp::MulAdd)
    }
}

/// How an evaluated value is written into the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Saver {
    SaveTo,
    PlusTo,
    MinusTo,
    MulTo,
    DivTo,
}

impl Saver {
    /// The binary op combining the old destination value with the new one.
    pub fn op_type(&self) -> BinaryOp {
        match self {
            Saver::SaveTo => BinaryOp::Right,
            Saver::PlusTo => BinaryOp::Plus,
            Saver::MinusTo => BinaryOp::Minus,
            Saver::MulTo => BinaryOp::Mul,
            Saver::DivTo => BinaryOp::Div,
        }
    }

    #[inline]
    pub fn apply<T: Element>(&self, dst: T, v: T) -> T {
        self.op_type().apply(dst, v)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Saver::SaveTo => "saveto",
            Saver::PlusTo => "plusto",
            Saver::MinusTo => "minusto",
            Saver::MulTo => "multo",
            Saver::DivTo => "divto",
        }
    }

    /// BLAS `(alpha, beta)` for a product scaled by `scale`.
    pub fn blas_factors<T: Element>(&self, scale: T) -> Result<(T, T)> {
        match self {
            Saver::SaveTo => Ok((scale, T::zero())),
            Saver::PlusTo => Ok((scale, T::one())),
            Saver::MinusTo => Ok((scale.neg(), T::one())),
            Saver::MulTo | Saver::DivTo => Err(TensorError::UnsupportedSaver {
                saver: self.name(),
                path: "blas",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_apply() {
        assert_eq!(UnaryOp::Negate.apply(2.0f32), -2.0);
        assert_eq!(UnaryOp::Abs.apply(-3i32), 3);
        assert_eq!(UnaryOp::Square.apply(3.0f64), 9.0);
        let relu = UnaryOp::Map(|v: f32| if v > 0.0 { v } else { 0.0 });
        assert_eq!(relu.apply(-1.0), 0.0);
        assert!(!relu.vectorizable());
    }

    #[test]
    fn test_binary_select() {
        assert_eq!(BinaryOp::Left.apply(1, 2), 1);
        assert_eq!(BinaryOp::Right.apply(1, 2), 2);
        assert!(BinaryOp::Div.vectorizable::<f32>());
        assert!(!BinaryOp::Div.vectorizable::<i32>());
    }

    #[test]
    fn test_ternary() {
        assert_eq!(TernaryOp::MulAdd.apply(2.0f32, 3.0, 1.0), 7.0);
        assert_eq!(TernaryOp::Clamp.apply(5, 0, 3), 3);
        assert_eq!(TernaryOp::Clamp.apply(-5, 0, 3), 0);
        assert_eq!(TernaryOp::Clamp.apply(2, 0, 3), 2);
    }

    #[test]
    fn test_savers() {
        assert_eq!(Saver::SaveTo.apply(10.0f32, 2.0), 2.0);
        assert_eq!(Saver::PlusTo.apply(10.0f32, 2.0), 12.0);
        assert_eq!(Saver::MinusTo.apply(10.0f32, 2.0), 8.0);
        assert_eq!(Saver::MulTo.apply(10.0f32, 2.0), 20.0);
        assert_eq!(Saver::DivTo.apply(10.0f32, 2.0), 5.0);
    }

    #[test]
    fn test_blas_factors() {
        assert_eq!(Saver::SaveTo.blas_factors(2.0f32).unwrap(), (2.0, 0.0));
        assert_eq!(Saver::PlusTo.blas_factors(2.0f32).unwrap(), (2.0, 1.0));
        assert_eq!(Saver::MinusTo.blas_factors(2.0f32).unwrap(), (-2.0, 1.0));
        assert!(matches!(
            Saver::MulTo.blas_factors(2.0f64),
            Err(TensorError::UnsupportedSaver { saver: "multo", .. })
        ));
    }
}
