//! Lazy expression trees.
//!
//! An [`Expr`] borrows its tensor operands and describes a computation
//! without running it. Assigning it into a tensor lowers it to a job and
//! evaluates every output element in one pass.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Add, BitOr, Div, Mul, Neg, Sub};

use crate::element::Element;
use crate::error::{Result, TensorError};
use crate::job::{CastEval, CastJob, Node};
use crate::ops::{BinaryOp, TernaryOp, UnaryOp};
use crate::shape::Shape;
use crate::stream::Device;
use crate::tensor::Tensor;

/// Structural class of an expression, composed by OR-ing operand classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprType(u8);

impl ExprType {
    /// A plain tensor.
    pub const RVALUE: ExprType = ExprType(0);
    /// Evaluable element-wise at any coordinate.
    pub const MAPPED: ExprType = ExprType(1);
    /// Evaluable by coordinate but not element-wise in storage order.
    pub const CHAINED: ExprType = ExprType(3);
    /// Needs a dedicated engine.
    pub const COMPLEX: ExprType = ExprType(7);

    pub fn contains(self, other: ExprType) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_complex(self) -> bool {
        self.contains(ExprType::COMPLEX)
    }
}

impl BitOr for ExprType {
    type Output = ExprType;

    fn bitor(self, rhs: ExprType) -> ExprType {
        ExprType(self.0 | rhs.0)
    }
}

/// Borrowed 2-D view of a tensor operand.
///
/// Leading dimensions are folded into `rows`; `rank` remembers the
/// tensor's original rank for dot dispatch.
#[derive(Clone, Copy)]
pub struct TensorRef<'e, T> {
    pub(crate) ptr: *const T,
    pub(crate) rows: usize,
    pub(crate) cols: usize,
    pub(crate) stride: usize,
    pub(crate) rank: usize,
    _marker: PhantomData<&'e T>,
}

impl<'e, T: Element> TensorRef<'e, T> {
    pub(crate) fn new(ptr: *const T, rows: usize, cols: usize, stride: usize, rank: usize) -> Self {
        TensorRef {
            ptr,
            rows,
            cols,
            stride,
            rank,
            _marker: PhantomData,
        }
    }

    pub fn shape(&self) -> Shape<2> {
        Shape::new([self.rows, self.cols])
    }

    /// The same operand treated as a tensor of rank `rank`.
    pub(crate) fn with_rank(self, rank: usize) -> Self {
        TensorRef { rank, ..self }
    }

    /// Number of elements between the first and one past the last element.
    pub(crate) fn extent(&self) -> usize {
        if self.rows == 0 || self.cols == 0 {
            0
        } else {
            (self.rows - 1) * self.stride + self.cols
        }
    }

    pub(crate) fn span(&self) -> Span {
        Span::of(self.ptr, self.extent())
    }

    /// # Safety
    /// The pointer must be valid for `extent()` reads for `'e`.
    pub(crate) unsafe fn as_slice(&self) -> &'e [T] {
        if self.extent() == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.ptr, self.extent())
        }
    }
}

impl<T> fmt::Debug for TensorRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor({}x{}, stride {}, rank {})",
            self.rows, self.cols, self.stride, self.rank
        )
    }
}

mod sealed {
    use super::*;

    /// Half-open byte address range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Span {
        pub start: usize,
        pub end: usize,
    }

    impl Span {
        pub fn of<T>(ptr: *const T, elems: usize) -> Span {
            let start = ptr as usize;
            Span {
                start,
                end: start + elems * std::mem::size_of::<T>(),
            }
        }

        pub fn overlaps(&self, other: &Span) -> bool {
            self.start < self.end
                && other.start < other.end
                && self.start < other.end
                && other.start < self.end
        }
    }

    /// A tensor leaf as seen by alias analysis.
    #[derive(Debug, Clone, Copy)]
    pub struct LeafInfo {
        pub span: Span,
        pub addr: usize,
        pub stride: usize,
        pub elem_size: usize,
        pub transposed: bool,
    }

    /// Engine-side half of [`CastNode`]; only this crate implements it.
    pub trait CastSource<'e, T: Element> {
        fn broadcast_shape(&self) -> Result<Option<Shape<2>>>;
        fn collect_leaves(&self, transposed: bool, out: &mut Vec<LeafInfo>);
        fn lower(&self) -> Result<Box<dyn CastEval<T> + 'e>>;
    }
}

pub(crate) use sealed::{LeafInfo, Span};

/// A matrix product node. Operands are 1-D or 2-D tensors.
#[derive(Clone, Copy)]
pub struct DotExpr<'e, T> {
    pub(crate) lhs: TensorRef<'e, T>,
    pub(crate) rhs: TensorRef<'e, T>,
    pub(crate) lhs_t: bool,
    pub(crate) rhs_t: bool,
    pub(crate) scale: T,
}

impl<'e, T: Element> DotExpr<'e, T> {
    pub(crate) fn new(
        lhs: TensorRef<'e, T>,
        rhs: TensorRef<'e, T>,
        lhs_t: bool,
        rhs_t: bool,
        scale: T,
    ) -> Result<Self> {
        let d = DotExpr {
            lhs,
            rhs,
            lhs_t,
            rhs_t,
            scale,
        };
        let (m, k) = d.lhs_dims();
        let (k2, n) = d.rhs_dims();
        check!(k == k2, TensorError::DotMismatch { m, k, k2, n });
        Ok(d)
    }

    /// `(M, K)` of the left operand after transposition.
    pub(crate) fn lhs_dims(&self) -> (usize, usize) {
        if self.lhs_t {
            (self.lhs.cols, self.lhs.rows)
        } else {
            (self.lhs.rows, self.lhs.cols)
        }
    }

    /// `(K, N)` of the right operand after transposition.
    pub(crate) fn rhs_dims(&self) -> (usize, usize) {
        if self.rhs_t {
            (self.rhs.cols, self.rhs.rows)
        } else {
            (self.rhs.rows, self.rhs.cols)
        }
    }

    pub fn shape(&self) -> Shape<2> {
        Shape::new([self.lhs_dims().0, self.rhs_dims().1])
    }

    pub fn scale(&self) -> T {
        self.scale
    }
}

/// Type-erased source of an element cast.
pub trait CastNode<'e, T: Element>: sealed::CastSource<'e, T> {
    fn expr_type(&self) -> ExprType;
    fn shape(&self) -> Result<Shape<2>>;
    fn source_dtype(&self) -> crate::dtype::DType;
}

struct CastFrom<'e, S: Element> {
    src: Expr<'e, S>,
}

impl<'e, S: Element, T: Element> CastNode<'e, T> for CastFrom<'e, S> {
    fn expr_type(&self) -> ExprType {
        self.src.expr_type() | ExprType::MAPPED
    }

    fn shape(&self) -> Result<Shape<2>> {
        self.src.shape()
    }

    fn source_dtype(&self) -> crate::dtype::DType {
        S::DTYPE
    }
}

impl<'e, S: Element, T: Element> sealed::CastSource<'e, T> for CastFrom<'e, S> {
    fn broadcast_shape(&self) -> Result<Option<Shape<2>>> {
        self.src.broadcast_shape()
    }

    fn collect_leaves(&self, transposed: bool, out: &mut Vec<LeafInfo>) {
        self.src.collect_leaves(transposed, out)
    }

    fn lower(&self) -> Result<Box<dyn CastEval<T> + 'e>> {
        Ok(Box::new(CastJob::new(Node::lower(&self.src)?)))
    }
}

/// A lazy tensor expression.
pub enum Expr<'e, T: Element> {
    Tensor(TensorRef<'e, T>),
    Scalar(T),
    Unary(UnaryOp<T>, Box<Expr<'e, T>>),
    Binary(BinaryOp, Box<Expr<'e, T>>, Box<Expr<'e, T>>),
    Ternary(TernaryOp, Box<Expr<'e, T>>, Box<Expr<'e, T>>, Box<Expr<'e, T>>),
    Transpose(Box<Expr<'e, T>>),
    Cast(Box<dyn CastNode<'e, T> + 'e>),
    Dot(DotExpr<'e, T>),
}

impl<'e, T: Element> Expr<'e, T> {
    pub fn expr_type(&self) -> ExprType {
        match self {
            Expr::Tensor(_) => ExprType::RVALUE,
            Expr::Scalar(_) => ExprType::MAPPED,
            Expr::Unary(_, a) => a.expr_type() | ExprType::MAPPED,
            Expr::Binary(_, a, b) => a.expr_type() | b.expr_type() | ExprType::MAPPED,
            Expr::Ternary(_, a, b, c) => {
                a.expr_type() | b.expr_type() | c.expr_type() | ExprType::MAPPED
            }
            Expr::Transpose(a) => a.expr_type() | ExprType::CHAINED,
            Expr::Cast(c) => c.expr_type(),
            Expr::Dot(_) => ExprType::COMPLEX,
        }
    }

    /// Shape of the result as rows x columns.
    ///
    /// An expression built only from scalars reports the all-zero shape and
    /// broadcasts against any sibling. Two non-scalar siblings must agree
    /// exactly, even when one of them is an empty tensor.
    pub fn shape(&self) -> Result<Shape<2>> {
        Ok(self.broadcast_shape()?.unwrap_or_else(Shape::zeros))
    }

    /// Like [`Expr::shape`], with `None` for scalar-only expressions.
    pub(crate) fn broadcast_shape(&self) -> Result<Option<Shape<2>>> {
        match self {
            Expr::Tensor(t) => Ok(Some(t.shape())),
            Expr::Scalar(_) => Ok(None),
            Expr::Unary(_, a) => a.broadcast_shape(),
            Expr::Binary(_, a, b) => combine(a.broadcast_shape()?, b.broadcast_shape()?),
            Expr::Ternary(_, a, b, c) => combine(
                combine(a.broadcast_shape()?, b.broadcast_shape()?)?,
                c.broadcast_shape()?,
            ),
            Expr::Transpose(a) => Ok(a.broadcast_shape()?.map(|s| s.transposed())),
            Expr::Cast(c) => c.broadcast_shape(),
            Expr::Dot(d) => Ok(Some(d.shape())),
        }
    }

    pub(crate) fn collect_leaves(&self, transposed: bool, out: &mut Vec<LeafInfo>) {
        match self {
            Expr::Tensor(t) => out.push(LeafInfo {
                span: t.span(),
                addr: t.ptr as usize,
                stride: t.stride,
                elem_size: std::mem::size_of::<T>(),
                transposed,
            }),
            Expr::Scalar(_) => {}
            Expr::Unary(_, a) => a.collect_leaves(transposed, out),
            Expr::Binary(_, a, b) => {
                a.collect_leaves(transposed, out);
                b.collect_leaves(transposed, out);
            }
            Expr::Ternary(_, a, b, c) => {
                a.collect_leaves(transposed, out);
                b.collect_leaves(transposed, out);
                c.collect_leaves(transposed, out);
            }
            Expr::Transpose(a) => a.collect_leaves(!transposed, out),
            Expr::Cast(c) => c.collect_leaves(transposed, out),
            Expr::Dot(d) => {
                for t in [&d.lhs, &d.rhs] {
                    out.push(LeafInfo {
                        span: t.span(),
                        addr: t.ptr as usize,
                        stride: t.stride,
                        elem_size: std::mem::size_of::<T>(),
                        transposed: true,
                    });
                }
            }
        }
    }

    /// Transpose. Storage is never moved; evaluation swaps coordinates.
    ///
    /// Transposing a transpose cancels, and a 2-D matrix product folds into
    /// the swapped product `rhs^T . lhs^T`.
    pub fn t(self) -> Expr<'e, T> {
        match self {
            Expr::Transpose(inner) => *inner,
            Expr::Dot(d) if d.lhs.rank == 2 && d.rhs.rank == 2 => Expr::Dot(DotExpr {
                lhs: d.rhs,
                rhs: d.lhs,
                lhs_t: !d.rhs_t,
                rhs_t: !d.lhs_t,
                scale: d.scale,
            }),
            other => Expr::Transpose(Box::new(other)),
        }
    }

    /// Converts every element to `U` through `f64`.
    pub fn cast<U: Element>(self) -> Expr<'e, U> {
        Expr::Cast(Box::new(CastFrom { src: self }))
    }
}

fn combine(a: Option<Shape<2>>, b: Option<Shape<2>>) -> Result<Option<Shape<2>>> {
    let (Some(a), Some(b)) = (a, b) else {
        return Ok(a.or(b));
    };
    check!(
        a == b,
        TensorError::ShapeMismatch {
            expected: a.dims().to_vec(),
            got: b.dims().to_vec(),
        }
    );
    Ok(Some(a))
}

impl<T: Element> fmt::Debug for Expr<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Tensor(t) => write!(f, "{:?}", t),
            Expr::Scalar(v) => write!(f, "Scalar({})", v),
            Expr::Unary(op, a) => write!(f, "{:?}({:?})", op, a),
            Expr::Binary(op, a, b) => write!(f, "{:?}({:?}, {:?})", op, a, b),
            Expr::Ternary(op, a, b, c) => write!(f, "{:?}({:?}, {:?}, {:?})", op, a, b, c),
            Expr::Transpose(a) => write!(f, "T({:?})", a),
            Expr::Cast(c) => write!(f, "Cast<{} -> {}>", c.source_dtype(), T::DTYPE),
            Expr::Dot(d) => write!(
                f,
                "Dot({:?}{}, {:?}{}, scale {})",
                d.lhs,
                if d.lhs_t { "^T" } else { "" },
                d.rhs,
                if d.rhs_t { "^T" } else { "" },
                d.scale
            ),
        }
    }
}

/// Anything that can stand in an expression: expressions, tensor
/// references and plain scalars.
pub trait IntoExpr<'e, T: Element> {
    fn into_expr(self) -> Expr<'e, T>;
}

impl<'e, T: Element> IntoExpr<'e, T> for Expr<'e, T> {
    fn into_expr(self) -> Expr<'e, T> {
        self
    }
}

impl<'e, 'a, T: Element, const N: usize, D: Device> IntoExpr<'e, T> for &'e Tensor<'a, T, N, D> {
    fn into_expr(self) -> Expr<'e, T> {
        Expr::Tensor(self.leaf())
    }
}

macro_rules! impl_scalar_into_expr {
    ($($t:ty),*) => {
        $(
            impl<'e> IntoExpr<'e, $t> for $t {
                fn into_expr(self) -> Expr<'e, $t> {
                    Expr::Scalar(self)
                }
            }
        )*
    };
}

impl_scalar_into_expr!(f32, f64, half::f16, i32, i64, i8, u8);

pub fn scalar<'e, T: Element>(v: T) -> Expr<'e, T> {
    Expr::Scalar(v)
}

pub fn unary<'e, T: Element>(op: UnaryOp<T>, a: impl IntoExpr<'e, T>) -> Expr<'e, T> {
    Expr::Unary(op, Box::new(a.into_expr()))
}

/// Applies a user functor element-wise.
pub fn map<'e, T: Element>(f: fn(T) -> T, a: impl IntoExpr<'e, T>) -> Expr<'e, T> {
    unary(UnaryOp::Map(f), a)
}

pub fn abs<'e, T: Element>(a: impl IntoExpr<'e, T>) -> Expr<'e, T> {
    unary(UnaryOp::Abs, a)
}

pub fn square<'e, T: Element>(a: impl IntoExpr<'e, T>) -> Expr<'e, T> {
    unary(UnaryOp::Square, a)
}

pub fn binary<'e, T: Element>(
    op: BinaryOp,
    a: impl IntoExpr<'e, T>,
    b: impl IntoExpr<'e, T>,
) -> Expr<'e, T> {
    Expr::Binary(op, Box::new(a.into_expr()), Box::new(b.into_expr()))
}

pub fn ternary<'e, T: Element>(
    op: TernaryOp,
    a: impl IntoExpr<'e, T>,
    b: impl IntoExpr<'e, T>,
    c: impl IntoExpr<'e, T>,
) -> Expr<'e, T> {
    Expr::Ternary(
        op,
        Box::new(a.into_expr()),
        Box::new(b.into_expr()),
        Box::new(c.into_expr()),
    )
}

/// `a * b + c`
pub fn mul_add<'e, T: Element>(
    a: impl IntoExpr<'e, T>,
    b: impl IntoExpr<'e, T>,
    c: impl IntoExpr<'e, T>,
) -> Expr<'e, T> {
    ternary(TernaryOp::MulAdd, a, b, c)
}

pub fn clamp<'e, T: Element>(
    a: impl IntoExpr<'e, T>,
    lo: impl IntoExpr<'e, T>,
    hi: impl IntoExpr<'e, T>,
) -> Expr<'e, T> {
    ternary(TernaryOp::Clamp, a, lo, hi)
}

fn dot_operand<'e, 'a, T: Element, const N: usize, D: Device>(
    t: &'e Tensor<'a, T, N, D>,
) -> Result<TensorRef<'e, T>> {
    check!(
        N == 1 || N == 2,
        TensorError::RankMismatch { op: "dot", rank: N }
    );
    Ok(t.leaf())
}

/// Matrix product `lhs . rhs`.
pub fn dot<'e, 'a, 'b, T: Element, const A: usize, const B: usize, D: Device>(
    lhs: &'e Tensor<'a, T, A, D>,
    rhs: &'e Tensor<'b, T, B, D>,
) -> Result<Expr<'e, T>> {
    dot_t(lhs, false, rhs, false)
}

/// Matrix product `op(lhs) . op(rhs)` where `op` transposes when its flag is set.
pub fn dot_t<'e, 'a, 'b, T: Element, const A: usize, const B: usize, D: Device>(
    lhs: &'e Tensor<'a, T, A, D>,
    lhs_t: bool,
    rhs: &'e Tensor<'b, T, B, D>,
    rhs_t: bool,
) -> Result<Expr<'e, T>> {
    let d = DotExpr::new(dot_operand(lhs)?, dot_operand(rhs)?, lhs_t, rhs_t, T::one())?;
    Ok(Expr::Dot(d))
}

/// Outer product `x^T . y` of two vectors, an `M x N` matrix.
pub fn outer<'e, 'a, 'b, T: Element, D: Device>(
    x: &'e Tensor<'a, T, 1, D>,
    y: &'e Tensor<'b, T, 1, D>,
) -> Result<Expr<'e, T>> {
    dot_t(x, true, y, false)
}

fn add_expr<'e, T: Element>(a: Expr<'e, T>, b: Expr<'e, T>) -> Expr<'e, T> {
    binary(BinaryOp::Plus, a, b)
}

fn sub_expr<'e, T: Element>(a: Expr<'e, T>, b: Expr<'e, T>) -> Expr<'e, T> {
    binary(BinaryOp::Minus, a, b)
}

fn div_expr<'e, T: Element>(a: Expr<'e, T>, b: Expr<'e, T>) -> Expr<'e, T> {
    binary(BinaryOp::Div, a, b)
}

/// Multiplication folds a scalar factor into a matrix product's scale.
fn mul_expr<'e, T: Element>(a: Expr<'e, T>, b: Expr<'e, T>) -> Expr<'e, T> {
    match (a, b) {
        (Expr::Dot(mut d), Expr::Scalar(s)) | (Expr::Scalar(s), Expr::Dot(mut d)) => {
            d.scale = d.scale.mul(s);
            Expr::Dot(d)
        }
        (a, b) => binary(BinaryOp::Mul, a, b),
    }
}

macro_rules! impl_expr_operator {
    ($trait:ident, $method:ident, $build:ident) => {
        impl<'e, T: Element, R: IntoExpr<'e, T>> $trait<R> for Expr<'e, T> {
            type Output = Expr<'e, T>;

            fn $method(self, rhs: R) -> Expr<'e, T> {
                $build(self, rhs.into_expr())
            }
        }

        impl<'e, 'a, T: Element, const N: usize, D: Device, R: IntoExpr<'e, T>> $trait<R>
            for &'e Tensor<'a, T, N, D>
        {
            type Output = Expr<'e, T>;

            fn $method(self, rhs: R) -> Expr<'e, T> {
                $build(self.into_expr(), rhs.into_expr())
            }
        }
    };
}

impl_expr_operator!(Add, add, add_expr);
impl_expr_operator!(Sub, sub, sub_expr);
impl_expr_operator!(Mul, mul, mul_expr);
impl_expr_operator!(Div, div, div_expr);

macro_rules! impl_scalar_lhs {
    ($($t:ty),*) => {
        $(
            impl_scalar_lhs!(@op $t, Add, add, add_expr);
            impl_scalar_lhs!(@op $t, Sub, sub, sub_expr);
            impl_scalar_lhs!(@op $t, Mul, mul, mul_expr);
            impl_scalar_lhs!(@op $t, Div, div, div_expr);
        )*
    };
    (@op $t:ty, $trait:ident, $method:ident, $build:ident) => {
        impl<'e> $trait<Expr<'e, $t>> for $t {
            type Output = Expr<'e, $t>;

            fn $method(self, rhs: Expr<'e, $t>) -> Expr<'e, $t> {
                $build(Expr::Scalar(self), rhs)
            }
        }

        impl<'e, 'a, const N: usize, D: Device> $trait<&'e Tensor<'a, $t, N, D>> for $t {
            type Output = Expr<'e, $t>;

            fn $method(self, rhs: &'e Tensor<'a, $t, N, D>) -> Expr<'e, $t> {
                $build(Expr::Scalar(self), rhs.into_expr())
            }
        }
    };
}

impl_scalar_lhs!(f32, f64, half::f16, i32, i64, i8, u8);

impl<'e, T: Element> Neg for Expr<'e, T> {
    type Output = Expr<'e, T>;

    fn neg(self) -> Expr<'e, T> {
        unary(UnaryOp::Negate, self)
    }
}

impl<'e, 'a, T: Element, const N: usize, D: Device> Neg for &'e Tensor<'a, T, N, D> {
    type Output = Expr<'e, T>;

    fn neg(self) -> Expr<'e, T> {
        unary(UnaryOp::Negate, self)
    }
}
