//! Scalar evaluation of expressions.
//!
//! A [`Job`] mirrors an expression tree node for node but keeps only raw
//! operand pointers and strides, so it can be shared across the worker
//! threads that fill disjoint output rows.

use std::marker::PhantomData;

use rayon::prelude::*;

use crate::element::{Element, Lanes};
use crate::error::{Result, TensorError};
use crate::expr::{DotExpr, Expr, TensorRef};
use crate::ops::{BinaryOp, Saver, TernaryOp, UnaryOp};
use crate::shape::Shape;

/// A read-only operand pointer that may cross threads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConstPtr<T>(pub(crate) *const T);

// SAFETY: jobs only read through these pointers while the borrowed
// operands are alive and nobody else writes them.
unsafe impl<T: Send> Send for ConstPtr<T> {}
unsafe impl<T: Sync> Sync for ConstPtr<T> {}

/// A destination pointer that may cross threads. Each worker writes a
/// disjoint set of rows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SyncPtr<T>(pub(crate) *mut T);

unsafe impl<T: Send> Send for SyncPtr<T> {}
unsafe impl<T: Sync> Sync for SyncPtr<T> {}

/// Writable 2-D destination of an assignment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DstView<T> {
    pub ptr: SyncPtr<T>,
    pub rows: usize,
    pub cols: usize,
    pub stride: usize,
}

impl<T: Element> DstView<T> {
    pub fn shape(&self) -> Shape<2> {
        Shape::new([self.rows, self.cols])
    }

    pub fn extent(&self) -> usize {
        if self.rows == 0 || self.cols == 0 {
            0
        } else {
            (self.rows - 1) * self.stride + self.cols
        }
    }

    pub fn span(&self) -> crate::expr::Span {
        crate::expr::Span::of(self.ptr.0 as *const T, self.extent())
    }

    /// # Safety
    /// `row < rows` and `col < cols`.
    #[inline]
    pub unsafe fn at(&self, row: usize, col: usize) -> *mut T {
        self.ptr.0.add(row * self.stride + col)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Leaf<'e, T> {
    ptr: ConstPtr<T>,
    stride: usize,
    _marker: PhantomData<&'e T>,
}

impl<'e, T: Element> Leaf<'e, T> {
    pub fn new(t: &TensorRef<'e, T>) -> Self {
        Leaf {
            ptr: ConstPtr(t.ptr),
            stride: t.stride,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub unsafe fn ptr_at(&self, row: usize, col: usize) -> *const T {
        self.ptr.0.add(row * self.stride + col)
    }

    #[inline]
    pub unsafe fn get(&self, row: usize, col: usize) -> T {
        *self.ptr_at(row, col)
    }
}

/// Evaluates a cast source, converting to `T`.
pub trait CastEval<T>: Send + Sync {
    /// # Safety
    /// The coordinate must lie inside the source expression's shape.
    unsafe fn eval(&self, row: usize, col: usize) -> T;
}

pub(crate) struct CastJob<'e, S: Element> {
    src: Node<'e, S>,
}

impl<'e, S: Element> CastJob<'e, S> {
    pub fn new(src: Node<'e, S>) -> Self {
        CastJob { src }
    }
}

impl<S: Element, T: Element> CastEval<T> for CastJob<'_, S> {
    #[inline]
    unsafe fn eval(&self, row: usize, col: usize) -> T {
        T::from_f64(self.src.eval(row, col).to_f64())
    }
}

/// Implicit matrix product, one output element per evaluation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GemmNode<'e, T> {
    lhs: Leaf<'e, T>,
    rhs: Leaf<'e, T>,
    lhs_t: bool,
    rhs_t: bool,
    k: usize,
    scale: T,
}

impl<'e, T: Element> GemmNode<'e, T> {
    pub fn new(d: &DotExpr<'e, T>) -> Self {
        GemmNode {
            lhs: Leaf::new(&d.lhs),
            rhs: Leaf::new(&d.rhs),
            lhs_t: d.lhs_t,
            rhs_t: d.rhs_t,
            k: d.lhs_dims().1,
            scale: d.scale,
        }
    }

    /// Whether `rhs` rows are contiguous along the output columns, so a
    /// run of output columns can be computed in lanes.
    pub fn lanes_along_cols(&self) -> bool {
        !self.rhs_t
    }

    #[inline]
    unsafe fn lhs_at(&self, row: usize, p: usize) -> T {
        if self.lhs_t {
            self.lhs.get(p, row)
        } else {
            self.lhs.get(row, p)
        }
    }

    #[inline]
    pub unsafe fn eval(&self, row: usize, col: usize) -> T {
        let sum = if !self.lhs_t && self.rhs_t {
            // both operands run along k in storage order
            self.contiguous_sum(self.lhs.ptr_at(row, 0), self.rhs.ptr_at(col, 0))
        } else {
            let mut acc = T::zero();
            for p in 0..self.k {
                let a = self.lhs_at(row, p);
                let b = if self.rhs_t {
                    self.rhs.get(col, p)
                } else {
                    self.rhs.get(p, col)
                };
                acc = acc.add(a.mul(b));
            }
            acc
        };
        sum.mul(self.scale)
    }

    /// Output columns `col..col + WIDTH` of `row`: `lhs(row, p)` is splat
    /// across lanes and multiplied into a lane load of `rhs(p, col..)`.
    ///
    /// # Safety
    /// `rhs` must not be transposed and `col + WIDTH` must not exceed the
    /// output width.
    #[inline]
    pub unsafe fn eval_vec(&self, row: usize, col: usize) -> T::Vector {
        let mut acc = <T::Vector as Lanes<T>>::splat(T::zero());
        for p in 0..self.k {
            let a = <T::Vector as Lanes<T>>::splat(self.lhs_at(row, p));
            let b = <T::Vector as Lanes<T>>::load(self.rhs.ptr_at(p, col));
            acc = acc.add(a.mul(b));
        }
        acc.mul(<T::Vector as Lanes<T>>::splat(self.scale))
    }

    #[inline]
    unsafe fn contiguous_sum(&self, a: *const T, b: *const T) -> T {
        let w = <T::Vector as Lanes<T>>::WIDTH;
        let full = self.k / w * w;
        let mut acc = <T::Vector as Lanes<T>>::splat(T::zero());
        let mut p = 0;
        while p < full {
            let va = <T::Vector as Lanes<T>>::load(a.add(p));
            let vb = <T::Vector as Lanes<T>>::load(b.add(p));
            acc = acc.add(va.mul(vb));
            p += w;
        }
        let mut sum = acc.sum();
        for p in full..self.k {
            sum = sum.add((*a.add(p)).mul(*b.add(p)));
        }
        sum
    }
}

pub(crate) enum Node<'e, T: Element> {
    Leaf(Leaf<'e, T>),
    Scalar(T),
    Unary(UnaryOp<T>, Box<Node<'e, T>>),
    Binary(BinaryOp, Box<Node<'e, T>>, Box<Node<'e, T>>),
    Ternary(TernaryOp, Box<Node<'e, T>>, Box<Node<'e, T>>, Box<Node<'e, T>>),
    Transpose(Box<Node<'e, T>>),
    Cast(Box<dyn CastEval<T> + 'e>),
    Gemm(GemmNode<'e, T>),
}

impl<'e, T: Element> Node<'e, T> {
    /// Lowers an element-wise expression. A matrix product is only valid
    /// at the root of an assignment and is rejected here.
    pub fn lower(e: &Expr<'e, T>) -> Result<Self> {
        Ok(match e {
            Expr::Tensor(t) => Node::Leaf(Leaf::new(t)),
            Expr::Scalar(v) => Node::Scalar(*v),
            Expr::Unary(op, a) => Node::Unary(*op, Box::new(Node::lower(a)?)),
            Expr::Binary(op, a, b) => {
                Node::Binary(*op, Box::new(Node::lower(a)?), Box::new(Node::lower(b)?))
            }
            Expr::Ternary(op, a, b, c) => Node::Ternary(
                *op,
                Box::new(Node::lower(a)?),
                Box::new(Node::lower(b)?),
                Box::new(Node::lower(c)?),
            ),
            Expr::Transpose(a) => Node::Transpose(Box::new(Node::lower(a)?)),
            Expr::Cast(c) => Node::Cast(c.lower()?),
            Expr::Dot(_) => return Err(TensorError::ComplexSubexpression),
        })
    }

    /// # Safety
    /// The coordinate must lie inside the shape of the lowered expression.
    #[inline]
    pub unsafe fn eval(&self, row: usize, col: usize) -> T {
        match self {
            Node::Leaf(l) => l.get(row, col),
            Node::Scalar(v) => *v,
            Node::Unary(op, a) => op.apply(a.eval(row, col)),
            Node::Binary(op, a, b) => op.apply(a.eval(row, col), b.eval(row, col)),
            Node::Ternary(op, a, b, c) => {
                op.apply(a.eval(row, col), b.eval(row, col), c.eval(row, col))
            }
            Node::Transpose(a) => a.eval(col, row),
            Node::Cast(c) => c.eval(row, col),
            Node::Gemm(g) => g.eval(row, col),
        }
    }
}

/// A lowered expression ready for evaluation.
pub struct Job<'e, T: Element> {
    root: Node<'e, T>,
    /// `None` when the expression is made of scalars only.
    shape: Option<Shape<2>>,
}

impl<'e, T: Element> Job<'e, T> {
    /// Lowers `e`, checking operand shapes.
    pub fn new(e: &Expr<'e, T>) -> Result<Self> {
        let shape = e.broadcast_shape()?;
        Ok(Job {
            root: Node::lower(e)?,
            shape,
        })
    }

    /// The implicit matrix-product job for a dot node.
    pub(crate) fn gemm(d: &DotExpr<'e, T>) -> Self {
        Job {
            root: Node::Gemm(GemmNode::new(d)),
            shape: Some(d.shape()),
        }
    }

    pub fn shape(&self) -> Shape<2> {
        self.shape.unwrap_or_else(Shape::zeros)
    }

    /// Value of the expression at `(row, col)`. Evaluation has no side
    /// effects, so repeated calls return the same value.
    pub fn eval(&self, row: usize, col: usize) -> Result<T> {
        if let Some(shape) = self.shape {
            check!(
                row < shape[0],
                TensorError::IndexOutOfBounds {
                    index: row,
                    dim: 0,
                    len: shape[0],
                }
            );
            check!(
                col < shape[1],
                TensorError::IndexOutOfBounds {
                    index: col,
                    dim: 1,
                    len: shape[1],
                }
            );
        }
        Ok(unsafe { self.root.eval(row, col) })
    }

    #[inline]
    pub(crate) unsafe fn eval_unchecked(&self, row: usize, col: usize) -> T {
        self.root.eval(row, col)
    }
}

/// Writes `saver(dst(r, c), job(r, c))` for every destination coordinate.
///
/// With `parallel`, rows are split across the rayon pool. The caller must
/// have checked the job's shape against `dst` and ruled out overlap between
/// `dst` and any operand read at another coordinate.
pub(crate) fn map_job<T: Element>(dst: DstView<T>, job: &Job<'_, T>, saver: Saver, parallel: bool) {
    let run_row = |row: usize| {
        for col in 0..dst.cols {
            // SAFETY: row/col are within dst, and within the job's shape
            // (equal to dst's unless the job broadcasts a scalar).
            unsafe {
                let p = dst.at(row, col);
                *p = saver.apply(*p, job.eval_unchecked(row, col));
            }
        }
    };
    if parallel {
        (0..dst.rows).into_par_iter().for_each(run_row);
    } else {
        (0..dst.rows).for_each(run_row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{dot_t, map, scalar, IntoExpr};
    use crate::shape::shape2;
    use crate::tensor::Tensor;

    fn matrix(rows: usize, cols: usize) -> Tensor<'static, f32, 2> {
        let data = (0..rows * cols).map(|v| v as f32).collect();
        Tensor::from_vec(shape2(rows, cols), data).unwrap()
    }

    #[test]
    fn test_eval_is_pure() {
        let a = matrix(3, 4);
        let e = map(|v: f32| v * 2.0, &a) + 1.0f32;
        let job = Job::new(&e).unwrap();
        let first: Vec<f32> = (0..4).map(|c| job.eval(1, c).unwrap()).collect();
        let second: Vec<f32> = (0..4).map(|c| job.eval(1, c).unwrap()).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![9.0, 11.0, 13.0, 15.0]);
    }

    #[test]
    fn test_eval_transpose_swaps() {
        let a = matrix(2, 3);
        let job = Job::new(&a.t()).unwrap();
        assert_eq!(job.shape(), shape2(3, 2));
        assert_eq!(job.eval(2, 1).unwrap(), a.get([1, 2]).unwrap());
    }

    #[test]
    fn test_eval_out_of_bounds() {
        let a = matrix(2, 3);
        let job = Job::new(&(&a).into_expr()).unwrap();
        assert!(matches!(
            job.eval(2, 0),
            Err(TensorError::IndexOutOfBounds { dim: 0, .. })
        ));
    }

    #[test]
    fn test_eval_empty_tensor_is_out_of_bounds() {
        let empty = Tensor::<f32, 2>::default();
        let job = Job::new(&(&empty + 1.0f32)).unwrap();
        assert_eq!(job.shape(), shape2(0, 0));
        assert!(matches!(
            job.eval(0, 0),
            Err(TensorError::IndexOutOfBounds { dim: 0, len: 0, .. })
        ));
        let broadcast = Job::new(&(scalar(2.0f32) * 3.0f32)).unwrap();
        assert_eq!(broadcast.eval(7, 9).unwrap(), 6.0);
    }

    #[test]
    fn test_dot_cannot_be_nested() {
        let a = matrix(2, 2);
        let e = dot_t(&a, false, &a, false).unwrap() + 1.0f32;
        assert!(matches!(Job::new(&e), Err(TensorError::ComplexSubexpression)));
    }

    fn transposed(t: &Tensor<'_, f32, 2>) -> Tensor<'static, f32, 2> {
        let (rows, cols) = (t.shape()[0], t.shape()[1]);
        let data = (0..rows * cols)
            .map(|i| t.get([i % rows, i / rows]).unwrap())
            .collect();
        Tensor::from_vec(shape2(cols, rows), data).unwrap()
    }

    #[test]
    fn test_gemm_node_all_layouts() {
        let a = matrix(3, 5);
        let b = matrix(5, 3);
        let (at, bt) = (transposed(&a), transposed(&b));
        for &(lt, rt) in &[(false, false), (false, true), (true, false), (true, true)] {
            let l = if lt { &at } else { &a };
            let r = if rt { &bt } else { &b };
            let d = match dot_t(l, lt, r, rt).unwrap() {
                Expr::Dot(d) => d,
                _ => unreachable!(),
            };
            let job = Job::gemm(&d);
            for i in 0..3 {
                for j in 0..3 {
                    let expected: f32 = (0..5)
                        .map(|p| a.get([i, p]).unwrap() * b.get([p, j]).unwrap())
                        .sum();
                    assert_eq!(job.eval(i, j).unwrap(), expected);
                }
            }
        }
    }

    #[test]
    fn test_map_job_serial_and_parallel_agree() {
        let a = matrix(16, 9);
        let e = &a * 3.0f32 - 1.0f32;
        let job = Job::new(&e).unwrap();
        let mut serial = Tensor::<f32, 2>::zeros(shape2(16, 9)).unwrap();
        let mut parallel = Tensor::<f32, 2>::zeros(shape2(16, 9)).unwrap();
        map_job(serial.dst_view().unwrap(), &job, Saver::SaveTo, false);
        map_job(parallel.dst_view().unwrap(), &job, Saver::SaveTo, true);
        assert_eq!(serial.to_vec(), parallel.to_vec());
        assert_eq!(serial.get([2, 1]).unwrap(), 56.0);
    }
}
