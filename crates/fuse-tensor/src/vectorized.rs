//! SIMD evaluation of element-wise expressions.
//!
//! Each output row is split into a run of full `Lanes` chunks followed by a
//! scalar tail. Expressions that cannot take this path fall back to the
//! scalar [`Job`](crate::job::Job) engine without error.

use std::fmt;
use std::marker::PhantomData;

use rayon::prelude::*;

use crate::element::{Element, Lanes};
use crate::error::{Result, TensorError};
use crate::expr::{DotExpr, Expr};
use crate::job::{ConstPtr, DstView, GemmNode};
use crate::ops::{BinaryOp, Saver, TernaryOp, UnaryOp};
use crate::shape::Shape;
use crate::storage::DEFAULT_ALIGN_BYTES;

/// Target vector architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VecArch {
    /// Scalar only.
    None,
    /// 128-bit vectors.
    #[default]
    Sse,
}

impl VecArch {
    pub fn enabled(&self) -> bool {
        !matches!(self, VecArch::None)
    }

    /// Required alignment of operand pointers and row pitches.
    pub fn align_bytes(&self) -> usize {
        match self {
            VecArch::None => 1,
            VecArch::Sse => DEFAULT_ALIGN_BYTES,
        }
    }
}

impl fmt::Display for VecArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VecArch::None => write!(f, "none"),
            VecArch::Sse => write!(f, "sse"),
        }
    }
}

/// Whether the element type, every op in `e` and the saver have lane-wise
/// forms.
pub fn vec_check<T: Element>(e: &Expr<'_, T>, saver: Saver) -> bool {
    T::HAS_VECTOR && saver.op_type().vectorizable::<T>() && tree_vectorizable(e)
}

fn tree_vectorizable<T: Element>(e: &Expr<'_, T>) -> bool {
    match e {
        Expr::Tensor(_) | Expr::Scalar(_) => true,
        Expr::Unary(op, a) => op.vectorizable() && tree_vectorizable(a),
        Expr::Binary(op, a, b) => {
            op.vectorizable::<T>() && tree_vectorizable(a) && tree_vectorizable(b)
        }
        Expr::Ternary(op, a, b, c) => {
            op.vectorizable() && tree_vectorizable(a) && tree_vectorizable(b) && tree_vectorizable(c)
        }
        Expr::Transpose(_) | Expr::Cast(_) | Expr::Dot(_) => false,
    }
}

fn aligned<T>(addr: usize, stride: usize, align: usize) -> bool {
    addr % align == 0 && (stride * std::mem::size_of::<T>()) % align == 0
}

/// Whether every tensor leaf and the destination start on an aligned
/// address and have an aligned row pitch.
pub(crate) fn vec_align_check<T: Element>(e: &Expr<'_, T>, dst: &DstView<T>, arch: VecArch) -> bool {
    let align = arch.align_bytes();
    aligned::<T>(dst.ptr.0 as usize, dst.stride, align) && leaves_aligned(e, align)
}

fn leaves_aligned<T: Element>(e: &Expr<'_, T>, align: usize) -> bool {
    match e {
        Expr::Tensor(t) => aligned::<T>(t.ptr as usize, t.stride, align),
        Expr::Scalar(_) => true,
        Expr::Unary(_, a) | Expr::Transpose(a) => leaves_aligned(a, align),
        Expr::Binary(_, a, b) => leaves_aligned(a, align) && leaves_aligned(b, align),
        Expr::Ternary(_, a, b, c) => {
            leaves_aligned(a, align) && leaves_aligned(b, align) && leaves_aligned(c, align)
        }
        Expr::Cast(_) | Expr::Dot(_) => false,
    }
}

enum VecNode<'e, T: Element> {
    Leaf {
        ptr: ConstPtr<T>,
        stride: usize,
        _marker: PhantomData<&'e T>,
    },
    Scalar(T),
    Unary(UnaryOp<T>, Box<VecNode<'e, T>>),
    Binary(BinaryOp, Box<VecNode<'e, T>>, Box<VecNode<'e, T>>),
    MulAdd(Box<VecNode<'e, T>>, Box<VecNode<'e, T>>, Box<VecNode<'e, T>>),
    Gemm(GemmNode<'e, T>),
}

impl<'e, T: Element> VecNode<'e, T> {
    fn lower(e: &Expr<'e, T>) -> Option<Self> {
        Some(match e {
            Expr::Tensor(t) => VecNode::Leaf {
                ptr: ConstPtr(t.ptr),
                stride: t.stride,
                _marker: PhantomData,
            },
            Expr::Scalar(v) => VecNode::Scalar(*v),
            Expr::Unary(op, a) if op.vectorizable() => {
                VecNode::Unary(*op, Box::new(VecNode::lower(a)?))
            }
            Expr::Binary(op, a, b) if op.vectorizable::<T>() => VecNode::Binary(
                *op,
                Box::new(VecNode::lower(a)?),
                Box::new(VecNode::lower(b)?),
            ),
            Expr::Ternary(TernaryOp::MulAdd, a, b, c) => VecNode::MulAdd(
                Box::new(VecNode::lower(a)?),
                Box::new(VecNode::lower(b)?),
                Box::new(VecNode::lower(c)?),
            ),
            _ => return None,
        })
    }

    #[inline]
    unsafe fn eval(&self, row: usize, col: usize) -> T {
        match self {
            VecNode::Leaf { ptr, stride, .. } => *ptr.0.add(row * stride + col),
            VecNode::Scalar(v) => *v,
            VecNode::Unary(op, a) => op.apply(a.eval(row, col)),
            VecNode::Binary(op, a, b) => op.apply(a.eval(row, col), b.eval(row, col)),
            VecNode::MulAdd(a, b, c) => {
                TernaryOp::MulAdd.apply(a.eval(row, col), b.eval(row, col), c.eval(row, col))
            }
            VecNode::Gemm(g) => g.eval(row, col),
        }
    }

    #[inline]
    unsafe fn eval_vec(&self, row: usize, col: usize) -> T::Vector {
        match self {
            VecNode::Leaf { ptr, stride, .. } => {
                <T::Vector as Lanes<T>>::load(ptr.0.add(row * stride + col))
            }
            VecNode::Scalar(v) => <T::Vector as Lanes<T>>::splat(*v),
            VecNode::Unary(op, a) => {
                let v = a.eval_vec(row, col);
                // lowering only admits ops with a lane-wise form
                op.apply_vec(v).unwrap_or(v)
            }
            VecNode::Binary(op, a, b) => {
                op.apply_vec::<T>(a.eval_vec(row, col), b.eval_vec(row, col))
            }
            VecNode::MulAdd(a, b, c) => a
                .eval_vec(row, col)
                .mul(b.eval_vec(row, col))
                .add(c.eval_vec(row, col)),
            VecNode::Gemm(g) => g.eval_vec(row, col),
        }
    }
}

/// A lowered vectorizable expression.
pub struct VecJob<'e, T: Element> {
    root: VecNode<'e, T>,
    shape: Option<Shape<2>>,
}

impl<'e, T: Element> VecJob<'e, T> {
    /// Returns `None` if some node has no lane-wise form.
    pub fn new(e: &Expr<'e, T>) -> Result<Option<Self>> {
        let shape = e.broadcast_shape()?;
        Ok(VecNode::lower(e).map(|root| VecJob { root, shape }))
    }

    /// The implicit matrix product in lanes across output columns, or
    /// `None` when `rhs` is transposed or `T` has no lanes.
    pub(crate) fn gemm(d: &DotExpr<'e, T>) -> Option<Self> {
        let node = GemmNode::new(d);
        (T::HAS_VECTOR && node.lanes_along_cols()).then(|| VecJob {
            root: VecNode::Gemm(node),
            shape: Some(d.shape()),
        })
    }

    pub fn shape(&self) -> Shape<2> {
        self.shape.unwrap_or_else(Shape::zeros)
    }

    fn check_coord(&self, row: usize, col: usize, width: usize) -> Result<()> {
        let Some(shape) = self.shape else {
            return Ok(());
        };
        check!(
            row < shape[0],
            TensorError::IndexOutOfBounds {
                index: row,
                dim: 0,
                len: shape[0],
            }
        );
        check!(
            col + width <= shape[1],
            TensorError::IndexOutOfBounds {
                index: col + width - 1,
                dim: 1,
                len: shape[1],
            }
        );
        Ok(())
    }

    /// Scalar value at `(row, col)`.
    pub fn eval(&self, row: usize, col: usize) -> Result<T> {
        self.check_coord(row, col, 1)?;
        Ok(unsafe { self.root.eval(row, col) })
    }

    /// `WIDTH` consecutive values starting at `(row, col)`.
    pub fn eval_vec(&self, row: usize, col: usize) -> Result<T::Vector> {
        self.check_coord(row, col, <T::Vector as Lanes<T>>::WIDTH)?;
        Ok(unsafe { self.root.eval_vec(row, col) })
    }
}

/// Vectorized counterpart of [`map_job`](crate::job::map_job).
pub(crate) fn map_vec_job<T: Element>(
    dst: DstView<T>,
    job: &VecJob<'_, T>,
    saver: Saver,
    parallel: bool,
) {
    let width = <T::Vector as Lanes<T>>::WIDTH;
    let full = dst.cols / width * width;
    let op = saver.op_type();
    let run_row = |row: usize| {
        // SAFETY: every coordinate visited is inside dst and inside the
        // job's shape; chunks end at `full <= cols`.
        unsafe {
            let mut col = 0;
            while col < full {
                let p = dst.at(row, col);
                let cur = <T::Vector as Lanes<T>>::load(p);
                let v = job.root.eval_vec(row, col);
                op.apply_vec::<T>(cur, v).store(p);
                col += width;
            }
            for col in full..dst.cols {
                let p = dst.at(row, col);
                *p = op.apply(*p, job.root.eval(row, col));
            }
        }
    };
    if parallel {
        (0..dst.rows).into_par_iter().for_each(run_row);
    } else {
        (0..dst.rows).for_each(run_row);
    }
}
