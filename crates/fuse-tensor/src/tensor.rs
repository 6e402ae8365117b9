use std::fmt;
use std::marker::PhantomData;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};
use std::rc::Rc;
use std::sync::Arc;

use crate::assign;
use crate::check::OrAbort;
use crate::config::{self, EngineConfig};
use crate::dtype::DType;
use crate::element::Element;
use crate::error::{Result, TensorError};
use crate::expr::{Expr, IntoExpr, TensorRef};
use crate::job::{DstView, SyncPtr};
use crate::ops::Saver;
use crate::shape::Shape;
use crate::storage::AlignedBuffer;
use crate::stream::{Cpu, Device, Stream};

/// A strided, rank-`N` view of elements on device `D`.
///
/// Rows of the last dimension are `stride` elements apart; all leading
/// dimensions are packed. A tensor either owns a shared aligned allocation
/// or borrows memory for `'a`. Views alias the same memory and never copy
/// it.
///
/// Handles are neither `Send` nor `Sync`. The engine never hands out
/// references into tensor memory, so aliased handles can coexist.
pub struct Tensor<'a, T: Element, const N: usize, D: Device = Cpu> {
    ptr: *mut T,
    shape: Shape<N>,
    stride: usize,
    stream: Option<Arc<Stream<D>>>,
    owner: Option<Rc<AlignedBuffer<T>>>,
    _marker: PhantomData<&'a mut T>,
}

impl<T: Element, const N: usize> Tensor<'static, T, N, Cpu> {
    /// Allocate zero-initialised storage for `shape`.
    ///
    /// With `pad`, the row pitch is rounded up so every row starts on a
    /// 16-byte boundary.
    pub fn allocate(shape: Shape<N>, pad: bool, stream: Option<Arc<Stream<Cpu>>>) -> Result<Self> {
        let flat = shape.flatten_2d();
        let (buf, stride) = AlignedBuffer::pitched(flat[1], flat[0], pad)?;
        tracing::debug!(
            dtype = %T::DTYPE,
            shape = %shape,
            stride,
            bytes = buf.len() * T::DTYPE.size_in_bytes(),
            "tensor allocated"
        );
        Ok(Tensor {
            ptr: buf.as_mut_ptr(),
            shape,
            stride,
            stream,
            owner: Some(Rc::new(buf)),
            _marker: PhantomData,
        })
    }

    pub fn zeros(shape: Shape<N>) -> Result<Self> {
        Self::allocate(shape, false, None)
    }

    pub fn full(shape: Shape<N>, value: T) -> Result<Self> {
        let mut t = Self::zeros(shape)?;
        t.fill_raw(value);
        Ok(t)
    }

    /// Take row-major `data` laid out as `shape`.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if `data.len() != shape.size()`.
    pub fn from_vec(shape: Shape<N>, data: Vec<T>) -> Result<Self> {
        check!(
            data.len() == shape.size(),
            TensorError::ShapeMismatch {
                expected: vec![shape.size()],
                got: vec![data.len()],
            }
        );
        let t = Self::zeros(shape)?;
        if !data.is_empty() {
            // SAFETY: a fresh contiguous allocation of exactly `data.len()`.
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), t.ptr, data.len()) };
        }
        Ok(t)
    }
}

impl<'a, T: Element, const N: usize> Tensor<'a, T, N, Cpu> {
    /// Wrap a caller-owned, densely packed buffer.
    pub fn from_slice_mut(data: &'a mut [T], shape: Shape<N>) -> Result<Self> {
        let stride = shape.contiguous_stride();
        Self::from_slice_mut_strided(data, shape, stride)
    }

    /// Wrap a caller-owned buffer whose rows are `stride` elements apart.
    pub fn from_slice_mut_strided(data: &'a mut [T], shape: Shape<N>, stride: usize) -> Result<Self> {
        let flat = shape.flatten_2d();
        check!(
            stride >= flat[1],
            TensorError::ShapeMismatch {
                expected: vec![flat[1]],
                got: vec![stride],
            }
        );
        let needed = if flat[0] == 0 || flat[1] == 0 {
            0
        } else {
            (flat[0] - 1) * stride + flat[1]
        };
        check!(
            data.len() >= needed,
            TensorError::ShapeMismatch {
                expected: vec![needed],
                got: vec![data.len()],
            }
        );
        // SAFETY: the slice covers every addressed element and stays
        // mutably borrowed for 'a.
        Ok(unsafe { Tensor::from_raw_parts(data.as_mut_ptr(), shape, stride, None) })
    }
}

impl<'a, T: Element, const N: usize, D: Device> Tensor<'a, T, N, D> {
    /// Wrap memory the tensor does not own.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of every element addressed
    /// by `shape` and `stride` for `'a`, or null with an empty shape.
    pub unsafe fn from_raw_parts(
        ptr: *mut T,
        shape: Shape<N>,
        stride: usize,
        stream: Option<Arc<Stream<D>>>,
    ) -> Self {
        Tensor {
            ptr,
            shape,
            stride,
            stream,
            owner: None,
            _marker: PhantomData,
        }
    }

    pub fn shape(&self) -> &Shape<N> {
        &self.shape
    }

    /// Row pitch of the last dimension, in elements.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn size(&self) -> usize {
        self.shape.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn is_contiguous(&self) -> bool {
        self.stride == self.shape.contiguous_stride()
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    pub fn stream(&self) -> Option<&Arc<Stream<D>>> {
        self.stream.as_ref()
    }

    pub fn set_stream(&mut self, stream: Option<Arc<Stream<D>>>) {
        self.stream = stream;
    }

    /// Whether this handle shares an engine-owned allocation.
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    pub(crate) fn leaf(&self) -> TensorRef<'_, T> {
        let flat = self.shape.flatten_2d();
        TensorRef::new(self.ptr, flat[0], flat[1], self.stride, N)
    }

    pub(crate) fn dst_view(&mut self) -> Result<DstView<T>> {
        check!(!self.ptr.is_null() || self.is_empty(), TensorError::NullData);
        let flat = self.shape.flatten_2d();
        Ok(DstView {
            ptr: SyncPtr(self.ptr),
            rows: flat[0],
            cols: flat[1],
            stride: self.stride,
        })
    }

    fn derive<const M: usize>(&self, offset: usize, shape: Shape<M>, stride: usize) -> Tensor<'a, T, M, D> {
        Tensor {
            ptr: self.ptr.wrapping_add(offset),
            shape,
            stride,
            stream: self.stream.clone(),
            owner: self.owner.clone(),
            _marker: PhantomData,
        }
    }

    /// Another handle to the same memory.
    pub fn view(&self) -> Tensor<'a, T, N, D> {
        self.derive(0, self.shape, self.stride)
    }

    /// Rows `[start, end)` of the leading dimension.
    pub fn slice(&self, start: usize, end: usize) -> Result<Tensor<'a, T, N, D>> {
        let len = self.shape[0];
        check!(
            start <= end && end <= len,
            TensorError::IndexOutOfBounds {
                index: end,
                dim: 0,
                len,
            }
        );
        let mut shape = self.shape;
        shape[0] = end - start;
        let offset = if N == 1 {
            start
        } else {
            start * self.shape.sub_size(1, N - 1) * self.stride
        };
        Ok(self.derive(offset, shape, self.stride))
    }

    /// All leading dimensions folded into rows.
    pub fn flatten_2d(&self) -> Tensor<'a, T, 2, D> {
        self.derive(0, self.shape.flatten_2d(), self.stride)
    }

    /// # Errors
    /// Returns `NotContiguous` if rows are padded.
    pub fn flatten_1d(&self) -> Result<Tensor<'a, T, 1, D>> {
        let cols = self.shape.contiguous_stride();
        check!(
            self.is_contiguous() || self.shape.sub_size(0, N.saturating_sub(1)) <= 1,
            TensorError::NotContiguous {
                stride: self.stride,
                cols,
            }
        );
        let size = self.size();
        Ok(self.derive(0, self.shape.flatten_1d(), size))
    }

    /// Lazy transpose of the 2-D form.
    pub fn t(&self) -> Expr<'_, T> {
        Expr::Tensor(self.leaf()).t()
    }

    fn offset_of(&self, idx: [usize; N]) -> Result<usize> {
        let mut row = 0;
        for (dim, (&i, &len)) in idx.iter().zip(self.shape.dims()).enumerate() {
            check!(i < len, TensorError::IndexOutOfBounds { index: i, dim, len });
            if dim + 1 < N {
                row = row * len + i;
            }
        }
        Ok(row * self.stride + idx[N - 1])
    }

    pub fn get(&self, idx: [usize; N]) -> Result<T> {
        let offset = self.offset_of(idx)?;
        check!(!self.ptr.is_null(), TensorError::NullData);
        // SAFETY: in bounds per the checks above.
        Ok(unsafe { *self.ptr.add(offset) })
    }

    pub fn set(&mut self, idx: [usize; N], value: T) -> Result<()> {
        let offset = self.offset_of(idx)?;
        check!(!self.ptr.is_null(), TensorError::NullData);
        unsafe { *self.ptr.add(offset) = value };
        Ok(())
    }

    /// Copy the elements out in row-major order, skipping row padding.
    pub fn to_vec(&self) -> Vec<T> {
        let flat = self.shape.flatten_2d();
        let mut out = Vec::with_capacity(self.size());
        if self.ptr.is_null() {
            return out;
        }
        for r in 0..flat[0] {
            for c in 0..flat[1] {
                // SAFETY: every (r, c) is inside the addressed region.
                out.push(unsafe { *self.ptr.add(r * self.stride + c) });
            }
        }
        out
    }

    fn fill_raw(&mut self, value: T) {
        let flat = self.shape.flatten_2d();
        if self.ptr.is_null() {
            return;
        }
        for r in 0..flat[0] {
            for c in 0..flat[1] {
                unsafe { *self.ptr.add(r * self.stride + c) = value };
            }
        }
    }

    /// `self = e`, using the process-wide engine configuration.
    pub fn assign<'e>(&mut self, e: impl IntoExpr<'e, T>) -> Result<()> {
        self.assign_with(&config::current(), e)
    }

    pub fn assign_with<'e>(&mut self, cfg: &EngineConfig, e: impl IntoExpr<'e, T>) -> Result<()> {
        assign::execute(cfg, self, &e.into_expr(), Saver::SaveTo)
    }

    pub fn fill(&mut self, value: T) -> Result<()> {
        self.assign(Expr::Scalar(value))
    }

    pub fn add_assign_expr<'e>(&mut self, e: impl IntoExpr<'e, T>) -> Result<()> {
        self.add_assign_expr_with(&config::current(), e)
    }

    pub fn add_assign_expr_with<'e>(&mut self, cfg: &EngineConfig, e: impl IntoExpr<'e, T>) -> Result<()> {
        assign::execute(cfg, self, &e.into_expr(), Saver::PlusTo)
    }

    pub fn sub_assign_expr<'e>(&mut self, e: impl IntoExpr<'e, T>) -> Result<()> {
        self.sub_assign_expr_with(&config::current(), e)
    }

    pub fn sub_assign_expr_with<'e>(&mut self, cfg: &EngineConfig, e: impl IntoExpr<'e, T>) -> Result<()> {
        assign::execute(cfg, self, &e.into_expr(), Saver::MinusTo)
    }

    pub fn mul_assign_expr<'e>(&mut self, e: impl IntoExpr<'e, T>) -> Result<()> {
        self.mul_assign_expr_with(&config::current(), e)
    }

    pub fn mul_assign_expr_with<'e>(&mut self, cfg: &EngineConfig, e: impl IntoExpr<'e, T>) -> Result<()> {
        assign::execute(cfg, self, &e.into_expr(), Saver::MulTo)
    }

    pub fn div_assign_expr<'e>(&mut self, e: impl IntoExpr<'e, T>) -> Result<()> {
        self.div_assign_expr_with(&config::current(), e)
    }

    pub fn div_assign_expr_with<'e>(&mut self, cfg: &EngineConfig, e: impl IntoExpr<'e, T>) -> Result<()> {
        assign::execute(cfg, self, &e.into_expr(), Saver::DivTo)
    }
}

macro_rules! impl_index {
    ($($n:literal => $m:literal),*) => {
        $(
            impl<'a, T: Element, D: Device> Tensor<'a, T, $n, D> {
                /// Sub-tensor `i` of the leading dimension.
                pub fn index(&self, i: usize) -> Result<Tensor<'a, T, $m, D>> {
                    let len = self.shape[0];
                    check!(i < len, TensorError::IndexOutOfBounds { index: i, dim: 0, len });
                    let sub: Shape<$m> = self.shape.slice::<$m>(1);
                    let rows = sub.flatten_2d()[0];
                    Ok(self.derive(i * rows * self.stride, sub, self.stride))
                }
            }
        )*
    };
}

impl_index!(2 => 1, 3 => 2, 4 => 3, 5 => 4);

impl<T: Element, const N: usize, D: Device> Default for Tensor<'_, T, N, D> {
    fn default() -> Self {
        Tensor {
            ptr: std::ptr::null_mut(),
            shape: Shape::zeros(),
            stride: 0,
            stream: None,
            owner: None,
            _marker: PhantomData,
        }
    }
}

impl<'e, 'a, T: Element, const N: usize, D: Device> From<&'e Tensor<'a, T, N, D>> for Expr<'e, T> {
    fn from(t: &'e Tensor<'a, T, N, D>) -> Self {
        Expr::Tensor(t.leaf())
    }
}

macro_rules! impl_assign_operator {
    ($trait:ident, $method:ident, $via:ident) => {
        impl<'e, T: Element, const N: usize, D: Device, E: IntoExpr<'e, T>> $trait<E>
            for Tensor<'_, T, N, D>
        {
            fn $method(&mut self, rhs: E) {
                self.$via(rhs).or_abort()
            }
        }
    };
}

impl_assign_operator!(AddAssign, add_assign, add_assign_expr);
impl_assign_operator!(SubAssign, sub_assign, sub_assign_expr);
impl_assign_operator!(MulAssign, mul_assign, mul_assign_expr);
impl_assign_operator!(DivAssign, div_assign, div_assign_expr);

impl<T: Element, const N: usize, D: Device> fmt::Debug for Tensor<'_, T, N, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("dtype", &T::DTYPE)
            .field("device", &D::KIND)
            .field("shape", &self.shape)
            .field("stride", &self.stride)
            .field("owned", &self.is_owned())
            .finish()
    }
}

impl<T: Element, const N: usize, D: Device> fmt::Display for Tensor<'_, T, N, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max = config::current().max_show.max(1);
        writeln!(f, "Tensor<{}, {}> {}", T::DTYPE, D::KIND, self.shape)?;
        if self.ptr.is_null() || self.is_empty() {
            return write!(f, "[]");
        }
        let flat = self.shape.flatten_2d();
        write!(f, "[")?;
        for r in 0..flat[0].min(max) {
            if r > 0 {
                write!(f, ",\n ")?;
            }
            write!(f, "[")?;
            for c in 0..flat[1].min(max) {
                if c > 0 {
                    write!(f, ", ")?;
                }
                // SAFETY: r and c lie inside the addressed region.
                write!(f, "{}", unsafe { *self.ptr.add(r * self.stride + c) })?;
            }
            if flat[1] > max {
                write!(f, ", ...")?;
            }
            write!(f, "]")?;
        }
        if flat[0] > max {
            write!(f, ",\n ...")?;
        }
        write!(f, "]")
    }
}
