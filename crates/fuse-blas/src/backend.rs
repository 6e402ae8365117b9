use std::fmt::Debug;
use std::ops::{Add, Mul, Neg, Sub};

use crate::error::{BlasError, Result};

/// Scalar types a BLAS backend can operate on.
pub trait BlasScalar:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
{
    const ZERO: Self;
    const ONE: Self;
}

impl BlasScalar for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
}

impl BlasScalar for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
}

/// Column-major BLAS routines for one scalar type.
///
/// Every matrix argument is column-major with an explicit leading dimension,
/// following the CBLAS `CblasColMajor` convention. Callers holding row-major
/// data must swap operand order and transpose flags before crossing this
/// boundary.
#[allow(clippy::too_many_arguments)]
pub trait Blas<T: Copy>: Send + Sync + Debug {
    /// `C = alpha * op(A) * op(B) + beta * C` where `op(A)` is `m x k`,
    /// `op(B)` is `k x n` and `C` is `m x n`.
    ///
    /// When `beta` is zero the previous contents of `C` are not read.
    fn gemm(
        &self,
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
        alpha: T,
        a: &[T],
        lda: usize,
        b: &[T],
        ldb: usize,
        beta: T,
        c: &mut [T],
        ldc: usize,
    ) -> Result<()>;

    /// `y = alpha * op(A) * x + beta * y` with `A` stored as `m x n`.
    fn gemv(
        &self,
        trans: bool,
        m: usize,
        n: usize,
        alpha: T,
        a: &[T],
        lda: usize,
        x: &[T],
        incx: usize,
        beta: T,
        y: &mut [T],
        incy: usize,
    ) -> Result<()>;

    /// Rank-1 update `A += alpha * x * y^T` with `A` stored as `m x n`.
    fn ger(
        &self,
        m: usize,
        n: usize,
        alpha: T,
        x: &[T],
        incx: usize,
        y: &[T],
        incy: usize,
        a: &mut [T],
        lda: usize,
    ) -> Result<()>;

    /// Inner product of two strided vectors.
    fn dot(&self, n: usize, x: &[T], incx: usize, y: &[T], incy: usize) -> Result<T>;

    /// Whether `gemm_batch` is a single native call rather than a loop.
    fn has_native_batch(&self) -> bool {
        false
    }

    /// Grouped gemm over per-batch operand views sharing one `m`/`n`/`k`.
    ///
    /// The default issues one `gemm` per batch element.
    fn gemm_batch(
        &self,
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
        alpha: T,
        a: &[&[T]],
        lda: usize,
        b: &[&[T]],
        ldb: usize,
        beta: T,
        c: &mut [&mut [T]],
        ldc: usize,
    ) -> Result<()> {
        if a.len() != c.len() || b.len() != c.len() {
            return Err(BlasError::InvalidArgument {
                routine: "gemm_batch",
                arg: "batch",
                detail: format!(
                    "pointer arrays differ in length: a={}, b={}, c={}",
                    a.len(),
                    b.len(),
                    c.len()
                ),
            });
        }
        for ((a_i, b_i), c_i) in a.iter().zip(b.iter()).zip(c.iter_mut()) {
            self.gemm(
                trans_a, trans_b, m, n, k, alpha, a_i, lda, b_i, ldb, beta, c_i, ldc,
            )?;
        }
        Ok(())
    }
}

/// A BLAS backend covering both floating-point precisions.
///
/// The accessors exist so generic callers can reach the per-type routines
/// through a single trait object.
pub trait BlasBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu", "faer").
    fn name(&self) -> &str;

    fn as_f32(&self) -> &dyn Blas<f32>;

    fn as_f64(&self) -> &dyn Blas<f64>;
}

/// Validates that a column-major `rows x cols` matrix with leading dimension
/// `ld` fits in a buffer of `len` elements.
pub fn check_matrix(
    routine: &'static str,
    arg: &'static str,
    rows: usize,
    cols: usize,
    ld: usize,
    len: usize,
) -> Result<()> {
    if rows == 0 || cols == 0 {
        return Ok(());
    }
    if ld < rows {
        return Err(BlasError::InvalidArgument {
            routine,
            arg,
            detail: format!("leading dimension {} is smaller than rows {}", ld, rows),
        });
    }
    let needed = (cols - 1) * ld + rows;
    if len < needed {
        return Err(BlasError::InvalidArgument {
            routine,
            arg,
            detail: format!(
                "buffer holds {} elements but a {}x{} matrix with ld={} needs {}",
                len, rows, cols, ld, needed
            ),
        });
    }
    Ok(())
}

/// Validates that a strided vector of `n` elements fits in `len` elements.
pub fn check_vector(
    routine: &'static str,
    arg: &'static str,
    n: usize,
    inc: usize,
    len: usize,
) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    if inc == 0 {
        return Err(BlasError::InvalidArgument {
            routine,
            arg,
            detail: "increment must be positive".to_string(),
        });
    }
    let needed = (n - 1) * inc + 1;
    if len < needed {
        return Err(BlasError::InvalidArgument {
            routine,
            arg,
            detail: format!(
                "buffer holds {} elements but {} with inc={} needs {}",
                len, n, inc, needed
            ),
        });
    }
    Ok(())
}
