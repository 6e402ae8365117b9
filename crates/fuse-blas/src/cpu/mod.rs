pub(crate) mod level2;
pub(crate) mod level3;

use crate::backend::{Blas, BlasBackend, BlasScalar};
use crate::error::Result;

/// Pure-Rust column-major BLAS backend.
///
/// Implements every routine with straightforward loops optimized for
/// correctness rather than peak performance. Intended as a reference
/// implementation and fallback.
#[derive(Debug, Clone, Default)]
pub struct CpuBlas {
    native_batch: bool,
}

impl CpuBlas {
    pub fn new() -> Self {
        CpuBlas {
            native_batch: false,
        }
    }

    /// Report `gemm_batch` as a native grouped call.
    ///
    /// The grouped call walks the per-batch views with the same kernel, so
    /// results match the looped path exactly.
    pub fn with_native_batch(mut self, enabled: bool) -> Self {
        self.native_batch = enabled;
        self
    }
}

impl<T: BlasScalar> Blas<T> for CpuBlas {
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
    ) -> Result<()> {
        level3::gemm(
            trans_a, trans_b, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc,
        )
    }

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
    ) -> Result<()> {
        level2::gemv(trans, m, n, alpha, a, lda, x, incx, beta, y, incy)
    }

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
    ) -> Result<()> {
        level2::ger(m, n, alpha, x, incx, y, incy, a, lda)
    }

    fn dot(&self, n: usize, x: &[T], incx: usize, y: &[T], incy: usize) -> Result<T> {
        level2::dot(n, x, incx, y, incy)
    }

    fn has_native_batch(&self) -> bool {
        self.native_batch
    }
}

impl BlasBackend for CpuBlas {
    fn name(&self) -> &str {
        "cpu"
    }

    fn as_f32(&self) -> &dyn Blas<f32> {
        self
    }

    fn as_f64(&self) -> &dyn Blas<f64> {
        self
    }
}
