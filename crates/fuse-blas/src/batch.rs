//! Batched level-2/level-3 helpers built on top of a [`Blas`] backend.
//!
//! All batch elements share one `m`/`n`/`k`. Operand `i` starts at
//! `i * stride` inside the contiguous batch buffer.

use crate::backend::Blas;
use crate::error::{BlasError, Result};

/// Splits a contiguous batch buffer into `count` views of `stride` elements.
///
/// The last view is truncated to the end of `src`, so a buffer only needs to
/// hold `(count - 1) * stride` plus the extent of one element.
pub fn batched_view<T>(src: &[T], count: usize, stride: usize) -> Result<Vec<&[T]>> {
    let mut views = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * stride;
        if start > src.len() {
            return Err(BlasError::InvalidArgument {
                routine: "batched_view",
                arg: "src",
                detail: format!(
                    "batch element {} starts at {} past buffer length {}",
                    i,
                    start,
                    src.len()
                ),
            });
        }
        let end = (start + stride).min(src.len());
        views.push(&src[start..end]);
    }
    Ok(views)
}

/// Mutable counterpart of [`batched_view`]; views never overlap.
pub fn batched_view_mut<T>(src: &mut [T], count: usize, stride: usize) -> Result<Vec<&mut [T]>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if stride == 0 || (count - 1) * stride > src.len() {
        return Err(BlasError::InvalidArgument {
            routine: "batched_view_mut",
            arg: "src",
            detail: format!(
                "{} batch elements of stride {} do not fit in {} elements",
                count,
                stride,
                src.len()
            ),
        });
    }
    Ok(src.chunks_mut(stride).take(count).collect())
}

/// Runs `count` gemms over contiguous batches.
///
/// Uses the backend's native grouped call when it has one and otherwise
/// issues one `gemm` per batch element. Both paths produce identical output.
#[allow(clippy::too_many_arguments)]
pub fn batched_gemm<T: Copy>(
    blas: &dyn Blas<T>,
    trans_a: bool,
    trans_b: bool,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    lda: usize,
    stride_a: usize,
    b: &[T],
    ldb: usize,
    stride_b: usize,
    beta: T,
    c: &mut [T],
    ldc: usize,
    stride_c: usize,
    count: usize,
) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    let a_views = batched_view(a, count, stride_a)?;
    let b_views = batched_view(b, count, stride_b)?;
    let mut c_views = batched_view_mut(c, count, stride_c)?;

    if blas.has_native_batch() {
        tracing::debug!(count, m, n, k, "batched gemm: native grouped call");
        return blas.gemm_batch(
            trans_a,
            trans_b,
            m,
            n,
            k,
            alpha,
            &a_views,
            lda,
            &b_views,
            ldb,
            beta,
            &mut c_views,
            ldc,
        );
    }

    tracing::debug!(count, m, n, k, "batched gemm: per-element loop");
    for ((a_i, b_i), c_i) in a_views.iter().zip(b_views.iter()).zip(c_views.iter_mut()) {
        blas.gemm(
            trans_a, trans_b, m, n, k, alpha, a_i, lda, b_i, ldb, beta, c_i, ldc,
        )?;
    }
    Ok(())
}

/// Runs `count` gemvs. `x` and `y` advance by the length of one operand each.
#[allow(clippy::too_many_arguments)]
pub fn batched_gemv<T: Copy>(
    blas: &dyn Blas<T>,
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
    count: usize,
) -> Result<()> {
    let (x_len, y_len) = if trans { (m, n) } else { (n, m) };
    let a_views = batched_view(a, count, lda * n)?;
    let x_views = batched_view(x, count, x_len * incx)?;
    let mut y_views = batched_view_mut(y, count, y_len * incy)?;
    for ((a_i, x_i), y_i) in a_views.iter().zip(x_views.iter()).zip(y_views.iter_mut()) {
        blas.gemv(trans, m, n, alpha, a_i, lda, x_i, incx, beta, y_i, incy)?;
    }
    Ok(())
}

/// Runs `count` rank-1 updates.
#[allow(clippy::too_many_arguments)]
pub fn batched_ger<T: Copy>(
    blas: &dyn Blas<T>,
    m: usize,
    n: usize,
    alpha: T,
    x: &[T],
    incx: usize,
    y: &[T],
    incy: usize,
    a: &mut [T],
    lda: usize,
    count: usize,
) -> Result<()> {
    let x_views = batched_view(x, count, m * incx)?;
    let y_views = batched_view(y, count, n * incy)?;
    let mut a_views = batched_view_mut(a, count, lda * n)?;
    for ((x_i, y_i), a_i) in x_views.iter().zip(y_views.iter()).zip(a_views.iter_mut()) {
        blas.ger(m, n, alpha, x_i, incx, y_i, incy, a_i, lda)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBlas;
    use crate::BlasBackend;

    #[test]
    fn test_batched_view() {
        let data = [0, 1, 2, 3, 4, 5];
        let views = batched_view(&data, 3, 2).unwrap();
        assert_eq!(views, vec![&[0, 1][..], &[2, 3][..], &[4, 5][..]]);
    }

    #[test]
    fn test_batched_view_past_end() {
        let data = [0, 1, 2];
        assert!(batched_view(&data, 3, 2).is_err());
    }

    fn run(native: bool) -> Vec<f32> {
        let backend = CpuBlas::new().with_native_batch(native);
        // two batches of 2x2 column-major matrices
        let a = vec![1.0, 3.0, 2.0, 4.0, 0.5, 0.0, 0.0, 0.5];
        let b = vec![5.0, 7.0, 6.0, 8.0, 2.0, 4.0, 6.0, 8.0];
        let mut c = vec![0.0f32; 8];
        batched_gemm(
            backend.as_f32(),
            false,
            false,
            2,
            2,
            2,
            1.0,
            &a,
            2,
            4,
            &b,
            2,
            4,
            0.0,
            &mut c,
            2,
            4,
            2,
        )
        .unwrap();
        c
    }

    #[test]
    fn test_batched_gemm_native_matches_loop() {
        let native = run(true);
        let looped = run(false);
        assert_eq!(native, looped);
        assert_eq!(&native[..4], &[19.0, 43.0, 22.0, 50.0]);
        assert_eq!(&native[4..], &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_batched_ger() {
        let backend = CpuBlas::new();
        let x = vec![1.0f64, 2.0];
        let y = vec![3.0f64, 4.0];
        let mut a = vec![0.0f64; 2];
        batched_ger(backend.as_f64(), 1, 1, 1.0, &x, 1, &y, 1, &mut a, 1, 2).unwrap();
        assert_eq!(a, vec![3.0, 8.0]);
    }

    #[test]
    fn test_batched_gemv() {
        let backend = CpuBlas::new();
        // two 1x2 matrices, x of length 2 each
        let a = vec![1.0f32, 2.0, 3.0, 4.0];
        let x = vec![1.0f32, 1.0, 2.0, 2.0];
        let mut y = vec![0.0f32; 2];
        batched_gemv(backend.as_f32(), false, 1, 2, 1.0, &a, 1, &x, 1, 0.0, &mut y, 1, 2).unwrap();
        assert_eq!(y, vec![3.0, 14.0]);
    }
}
