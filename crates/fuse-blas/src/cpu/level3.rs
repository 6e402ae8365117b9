use crate::backend::{check_matrix, BlasScalar};
use crate::error::Result;

#[inline]
fn at<T: Copy>(data: &[T], trans: bool, ld: usize, row: usize, col: usize) -> T {
    // op(X)(row, col) for a column-major X
    if trans {
        data[col + row * ld]
    } else {
        data[row + col * ld]
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn gemm<T: BlasScalar>(
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
    let (a_rows, a_cols) = if trans_a { (k, m) } else { (m, k) };
    let (b_rows, b_cols) = if trans_b { (n, k) } else { (k, n) };
    check_matrix("gemm", "A", a_rows, a_cols, lda, a.len())?;
    check_matrix("gemm", "B", b_rows, b_cols, ldb, b.len())?;
    check_matrix("gemm", "C", m, n, ldc, c.len())?;

    for j in 0..n {
        for i in 0..m {
            let mut sum = T::ZERO;
            for p in 0..k {
                sum = sum + at(a, trans_a, lda, i, p) * at(b, trans_b, ldb, p, j);
            }
            let dst = &mut c[i + j * ldc];
            *dst = if beta == T::ZERO {
                alpha * sum
            } else {
                alpha * sum + beta * *dst
            };
        }
    }
    Ok(())
}
