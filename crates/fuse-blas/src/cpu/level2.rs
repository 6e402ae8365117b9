use crate::backend::{check_matrix, check_vector, BlasScalar};
use crate::error::Result;

#[allow(clippy::too_many_arguments)]
pub(crate) fn gemv<T: BlasScalar>(
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
    check_matrix("gemv", "A", m, n, lda, a.len())?;
    let (x_len, y_len) = if trans { (m, n) } else { (n, m) };
    check_vector("gemv", "x", x_len, incx, x.len())?;
    check_vector("gemv", "y", y_len, incy, y.len())?;

    for i in 0..y_len {
        let mut sum = T::ZERO;
        for p in 0..x_len {
            let a_ip = if trans { a[p + i * lda] } else { a[i + p * lda] };
            sum = sum + a_ip * x[p * incx];
        }
        let dst = &mut y[i * incy];
        *dst = if beta == T::ZERO {
            alpha * sum
        } else {
            alpha * sum + beta * *dst
        };
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn ger<T: BlasScalar>(
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
    check_vector("ger", "x", m, incx, x.len())?;
    check_vector("ger", "y", n, incy, y.len())?;
    check_matrix("ger", "A", m, n, lda, a.len())?;

    for j in 0..n {
        let scaled = alpha * y[j * incy];
        for i in 0..m {
            let dst = &mut a[i + j * lda];
            *dst = *dst + x[i * incx] * scaled;
        }
    }
    Ok(())
}

pub(crate) fn dot<T: BlasScalar>(
    n: usize,
    x: &[T],
    incx: usize,
    y: &[T],
    incy: usize,
) -> Result<T> {
    check_vector("dot", "x", n, incx, x.len())?;
    check_vector("dot", "y", n, incy, y.len())?;
    let mut sum = T::ZERO;
    for i in 0..n {
        sum = sum + x[i * incx] * y[i * incy];
    }
    Ok(sum)
}
