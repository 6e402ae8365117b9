//! gemm backed by `faer`.
//!
//! faer only sees operands whose leading dimension equals their row count.
//! Pitched operands and the level-2 routines go through the reference
//! kernels in [`crate::cpu`].

use faer::linalg::matmul::matmul;
use faer::mat::{MatMut, MatRef};
use faer::{Accum, Par};

use crate::backend::{check_matrix, Blas, BlasBackend};
use crate::cpu::{level2, level3};
use crate::error::Result;

fn faer_parallelism() -> Par {
    let par = faer::get_global_parallelism();
    if par.degree() == 1 {
        Par::Seq
    } else {
        par
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaerBlas;

impl FaerBlas {
    pub fn new() -> Self {
        Self
    }
}

macro_rules! impl_faer_blas {
    ($t:ty) => {
        impl Blas<$t> for FaerBlas {
            fn gemm(
                &self,
                trans_a: bool,
                trans_b: bool,
                m: usize,
                n: usize,
                k: usize,
                alpha: $t,
                a: &[$t],
                lda: usize,
                b: &[$t],
                ldb: usize,
                beta: $t,
                c: &mut [$t],
                ldc: usize,
            ) -> Result<()> {
                let (a_rows, a_cols) = if trans_a { (k, m) } else { (m, k) };
                let (b_rows, b_cols) = if trans_b { (n, k) } else { (k, n) };
                check_matrix("gemm", "A", a_rows, a_cols, lda, a.len())?;
                check_matrix("gemm", "B", b_rows, b_cols, ldb, b.len())?;
                check_matrix("gemm", "C", m, n, ldc, c.len())?;

                let tight = lda == a_rows && ldb == b_rows && ldc == m;
                if !tight || m == 0 || n == 0 || k == 0 {
                    return level3::gemm(
                        trans_a, trans_b, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc,
                    );
                }

                // A column-major r x c buffer is a row-major c x r buffer.
                let a_stored = MatRef::from_row_major_slice(&a[..a_rows * a_cols], a_cols, a_rows)
                    .transpose();
                let b_stored = MatRef::from_row_major_slice(&b[..b_rows * b_cols], b_cols, b_rows)
                    .transpose();
                let lhs = if trans_a { a_stored.transpose() } else { a_stored };
                let rhs = if trans_b { b_stored.transpose() } else { b_stored };

                let out = &mut c[..m * n];
                let accum = if beta == 0.0 {
                    Accum::Replace
                } else {
                    if beta != 1.0 {
                        for v in out.iter_mut() {
                            *v *= beta;
                        }
                    }
                    Accum::Add
                };
                let mut out_view = MatMut::from_column_major_slice_mut(out, m, n);
                matmul(&mut out_view, accum, lhs, rhs, alpha, faer_parallelism());
                Ok(())
            }

            fn gemv(
                &self,
                trans: bool,
                m: usize,
                n: usize,
                alpha: $t,
                a: &[$t],
                lda: usize,
                x: &[$t],
                incx: usize,
                beta: $t,
                y: &mut [$t],
                incy: usize,
            ) -> Result<()> {
                level2::gemv(trans, m, n, alpha, a, lda, x, incx, beta, y, incy)
            }

            fn ger(
                &self,
                m: usize,
                n: usize,
                alpha: $t,
                x: &[$t],
                incx: usize,
                y: &[$t],
                incy: usize,
                a: &mut [$t],
                lda: usize,
            ) -> Result<()> {
                level2::ger(m, n, alpha, x, incx, y, incy, a, lda)
            }

            fn dot(&self, n: usize, x: &[$t], incx: usize, y: &[$t], incy: usize) -> Result<$t> {
                level2::dot(n, x, incx, y, incy)
            }
        }
    };
}

impl_faer_blas!(f32);
impl_faer_blas!(f64);

impl BlasBackend for FaerBlas {
    fn name(&self) -> &str {
        "faer"
    }

    fn as_f32(&self) -> &dyn Blas<f32> {
        self
    }

    fn as_f64(&self) -> &dyn Blas<f64> {
        self
    }
}
