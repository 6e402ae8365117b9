//! Matrix product dispatch.
//!
//! A dot expression at the root of an assignment is routed by operand
//! ranks, transpose flags and backend availability to either the implicit
//! job kernel or a column-major BLAS call. Row-major `C = A . B` is issued
//! as column-major `C^T = B^T . A^T`, so operands and flags swap places.

use fuse_blas::Blas;

use crate::config::EngineConfig;
use crate::element::Element;
use crate::error::{Result, TensorError};
use crate::expr::DotExpr;
use crate::job::{map_job, DstView, Job};
use crate::ops::Saver;
use crate::stream::Device;
use crate::tensor::Tensor;
use crate::vectorized::{map_vec_job, VecJob};

/// Everything strategy selection looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DotPlan {
    pub out_rank: usize,
    pub lhs_rank: usize,
    pub rhs_rank: usize,
    pub lhs_t: bool,
    pub rhs_t: bool,
    pub unit_scale: bool,
    /// The saver overwrites the destination.
    pub beta_zero: bool,
    /// A BLAS backend is configured and supports the element type.
    pub has_backend: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DotStrategy {
    /// The job engine's gemm node.
    Implicit,
    Gemm,
    Gemv,
    Ger,
    /// Outer product reshaped to `(1, M)^T . (1, N)`.
    OuterAsGemm,
}

pub fn select_strategy(plan: &DotPlan) -> Result<DotStrategy> {
    let ranks = (plan.out_rank, plan.lhs_rank, plan.rhs_rank);
    match ranks {
        (2, 2, 2) => {
            if !plan.has_backend && plan.unit_scale && !(plan.lhs_t && plan.rhs_t) {
                Ok(DotStrategy::Implicit)
            } else if plan.has_backend {
                Ok(DotStrategy::Gemm)
            } else {
                Err(TensorError::BackendUnavailable(
                    "matrix product with both operands transposed or a non-unit scale".into(),
                ))
            }
        }
        (1, 1, 2) => {
            if plan.lhs_t {
                return Err(TensorError::UnsupportedDot(
                    "vector-matrix product with a transposed vector".into(),
                ));
            }
            if plan.has_backend {
                Ok(DotStrategy::Gemv)
            } else {
                Err(TensorError::BackendUnavailable("vector-matrix product".into()))
            }
        }
        (2, 1, 1) => {
            if !plan.lhs_t || plan.rhs_t {
                return Err(TensorError::UnsupportedDot(
                    "outer product must be x^T . y".into(),
                ));
            }
            if plan.beta_zero && plan.has_backend {
                Ok(DotStrategy::Ger)
            } else {
                Ok(DotStrategy::OuterAsGemm)
            }
        }
        (o, l, r) => Err(TensorError::UnsupportedDot(format!(
            "ranks {} = {} . {}",
            o, l, r
        ))),
    }
}

/// # Safety
/// `dst` must describe writable memory with no live references into it.
unsafe fn dst_slice<'d, T>(dst: &DstView<T>) -> &'d mut [T]
where
    T: Element,
{
    let extent = dst.extent();
    if extent == 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(dst.ptr.0, extent)
    }
}

fn blas_for<'c, T: Element>(cfg: &'c EngineConfig) -> Option<&'c dyn Blas<T>> {
    cfg.blas.as_deref().and_then(|b| T::blas(b))
}

/// Evaluates `dst <saver> d`. `out_rank` is the destination's rank.
pub(crate) fn dot_assign<T: Element>(
    cfg: &EngineConfig,
    dst: DstView<T>,
    out_rank: usize,
    d: &DotExpr<'_, T>,
    saver: Saver,
) -> Result<()> {
    let shape = d.shape();
    check!(
        shape == dst.shape(),
        TensorError::ShapeMismatch {
            expected: dst.shape().dims().to_vec(),
            got: shape.dims().to_vec(),
        }
    );
    let span = dst.span();
    check!(!span.overlaps(&d.lhs.span()), TensorError::AliasedOperands("lhs"));
    check!(!span.overlaps(&d.rhs.span()), TensorError::AliasedOperands("rhs"));

    let blas = blas_for::<T>(cfg);
    let plan = DotPlan {
        out_rank,
        lhs_rank: d.lhs.rank,
        rhs_rank: d.rhs.rank,
        lhs_t: d.lhs_t,
        rhs_t: d.rhs_t,
        unit_scale: d.scale == T::one(),
        beta_zero: saver == Saver::SaveTo,
        has_backend: blas.is_some(),
    };
    let strategy = match select_strategy(&plan) {
        Err(TensorError::BackendUnavailable(_)) if cfg.blas.is_some() => {
            Err(TensorError::UnsupportedDType(format!("{} on the blas path", T::DTYPE)))
        }
        other => other,
    }
    .map_err(|e| crate::check::fatal("select_strategy", e))?;

    let (m, k) = d.lhs_dims();
    let n = d.rhs_dims().1;
    tracing::debug!(?strategy, m, n, k, saver = saver.name(), "dot dispatch");

    match (strategy, blas) {
        (DotStrategy::Implicit, _) => {
            implicit(cfg, dst, d, saver, cfg.parallel_for(m * n));
            Ok(())
        }
        (DotStrategy::Gemm, Some(blas)) => gemm(blas, dst, d, saver),
        (DotStrategy::Gemv, Some(blas)) => gemv(blas, dst, d, saver),
        (DotStrategy::Ger, Some(blas)) => ger(blas, dst, d),
        (DotStrategy::OuterAsGemm, _) => {
            let flat = DotExpr::new(d.lhs.with_rank(2), d.rhs.with_rank(2), true, false, d.scale)?;
            dot_assign(cfg, dst, 2, &flat, saver)
        }
        (strategy, None) => Err(TensorError::BackendUnavailable(format!("{:?}", strategy))),
    }
}

/// Runs the gemm node in lanes across output columns when `rhs` is
/// untransposed, and through the scalar job otherwise. The scalar job sums
/// along k in lanes when both operands are contiguous in k.
fn implicit<T: Element>(
    cfg: &EngineConfig,
    dst: DstView<T>,
    d: &DotExpr<'_, T>,
    saver: Saver,
    parallel: bool,
) {
    let lanes = cfg.vectorize && cfg.vec_arch.enabled() && saver.op_type().vectorizable::<T>();
    match VecJob::gemm(d).filter(|_| lanes) {
        Some(job) => {
            tracing::debug!(parallel, "implicit gemm in lanes");
            map_vec_job(dst, &job, saver, parallel);
        }
        None => map_job(dst, &Job::gemm(d), saver, parallel),
    }
}

fn gemm<T: Element>(blas: &dyn Blas<T>, dst: DstView<T>, d: &DotExpr<'_, T>, saver: Saver) -> Result<()> {
    let (alpha, beta) = saver.blas_factors(d.scale)?;
    let (r0, r1) = (d.rhs.rows, d.rhs.cols);
    let (l0, l1) = (d.lhs.rows, d.lhs.cols);
    let m = if d.rhs_t { r0 } else { r1 };
    let n = if d.lhs_t { l1 } else { l0 };
    let k = if d.rhs_t { r1 } else { r0 };
    // SAFETY: operands were checked not to overlap dst, and the engine has
    // exclusive access to dst for the assignment.
    let (a, b, c) = unsafe { (d.rhs.as_slice(), d.lhs.as_slice(), dst_slice(&dst)) };
    blas.gemm(
        d.rhs_t, d.lhs_t, m, n, k, alpha, a, d.rhs.stride, b, d.lhs.stride, beta, c, dst.stride,
    )?;
    Ok(())
}

fn gemv<T: Element>(blas: &dyn Blas<T>, dst: DstView<T>, d: &DotExpr<'_, T>, saver: Saver) -> Result<()> {
    let (alpha, beta) = saver.blas_factors(d.scale)?;
    let (r0, r1) = (d.rhs.rows, d.rhs.cols);
    let (a, x, y) = unsafe { (d.rhs.as_slice(), d.lhs.as_slice(), dst_slice(&dst)) };
    blas.gemv(d.rhs_t, r1, r0, alpha, a, d.rhs.stride, x, 1, beta, y, 1)?;
    Ok(())
}

fn ger<T: Element>(blas: &dyn Blas<T>, dst: DstView<T>, d: &DotExpr<'_, T>) -> Result<()> {
    let (m, n) = (d.lhs.cols, d.rhs.cols);
    let (x, y, a) = unsafe { (d.lhs.as_slice(), d.rhs.as_slice(), dst_slice(&dst)) };
    for row in 0..dst.rows {
        a[row * dst.stride..row * dst.stride + dst.cols].fill(T::zero());
    }
    blas.ger(n, m, d.scale, y, 1, x, 1, a, dst.stride)?;
    Ok(())
}

/// `dst[i] <saver> scale * op(lhs[i]) . op(rhs[i])` for every batch index.
///
/// With a backend all products go through one batched gemm; otherwise
/// each batch element is dispatched on its own.
#[allow(clippy::too_many_arguments)]
pub fn batched_dot_with<T: Element, D: Device>(
    cfg: &EngineConfig,
    dst: &mut Tensor<'_, T, 3, D>,
    lhs: &Tensor<'_, T, 3, D>,
    rhs: &Tensor<'_, T, 3, D>,
    lhs_t: bool,
    rhs_t: bool,
    scale: T,
    saver: Saver,
) -> Result<()> {
    let count = dst.shape()[0];
    for t in [lhs, rhs] {
        check!(
            t.shape()[0] == count,
            TensorError::ShapeMismatch {
                expected: vec![count],
                got: vec![t.shape()[0]],
            }
        );
    }
    if count == 0 {
        return Ok(());
    }
    let (lhs0, rhs0, dst0) = (lhs.index(0)?, rhs.index(0)?, dst.index(0)?);
    let d = DotExpr::new(lhs0.leaf(), rhs0.leaf(), lhs_t, rhs_t, scale)?;
    let shape = d.shape();
    check!(
        shape == *dst0.shape(),
        TensorError::ShapeMismatch {
            expected: dst0.shape().dims().to_vec(),
            got: shape.dims().to_vec(),
        }
    );

    let out = dst.dst_view()?;
    let (l, r) = (lhs.leaf(), rhs.leaf());
    let span = out.span();
    check!(!span.overlaps(&l.span()), TensorError::AliasedOperands("lhs"));
    check!(!span.overlaps(&r.span()), TensorError::AliasedOperands("rhs"));

    let Some(blas) = blas_for::<T>(cfg) else {
        tracing::debug!(count, "batched dot: per-element dispatch");
        for i in 0..count {
            let (li, ri, mut di) = (lhs.index(i)?, rhs.index(i)?, dst.index(i)?);
            let d = DotExpr::new(li.leaf(), ri.leaf(), lhs_t, rhs_t, scale)?;
            dot_assign(cfg, di.dst_view()?, 2, &d, saver)?;
        }
        return Ok(());
    };

    let (alpha, beta) = saver.blas_factors(scale)?;
    let (r0, r1) = (d.rhs.rows, d.rhs.cols);
    let (l0, l1) = (d.lhs.rows, d.lhs.cols);
    let m = if rhs_t { r0 } else { r1 };
    let n = if lhs_t { l1 } else { l0 };
    let k = if rhs_t { r1 } else { r0 };
    let (a, b, c) = unsafe { (r.as_slice(), l.as_slice(), dst_slice(&out)) };
    fuse_blas::batched_gemm(
        blas,
        rhs_t,
        lhs_t,
        m,
        n,
        k,
        alpha,
        a,
        r.stride,
        r0 * r.stride,
        b,
        l.stride,
        l0 * l.stride,
        beta,
        c,
        out.stride,
        shape[0] * out.stride,
        count,
    )?;
    Ok(())
}

pub fn batched_dot<T: Element, D: Device>(
    dst: &mut Tensor<'_, T, 3, D>,
    lhs: &Tensor<'_, T, 3, D>,
    rhs: &Tensor<'_, T, 3, D>,
    lhs_t: bool,
    rhs_t: bool,
    scale: T,
) -> Result<()> {
    batched_dot_with(
        &crate::config::current(),
        dst,
        lhs,
        rhs,
        lhs_t,
        rhs_t,
        scale,
        Saver::SaveTo,
    )
}

/// Inner product of two vectors.
pub fn inner_with<T: Element, D: Device>(
    cfg: &EngineConfig,
    x: &Tensor<'_, T, 1, D>,
    y: &Tensor<'_, T, 1, D>,
) -> Result<T> {
    let d = DotExpr::new(x.leaf(), y.leaf(), false, true, T::one())?;
    let n = x.shape()[0];
    if let Some(blas) = blas_for::<T>(cfg) {
        let (xs, ys) = unsafe { (d.lhs.as_slice(), d.rhs.as_slice()) };
        return Ok(blas.dot(n, xs, 1, ys, 1)?);
    }
    if n == 0 {
        return Ok(T::zero());
    }
    Job::gemm(&d).eval(0, 0)
}

pub fn inner<T: Element, D: Device>(x: &Tensor<'_, T, 1, D>, y: &Tensor<'_, T, 1, D>) -> Result<T> {
    inner_with(&crate::config::current(), x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{dot, dot_t, outer, Expr};
    use crate::shape::{shape1, shape2, shape3};
    use crate::vectorized::VecArch;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn plan(out: usize, l: usize, r: usize) -> DotPlan {
        DotPlan {
            out_rank: out,
            lhs_rank: l,
            rhs_rank: r,
            lhs_t: false,
            rhs_t: false,
            unit_scale: true,
            beta_zero: true,
            has_backend: true,
        }
    }

    fn matrix(rows: usize, cols: usize, seed: f64) -> Tensor<'static, f64, 2> {
        let data = (0..rows * cols)
            .map(|i| ((i as f64 + seed) * 0.37).sin())
            .collect();
        Tensor::from_vec(shape2(rows, cols), data).unwrap()
    }

    fn reference(a: &Tensor<'_, f64, 2>, b: &Tensor<'_, f64, 2>) -> Vec<f64> {
        let (m, k, n) = (a.shape()[0], a.shape()[1], b.shape()[1]);
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                for p in 0..k {
                    out[i * n + j] += a.get([i, p]).unwrap() * b.get([p, j]).unwrap();
                }
            }
        }
        out
    }

    fn dot_of<'e>(e: Expr<'e, f64>) -> DotExpr<'e, f64> {
        match e {
            Expr::Dot(d) => d,
            other => panic!("expected dot, got {:?}", other),
        }
    }

    fn no_blas() -> EngineConfig {
        EngineConfig::minimal()
    }

    #[test]
    fn test_select_matrix_product() {
        let mut p = plan(2, 2, 2);
        assert_eq!(select_strategy(&p).unwrap(), DotStrategy::Gemm);
        p.has_backend = false;
        assert_eq!(select_strategy(&p).unwrap(), DotStrategy::Implicit);
        p.lhs_t = true;
        p.rhs_t = true;
        assert!(matches!(
            select_strategy(&p),
            Err(TensorError::BackendUnavailable(_))
        ));
        p.rhs_t = false;
        p.unit_scale = false;
        assert!(select_strategy(&p).is_err());
    }

    #[test]
    fn test_select_vector_products() {
        assert_eq!(select_strategy(&plan(1, 1, 2)).unwrap(), DotStrategy::Gemv);
        let mut p = plan(1, 1, 2);
        p.has_backend = false;
        assert!(matches!(
            select_strategy(&p),
            Err(TensorError::BackendUnavailable(_))
        ));

        let mut p = plan(2, 1, 1);
        p.lhs_t = true;
        assert_eq!(select_strategy(&p).unwrap(), DotStrategy::Ger);
        p.beta_zero = false;
        assert_eq!(select_strategy(&p).unwrap(), DotStrategy::OuterAsGemm);
        p.beta_zero = true;
        p.has_backend = false;
        assert_eq!(select_strategy(&p).unwrap(), DotStrategy::OuterAsGemm);
    }

    #[test]
    fn test_select_unsupported_ranks() {
        assert!(matches!(
            select_strategy(&plan(1, 2, 1)),
            Err(TensorError::UnsupportedDot(_))
        ));
        assert!(matches!(
            select_strategy(&plan(2, 1, 1)),
            Err(TensorError::UnsupportedDot(_))
        ));
    }

    #[test]
    fn test_blas_matches_implicit_all_layouts() {
        let a = matrix(4, 6, 0.0);
        let b = matrix(6, 5, 1.0);
        let at = matrix(6, 4, 0.0);
        let bt = matrix(5, 6, 1.0);
        let blas_cfg = EngineConfig::default().with_parallel(false);
        for &(lt, rt) in &[(false, false), (false, true), (true, false)] {
            let l = if lt { &at } else { &a };
            let r = if rt { &bt } else { &b };
            let d = dot_of(dot_t(l, lt, r, rt).unwrap());
            let mut x = Tensor::<f64, 2>::zeros(d.shape()).unwrap();
            let mut y = Tensor::<f64, 2>::zeros(d.shape()).unwrap();
            dot_assign(&blas_cfg, x.dst_view().unwrap(), 2, &d, Saver::SaveTo).unwrap();
            dot_assign(&no_blas(), y.dst_view().unwrap(), 2, &d, Saver::SaveTo).unwrap();
            for (p, q) in x.to_vec().iter().zip(y.to_vec()) {
                assert_relative_eq!(*p, q, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_implicit_lanes_match_scalar() {
        let lanes = EngineConfig::minimal().with_vectorize(true).with_vec_arch(VecArch::Sse);
        let a = matrix(5, 7, 0.0);
        let at = matrix(7, 5, 0.0);
        let b = matrix(7, 11, 3.0);
        for (l, lt) in [(&a, false), (&at, true)] {
            let d = dot_of(dot_t(l, lt, &b, false).unwrap());
            let mut x = Tensor::<f64, 2>::full(shape2(5, 11), 2.0).unwrap();
            let mut y = Tensor::<f64, 2>::full(shape2(5, 11), 2.0).unwrap();
            dot_assign(&lanes, x.dst_view().unwrap(), 2, &d, Saver::MinusTo).unwrap();
            dot_assign(&no_blas(), y.dst_view().unwrap(), 2, &d, Saver::MinusTo).unwrap();
            // lanes accumulate along k in the same order as the scalar loop
            assert_eq!(x.to_vec(), y.to_vec());
        }

        let ints = Tensor::from_vec(shape2(3, 9), (0..27).map(|v| v % 5 - 2).collect::<Vec<i32>>()).unwrap();
        let sq = Tensor::from_vec(shape2(9, 9), (0..81).map(|v| v % 7 - 3).collect::<Vec<i32>>()).unwrap();
        let d = match dot(&ints, &sq).unwrap() {
            Expr::Dot(d) => d,
            _ => unreachable!(),
        };
        let mut x = Tensor::<i32, 2>::zeros(shape2(3, 9)).unwrap();
        let mut y = Tensor::<i32, 2>::zeros(shape2(3, 9)).unwrap();
        dot_assign(&lanes, x.dst_view().unwrap(), 2, &d, Saver::SaveTo).unwrap();
        dot_assign(&no_blas(), y.dst_view().unwrap(), 2, &d, Saver::SaveTo).unwrap();
        assert_eq!(x.to_vec(), y.to_vec());
        assert_eq!(
            x.get([1, 4]).unwrap(),
            (0..9).map(|p| ints.get([1, p]).unwrap() * sq.get([p, 4]).unwrap()).sum::<i32>()
        );
    }

    #[test]
    fn test_gemm_savers() {
        let a = matrix(3, 4, 0.0);
        let b = matrix(4, 2, 2.0);
        let expected = reference(&a, &b);
        let d = dot_of(dot(&a, &b).unwrap() * 2.0f64);
        let mut out = Tensor::<f64, 2>::full(shape2(3, 2), 1.0).unwrap();
        let cfg = EngineConfig::default();
        dot_assign(&cfg, out.dst_view().unwrap(), 2, &d, Saver::MinusTo).unwrap();
        for (got, want) in out.to_vec().iter().zip(&expected) {
            assert_relative_eq!(*got, 1.0 - 2.0 * want, epsilon = 1e-12);
        }
        let err = dot_assign(&cfg, out.dst_view().unwrap(), 2, &d, Saver::MulTo).unwrap_err();
        assert!(matches!(err, TensorError::UnsupportedSaver { saver: "multo", .. }));
    }

    #[test]
    fn test_implicit_rejects_scaled_without_backend() {
        let a = matrix(2, 2, 0.0);
        let d = dot_of(dot(&a, &a).unwrap() * 3.0f64);
        let mut out = Tensor::<f64, 2>::zeros(shape2(2, 2)).unwrap();
        assert!(matches!(
            dot_assign(&no_blas(), out.dst_view().unwrap(), 2, &d, Saver::SaveTo),
            Err(TensorError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_integer_dot_needs_implicit() {
        let a = Tensor::from_vec(shape2(2, 2), vec![1i32, 2, 3, 4]).unwrap();
        let mut out = Tensor::<i32, 2>::zeros(shape2(2, 2)).unwrap();
        let mut d = match dot(&a, &a).unwrap() {
            Expr::Dot(d) => d,
            _ => unreachable!(),
        };
        dot_assign(&no_blas(), out.dst_view().unwrap(), 2, &d, Saver::SaveTo).unwrap();
        assert_eq!(out.to_vec(), vec![7, 10, 15, 22]);
        // with a backend configured the i32 product still runs implicitly
        dot_assign(&EngineConfig::default(), out.dst_view().unwrap(), 2, &d, Saver::PlusTo).unwrap();
        assert_eq!(out.to_vec(), vec![14, 20, 30, 44]);
        d.scale = 2;
        assert!(matches!(
            dot_assign(&EngineConfig::default(), out.dst_view().unwrap(), 2, &d, Saver::SaveTo),
            Err(TensorError::UnsupportedDType(_))
        ));
    }

    #[test]
    fn test_gemv() {
        let x = Tensor::from_vec(shape1(3), vec![1.0f64, 2.0, 3.0]).unwrap();
        let a = matrix(3, 4, 0.5);
        let d = match dot(&x, &a).unwrap() {
            Expr::Dot(d) => d,
            _ => unreachable!(),
        };
        let mut y = Tensor::<f64, 1>::zeros(shape1(4)).unwrap();
        dot_assign(&EngineConfig::default(), y.dst_view().unwrap(), 1, &d, Saver::SaveTo).unwrap();
        for j in 0..4 {
            let want: f64 = (0..3).map(|p| x.get([p]).unwrap() * a.get([p, j]).unwrap()).sum();
            assert_relative_eq!(y.get([j]).unwrap(), want, epsilon = 1e-12);
        }
        assert!(dot_assign(&no_blas(), y.dst_view().unwrap(), 1, &d, Saver::SaveTo).is_err());
    }

    #[test]
    fn test_outer_ger_matches_flattened_gemm() {
        let x = Tensor::from_vec(shape1(3), vec![1.0f64, -2.0, 0.5]).unwrap();
        let y = Tensor::from_vec(shape1(4), vec![3.0f64, 1.0, 0.0, 2.0]).unwrap();
        let d = dot_of(outer(&x, &y).unwrap());
        let mut via_ger = Tensor::<f64, 2>::full(shape2(3, 4), 9.0).unwrap();
        let mut via_gemm = Tensor::<f64, 2>::zeros(shape2(3, 4)).unwrap();
        dot_assign(&EngineConfig::default(), via_ger.dst_view().unwrap(), 2, &d, Saver::SaveTo).unwrap();
        dot_assign(&no_blas(), via_gemm.dst_view().unwrap(), 2, &d, Saver::SaveTo).unwrap();
        assert_eq!(via_ger.to_vec(), via_gemm.to_vec());
        assert_eq!(via_ger.get([1, 0]).unwrap(), -6.0);
    }

    #[test]
    fn test_aliased_operand_rejected() {
        let a = matrix(3, 3, 0.0);
        let mut out = a.view();
        let d = dot_of(dot(&a, &a).unwrap());
        assert!(matches!(
            dot_assign(&EngineConfig::default(), out.dst_view().unwrap(), 2, &d, Saver::SaveTo),
            Err(TensorError::AliasedOperands("lhs"))
        ));
    }

    #[test]
    fn test_shape_checked() {
        let a = matrix(2, 3, 0.0);
        let d = dot_of(dot_t(&a, false, &a, true).unwrap());
        let mut out = Tensor::<f64, 2>::zeros(shape2(3, 3)).unwrap();
        assert!(matches!(
            dot_assign(&EngineConfig::default(), out.dst_view().unwrap(), 2, &d, Saver::SaveTo),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_batched_backend_and_loop_agree() {
        let data = |n: usize, s: f64| (0..n).map(|i| ((i as f64) * 0.11 + s).cos()).collect();
        let lhs = Tensor::from_vec(shape3(3, 2, 4), data(24, 0.0)).unwrap();
        let rhs = Tensor::from_vec(shape3(3, 5, 4), data(60, 1.0)).unwrap();
        let native = EngineConfig::default()
            .with_blas(Some(Arc::new(fuse_blas::CpuBlas::new().with_native_batch(true))));
        let looped = EngineConfig::default();
        let mut a = Tensor::<f64, 3>::zeros(shape3(3, 2, 5)).unwrap();
        let mut b = Tensor::<f64, 3>::zeros(shape3(3, 2, 5)).unwrap();
        let mut c = Tensor::<f64, 3>::zeros(shape3(3, 2, 5)).unwrap();
        batched_dot_with(&native, &mut a, &lhs, &rhs, false, true, 0.5, Saver::SaveTo).unwrap();
        batched_dot_with(&looped, &mut b, &lhs, &rhs, false, true, 0.5, Saver::SaveTo).unwrap();
        batched_dot_with(&no_blas(), &mut c, &lhs, &rhs, false, true, 1.0, Saver::SaveTo).unwrap();
        assert_eq!(a.to_vec(), b.to_vec());
        for (p, q) in a.to_vec().iter().zip(c.to_vec()) {
            assert_relative_eq!(*p, 0.5 * q, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_batched_count_mismatch() {
        let lhs = Tensor::<f32, 3>::zeros(shape3(2, 2, 2)).unwrap();
        let rhs = Tensor::<f32, 3>::zeros(shape3(3, 2, 2)).unwrap();
        let mut out = Tensor::<f32, 3>::zeros(shape3(2, 2, 2)).unwrap();
        assert!(batched_dot(&mut out, &lhs, &rhs, false, false, 1.0).is_err());
    }

    #[test]
    fn test_inner() {
        let x = Tensor::from_vec(shape1(9), (1..=9).map(|v| v as f32).collect()).unwrap();
        let y = Tensor::<f32, 1>::full(shape1(9), 2.0).unwrap();
        assert_eq!(inner_with(&EngineConfig::default(), &x, &y).unwrap(), 90.0);
        assert_eq!(inner_with(&no_blas(), &x, &y).unwrap(), 90.0);
        let short = Tensor::<f32, 1>::zeros(shape1(4)).unwrap();
        assert!(matches!(
            inner(&x, &short),
            Err(TensorError::DotMismatch { .. })
        ));
    }
}
