//! Assignment: picks an engine for `dst <saver> expr` and runs it.

use crate::config::EngineConfig;
use crate::dispatch::dot_assign;
use crate::element::Element;
use crate::error::{Result, TensorError};
use crate::expr::{Expr, LeafInfo};
use crate::job::{map_job, DstView, Job};
use crate::ops::Saver;
use crate::stream::Device;
use crate::tensor::Tensor;
use crate::vectorized::{map_vec_job, vec_align_check, vec_check, VecJob};

/// Which element-wise engine ran an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Path {
    Scalar,
    Vectorized,
    Dot,
}

/// Evaluates `dst <saver> e` in a single pass over `dst`.
pub(crate) fn execute<T: Element, const N: usize, D: Device>(
    cfg: &EngineConfig,
    dst: &mut Tensor<'_, T, N, D>,
    e: &Expr<'_, T>,
    saver: Saver,
) -> Result<()> {
    let view = dst.dst_view()?;
    run(cfg, view, N, e, saver).map(|_| ())
}

fn run<T: Element>(
    cfg: &EngineConfig,
    dst: DstView<T>,
    rank: usize,
    e: &Expr<'_, T>,
    saver: Saver,
) -> Result<Path> {
    if let Expr::Dot(d) = e {
        dot_assign(cfg, dst, rank, d, saver)?;
        return Ok(Path::Dot);
    }
    check!(!e.expr_type().is_complex(), TensorError::ComplexSubexpression);

    if let Some(shape) = e.broadcast_shape()? {
        check!(
            shape == dst.shape(),
            TensorError::ShapeMismatch {
                expected: dst.shape().dims().to_vec(),
                got: shape.dims().to_vec(),
            }
        );
    }

    let mut leaves = Vec::new();
    e.collect_leaves(false, &mut leaves);
    let hazard = has_hazard(&dst, &leaves);
    let parallel = !hazard && cfg.parallel_for(dst.rows * dst.cols);

    if cfg.vectorize
        && cfg.vec_arch.enabled()
        && !hazard
        && vec_check(e, saver)
        && vec_align_check(e, &dst, cfg.vec_arch)
    {
        if let Some(job) = VecJob::new(e)? {
            tracing::debug!(shape = %dst.shape(), saver = saver.name(), parallel, "vectorized assign");
            map_vec_job(dst, &job, saver, parallel);
            return Ok(Path::Vectorized);
        }
    }

    tracing::debug!(shape = %dst.shape(), saver = saver.name(), parallel, hazard, "scalar assign");
    let job = Job::new(e)?;
    map_job(dst, &job, saver, parallel);
    Ok(Path::Scalar)
}

/// A leaf overlapping the destination is safe only when it is the
/// destination itself read at the same coordinate.
fn has_hazard<T: Element>(dst: &DstView<T>, leaves: &[LeafInfo]) -> bool {
    let span = dst.span();
    leaves.iter().any(|leaf| {
        leaf.span.overlaps(&span)
            && (leaf.transposed
                || leaf.addr != dst.ptr.0 as usize
                || leaf.stride != dst.stride
                || leaf.elem_size != std::mem::size_of::<T>())
    })
}

/// Like [`Tensor::assign_with`], also reporting the engine that ran.
pub fn assign_traced<'e, T: Element, const N: usize, D: Device>(
    cfg: &EngineConfig,
    dst: &mut Tensor<'_, T, N, D>,
    e: impl crate::expr::IntoExpr<'e, T>,
    saver: Saver,
) -> Result<Path> {
    let view = dst.dst_view()?;
    run(cfg, view, N, &e.into_expr(), saver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{abs, dot};
    use crate::shape::shape2;
    use crate::vectorized::VecArch;

    fn iota(rows: usize, cols: usize, pad: bool) -> Tensor<'static, f32, 2> {
        let mut t = Tensor::<f32, 2>::allocate(shape2(rows, cols), pad, None).unwrap();
        for r in 0..rows {
            for c in 0..cols {
                t.set([r, c], (r * cols + c) as f32).unwrap();
            }
        }
        t
    }

    #[test]
    fn test_aligned_takes_vector_path() {
        let a = iota(4, 6, true);
        let mut out = Tensor::<f32, 2>::allocate(shape2(4, 6), true, None).unwrap();
        let cfg = EngineConfig::default();
        let path = assign_traced(&cfg, &mut out, &a * 2.0f32 + 1.0f32, Saver::SaveTo).unwrap();
        assert_eq!(path, Path::Vectorized);
        assert_eq!(out.get([3, 5]).unwrap(), 47.0);
    }

    #[test]
    fn test_fallbacks_to_scalar() {
        let a = iota(4, 6, true);
        let mut out = Tensor::<f32, 2>::allocate(shape2(4, 6), true, None).unwrap();
        let cfg = EngineConfig::default();
        // op without a lane-wise form
        let path = assign_traced(&cfg, &mut out, abs(&a), Saver::SaveTo).unwrap();
        assert_eq!(path, Path::Scalar);
        // unaligned operand
        let packed = iota(4, 6, false);
        let path = assign_traced(&cfg, &mut out, &packed + 1.0f32, Saver::SaveTo).unwrap();
        assert_eq!(path, Path::Scalar);
        // vectorization switched off
        let off = cfg.clone().with_vec_arch(VecArch::None);
        let path = assign_traced(&off, &mut out, &a + 1.0f32, Saver::SaveTo).unwrap();
        assert_eq!(path, Path::Scalar);
        assert_eq!(out.get([0, 0]).unwrap(), 1.0);
    }

    #[test]
    fn test_dot_routed_to_dispatch() {
        let a = iota(2, 2, false);
        let mut out = Tensor::<f32, 2>::zeros(shape2(2, 2)).unwrap();
        let path = assign_traced(&EngineConfig::minimal(), &mut out, dot(&a, &a).unwrap(), Saver::SaveTo).unwrap();
        assert_eq!(path, Path::Dot);
        assert_eq!(out.to_vec(), vec![2.0, 3.0, 6.0, 11.0]);
    }

    #[test]
    fn test_nested_dot_rejected() {
        let a = iota(2, 2, false);
        let mut out = Tensor::<f32, 2>::zeros(shape2(2, 2)).unwrap();
        let e = dot(&a, &a).unwrap() + &a;
        assert!(matches!(out.assign(e), Err(TensorError::ComplexSubexpression)));
    }

    #[test]
    fn test_shape_mismatch_intercepted() {
        let a = iota(2, 3, false);
        let mut out = Tensor::<f32, 2>::zeros(shape2(3, 2)).unwrap();
        assert!(matches!(
            out.assign(&a),
            Err(TensorError::ShapeMismatch { .. })
        ));
        // the transpose has the right shape
        out.assign(a.t()).unwrap();
        assert_eq!(out.get([2, 1]).unwrap(), a.get([1, 2]).unwrap());
    }

    #[test]
    fn test_empty_operand_rejected() {
        let minimal = EngineConfig::minimal();
        let mut out = Tensor::<f64, 2>::zeros(shape2(3, 3)).unwrap();
        let empty = Tensor::<f64, 2>::zeros(shape2(0, 0)).unwrap();
        assert!(matches!(
            out.assign_with(&minimal, &empty),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            out.assign_with(&EngineConfig::default(), &empty + 1.0f64),
            Err(TensorError::ShapeMismatch { .. })
        ));

        let mut small = Tensor::<f32, 2>::zeros(shape2(2, 2)).unwrap();
        let null = Tensor::<f32, 2>::default();
        assert!(matches!(
            small.assign_with(&minimal, &null),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert_eq!(small.to_vec(), vec![0.0; 4]);
        assert_eq!(out.to_vec(), vec![0.0; 9]);
    }

    #[test]
    fn test_empty_into_empty() {
        let mut out = Tensor::<f32, 2>::zeros(shape2(0, 0)).unwrap();
        let empty = Tensor::<f32, 2>::default();
        out.assign_with(&EngineConfig::minimal(), &empty + 1.0f32).unwrap();
        out.assign(3.0f32).unwrap();
        assert!(out.to_vec().is_empty());
    }

    #[test]
    fn test_scalar_broadcast() {
        let mut out = Tensor::<f32, 2>::allocate(shape2(3, 9), true, None).unwrap();
        out.assign(2.5f32).unwrap();
        assert_eq!(out.to_vec(), vec![2.5; 27]);
    }

    #[test]
    fn test_same_view_is_not_a_hazard() {
        let mut a = iota(4, 8, true);
        let v = a.view();
        let cfg = EngineConfig::default();
        let path = assign_traced(&cfg, &mut a, &v * &v, Saver::SaveTo).unwrap();
        assert_eq!(path, Path::Vectorized);
        assert_eq!(a.get([1, 1]).unwrap(), 81.0);
    }

    #[test]
    fn test_shifted_alias_runs_serial_scalar() {
        let mut data: Vec<f32> = (0..6).map(|v| v as f32).collect();
        let base = Tensor::from_slice_mut(&mut data, crate::shape::shape1(6)).unwrap();
        let src = base.slice(0, 5).unwrap();
        let mut dst = base.slice(1, 6).unwrap();
        let cfg = EngineConfig::default().with_parallel_min_elements(0);
        let path = assign_traced(&cfg, &mut dst, &src, Saver::SaveTo).unwrap();
        assert_eq!(path, Path::Scalar);
        // serial left-to-right evaluation reads already written values
        assert_eq!(base.to_vec(), vec![0.0; 6]);
    }

    #[test]
    fn test_hazard_classification() {
        let leaves = [LeafInfo {
            span: crate::expr::Span { start: 0, end: 64 },
            addr: 0,
            stride: 4,
            elem_size: 4,
            transposed: true,
        }];
        let mut t = Tensor::<f32, 2>::zeros(shape2(4, 4)).unwrap();
        let dst = t.dst_view().unwrap();
        let shifted = [LeafInfo {
            span: dst.span(),
            addr: dst.ptr.0 as usize,
            stride: 4,
            elem_size: 4,
            transposed: false,
        }];
        assert!(!has_hazard(&dst, &shifted));
        assert!(!has_hazard(&dst, &leaves));
        let flipped = [LeafInfo {
            transposed: true,
            ..shifted[0]
        }];
        assert!(has_hazard(&dst, &flipped));
    }
}
