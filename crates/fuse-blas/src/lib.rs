//! `fuse-blas` - Column-major BLAS boundary for fuse-tensor.
//!
//! This crate provides:
//! - A `Blas` trait with gemm, gemv, ger and dot for `f32`/`f64`
//! - A `BlasBackend` trait object reaching both precisions
//! - A reference `CpuBlas` implementation
//! - Batched helpers with native and looped execution
//! - An optional `faer`-backed gemm (feature `faer`)

pub mod backend;
pub mod batch;
pub mod cpu;
pub mod error;
#[cfg(feature = "faer")]
pub mod faer_blas;

// Re-export primary types at the crate root for convenience.
pub use backend::{Blas, BlasBackend, BlasScalar};
pub use batch::{batched_gemm, batched_gemv, batched_ger, batched_view};
pub use cpu::CpuBlas;
pub use error::{BlasError, Result};
#[cfg(feature = "faer")]
pub use faer_blas::FaerBlas;
