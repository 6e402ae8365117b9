//! `fuse-tensor` - Lazy tensor expressions evaluated in a single fused pass.
//!
//! This crate provides:
//! - A strided `Tensor` over owned aligned storage or borrowed memory
//! - Lazy `Expr` trees built from operators, mapped functors and casts
//! - A scalar `Job` engine and a SIMD `VecJob` engine over `wide` lanes
//! - Matrix product dispatch to an implicit kernel or a `fuse-blas` backend
//! - Engine configuration from code or `FUSE_*` environment variables

#[macro_use]
mod check;

pub mod assign;
pub mod config;
pub mod dispatch;
pub mod dtype;
pub mod element;
pub mod error;
pub mod expr;
pub mod job;
pub mod ops;
pub mod shape;
pub mod storage;
pub mod stream;
pub mod tensor;
pub mod vectorized;

// Re-export primary types at the crate root for convenience.
pub use assign::{assign_traced, Path};
pub use check::OrAbort;
pub use config::EngineConfig;
pub use dispatch::{batched_dot, batched_dot_with, inner, inner_with, select_strategy, DotPlan, DotStrategy};
pub use dtype::DType;
pub use element::{Element, Lanes};
pub use error::{ErrorKind, Result, TensorError};
pub use expr::{
    abs, binary, clamp, dot, dot_t, map, mul_add, outer, scalar, square, ternary, unary, Expr,
    ExprType, IntoExpr,
};
pub use job::Job;
pub use ops::{BinaryOp, Saver, TernaryOp, UnaryOp};
pub use shape::{shape1, shape2, shape3, shape4, shape5, Shape};
pub use storage::AlignedBuffer;
pub use stream::{new_stream, Cpu, Device, Stream};
pub use tensor::Tensor;
pub use vectorized::{vec_check, VecArch, VecJob};
