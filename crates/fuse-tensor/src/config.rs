//! Engine configuration.
//!
//! Every engine entry point has a `*_with` form taking an explicit
//! [`EngineConfig`]; the plain forms read the process-wide one.

use std::sync::{Arc, OnceLock, RwLock};

use fuse_blas::{BlasBackend, CpuBlas};

use crate::vectorized::VecArch;

/// Elements printed per row and rows printed per tensor by `Display`.
pub const DEFAULT_MAX_SHOW: usize = 16;

/// Minimum destination size before rows are split across threads.
pub const DEFAULT_PARALLEL_MIN_ELEMENTS: usize = 1 << 15;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub vec_arch: VecArch,
    /// Allow the SIMD path for eligible expressions.
    pub vectorize: bool,
    /// Allow splitting rows across the rayon pool.
    pub parallel: bool,
    pub parallel_min_elements: usize,
    /// BLAS backend for matrix products. `None` restricts dot products to
    /// the implicit kernel.
    pub blas: Option<Arc<dyn BlasBackend>>,
    pub max_show: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            vec_arch: VecArch::Sse,
            vectorize: true,
            parallel: true,
            parallel_min_elements: DEFAULT_PARALLEL_MIN_ELEMENTS,
            blas: Some(Arc::new(CpuBlas::new())),
            max_show: DEFAULT_MAX_SHOW,
        }
    }
}

impl EngineConfig {
    /// Scalar, serial, BLAS-free configuration.
    pub fn minimal() -> Self {
        EngineConfig {
            vec_arch: VecArch::None,
            vectorize: false,
            parallel: false,
            blas: None,
            ..Default::default()
        }
    }

    pub fn with_vec_arch(mut self, arch: VecArch) -> Self {
        self.vec_arch = arch;
        self
    }

    pub fn with_vectorize(mut self, enabled: bool) -> Self {
        self.vectorize = enabled;
        self
    }

    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    pub fn with_parallel_min_elements(mut self, n: usize) -> Self {
        self.parallel_min_elements = n;
        self
    }

    pub fn with_blas(mut self, blas: Option<Arc<dyn BlasBackend>>) -> Self {
        self.blas = blas;
        self
    }

    pub fn with_max_show(mut self, n: usize) -> Self {
        self.max_show = n;
        self
    }

    /// Whether an assignment of `elems` elements may run on several threads.
    pub fn parallel_for(&self, elems: usize) -> bool {
        self.parallel && elems >= self.parallel_min_elements
    }

    /// Reads overrides from `FUSE_VECTORIZE`, `FUSE_VEC_ARCH`,
    /// `FUSE_PARALLEL`, `FUSE_PARALLEL_MIN` and `FUSE_BLAS` on top of the
    /// defaults. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = EngineConfig::default();
        if let Some(v) = lookup("FUSE_VECTORIZE") {
            match parse_flag(&v) {
                Some(b) => cfg.vectorize = b,
                None => ignored("FUSE_VECTORIZE", &v),
            }
        }
        if let Some(v) = lookup("FUSE_VEC_ARCH") {
            match v.to_ascii_lowercase().as_str() {
                "none" => cfg.vec_arch = VecArch::None,
                "sse" => cfg.vec_arch = VecArch::Sse,
                _ => ignored("FUSE_VEC_ARCH", &v),
            }
        }
        if let Some(v) = lookup("FUSE_PARALLEL") {
            match parse_flag(&v) {
                Some(b) => cfg.parallel = b,
                None => ignored("FUSE_PARALLEL", &v),
            }
        }
        if let Some(v) = lookup("FUSE_PARALLEL_MIN") {
            match v.trim().parse::<usize>() {
                Ok(n) => cfg.parallel_min_elements = n,
                Err(_) => ignored("FUSE_PARALLEL_MIN", &v),
            }
        }
        if let Some(v) = lookup("FUSE_BLAS") {
            match v.to_ascii_lowercase().as_str() {
                "none" => cfg.blas = None,
                "cpu" => cfg.blas = Some(Arc::new(CpuBlas::new())),
                #[cfg(feature = "faer")]
                "faer" => cfg.blas = Some(Arc::new(fuse_blas::FaerBlas::new())),
                #[cfg(not(feature = "faer"))]
                "faer" => {
                    tracing::warn!("FUSE_BLAS=faer requested but the faer feature is disabled, using cpu");
                }
                _ => ignored("FUSE_BLAS", &v),
            }
        }
        tracing::debug!(
            vectorize = cfg.vectorize,
            vec_arch = %cfg.vec_arch,
            parallel = cfg.parallel,
            parallel_min = cfg.parallel_min_elements,
            blas = cfg.blas.as_ref().map(|b| b.name()).unwrap_or("none"),
            "engine config loaded"
        );
        cfg
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn ignored(key: &str, value: &str) {
    tracing::warn!(key, value, "ignoring unrecognised config value");
}

fn global() -> &'static RwLock<EngineConfig> {
    static CURRENT: OnceLock<RwLock<EngineConfig>> = OnceLock::new();
    CURRENT.get_or_init(|| RwLock::new(EngineConfig::from_env()))
}

/// The process-wide configuration, initialised from the environment on
/// first use.
pub fn current() -> EngineConfig {
    global()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

pub fn set_current(cfg: EngineConfig) {
    *global()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = cfg;
}
