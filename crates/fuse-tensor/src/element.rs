//! Element types and their SIMD lane representations.

use std::fmt::{Debug, Display};

use fuse_blas::{Blas, BlasBackend};
use half::f16;
use wide::{f32x4, f64x2, i32x4};

use crate::dtype::DType;

/// A fixed-width SIMD vector of `T`.
///
/// `load`/`store` accept unaligned pointers; the vectorized engine only
/// selects this path for aligned data, so alignment is a performance
/// property here rather than a safety one.
pub trait Lanes<T>: Copy + Send + Sync {
    const WIDTH: usize;

    fn splat(v: T) -> Self;

    /// # Safety
    /// `ptr` must be valid for reads of `WIDTH` consecutive elements.
    unsafe fn load(ptr: *const T) -> Self;

    /// # Safety
    /// `ptr` must be valid for writes of `WIDTH` consecutive elements.
    unsafe fn store(self, ptr: *mut T);

    fn add(self, o: Self) -> Self;
    fn sub(self, o: Self) -> Self;
    fn mul(self, o: Self) -> Self;
    fn div(self, o: Self) -> Self;

    /// Horizontal sum of all lanes.
    fn sum(self) -> T;
}

macro_rules! impl_wide_lanes {
    ($vec:ty, $t:ty, $w:expr, div = $div:expr) => {
        impl Lanes<$t> for $vec {
            const WIDTH: usize = $w;

            #[inline]
            fn splat(v: $t) -> Self {
                <$vec>::splat(v)
            }

            #[inline]
            unsafe fn load(ptr: *const $t) -> Self {
                <$vec>::new(std::ptr::read_unaligned(ptr as *const [$t; $w]))
            }

            #[inline]
            unsafe fn store(self, ptr: *mut $t) {
                std::ptr::write_unaligned(ptr as *mut [$t; $w], self.to_array());
            }

            #[inline]
            fn add(self, o: Self) -> Self {
                self + o
            }

            #[inline]
            fn sub(self, o: Self) -> Self {
                self - o
            }

            #[inline]
            fn mul(self, o: Self) -> Self {
                self * o
            }

            #[inline]
            fn div(self, o: Self) -> Self {
                let f: fn($vec, $vec) -> $vec = $div;
                f(self, o)
            }

            #[inline]
            fn sum(self) -> $t {
                self.to_array()
                    .iter()
                    .fold(<$t as Element>::zero(), |acc, &v| <$t as Element>::add(acc, v))
            }
        }
    };
}

impl_wide_lanes!(f32x4, f32, 4, div = |a, b| a / b);
impl_wide_lanes!(f64x2, f64, 2, div = |a, b| a / b);
// no integer vector division; lanes are divided one at a time
impl_wide_lanes!(i32x4, i32, 4, div = |a, b| {
    let (a, b) = (a.to_array(), b.to_array());
    i32x4::new(std::array::from_fn(|i| <i32 as Element>::div(a[i], b[i])))
});

/// Width-1 stand-in for element types without a vector form.
#[derive(Debug, Clone, Copy)]
pub struct Unvectorized<T>(pub T);

impl<T: Element> Lanes<T> for Unvectorized<T> {
    const WIDTH: usize = 1;

    fn splat(v: T) -> Self {
        Unvectorized(v)
    }

    unsafe fn load(ptr: *const T) -> Self {
        Unvectorized(std::ptr::read_unaligned(ptr))
    }

    unsafe fn store(self, ptr: *mut T) {
        std::ptr::write_unaligned(ptr, self.0);
    }

    fn add(self, o: Self) -> Self {
        Unvectorized(self.0.add(o.0))
    }

    fn sub(self, o: Self) -> Self {
        Unvectorized(self.0.sub(o.0))
    }

    fn mul(self, o: Self) -> Self {
        Unvectorized(self.0.mul(o.0))
    }

    fn div(self, o: Self) -> Self {
        Unvectorized(self.0.div(o.0))
    }

    fn sum(self) -> T {
        self.0
    }
}

/// A tensor element type.
///
/// Integer arithmetic wraps and integer division by zero yields zero.
/// Float arithmetic is plain IEEE.
pub trait Element:
    Copy + Send + Sync + PartialEq + PartialOrd + Debug + Display + Default + 'static
{
    const DTYPE: DType;
    /// Whether `Vector` is a real SIMD type.
    const HAS_VECTOR: bool;
    /// Whether `Vector` has a native lane-wise division.
    const VECTOR_DIV: bool;

    type Vector: Lanes<Self>;

    fn zero() -> Self;
    fn one() -> Self;
    fn add(self, o: Self) -> Self;
    fn sub(self, o: Self) -> Self;
    fn mul(self, o: Self) -> Self;
    fn div(self, o: Self) -> Self;
    fn neg(self) -> Self;
    fn abs(self) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;

    /// BLAS routines for this type, if the backend provides them.
    fn blas(_backend: &dyn BlasBackend) -> Option<&dyn Blas<Self>> {
        None
    }
}

macro_rules! impl_float_element {
    ($t:ty, $dtype:expr, $vec:ty, $as_blas:ident) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;
            const HAS_VECTOR: bool = true;
            const VECTOR_DIV: bool = true;
            type Vector = $vec;

            fn zero() -> Self {
                0.0
            }
            fn one() -> Self {
                1.0
            }
            fn add(self, o: Self) -> Self {
                self + o
            }
            fn sub(self, o: Self) -> Self {
                self - o
            }
            fn mul(self, o: Self) -> Self {
                self * o
            }
            fn div(self, o: Self) -> Self {
                self / o
            }
            fn neg(self) -> Self {
                -self
            }
            fn abs(self) -> Self {
                <$t>::abs(self)
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn blas(backend: &dyn BlasBackend) -> Option<&dyn Blas<Self>> {
                Some(backend.$as_blas())
            }
        }
    };
}

impl_float_element!(f32, DType::F32, f32x4, as_f32);
impl_float_element!(f64, DType::F64, f64x2, as_f64);

macro_rules! impl_int_element {
    ($t:ty, $dtype:expr, $vec:ty, $has_vec:expr, abs = $abs:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;
            const HAS_VECTOR: bool = $has_vec;
            const VECTOR_DIV: bool = false;
            type Vector = $vec;

            fn zero() -> Self {
                0
            }
            fn one() -> Self {
                1
            }
            fn add(self, o: Self) -> Self {
                self.wrapping_add(o)
            }
            fn sub(self, o: Self) -> Self {
                self.wrapping_sub(o)
            }
            fn mul(self, o: Self) -> Self {
                self.wrapping_mul(o)
            }
            fn div(self, o: Self) -> Self {
                if o == 0 {
                    0
                } else {
                    self.wrapping_div(o)
                }
            }
            fn neg(self) -> Self {
                self.wrapping_neg()
            }
            fn abs(self) -> Self {
                let f: fn($t) -> $t = $abs;
                f(self)
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}

impl_int_element!(i32, DType::I32, i32x4, true, abs = |v| v.wrapping_abs());
impl_int_element!(i64, DType::I64, Unvectorized<i64>, false, abs = |v| v.wrapping_abs());
impl_int_element!(i8, DType::I8, Unvectorized<i8>, false, abs = |v| v.wrapping_abs());
impl_int_element!(u8, DType::U8, Unvectorized<u8>, false, abs = |v| v);

impl Element for f16 {
    const DTYPE: DType = DType::F16;
    const HAS_VECTOR: bool = false;
    const VECTOR_DIV: bool = false;
    type Vector = Unvectorized<f16>;

    fn zero() -> Self {
        f16::ZERO
    }
    fn one() -> Self {
        f16::ONE
    }
    fn add(self, o: Self) -> Self {
        f16::from_f32(self.to_f32() + o.to_f32())
    }
    fn sub(self, o: Self) -> Self {
        f16::from_f32(self.to_f32() - o.to_f32())
    }
    fn mul(self, o: Self) -> Self {
        f16::from_f32(self.to_f32() * o.to_f32())
    }
    fn div(self, o: Self) -> Self {
        f16::from_f32(self.to_f32() / o.to_f32())
    }
    fn neg(self) -> Self {
        f16::from_f32(-self.to_f32())
    }
    fn abs(self) -> Self {
        f16::from_f32(self.to_f32().abs())
    }
    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }
    fn from_f64(v: f64) -> Self {
        f16::from_f64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuse_blas::CpuBlas;

    #[test]
    fn test_lanes_roundtrip_f32() {
        let src = [1.0f32, 2.0, 3.0, 4.0];
        let mut dst = [0.0f32; 4];
        unsafe {
            let v = <f32x4 as Lanes<f32>>::load(src.as_ptr());
            let doubled = Lanes::add(v, v);
            doubled.store(dst.as_mut_ptr());
        }
        assert_eq!(dst, [2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_lanes_sum() {
        let v = <f64x2 as Lanes<f64>>::splat(1.5);
        assert_eq!(v.sum(), 3.0);
        let i = <i32x4 as Lanes<i32>>::splat(3);
        assert_eq!(i.sum(), 12);
    }

    #[test]
    fn test_i32_lane_division() {
        let a = <i32x4 as Lanes<i32>>::splat(9);
        let b = <i32x4 as Lanes<i32>>::splat(2);
        assert_eq!(Lanes::div(a, b).to_array(), [4; 4]);
    }

    #[test]
    fn test_integer_wraps() {
        assert_eq!(Element::add(i8::MAX, 1), i8::MIN);
        assert_eq!(Element::sub(0u8, 1), u8::MAX);
        assert_eq!(Element::div(5i64, 0), 0);
    }

    #[test]
    fn test_f16_arithmetic() {
        let a = f16::from_f32(1.5);
        let b = f16::from_f32(2.0);
        assert_eq!(Element::mul(a, b).to_f32(), 3.0);
        assert_eq!(Element::neg(a).to_f32(), -1.5);
    }

    #[test]
    fn test_vector_capabilities() {
        assert!(f32::HAS_VECTOR && f32::VECTOR_DIV);
        assert!(i32::HAS_VECTOR && !i32::VECTOR_DIV);
        assert!(!u8::HAS_VECTOR);
        assert_eq!(<<f64 as Element>::Vector as Lanes<f64>>::WIDTH, 2);
        assert_eq!(<<i64 as Element>::Vector as Lanes<i64>>::WIDTH, 1);
    }

    #[test]
    fn test_blas_only_for_floats() {
        let backend = CpuBlas::new();
        assert!(f32::blas(&backend).is_some());
        assert!(f64::blas(&backend).is_some());
        assert!(i32::blas(&backend).is_none());
        assert!(f16::blas(&backend).is_none());
    }

    #[test]
    fn test_casts_through_f64() {
        assert_eq!(i32::from_f64(2.9), 2);
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(Element::to_f64(-3i8), -3.0);
    }
}
