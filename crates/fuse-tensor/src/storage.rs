use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::element::Element;
use crate::error::{Result, TensorError};

/// Alignment of every tensor allocation, matching the SSE vector width.
pub const DEFAULT_ALIGN_BYTES: usize = 16;

/// Zero-initialised heap storage aligned to [`DEFAULT_ALIGN_BYTES`].
///
/// Freed on drop. Tensors share it through `Rc` so the last view to go
/// releases the memory.
pub struct AlignedBuffer<T: Element> {
    ptr: NonNull<T>,
    len: usize,
    layout: Option<Layout>,
}

impl<T: Element> AlignedBuffer<T> {
    /// Allocate `len` zeroed elements.
    ///
    /// # Errors
    /// Returns `AllocFailed` if the size overflows or the allocator returns null.
    pub fn zeroed(len: usize) -> Result<Self> {
        let align = DEFAULT_ALIGN_BYTES.max(std::mem::align_of::<T>());
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(TensorError::AllocFailed {
                bytes: usize::MAX,
                align,
            })?;
        if bytes == 0 {
            return Ok(AlignedBuffer {
                ptr: NonNull::dangling(),
                len,
                layout: None,
            });
        }
        let layout = Layout::from_size_align(bytes, align)
            .map_err(|_| TensorError::AllocFailed { bytes, align })?;
        // all-zero bits are a valid zero for every element type
        let raw = unsafe { alloc::alloc_zeroed(layout) } as *mut T;
        let ptr = NonNull::new(raw).ok_or(TensorError::AllocFailed { bytes, align })?;
        Ok(AlignedBuffer {
            ptr,
            len,
            layout: Some(layout),
        })
    }

    /// Allocate `rows` rows of `row_elems` elements each.
    ///
    /// With `pad`, the row pitch is rounded up so every row starts on an
    /// aligned address. Returns the buffer and its pitch in elements.
    pub fn pitched(row_elems: usize, rows: usize, pad: bool) -> Result<(Self, usize)> {
        let stride = if pad {
            let size = std::mem::size_of::<T>();
            let row_bytes = row_elems * size;
            let padded = row_bytes.div_ceil(DEFAULT_ALIGN_BYTES) * DEFAULT_ALIGN_BYTES;
            padded / size
        } else {
            row_elems
        };
        let len = stride.checked_mul(rows).ok_or(TensorError::AllocFailed {
            bytes: usize::MAX,
            align: DEFAULT_ALIGN_BYTES,
        })?;
        Ok((Self::zeroed(len)?, stride))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T: Element> Drop for AlignedBuffer<T> {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) };
        }
    }
}

impl<T: Element> fmt::Debug for AlignedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("dtype", &T::DTYPE)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_zeroed_is_aligned() {
        let buf = AlignedBuffer::<f32>::zeroed(5).unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.as_ptr() as usize % DEFAULT_ALIGN_BYTES, 0);
        let data = unsafe { std::slice::from_raw_parts(buf.as_ptr(), buf.len()) };
        assert_eq!(data, &[0.0; 5]);
    }

    #[test]
    fn test_pitched_pads_rows() {
        let (buf, stride) = AlignedBuffer::<f32>::pitched(5, 3, true).unwrap();
        assert_eq!(stride, 8);
        assert_eq!(buf.len(), 24);

        let (_, stride) = AlignedBuffer::<f64>::pitched(5, 3, true).unwrap();
        assert_eq!(stride, 6);

        let (_, stride) = AlignedBuffer::<u8>::pitched(5, 3, true).unwrap();
        assert_eq!(stride, 16);

        let (_, stride) = AlignedBuffer::<f16>::pitched(5, 3, false).unwrap();
        assert_eq!(stride, 5);
    }

    #[test]
    fn test_empty() {
        let buf = AlignedBuffer::<i32>::zeroed(0).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overflow_fails() {
        let err = AlignedBuffer::<f64>::zeroed(usize::MAX / 2).unwrap_err();
        assert!(matches!(err, TensorError::AllocFailed { .. }));
    }
}
