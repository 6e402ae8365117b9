use std::fmt;
use std::ops::{Index, IndexMut};

/// A fixed-rank tensor shape. The last dimension is the one stored
/// contiguously; every leading dimension advances by the row stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape<const N: usize> {
    dims: [usize; N],
}

impl<const N: usize> Shape<N> {
    pub const fn new(dims: [usize; N]) -> Self {
        Shape { dims }
    }

    /// The all-zero shape, reported by scalar expressions.
    pub const fn zeros() -> Self {
        Shape { dims: [0; N] }
    }

    pub fn dims(&self) -> &[usize; N] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        N
    }

    /// Total number of elements (product of all dimension sizes).
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Product of dimensions `[start, end)`.
    pub fn sub_size(&self, start: usize, end: usize) -> usize {
        self.dims[start.min(N)..end.min(N)].iter().product()
    }

    /// True for the scalar shape, which broadcasts against anything.
    pub fn is_degenerate(&self) -> bool {
        self.dims.iter().all(|&d| d == 0)
    }

    /// Row pitch of a densely packed tensor of this shape.
    pub fn contiguous_stride(&self) -> usize {
        if N == 0 {
            1
        } else {
            self.dims[N - 1]
        }
    }

    /// Folds every dimension into one.
    pub fn flatten_1d(&self) -> Shape<1> {
        Shape::new([self.size()])
    }

    /// Folds all leading dimensions into rows and keeps the last as columns.
    pub fn flatten_2d(&self) -> Shape<2> {
        if N == 0 {
            return Shape::new([1, 1]);
        }
        Shape::new([self.sub_size(0, N - 1), self.dims[N - 1]])
    }

    /// Dimensions `[start, start + M)` as a rank-`M` shape.
    ///
    /// # Panics
    /// Panics if `start + M > N`.
    pub fn slice<const M: usize>(&self, start: usize) -> Shape<M> {
        let mut dims = [0; M];
        dims.copy_from_slice(&self.dims[start..start + M]);
        Shape { dims }
    }
}

impl Shape<2> {
    /// The shape with rows and columns swapped.
    pub fn transposed(&self) -> Shape<2> {
        Shape::new([self.dims[1], self.dims[0]])
    }
}

impl<const N: usize> Default for Shape<N> {
    fn default() -> Self {
        Shape::zeros()
    }
}

impl<const N: usize> Index<usize> for Shape<N> {
    type Output = usize;

    fn index(&self, i: usize) -> &usize {
        &self.dims[i]
    }
}

impl<const N: usize> IndexMut<usize> for Shape<N> {
    fn index_mut(&mut self, i: usize) -> &mut usize {
        &mut self.dims[i]
    }
}

impl<const N: usize> From<[usize; N]> for Shape<N> {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> fmt::Display for Shape<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

pub fn shape1(s0: usize) -> Shape<1> {
    Shape::new([s0])
}

pub fn shape2(s0: usize, s1: usize) -> Shape<2> {
    Shape::new([s0, s1])
}

pub fn shape3(s0: usize, s1: usize, s2: usize) -> Shape<3> {
    Shape::new([s0, s1, s2])
}

pub fn shape4(s0: usize, s1: usize, s2: usize, s3: usize) -> Shape<4> {
    Shape::new([s0, s1, s2, s3])
}

pub fn shape5(s0: usize, s1: usize, s2: usize, s3: usize, s4: usize) -> Shape<5> {
    Shape::new([s0, s1, s2, s3, s4])
}
