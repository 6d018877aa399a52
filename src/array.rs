//! Arrays whose element type is only known at runtime.

use ndarray::{Array, Axis, Dimension, Ix3, IxDyn};

use crate::volume::VolumeError;

/// An owned `ndarray` array tagged with its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyArray<D: Dimension> {
    U8(Array<u8, D>),
    I8(Array<i8, D>),
    U16(Array<u16, D>),
    I16(Array<i16, D>),
    U32(Array<u32, D>),
    I32(Array<i32, D>),
    U64(Array<u64, D>),
    I64(Array<i64, D>),
    F32(Array<f32, D>),
    F64(Array<f64, D>),
}

pub type AnyArrayD = AnyArray<IxDyn>;
pub type AnyArray3 = AnyArray<Ix3>;

/// Evaluates `$body` with `$array` bound to the inner array, re-wrapping the
/// result in the same variant.
macro_rules! map_any {
    ($value:expr, $array:ident => $body:expr) => {
        match $value {
            AnyArray::U8($array) => AnyArray::U8($body),
            AnyArray::I8($array) => AnyArray::I8($body),
            AnyArray::U16($array) => AnyArray::U16($body),
            AnyArray::I16($array) => AnyArray::I16($body),
            AnyArray::U32($array) => AnyArray::U32($body),
            AnyArray::I32($array) => AnyArray::I32($body),
            AnyArray::U64($array) => AnyArray::U64($body),
            AnyArray::I64($array) => AnyArray::I64($body),
            AnyArray::F32($array) => AnyArray::F32($body),
            AnyArray::F64($array) => AnyArray::F64($body),
        }
    };
}

/// Evaluates `$body` with `$array` bound to the inner array.
macro_rules! with_any {
    ($value:expr, $array:ident => $body:expr) => {
        match $value {
            AnyArray::U8($array) => $body,
            AnyArray::I8($array) => $body,
            AnyArray::U16($array) => $body,
            AnyArray::I16($array) => $body,
            AnyArray::U32($array) => $body,
            AnyArray::I32($array) => $body,
            AnyArray::U64($array) => $body,
            AnyArray::I64($array) => $body,
            AnyArray::F32($array) => $body,
            AnyArray::F64($array) => $body,
        }
    };
}

pub(crate) use with_any;

impl<D: Dimension> AnyArray<D> {
    pub fn shape(&self) -> &[usize] {
        with_any!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        with_any!(self, a => a.ndim())
    }

    /// numpy name of the element type.
    pub fn dtype(&self) -> &'static str {
        match self {
            AnyArray::U8(_) => "uint8",
            AnyArray::I8(_) => "int8",
            AnyArray::U16(_) => "uint16",
            AnyArray::I16(_) => "int16",
            AnyArray::U32(_) => "uint32",
            AnyArray::I32(_) => "int32",
            AnyArray::U64(_) => "uint64",
            AnyArray::I64(_) => "int64",
            AnyArray::F32(_) => "float32",
            AnyArray::F64(_) => "float64",
        }
    }

    /// Element-wise conversion to `f64`.
    pub fn to_f64(&self) -> Array<f64, D> {
        with_any!(self, a => a.mapv(|v| v as f64))
    }

    pub fn into_dyn(self) -> AnyArrayD {
        map_any!(self, a => a.into_dyn())
    }
}

impl AnyArrayD {
    /// Reshape into a `(depth, height, width)` array, giving 2-D arrays a
    /// depth of one.
    pub fn into_3d(self) -> Result<AnyArray3, VolumeError> {
        let rank = self.ndim();
        if !(2..=3).contains(&rank) {
            return Err(VolumeError::UnsupportedRank(rank));
        }
        Ok(map_any!(self, a => {
            let a = if rank == 2 { a.insert_axis(Axis(0)) } else { a };
            a.into_dimensionality::<Ix3>()
                .map_err(|_| VolumeError::UnsupportedRank(rank))?
        }))
    }
}

macro_rules! impl_from_array {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl<D: Dimension> From<Array<$t, D>> for AnyArray<D> {
                fn from(array: Array<$t, D>) -> Self {
                    AnyArray::$variant(array)
                }
            }
        )*
    };
}

impl_from_array! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, array};

    #[test]
    fn two_dimensional_arrays_gain_a_depth_axis() {
        let array: AnyArrayD = array![[1_u16, 2, 3], [4, 5, 6]].into_dyn().into();
        let volume = array.into_3d().unwrap();
        assert_eq!(volume.shape(), &[1, 2, 3]);
        assert_eq!(volume.dtype(), "uint16");
    }

    #[test]
    fn rejects_other_ranks() {
        let line: AnyArrayD = ArrayD::<f32>::zeros(vec![4]).into();
        assert!(matches!(line.into_3d(), Err(VolumeError::UnsupportedRank(1))));

        let four: AnyArrayD = ArrayD::<f32>::zeros(vec![1, 2, 2, 2]).into();
        assert!(matches!(four.into_3d(), Err(VolumeError::UnsupportedRank(4))));
    }

    #[test]
    fn converts_to_f64() {
        let array: AnyArrayD = array![-1_i16, 7].into_dyn().into();
        assert_eq!(array.to_f64(), array![-1.0, 7.0].into_dyn());
    }
}
