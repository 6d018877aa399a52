//! `.npy` files of any supported element type.

use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use ndarray_npy::{ReadNpyError, ReadableElement, WriteNpyError, read_npy, write_npy};
use thiserror::Error;
use tracing::debug;

use crate::array::{AnyArray, AnyArrayD, with_any};

#[derive(Debug, Error)]
pub enum NpyError {
    #[error("Could not read npy file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ReadNpyError,
    },

    #[error("Unsupported element type in npy file {}", path.display())]
    UnsupportedType { path: PathBuf },

    #[error("Could not write npy file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: WriteNpyError,
    },
}

/// `Ok(None)` when the file holds a different element type.
fn try_read<T: ReadableElement>(path: &Path) -> Result<Option<ArrayD<T>>, NpyError> {
    match read_npy::<_, ArrayD<T>>(path) {
        Ok(array) => Ok(Some(array)),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(source) => Err(NpyError::Read {
            path: path.to_owned(),
            source,
        }),
    }
}

/// Read an `.npy` file, whatever its numeric element type.
pub fn read_npy_any(path: impl AsRef<Path>) -> Result<AnyArrayD, NpyError> {
    let path = path.as_ref();

    macro_rules! attempt {
        ($($t:ty),*) => {
            $(
                if let Some(array) = try_read::<$t>(path)? {
                    let array = AnyArray::from(array);
                    debug!(
                        "Read {} array of shape {:?} from {}",
                        array.dtype(),
                        array.shape(),
                        path.display()
                    );
                    return Ok(array);
                }
            )*
        };
    }

    attempt!(f64, f32, u16, i16, u8, i8, u32, i32, u64, i64);

    Err(NpyError::UnsupportedType {
        path: path.to_owned(),
    })
}

pub fn write_npy_any(path: impl AsRef<Path>, array: &AnyArrayD) -> Result<(), NpyError> {
    let path = path.as_ref();
    with_any!(array, a => write_npy(path, a)).map_err(|source| NpyError::Write {
        path: path.to_owned(),
        source,
    })?;
    debug!(
        "Wrote {} array of shape {:?} to {}",
        array.dtype(),
        array.shape(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn reads_back_the_written_element_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.npy");
        let array: AnyArrayD = array![[[1_i16, -2], [3, 4]]].into_dyn().into();

        write_npy_any(&path, &array).unwrap();
        let read = read_npy_any(&path).unwrap();

        assert_eq!(read, array);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_npy_any(dir.path().join("missing.npy")).unwrap_err();
        assert!(matches!(err, NpyError::Read { .. }));
    }
}
