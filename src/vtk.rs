//! VTK structured points volumes.
//!
//! Writes legacy `.vtk` files (`DATASET STRUCTURED_POINTS`, ASCII or
//! big-endian binary scalars) and XML `.vti` image data, and reads legacy
//! files back. Arrays are shaped `(z, y, x)`; VTK stores the same values
//! with x varying fastest, so the data is written in the array's logical
//! order.

use std::{
    fmt::{Display, Write as _},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use ndarray::{Array3, ArrayView3, ShapeError};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    array::{AnyArray, AnyArray3, with_any},
    enums::VtkFormat,
};

#[derive(Debug, Error)]
pub enum VtkError {
    #[error("Could not read VTK file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not write VTK file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a legacy VTK file")]
    NotVtk,

    #[error("Unsupported VTK dataset `{0}`")]
    UnsupportedDataset(String),

    #[error("Unsupported scalar type `{0}`")]
    UnsupportedScalarType(String),

    #[error("Only single component scalars are supported, found {0} components")]
    UnsupportedComponents(usize),

    #[error("Malformed `{keyword}` line: {line}")]
    Malformed { keyword: &'static str, line: String },

    #[error("Missing `{0}` section")]
    Missing(&'static str),

    #[error("Expected {expected} point values, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("Header is not valid text")]
    Encoding,

    #[error("Point data does not fit the dimensions")]
    Shape(#[from] ShapeError),
}

/// Placement of a volume in space, both in `(x, y, z)` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageGeometry {
    pub origin: [f64; 3],
    pub spacing: [f64; 3],
}

impl Default for ImageGeometry {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            spacing: [1.0; 3],
        }
    }
}

/// Element types that can be stored as VTK scalars.
pub trait VtkScalar: Copy + Display + FromStr + 'static {
    /// Type name in legacy files.
    const LEGACY_NAME: &'static str;
    /// Type name in XML files.
    const XML_NAME: &'static str;
    const SIZE: usize;

    fn write_be(self, out: &mut Vec<u8>);
    fn read_be(bytes: &[u8]) -> Self;
}

macro_rules! vtk_scalar {
    ($($t:ty => $legacy:literal, $xml:literal;)*) => {
        $(
            impl VtkScalar for $t {
                const LEGACY_NAME: &'static str = $legacy;
                const XML_NAME: &'static str = $xml;
                const SIZE: usize = std::mem::size_of::<$t>();

                fn write_be(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_be_bytes());
                }

                fn read_be(bytes: &[u8]) -> Self {
                    let mut buf = [0; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_be_bytes(buf)
                }
            }
        )*
    };
}

vtk_scalar! {
    u8 => "unsigned_char", "UInt8";
    i8 => "char", "Int8";
    u16 => "unsigned_short", "UInt16";
    i16 => "short", "Int16";
    u32 => "unsigned_int", "UInt32";
    i32 => "int", "Int32";
    u64 => "vtktypeuint64", "UInt64";
    i64 => "vtktypeint64", "Int64";
    f32 => "float", "Float32";
    f64 => "double", "Float64";
}

/// Encode `data` in the requested format.
pub fn encode_structured_points<T: VtkScalar>(
    data: ArrayView3<'_, T>,
    geometry: &ImageGeometry,
    format: VtkFormat,
) -> Vec<u8> {
    match format {
        VtkFormat::LegacyBinary => encode_legacy(data, geometry, true),
        VtkFormat::LegacyAscii => encode_legacy(data, geometry, false),
        VtkFormat::XmlImageData => encode_xml(data, geometry).into_bytes(),
    }
}

pub fn write_structured_points<T: VtkScalar>(
    path: impl AsRef<Path>,
    data: ArrayView3<'_, T>,
    geometry: &ImageGeometry,
    format: VtkFormat,
) -> Result<(), VtkError> {
    let path = path.as_ref();
    let bytes = encode_structured_points(data, geometry, format);
    fs::write(path, bytes).map_err(|source| VtkError::Write {
        path: path.to_owned(),
        source,
    })?;
    debug!("Wrote {:?} VTK volume to {}", format, path.display());
    Ok(())
}

/// [`write_structured_points`] for an array of any element type.
pub fn write_any(
    path: impl AsRef<Path>,
    data: &AnyArray3,
    geometry: &ImageGeometry,
    format: VtkFormat,
) -> Result<(), VtkError> {
    with_any!(data, a => write_structured_points(path, a.view(), geometry, format))
}

pub fn read_structured_points(
    path: impl AsRef<Path>,
) -> Result<(AnyArray3, ImageGeometry), VtkError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| VtkError::Read {
        path: path.to_owned(),
        source,
    })?;
    let (data, geometry) = decode_structured_points(&bytes)?;
    debug!(
        "Read {} VTK volume of shape {:?} from {}",
        data.dtype(),
        data.shape(),
        path.display()
    );
    Ok((data, geometry))
}

fn encode_legacy<T: VtkScalar>(
    data: ArrayView3<'_, T>,
    geometry: &ImageGeometry,
    binary: bool,
) -> Vec<u8> {
    let (nz, ny, nx) = data.dim();
    let [ox, oy, oz] = geometry.origin;
    let [sx, sy, sz] = geometry.spacing;

    let mut header = String::new();
    let _ = write!(
        header,
        "# vtk DataFile Version 3.0\n\
         conc-volume\n\
         {}\n\
         DATASET STRUCTURED_POINTS\n\
         DIMENSIONS {nx} {ny} {nz}\n\
         SPACING {sx} {sy} {sz}\n\
         ORIGIN {ox} {oy} {oz}\n\
         POINT_DATA {}\n\
         SCALARS scalars {} 1\n\
         LOOKUP_TABLE default\n",
        if binary { "BINARY" } else { "ASCII" },
        data.len(),
        T::LEGACY_NAME,
    );

    let mut out = header.into_bytes();
    if binary {
        out.reserve(data.len() * T::SIZE + 1);
        for &v in data.iter() {
            v.write_be(&mut out);
        }
        out.push(b'\n');
    } else {
        let mut text = String::new();
        for (i, v) in data.iter().enumerate() {
            let sep = if (i + 1) % nx.max(1) == 0 { '\n' } else { ' ' };
            let _ = write!(text, "{v}{sep}");
        }
        out.extend_from_slice(text.as_bytes());
    }
    out
}

fn encode_xml<T: VtkScalar>(data: ArrayView3<'_, T>, geometry: &ImageGeometry) -> String {
    let (nz, ny, nx) = data.dim();
    let extent = format!(
        "0 {} 0 {} 0 {}",
        nx.saturating_sub(1),
        ny.saturating_sub(1),
        nz.saturating_sub(1)
    );
    let [ox, oy, oz] = geometry.origin;
    let [sx, sy, sz] = geometry.spacing;

    let mut values = String::new();
    for (i, v) in data.iter().enumerate() {
        if i > 0 {
            values.push(' ');
        }
        let _ = write!(values, "{v}");
    }

    format!(
        "<?xml version=\"1.0\"?>\n\
         <VTKFile type=\"ImageData\" version=\"0.1\" byte_order=\"LittleEndian\">\n\
         \x20 <ImageData WholeExtent=\"{extent}\" Origin=\"{ox} {oy} {oz}\" \
         Spacing=\"{sx} {sy} {sz}\">\n\
         \x20   <Piece Extent=\"{extent}\">\n\
         \x20     <PointData Scalars=\"scalars\">\n\
         \x20       <DataArray type=\"{}\" Name=\"scalars\" format=\"ascii\">\n\
         {values}\n\
         \x20       </DataArray>\n\
         \x20     </PointData>\n\
         \x20     <CellData>\n\
         \x20     </CellData>\n\
         \x20   </Piece>\n\
         \x20 </ImageData>\n\
         </VTKFile>\n",
        T::XML_NAME,
    )
}

/// Line-oriented cursor over a legacy file; the point data may be binary.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next_line(&mut self) -> Result<Option<&'a str>, VtkError> {
        if self.pos >= self.bytes.len() {
            return Ok(None);
        }
        let rest = &self.bytes[self.pos..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        self.pos += (end + 1).min(rest.len());
        let line = std::str::from_utf8(&rest[..end]).map_err(|_| VtkError::Encoding)?;
        Ok(Some(line.trim_end_matches('\r')))
    }

    /// Next line with content.
    fn next_content_line(&mut self) -> Result<Option<&'a str>, VtkError> {
        while let Some(line) = self.next_line()? {
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos.min(self.bytes.len())..]
    }
}

fn parse_numbers<T: FromStr, const N: usize>(
    keyword: &'static str,
    line: &str,
) -> Result<[T; N], VtkError> {
    let malformed = || VtkError::Malformed {
        keyword,
        line: line.to_owned(),
    };
    let values: Vec<T> = line
        .split_whitespace()
        .skip(1)
        .map(|token| token.parse::<T>().map_err(|_| malformed()))
        .collect::<Result<_, _>>()?;
    values.try_into().map_err(|_| malformed())
}

/// Decode a legacy structured points file held in memory.
pub fn decode_structured_points(bytes: &[u8]) -> Result<(AnyArray3, ImageGeometry), VtkError> {
    let mut cursor = Cursor { bytes, pos: 0 };

    let version = cursor.next_line()?.ok_or(VtkError::NotVtk)?;
    if !version.starts_with("# vtk DataFile") {
        return Err(VtkError::NotVtk);
    }
    let _title = cursor.next_line()?.ok_or(VtkError::NotVtk)?;
    let binary = match cursor.next_content_line()?.map(str::trim) {
        Some(mode) if mode.eq_ignore_ascii_case("BINARY") => true,
        Some(mode) if mode.eq_ignore_ascii_case("ASCII") => false,
        _ => return Err(VtkError::NotVtk),
    };

    let mut dimensions: Option<[usize; 3]> = None;
    let mut geometry = ImageGeometry::default();
    let mut scalar_type: Option<String> = None;

    while let Some(line) = cursor.next_content_line()? {
        let keyword = line.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
        match keyword.as_str() {
            "DATASET" => {
                let dataset = line.split_whitespace().nth(1).unwrap_or_default();
                if !dataset.eq_ignore_ascii_case("STRUCTURED_POINTS") {
                    return Err(VtkError::UnsupportedDataset(dataset.to_owned()));
                }
            }
            "DIMENSIONS" => {
                let dims: [usize; 3] = parse_numbers("DIMENSIONS", line)?;
                if dims.iter().try_fold(1_usize, |n, &d| n.checked_mul(d)).is_none() {
                    return Err(VtkError::Malformed {
                        keyword: "DIMENSIONS",
                        line: line.to_owned(),
                    });
                }
                dimensions = Some(dims);
            }
            "SPACING" | "ASPECT_RATIO" => geometry.spacing = parse_numbers("SPACING", line)?,
            "ORIGIN" => geometry.origin = parse_numbers("ORIGIN", line)?,
            "POINT_DATA" => {
                let [_count]: [usize; 1] = parse_numbers("POINT_DATA", line)?;
            }
            "SCALARS" => {
                let mut tokens = line.split_whitespace().skip(2);
                let type_name = tokens.next().ok_or_else(|| VtkError::Malformed {
                    keyword: "SCALARS",
                    line: line.to_owned(),
                })?;
                let components = match tokens.next() {
                    Some(n) => n.parse::<usize>().map_err(|_| VtkError::Malformed {
                        keyword: "SCALARS",
                        line: line.to_owned(),
                    })?,
                    None => 1,
                };
                if components != 1 {
                    return Err(VtkError::UnsupportedComponents(components));
                }
                scalar_type = Some(type_name.to_ascii_lowercase());
            }
            "LOOKUP_TABLE" => break,
            _ => return Err(VtkError::UnsupportedDataset(line.trim().to_owned())),
        }
    }

    let [nx, ny, nz] = dimensions.ok_or(VtkError::Missing("DIMENSIONS"))?;
    let scalar_type = scalar_type.ok_or(VtkError::Missing("SCALARS"))?;
    let shape = (nz, ny, nx);
    let rest = cursor.rest();

    macro_rules! decode_as {
        ($($t:ty => $variant:ident),*) => {
            match scalar_type.as_str() {
                $(
                    name if name == <$t as VtkScalar>::LEGACY_NAME => {
                        AnyArray::$variant(read_scalars::<$t>(rest, shape, binary)?)
                    }
                )*
                "unsigned_long" => AnyArray::U64(read_scalars::<u64>(rest, shape, binary)?),
                "long" => AnyArray::I64(read_scalars::<i64>(rest, shape, binary)?),
                other => return Err(VtkError::UnsupportedScalarType(other.to_owned())),
            }
        };
    }

    let data = decode_as!(
        u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32,
        i32 => I32, u64 => U64, i64 => I64, f32 => F32, f64 => F64
    );
    Ok((data, geometry))
}

fn read_scalars<T: VtkScalar>(
    rest: &[u8],
    shape: (usize, usize, usize),
    binary: bool,
) -> Result<Array3<T>, VtkError> {
    let expected = shape.0 * shape.1 * shape.2;
    let values: Vec<T> = if binary {
        let found = rest.len() / T::SIZE;
        if found < expected {
            return Err(VtkError::Truncated { expected, found });
        }
        rest.chunks_exact(T::SIZE)
            .take(expected)
            .map(T::read_be)
            .collect()
    } else {
        let text = std::str::from_utf8(rest).map_err(|_| VtkError::Encoding)?;
        let values = text
            .split_whitespace()
            .take(expected)
            .map(|token| {
                token.parse::<T>().map_err(|_| VtkError::Malformed {
                    keyword: "POINT_DATA",
                    line: token.to_owned(),
                })
            })
            .collect::<Result<Vec<T>, _>>()?;
        if values.len() < expected {
            return Err(VtkError::Truncated {
                expected,
                found: values.len(),
            });
        }
        values
    };
    Ok(Array3::from_shape_vec(shape, values)?)
}
