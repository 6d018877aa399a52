use crate::enums::{Interpolation, Orientation};
use crate::interpolator::Interpolator;

use image::{ImageBuffer, Luma};
use ndarray::{Array3, ArrayView2, ArrayViewD, Axis, Ix3, s};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

/// Largest stored pixel value of a normalized volume.
const STORED_MAX: f64 = u16::MAX as f64;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Cannot convert a {0}D array into a volume")]
    UnsupportedRank(usize),

    #[error("Cannot convert an empty array into a volume")]
    Empty,

    #[error("Array contains a non-finite value")]
    NonFiniteValue,
}

/// Linear map from stored pixel values back to the original values:
/// `value = stored * slope + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl Rescale {
    pub fn apply(&self, stored: u16) -> f64 {
        f64::from(stored) * self.slope + self.intercept
    }
}

/// A stack of `u16` slices with axes `(depth, height, width)`.
///
/// `spacing` and `origin` are given in `(x, y, z)` order.
#[derive(Debug, Clone, Default)]
pub struct Volume {
    pub data: Array3<u16>,
    pub spacing: (f32, f32, f32),
    pub origin: (f32, f32, f32),
}

impl Volume {
    pub fn new(data: Array3<u16>, spacing: (f32, f32, f32)) -> Self {
        Self {
            data,
            spacing,
            origin: (0.0, 0.0, 0.0),
        }
    }

    pub fn with_origin(mut self, origin: (f32, f32, f32)) -> Self {
        self.origin = origin;
        self
    }

    /// Normalize a 2-D or 3-D array to the full `u16` range.
    ///
    /// The minimum maps to 0 and the maximum to 65535, fractional results
    /// are truncated. A constant array maps to zeros with a slope of 1.
    /// A 2-D array becomes a volume of a single slice.
    pub fn from_array(array: ArrayViewD<'_, f64>) -> Result<(Self, Rescale), VolumeError> {
        let rank = array.ndim();
        let array = match rank {
            2 => array.insert_axis(Axis(0)),
            3 => array,
            _ => return Err(VolumeError::UnsupportedRank(rank)),
        };
        let array = array
            .into_dimensionality::<Ix3>()
            .map_err(|_| VolumeError::UnsupportedRank(rank))?;
        if array.is_empty() {
            return Err(VolumeError::Empty);
        }

        let (min, max) = array.iter().try_fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(min, max), &v| {
                if v.is_finite() {
                    Ok((min.min(v), max.max(v)))
                } else {
                    Err(VolumeError::NonFiniteValue)
                }
            },
        )?;
        let range = max - min;

        let mut scaled = array.to_owned();
        if range > 0.0 {
            scaled.par_mapv_inplace(|v| (v - min) / range * STORED_MAX);
        } else {
            scaled.fill(0.0);
        }
        let data = scaled.mapv(|v| v as u16);

        let rescale = Rescale {
            slope: if range > 0.0 { range / STORED_MAX } else { 1.0 },
            intercept: min,
        };
        Ok((Self::new(data, (1.0, 1.0, 1.0)), rescale))
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<u16> {
        &mut self.data
    }

    /// Smallest and largest stored value, `None` for an empty volume.
    pub fn min_max(&self) -> Option<(u16, u16)> {
        let min = self.data.iter().copied().min()?;
        let max = self.data.iter().copied().max()?;
        Some((min, max))
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, u16>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice = match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![.., .., index]),
        };
        Some(slice)
    }

    /// Render a slice as an 8-bit grayscale image windowed to the value
    /// range of the whole volume.
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        interpolation: Interpolation,
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let slice = self.get_slice_from_axis(index, orientation)?;
        let (low, high) = self.min_max()?;
        let window = (f32::from(low), f32::from(high));

        match interpolation {
            Interpolation::Bilinear if orientation != Orientation::Axial => {
                let (width, height) = self.get_output_dimensions(orientation);
                Self::interpolate_slice(&slice, width, height, window)
            }
            // axial slices keep their in-plane sampling
            _ => Self::slice_to_image(&slice, window),
        }
    }

    #[inline]
    fn normalize_to_u8(value: f32, (low, high): (f32, f32)) -> u8 {
        if high <= low {
            return 0;
        }
        ((value - low) / (high - low) * 255.0).clamp(0.0, 255.0) as u8
    }

    fn get_output_dimensions(&self, orientation: Orientation) -> (u32, u32) {
        let (depth, height, width) =
            Interpolator::get_isotropic_dimensions(self.spacing, self.dim());
        // Always return (width, height)
        match orientation {
            Orientation::Axial => (width, height),
            Orientation::Coronal => (width, depth),
            Orientation::Sagittal => (height, depth),
        }
    }

    fn slice_to_image(
        slice: &ArrayView2<'_, u16>,
        window: (f32, f32),
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (height, width) = slice.dim();
        let values: Vec<u16> = slice.iter().copied().collect();
        let pixel_data: Vec<u8> = values
            .into_par_iter()
            .map(|v| Self::normalize_to_u8(f32::from(v), window))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    fn interpolate_slice(
        slice: &ArrayView2<'_, u16>,
        width: u32,
        height: u32,
        window: (f32, f32),
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (slice_height, slice_width) = slice.dim();

        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                (0..width).map(move |x| {
                    // sample at pixel centres
                    let norm_x = (x as f32 + 0.5) / width as f32;
                    let norm_y = (y as f32 + 0.5) / height as f32;

                    let src_x = (norm_x * slice_width as f32 - 0.5)
                        .clamp(0.0, (slice_width - 1) as f32);
                    let src_y = (norm_y * slice_height as f32 - 0.5)
                        .clamp(0.0, (slice_height - 1) as f32);

                    let value = Interpolator::bilinear_interpolate(slice, src_y, src_x);
                    Self::normalize_to_u8(value, window)
                })
            })
            .collect();

        ImageBuffer::from_raw(width, height, pixel_data)
    }

    fn is_valid_index(&self, index: usize, orientation: Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, array};

    #[test]
    fn normalizes_to_full_range() {
        let input = array![[[-1.0, 0.0], [1.0, 3.0]]].into_dyn();
        let (volume, rescale) = Volume::from_array(input.view()).unwrap();

        assert_eq!(volume.dim(), (1, 2, 2));
        assert_eq!(volume.data[[0, 0, 0]], 0);
        assert_eq!(volume.data[[0, 1, 1]], u16::MAX);
        assert_eq!(rescale.intercept, -1.0);
        assert!((rescale.slope - 4.0 / 65535.0).abs() < 1e-12);
        assert!((rescale.apply(volume.data[[0, 1, 1]]) - 3.0).abs() < 1e-9);
        assert!((rescale.apply(volume.data[[0, 0, 1]]) - 0.0).abs() < 1e-3);
    }

    #[test]
    fn two_dimensional_input_is_one_slice() {
        let input = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn();
        let (volume, _) = Volume::from_array(input.view()).unwrap();
        assert_eq!(volume.dim(), (1, 2, 3));
    }

    #[test]
    fn constant_input_maps_to_zero() {
        let input = ArrayD::from_elem(vec![2, 2, 2], 7.5);
        let (volume, rescale) = Volume::from_array(input.view()).unwrap();
        assert!(volume.data.iter().all(|&v| v == 0));
        assert_eq!(rescale, Rescale { slope: 1.0, intercept: 7.5 });
    }

    #[test]
    fn rejects_unsupported_input() {
        let line = ArrayD::<f64>::zeros(vec![5]);
        assert!(matches!(
            Volume::from_array(line.view()),
            Err(VolumeError::UnsupportedRank(1))
        ));
        let four = ArrayD::<f64>::zeros(vec![1, 1, 1, 1]);
        assert!(matches!(
            Volume::from_array(four.view()),
            Err(VolumeError::UnsupportedRank(4))
        ));
        let empty = ArrayD::<f64>::zeros(vec![0, 3]);
        assert!(matches!(Volume::from_array(empty.view()), Err(VolumeError::Empty)));
        let nan = ArrayD::from_elem(vec![2, 2], f64::NAN);
        assert!(matches!(
            Volume::from_array(nan.view()),
            Err(VolumeError::NonFiniteValue)
        ));
    }

    #[test]
    fn slices_along_each_axis() {
        let data = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 100 + y * 10 + x) as u16);
        let volume = Volume::new(data, (1.0, 1.0, 1.0));

        let axial = volume.get_slice_from_axis(1, Orientation::Axial).unwrap();
        assert_eq!(axial.dim(), (3, 4));
        assert_eq!(axial[[2, 3]], 123);

        let coronal = volume.get_slice_from_axis(2, Orientation::Coronal).unwrap();
        assert_eq!(coronal.dim(), (2, 4));
        assert_eq!(coronal[[1, 0]], 120);

        let sagittal = volume.get_slice_from_axis(3, Orientation::Sagittal).unwrap();
        assert_eq!(sagittal.dim(), (2, 3));

        assert!(volume.get_slice_from_axis(4, Orientation::Sagittal).is_none());
    }

    #[test]
    fn preview_windows_to_volume_range() {
        let data = Array3::from_shape_fn((1, 2, 2), |(_, y, x)| (y * 2 + x) as u16 * 100);
        let volume = Volume::new(data, (1.0, 1.0, 1.0));

        let image = volume
            .get_image_from_axis(0, Orientation::Axial, Interpolation::None)
            .unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(0, 0).0, [0]);
        assert_eq!(image.get_pixel(1, 1).0, [255]);
    }

    #[test]
    fn interpolated_preview_is_isotropic() {
        let volume = Volume::new(Array3::zeros((4, 8, 8)), (1.0, 1.0, 2.0));
        let image = volume
            .get_image_from_axis(0, Orientation::Coronal, Interpolation::Bilinear)
            .unwrap();
        assert_eq!(image.dimensions(), (8, 8));
    }
}
