use crate::{enums::SortBy, metadata::SeriesMetadata, volume::Volume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder},
};
use dicom_dictionary_std::tags;
use ndarray::{Array3, s};
use rayon::prelude::*;
use std::{fs, path::Path};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Zero slice thickness was detected")]
    ZeroSliceThickness,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// Frames decoded from one DICOM object, with the key it sorts by.
struct DecodedObject {
    order: Option<f32>,
    index: usize,
    frames: Array3<u16>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// Every frame of every object becomes one slice. Stored pixel values
    /// are kept as they are, without modality or VOI LUT; the rescale
    /// parameters are reported in the returned [`SeriesMetadata`].
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<(Volume, SeriesMetadata), VolumeLoaderError> {
        let mut decoded: Vec<_> = dicom_objects
            .par_iter()
            .enumerate()
            .filter_map(|(index, dicom_object)| {
                Self::extract_image_with_order(index, dicom_object, sort_by)
            })
            .collect();

        if decoded.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        if decoded.len() < dicom_objects.len() {
            warn!(
                "Skipped {} DICOM objects without decodable images",
                dicom_objects.len() - decoded.len()
            );
        }

        Self::sort_images(&mut decoded, sort_by);
        Self::validate_dimensions(&decoded)?;

        let sorted: Vec<_> = decoded.iter().map(|d| &dicom_objects[d.index]).collect();
        let volume_array = Self::build_volume_array(&decoded);
        let spacing = Self::get_spacing(&sorted).ok_or(VolumeLoaderError::MissingSpacing)?;
        let origin = Self::get_origin(sorted[0]).unwrap_or_default();
        let volume = Volume::new(volume_array, spacing).with_origin(origin);

        let mut metadata = SeriesMetadata::from_object(sorted[0]);
        metadata.image_size = volume.dim();
        if let Some((min, max)) = volume.min_max() {
            metadata.min_pixel_value = f64::from(min);
            metadata.max_pixel_value = f64::from(max);
        }
        metadata.slice_direction = Self::get_slice_direction(&sorted)?;

        debug!("Loaded volume of {:?} voxels", volume.dim());
        Ok((volume, metadata))
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<(Volume, SeriesMetadata), VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<(Volume, SeriesMetadata), VolumeLoaderError> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        // stable order for SortBy::None
        paths.sort();

        debug!("Reading {} DICOM files from {}", paths.len(), path.as_ref().display());
        Self::load_from_file_paths(&paths, sort_by)
    }

    fn extract_image_with_order(
        index: usize,
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> Option<DecodedObject> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let frames = Self::decode_frames(dicom_object)?;
        Some(DecodedObject {
            order,
            index,
            frames,
        })
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    /// All frames of the first sample, shaped `(frames, rows, columns)`.
    fn decode_frames(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array3<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![.., .., .., 0]))
    }

    fn sort_images(decoded: &mut [DecodedObject], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            decoded.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            decoded.sort_by_key(|d| d.index);
        }
    }

    fn validate_dimensions(decoded: &[DecodedObject]) -> Result<(), VolumeLoaderError> {
        let (_, rows, columns) = decoded[0].frames.dim();
        if decoded.iter().any(|d| {
            let (_, r, c) = d.frames.dim();
            (r, c) != (rows, columns)
        }) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(decoded: &[DecodedObject]) -> Array3<u16> {
        let (_, height, width) = decoded[0].frames.dim();
        let depth = decoded.iter().map(|d| d.frames.dim().0).sum();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        let mut start = 0;
        for d in decoded {
            let count = d.frames.dim().0;
            volume
                .slice_mut(s![start..start + count, .., ..])
                .assign(&d.frames);
            start += count;
        }

        volume
    }

    /// `(x, y, z)` spacing from the first object carrying pixel spacing.
    fn get_spacing(
        dicom_objects: &[&FileDicomObject<InMemDicomObject>],
    ) -> Option<(f32, f32, f32)> {
        dicom_objects.iter().find_map(|dicom_object| {
            // rows (y) first, then columns (x)
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()?;
            let (row_spacing, column_spacing) = match pixel_spacing.as_slice() {
                [row, column, ..] => (*row, *column),
                [both] => (*both, *both),
                [] => return None,
            };

            let slice_spacing = [tags::SPACING_BETWEEN_SLICES, tags::SLICE_THICKNESS]
                .into_iter()
                .find_map(|tag| dicom_object.element(tag).ok()?.to_float32().ok())
                .unwrap_or(1.0);

            Some((column_spacing, row_spacing, slice_spacing))
        })
    }

    fn get_origin(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<(f32, f32, f32)> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float32()
            .ok()?;
        match pos.as_slice() {
            [x, y, z, ..] => Some((*x, *y, *z)),
            _ => None,
        }
    }

    /// Direction of the z position between the first two objects.
    fn get_slice_direction(
        sorted: &[&FileDicomObject<InMemDicomObject>],
    ) -> Result<Option<i8>, VolumeLoaderError> {
        let [first, second, ..] = sorted else {
            return Ok(None);
        };
        let (Some(p0), Some(p1)) = (Self::get_origin(first), Self::get_origin(second)) else {
            return Ok(None);
        };
        let delta = p1.2 - p0.2;
        if delta == 0.0 {
            return Err(VolumeLoaderError::ZeroSliceThickness);
        }
        Ok(Some(if delta > 0.0 { 1 } else { -1 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dicom_writer::{DicomWriteOptions, DicomWriter},
        enums::FileMode,
    };
    use ndarray::Array3;

    fn slices(shape: (usize, usize, usize)) -> Vec<FileDicomObject<InMemDicomObject>> {
        let array = Array3::from_shape_fn(shape, |(z, y, x)| (z * 100 + y * 10 + x) as f64);
        let options = DicomWriteOptions::new()
            .with_spacing_between_slices(3.0)
            .with_file_mode(FileMode::SlicePerFile);
        DicomWriter::build(array.view().into_dyn(), &options).unwrap()
    }

    #[test]
    fn sorts_slices_by_position() {
        let mut objects = slices((3, 2, 2));
        objects.reverse();

        let (volume, metadata) =
            VolumeLoader::load_from_dicom_objects(&objects, SortBy::ImagePositionPatient).unwrap();

        assert_eq!(volume.dim(), (3, 2, 2));
        assert_eq!(volume.spacing, (1.0, 1.0, 3.0));
        assert_eq!(volume.origin, (0.0, 0.0, 0.0));
        assert!(volume.data[[0, 1, 1]] < volume.data[[1, 0, 0]]);
        assert_eq!(volume.data[[2, 1, 1]], u16::MAX);
        assert_eq!(metadata.slice_direction, Some(1));
    }

    #[test]
    fn unsorted_keeps_object_order() {
        let mut objects = slices((2, 2, 2));
        objects.reverse();

        let (volume, _) = VolumeLoader::load_from_dicom_objects(&objects, SortBy::None).unwrap();
        assert_eq!(volume.data[[0, 1, 1]], u16::MAX);
    }

    #[test]
    fn rejects_mixed_image_sizes() {
        let mut objects = slices((1, 2, 2));
        objects.extend(slices((1, 3, 2)));
        assert!(matches!(
            VolumeLoader::load_from_dicom_objects(&objects, SortBy::None),
            Err(VolumeLoaderError::InconsistentDimensions)
        ));
    }

    #[test]
    fn same_position_is_zero_thickness() {
        let mut objects = slices((1, 2, 2));
        objects.extend(slices((1, 2, 2)));
        assert!(matches!(
            VolumeLoader::load_from_dicom_objects(&objects, SortBy::ImagePositionPatient),
            Err(VolumeLoaderError::ZeroSliceThickness)
        ));
    }

    #[test]
    fn no_objects_no_images() {
        assert!(matches!(
            VolumeLoader::load_from_dicom_objects(&[], SortBy::None),
            Err(VolumeLoaderError::NoValidImages)
        ));
    }
}
