//! Conversion of numeric arrays into DICOM files.
//!
//! The array is normalized to unsigned 16-bit values (see
//! [`Volume::from_array`]) and the linear map back to the original values
//! is stored in _Rescale Slope_ and _Rescale Intercept_. Files are written as
//! NM Image Storage objects in Explicit VR Little Endian, either as one
//! multi-frame file or as one file per slice.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use dicom::{
    core::{DataElement, PrimitiveValue, Tag, VR},
    object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject, WithMetaError, WriteError},
};
use dicom_dictionary_std::{tags, uids};
use ndarray::{ArrayViewD, s};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    VERSION,
    enums::FileMode,
    volume::{Rescale, Volume, VolumeError},
};

/// Implementation Class UID written to the file meta group.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.137038125948464847900039011591283709926";

const IMPLEMENTATION_VERSION_NAME: &str = "CONC_VOLUME";

const INSTITUTION: &str = "DicomConversionUtils";

#[derive(Debug, Error)]
pub enum DicomWriterError {
    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("{0} slices exceed the number of frames a DICOM file can describe")]
    TooManySlices(usize),

    #[error("Image of {rows}x{columns} pixels exceeds the DICOM image size limit")]
    ImageTooLarge { rows: usize, columns: usize },

    #[error("Could not build DICOM file meta group")]
    Meta(#[from] WithMetaError),

    #[error("Could not write DICOM file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: WriteError,
    },
}

/// Options for [`DicomWriter`].
///
/// Unset spacings default to 1; the spacing between slices falls back to
/// the slice thickness.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DicomWriteOptions {
    slice_thickness: Option<f64>,
    pixel_spacing: Option<(f64, f64)>,
    spacing_between_slices: Option<f64>,
    file_mode: FileMode,
    name: Option<String>,
}

impl DicomWriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slice_thickness(mut self, slice_thickness: f64) -> Self {
        self.slice_thickness = Some(slice_thickness);
        self
    }

    /// Spacing between rows and between columns, in that order.
    pub fn with_pixel_spacing(mut self, row_spacing: f64, column_spacing: f64) -> Self {
        self.pixel_spacing = Some((row_spacing, column_spacing));
        self
    }

    pub fn with_spacing_between_slices(mut self, spacing: f64) -> Self {
        self.spacing_between_slices = Some(spacing);
        self
    }

    pub fn with_file_mode(mut self, file_mode: FileMode) -> Self {
        self.file_mode = file_mode;
        self
    }

    /// Name used for the patient, study and series descriptions.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn slice_thickness(&self) -> f64 {
        self.slice_thickness.unwrap_or(1.0)
    }

    pub fn pixel_spacing(&self) -> (f64, f64) {
        self.pixel_spacing.unwrap_or((1.0, 1.0))
    }

    pub fn spacing_between_slices(&self) -> f64 {
        self.spacing_between_slices
            .unwrap_or_else(|| self.slice_thickness())
    }

    pub fn file_mode(&self) -> FileMode {
        self.file_mode
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("volume")
    }
}

/// Identifiers and time stamps shared by every object of one conversion.
struct Series {
    study_uid: String,
    series_uid: String,
    now: DateTime<Local>,
}

impl Series {
    fn new() -> Self {
        Self {
            study_uid: new_uid(),
            series_uid: new_uid(),
            now: Local::now(),
        }
    }

    fn date(&self) -> String {
        self.now.format("%Y%m%d").to_string()
    }

    fn time(&self) -> String {
        self.now.format("%H%M%S").to_string()
    }

    /// Thirteen digits derived from the creation time.
    fn accession_number(&self) -> String {
        let micros = self.now.timestamp_micros().unsigned_abs();
        format!("{:013}", micros % 10_000_000_000_000)
    }
}

pub struct DicomWriter;

impl DicomWriter {
    /// Build the DICOM objects for `array` without writing them.
    ///
    /// # Errors
    ///
    /// Fails for arrays that are not 2-D or 3-D, empty, contain non-finite
    /// values or exceed the DICOM size limits.
    pub fn build(
        array: ArrayViewD<'_, f64>,
        options: &DicomWriteOptions,
    ) -> Result<Vec<FileDicomObject<InMemDicomObject>>, DicomWriterError> {
        let (volume, rescale) = Volume::from_array(array)?;
        let (depth, rows, columns) = volume.dim();
        if rows > usize::from(u16::MAX) || columns > usize::from(u16::MAX) {
            return Err(DicomWriterError::ImageTooLarge { rows, columns });
        }

        let series = Series::new();
        let base = Self::base_object(&volume, rescale, options, &series);

        match options.file_mode() {
            FileMode::SingleFile => {
                if depth > usize::from(u16::MAX) {
                    return Err(DicomWriterError::TooManySlices(depth));
                }
                let mut obj = base;
                Self::put_multi_frame(&mut obj, &volume);
                Ok(vec![Self::with_meta(obj)?])
            }
            FileMode::SlicePerFile => (0..depth)
                .map(|index| {
                    let mut obj = base.clone();
                    Self::put_slice(&mut obj, &volume, index, options, &series);
                    Self::with_meta(obj)
                })
                .collect(),
        }
    }

    /// Convert `array` and write it to `path`.
    ///
    /// With [`FileMode::SlicePerFile`] each slice goes to
    /// `<stem>_<index>.dcm` next to `path`. Returns the written paths.
    pub fn write(
        array: ArrayViewD<'_, f64>,
        path: impl AsRef<Path>,
        options: &DicomWriteOptions,
    ) -> Result<Vec<PathBuf>, DicomWriterError> {
        let path = path.as_ref();
        let mut options = options.clone();
        if options.name.is_none() {
            if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
                options.name = Some(file_name.to_owned());
            }
        }

        let objects = Self::build(array, &options)?;
        let paths: Vec<PathBuf> = match options.file_mode() {
            FileMode::SingleFile => vec![path.to_owned()],
            FileMode::SlicePerFile => (0..objects.len()).map(|i| slice_path(path, i)).collect(),
        };

        for (obj, path) in objects.iter().zip(&paths) {
            obj.write_to_file(path)
                .map_err(|source| DicomWriterError::Write {
                    path: path.clone(),
                    source,
                })?;
            debug!("Wrote {}", path.display());
        }
        Ok(paths)
    }

    /// Attributes common to the single-file and per-slice layouts.
    fn base_object(
        volume: &Volume,
        rescale: Rescale,
        options: &DicomWriteOptions,
        series: &Series,
    ) -> InMemDicomObject {
        let (_, rows, columns) = volume.dim();
        let (date, time) = (series.date(), series.time());
        let name = options.name();
        let (row_spacing, column_spacing) = options.pixel_spacing();
        let image_type: &[&str] = match options.file_mode() {
            FileMode::SingleFile => &["DERIVED", "PRIMARY", "RECON TOMO", "EMISSION"],
            FileMode::SlicePerFile => &["DERIVED", "SECONDARY"],
        };

        let mut obj = InMemDicomObject::new_empty();
        put(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::NUCLEAR_MEDICINE_IMAGE_STORAGE);
        put(&mut obj, tags::MODALITY, VR::CS, "OT");
        put(&mut obj, tags::IMAGE_TYPE, VR::CS, strs(image_type.iter().copied()));

        for tag in [
            tags::CONTENT_DATE,
            tags::INSTANCE_CREATION_DATE,
            tags::SERIES_DATE,
            tags::STUDY_DATE,
            tags::PATIENT_BIRTH_DATE,
        ] {
            put(&mut obj, tag, VR::DA, date.as_str());
        }
        for tag in [
            tags::CONTENT_TIME,
            tags::INSTANCE_CREATION_TIME,
            tags::SERIES_TIME,
            tags::ACQUISITION_TIME,
            tags::STUDY_TIME,
        ] {
            put(&mut obj, tag, VR::TM, time.as_str());
        }

        put(&mut obj, tags::PATIENT_NAME, VR::PN, name);
        put(&mut obj, tags::PATIENT_ID, VR::LO, name);
        put(&mut obj, tags::PATIENT_AGE, VR::AS, "000Y");
        put(&mut obj, tags::PATIENT_SIZE, VR::DS, "1");
        put(&mut obj, tags::PATIENT_WEIGHT, VR::DS, "1");
        put(&mut obj, tags::PATIENT_SEX, VR::CS, "O");
        put(&mut obj, tags::STUDY_DESCRIPTION, VR::LO, name);
        put(&mut obj, tags::STUDY_ID, VR::SH, name);
        put(&mut obj, tags::SERIES_DESCRIPTION, VR::LO, name);
        put(&mut obj, tags::ACCESSION_NUMBER, VR::SH, series.accession_number());
        put(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, series.study_uid.as_str());
        put(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, series.series_uid.as_str());
        put(&mut obj, tags::FRAME_OF_REFERENCE_UID, VR::UI, series.study_uid.as_str());
        put(&mut obj, tags::SERIES_NUMBER, VR::IS, "0");
        put(&mut obj, tags::INSTANCE_NUMBER, VR::IS, "0");

        put(&mut obj, tags::MANUFACTURER, VR::LO, INSTITUTION);
        put(&mut obj, tags::INSTITUTION_NAME, VR::LO, INSTITUTION);
        put(&mut obj, tags::DEVICE_SERIAL_NUMBER, VR::LO, "");
        put(&mut obj, tags::SOFTWARE_VERSIONS, VR::LO, VERSION);
        put(&mut obj, tags::ACQUISITION_TERMINATION_CONDITION, VR::CS, "MANU");
        put(&mut obj, tags::BODY_PART_EXAMINED, VR::CS, "UNKNOWN");
        put(&mut obj, tags::INSTANCE_CREATOR_UID, VR::UI, IMPLEMENTATION_CLASS_UID);

        put(&mut obj, tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16));
        put(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
        put(&mut obj, tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16));
        put(&mut obj, tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16));
        put(&mut obj, tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16));
        put(&mut obj, tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16));
        put(&mut obj, tags::ROWS, VR::US, PrimitiveValue::from(rows as u16));
        put(&mut obj, tags::COLUMNS, VR::US, PrimitiveValue::from(columns as u16));

        put(
            &mut obj,
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            decimals(&[1.0, 0.0, 0.0, 0.0, -1.0, 0.0]),
        );
        put(&mut obj, tags::SLICE_THICKNESS, VR::DS, decimals(&[options.slice_thickness()]));
        put(
            &mut obj,
            tags::SPACING_BETWEEN_SLICES,
            VR::DS,
            decimals(&[options.spacing_between_slices()]),
        );
        put(&mut obj, tags::PIXEL_SPACING, VR::DS, decimals(&[row_spacing, column_spacing]));
        put(
            &mut obj,
            tags::NUMBER_OF_SLICES,
            VR::US,
            PrimitiveValue::from(volume.dim().0.min(usize::from(u16::MAX)) as u16),
        );
        put(&mut obj, tags::RESCALE_INTERCEPT, VR::DS, decimals(&[rescale.intercept]));
        put(&mut obj, tags::RESCALE_SLOPE, VR::DS, decimals(&[rescale.slope]));
        put(&mut obj, tags::UNITS, VR::CS, "NONE");
        put(&mut obj, tags::DECAY_CORRECTION, VR::CS, "NONE");

        obj
    }

    fn put_multi_frame(obj: &mut InMemDicomObject, volume: &Volume) {
        let depth = volume.dim().0;
        let sop_instance_uid = new_uid();

        put(obj, tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid.as_str());
        put(obj, tags::NUMBER_OF_FRAMES, VR::IS, depth.to_string());
        put(obj, tags::IMAGES_IN_ACQUISITION, VR::IS, depth.to_string());
        put(
            obj,
            tags::SLICE_VECTOR,
            VR::US,
            PrimitiveValue::U16((1..=depth as u16).collect()),
        );
        put(
            obj,
            tags::FRAME_INCREMENT_POINTER,
            VR::AT,
            PrimitiveValue::Tags([tags::SLICE_VECTOR].into_iter().collect()),
        );
        put(obj, tags::IMAGE_POSITION_PATIENT, VR::DS, decimals(&[0.0, 0.0, 0.0]));
        put(
            obj,
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(volume.data.iter().copied().collect()),
        );
    }

    fn put_slice(
        obj: &mut InMemDicomObject,
        volume: &Volume,
        index: usize,
        options: &DicomWriteOptions,
        series: &Series,
    ) {
        let location = index as f64 * options.spacing_between_slices();
        let sop_instance_uid = format!("{}.{}", series.series_uid, index + 1);

        put(obj, tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid.as_str());
        put(obj, tags::INSTANCE_NUMBER, VR::IS, index.to_string());
        put(
            obj,
            tags::IMAGE_INDEX,
            VR::US,
            PrimitiveValue::from(index.min(usize::from(u16::MAX)) as u16),
        );
        put(obj, tags::NUMBER_OF_TIME_SLICES, VR::US, PrimitiveValue::from(1_u16));
        put(obj, tags::FRAME_REFERENCE_TIME, VR::DS, decimals(&[0.0]));
        put(obj, tags::IMAGE_POSITION_PATIENT, VR::DS, decimals(&[0.0, 0.0, location]));
        put(obj, tags::SLICE_LOCATION, VR::DS, decimals(&[location]));
        put(
            obj,
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(volume.data.slice(s![index, .., ..]).iter().copied().collect()),
        );
    }

    fn with_meta(
        obj: InMemDicomObject,
    ) -> Result<FileDicomObject<InMemDicomObject>, DicomWriterError> {
        let sop_instance_uid = obj
            .element(tags::SOP_INSTANCE_UID)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|uid| uid.into_owned())
            .unwrap_or_else(new_uid);

        Ok(obj.with_meta(
            FileMetaTableBuilder::new()
                .media_storage_sop_class_uid(uids::NUCLEAR_MEDICINE_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(sop_instance_uid)
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .implementation_class_uid(IMPLEMENTATION_CLASS_UID)
                .implementation_version_name(IMPLEMENTATION_VERSION_NAME),
        )?)
    }
}

fn put(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: impl Into<PrimitiveValue>) {
    obj.put(DataElement::new(tag, vr, value.into()));
}

fn strs<'a>(values: impl IntoIterator<Item = &'a str>) -> PrimitiveValue {
    PrimitiveValue::Strs(values.into_iter().map(str::to_owned).collect())
}

/// Decimal string (DS) values, each at most 16 characters long.
fn decimals(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| decimal_string(*v)).collect())
}

fn decimal_string(value: f64) -> String {
    let plain = value.to_string();
    if plain.len() <= 16 {
        return plain;
    }
    (0..=10)
        .rev()
        .map(|precision| format!("{value:.precision$e}"))
        .find(|s| s.len() <= 16)
        .unwrap_or_else(|| format!("{value:e}"))
}

fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// `<stem>_<index>.dcm` next to `path`.
fn slice_path(path: &Path, index: usize) -> PathBuf {
    let is_dcm = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dcm"));
    let base = if is_dcm {
        path.with_extension("")
    } else {
        path.to_owned()
    };
    let mut file_name = base.file_name().unwrap_or_default().to_os_string();
    file_name.push(format!("_{index:06}.dcm"));
    base.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};
    use rstest::rstest;

    fn string(obj: &InMemDicomObject, tag: Tag) -> String {
        obj.element(tag).unwrap().to_str().unwrap().trim_end().to_owned()
    }

    #[rstest]
    #[case(1.0, "1")]
    #[case(0.5, "0.5")]
    #[case(-1.25, "-1.25")]
    #[case(1.0 / 65535.0, "1.5259021897e-5")]
    fn decimal_strings_fit_sixteen_characters(#[case] value: f64, #[case] expected: &str) {
        let text = decimal_string(value);
        assert_eq!(text, expected);
        assert!(text.len() <= 16);
    }

    #[rstest]
    #[case("out/volume.dcm", 3, "out/volume_000003.dcm")]
    #[case("out/volume.DCM", 0, "out/volume_000000.dcm")]
    #[case("out/volume", 12, "out/volume_000012.dcm")]
    fn slice_file_names(#[case] path: &str, #[case] index: usize, #[case] expected: &str) {
        assert_eq!(slice_path(Path::new(path), index), PathBuf::from(expected));
    }

    #[test]
    fn single_file_holds_every_frame() {
        let array = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 20 + y * 5 + x) as f64);
        let options = DicomWriteOptions::new()
            .with_slice_thickness(2.0)
            .with_pixel_spacing(0.5, 0.25)
            .with_name("phantom");

        let objects = DicomWriter::build(array.view().into_dyn(), &options).unwrap();

        assert_eq!(objects.len(), 1);
        let obj = &objects[0];
        assert_eq!(string(obj, tags::NUMBER_OF_FRAMES), "3");
        assert_eq!(obj.element(tags::ROWS).unwrap().to_int::<u16>().unwrap(), 4);
        assert_eq!(obj.element(tags::COLUMNS).unwrap().to_int::<u16>().unwrap(), 5);
        assert_eq!(string(obj, tags::PATIENT_NAME), "phantom");
        assert_eq!(
            obj.element(tags::PIXEL_SPACING).unwrap().to_multi_float64().unwrap(),
            vec![0.5, 0.25]
        );
        assert_eq!(
            obj.element(tags::SPACING_BETWEEN_SLICES).unwrap().to_float64().unwrap(),
            2.0
        );
        assert_eq!(
            obj.element(tags::RESCALE_INTERCEPT).unwrap().to_float64().unwrap(),
            0.0
        );
        let pixels = obj
            .element(tags::PIXEL_DATA)
            .unwrap()
            .to_multi_int::<u16>()
            .unwrap();
        assert_eq!(pixels.len(), 60);
        assert_eq!(pixels[0], 0);
        assert_eq!(pixels[59], u16::MAX);
        assert_eq!(
            obj.meta().media_storage_sop_class_uid.trim_end_matches('\0'),
            uids::NUCLEAR_MEDICINE_IMAGE_STORAGE
        );
    }

    #[test]
    fn slice_per_file_positions_slices() {
        let array = Array3::from_shape_fn((3, 2, 2), |(z, _, _)| z as f64);
        let options = DicomWriteOptions::new()
            .with_slice_thickness(1.5)
            .with_spacing_between_slices(3.0)
            .with_file_mode(FileMode::SlicePerFile);

        let objects = DicomWriter::build(array.view().into_dyn(), &options).unwrap();

        assert_eq!(objects.len(), 3);
        let series: Vec<_> = objects
            .iter()
            .map(|o| string(o, tags::SERIES_INSTANCE_UID))
            .collect();
        assert!(series.iter().all(|uid| uid == &series[0]));
        for (index, obj) in objects.iter().enumerate() {
            assert_eq!(string(obj, tags::INSTANCE_NUMBER), index.to_string());
            let position = obj
                .element(tags::IMAGE_POSITION_PATIENT)
                .unwrap()
                .to_multi_float64()
                .unwrap();
            assert_eq!(position, vec![0.0, 0.0, index as f64 * 3.0]);
            assert!(obj.element(tags::NUMBER_OF_FRAMES).is_err());
        }
    }

    #[test]
    fn rejects_one_dimensional_arrays() {
        let array = array![1.0, 2.0, 3.0];
        let err =
            DicomWriter::build(array.view().into_dyn(), &DicomWriteOptions::new()).unwrap_err();
        assert!(matches!(err, DicomWriterError::Volume(VolumeError::UnsupportedRank(1))));
    }

    #[test]
    fn options_fall_back_to_slice_thickness() {
        let options = DicomWriteOptions::new().with_slice_thickness(2.5);
        assert_eq!(options.spacing_between_slices(), 2.5);
        assert_eq!(options.pixel_spacing(), (1.0, 1.0));
        assert_eq!(DicomWriteOptions::new().spacing_between_slices(), 1.0);
    }
}
