//! Descriptive attributes of a loaded DICOM series.

use dicom::core::Tag;
use dicom::object::{FileDicomObject, InMemDicomObject, mem::InMemElement};
use dicom_dictionary_std::tags;
use serde::Serialize;

/// Attributes gathered from the first object of a series, plus values
/// computed over the whole volume.
///
/// Serializes with the DICOM keywords as field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SeriesMetadata {
    pub study_description: Option<String>,
    pub series_description: Option<String>,
    pub acquisition_date_time: Option<String>,
    pub acquisition_time: Option<String>,
    pub image_orientation_patient: Option<Vec<f64>>,
    pub image_position_patient: Option<Vec<f64>>,
    pub patient_orientation: Option<String>,
    pub patient_position: Option<String>,
    pub slice_thickness: Option<f64>,
    pub pixel_spacing: Option<Vec<f64>>,
    /// `(depth, height, width)`
    pub image_size: (usize, usize, usize),
    pub largest_image_pixel_value: Option<i64>,
    pub smallest_image_pixel_value: Option<i64>,
    pub max_pixel_value: f64,
    pub min_pixel_value: f64,
    pub units: Option<String>,
    pub rescale_intercept: Option<f64>,
    pub rescale_slope: Option<f64>,
    pub window_center: Option<f64>,
    pub window_width: Option<f64>,
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: Option<String>,
    pub modality: Option<String>,
    /// `1` when slice positions increase along the stack, `-1` otherwise
    pub slice_direction: Option<i8>,
    pub actual_frame_duration: Option<i64>,
    #[serde(flatten)]
    pub radiopharmaceutical: Option<RadiopharmaceuticalInfo>,
}

/// First item of the _Radiopharmaceutical Information Sequence_.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RadiopharmaceuticalInfo {
    pub radiopharmaceutical: Option<String>,
    pub radiopharmaceutical_start_time: Option<String>,
    pub radionuclide_total_dose: Option<f64>,
    pub radionuclide_half_life: Option<f64>,
    pub radionuclide_positron_fraction: Option<f64>,
    pub radiopharmaceutical_start_date_time: Option<String>,
}

impl SeriesMetadata {
    /// Read the attributes of `dicom_object`; volume-wide values are left at
    /// their defaults for the loader to fill in.
    pub fn from_object(dicom_object: &FileDicomObject<InMemDicomObject>) -> Self {
        let obj: &InMemDicomObject = dicom_object;

        let acquisition_date_time = text(obj, tags::ACQUISITION_DATE_TIME).or_else(|| {
            match (text(obj, tags::ACQUISITION_DATE), text(obj, tags::ACQUISITION_TIME)) {
                (Some(date), Some(time)) => Some(date + &time),
                (date, time) => date.or(time),
            }
        });

        Self {
            study_description: text(obj, tags::STUDY_DESCRIPTION),
            series_description: text(obj, tags::SERIES_DESCRIPTION),
            acquisition_date_time,
            acquisition_time: text(obj, tags::ACQUISITION_TIME),
            image_orientation_patient: floats(obj, tags::IMAGE_ORIENTATION_PATIENT),
            image_position_patient: floats(obj, tags::IMAGE_POSITION_PATIENT),
            patient_orientation: text(obj, tags::PATIENT_ORIENTATION),
            patient_position: text(obj, tags::PATIENT_POSITION),
            slice_thickness: float(obj, tags::SLICE_THICKNESS),
            pixel_spacing: floats(obj, tags::PIXEL_SPACING),
            largest_image_pixel_value: int(obj, tags::LARGEST_IMAGE_PIXEL_VALUE),
            smallest_image_pixel_value: int(obj, tags::SMALLEST_IMAGE_PIXEL_VALUE),
            units: text(obj, tags::UNITS),
            rescale_intercept: float(obj, tags::RESCALE_INTERCEPT),
            rescale_slope: float(obj, tags::RESCALE_SLOPE),
            window_center: float(obj, tags::WINDOW_CENTER),
            window_width: float(obj, tags::WINDOW_WIDTH),
            series_instance_uid: text(obj, tags::SERIES_INSTANCE_UID),
            modality: text(obj, tags::MODALITY),
            actual_frame_duration: int(obj, tags::ACTUAL_FRAME_DURATION),
            radiopharmaceutical: RadiopharmaceuticalInfo::from_object(obj),
            ..Self::default()
        }
    }
}

impl RadiopharmaceuticalInfo {
    fn from_object(obj: &InMemDicomObject) -> Option<Self> {
        let item = obj
            .element(tags::RADIOPHARMACEUTICAL_INFORMATION_SEQUENCE)
            .ok()?
            .items()?
            .first()?;

        Some(Self {
            radiopharmaceutical: text(item, tags::RADIOPHARMACEUTICAL),
            radiopharmaceutical_start_time: text(item, tags::RADIOPHARMACEUTICAL_START_TIME),
            radionuclide_total_dose: float(item, tags::RADIONUCLIDE_TOTAL_DOSE),
            radionuclide_half_life: float(item, tags::RADIONUCLIDE_HALF_LIFE),
            radionuclide_positron_fraction: float(item, tags::RADIONUCLIDE_POSITRON_FRACTION),
            radiopharmaceutical_start_date_time: text(
                item,
                tags::RADIOPHARMACEUTICAL_START_DATE_TIME,
            ),
        })
    }
}

fn element(obj: &InMemDicomObject, tag: Tag) -> Option<&InMemElement> {
    obj.element(tag).ok()
}

fn text(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = element(obj, tag)?.to_str().ok()?;
    let value = value.trim_end_matches(['\0', ' ']).trim_start();
    (!value.is_empty()).then(|| value.to_owned())
}

fn float(obj: &InMemDicomObject, tag: Tag) -> Option<f64> {
    element(obj, tag)?.to_float64().ok()
}

fn floats(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    element(obj, tag)?.to_multi_float64().ok()
}

fn int(obj: &InMemDicomObject, tag: Tag) -> Option<i64> {
    element(obj, tag)?.to_int::<i64>().ok()
}
