use conc_volume::{
    DicomWriteOptions, DicomWriter, FileMode, SortBy, VolumeLoader, VtkFormat,
    array::{AnyArray, AnyArrayD},
    npy::{read_npy_any, write_npy_any},
    vtk::{self, ImageGeometry},
};
use ndarray::{Array3, ArrayD};
use pretty_assertions::assert_eq;
use rstest::rstest;

/// Values from -100 to 1080 spread over a `(4, 3, 5)` volume.
fn ramp() -> Array3<f64> {
    Array3::from_shape_fn((4, 3, 5), |(z, y, x)| (z * 15 + y * 5 + x) as f64 * 20.0 - 100.0)
}

#[rstest]
#[case::single_file(FileMode::SingleFile, 1, None)]
#[case::slice_per_file(FileMode::SlicePerFile, 4, Some(1))]
fn dicom_round_trip(
    #[case] file_mode: FileMode,
    #[case] expected_files: usize,
    #[case] slice_direction: Option<i8>,
) {
    let dir = tempfile::tempdir().unwrap();
    let input = ramp();
    let options = DicomWriteOptions::new()
        .with_slice_thickness(2.5)
        .with_pixel_spacing(0.5, 0.75)
        .with_file_mode(file_mode);

    let written =
        DicomWriter::write(input.view().into_dyn(), dir.path().join("ramp.dcm"), &options).unwrap();
    assert_eq!(written.len(), expected_files);
    assert!(written.iter().all(|path| path.exists()));

    let (volume, metadata) =
        VolumeLoader::load_from_directory(dir.path(), SortBy::default()).unwrap();
    assert_eq!(volume.dim(), (4, 3, 5));
    assert_eq!(volume.spacing, (0.75, 0.5, 2.5));
    assert_eq!(volume.data[[0, 0, 0]], 0);
    assert_eq!(volume.data[[3, 2, 4]], u16::MAX);

    assert_eq!(metadata.image_size, (4, 3, 5));
    assert_eq!(metadata.slice_direction, slice_direction);
    assert_eq!(metadata.series_description.as_deref(), Some("ramp.dcm"));
    assert_eq!(metadata.modality.as_deref(), Some("OT"));
    assert_eq!(metadata.pixel_spacing, Some(vec![0.5, 0.75]));
    assert_eq!(metadata.max_pixel_value, 65535.0);

    let slope = metadata.rescale_slope.unwrap();
    let intercept = metadata.rescale_intercept.unwrap();
    assert_eq!(intercept, -100.0);
    for ((z, y, x), &stored) in volume.data.indexed_iter() {
        let restored = f64::from(stored) * slope + intercept;
        assert!(
            (restored - input[[z, y, x]]).abs() < 0.05,
            "voxel {:?}: {} != {}",
            (z, y, x),
            restored,
            input[[z, y, x]]
        );
    }
}

#[test]
fn instance_number_order_follows_slices() {
    let dir = tempfile::tempdir().unwrap();
    let options = DicomWriteOptions::new().with_file_mode(FileMode::SlicePerFile);
    let written =
        DicomWriter::write(ramp().view().into_dyn(), dir.path().join("ramp"), &options).unwrap();

    // loading in reverse still yields ascending slices
    let reversed: Vec<_> = written.iter().rev().collect();
    let (volume, _) =
        VolumeLoader::load_from_file_paths(&reversed, SortBy::InstanceNumber).unwrap();
    let first_column: Vec<u16> = volume.data.slice(ndarray::s![.., 0, 0]).to_vec();
    let mut sorted = first_column.clone();
    sorted.sort_unstable();
    assert_eq!(first_column, sorted);
}

#[test]
fn empty_directory_has_no_images() {
    let dir = tempfile::tempdir().unwrap();
    assert!(VolumeLoader::load_from_directory(dir.path(), SortBy::None).is_err());
}

#[test]
fn npy_vtk_npy() {
    let dir = tempfile::tempdir().unwrap();
    let npy_path = dir.path().join("volume.npy");
    let vtk_path = dir.path().join("volume.vtk");
    let back_path = dir.path().join("back.npy");

    let array: AnyArrayD =
        Array3::from_shape_fn((3, 4, 2), |(z, y, x)| (z * 8 + y * 2 + x) as i16 - 10)
            .into_dyn()
            .into();
    write_npy_any(&npy_path, &array).unwrap();

    let volume = read_npy_any(&npy_path).unwrap().into_3d().unwrap();
    let geometry = ImageGeometry {
        origin: [0.0, 0.0, -5.0],
        spacing: [1.5, 1.5, 3.0],
    };
    vtk::write_any(&vtk_path, &volume, &geometry, VtkFormat::LegacyBinary).unwrap();

    let (read, read_geometry) = vtk::read_structured_points(&vtk_path).unwrap();
    assert_eq!(read_geometry, geometry);
    write_npy_any(&back_path, &read.into_dyn()).unwrap();

    assert_eq!(read_npy_any(&back_path).unwrap(), array);
}

#[test]
fn two_dimensional_npy_becomes_one_slice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plane.npy");
    write_npy_any(&path, &AnyArray::F32(ArrayD::from_elem(vec![6, 7], 1.5_f32))).unwrap();

    let array = read_npy_any(&path).unwrap();
    assert_eq!(array.dtype(), "float32");
    assert_eq!(array.into_3d().unwrap().shape(), &[1, 6, 7]);
}
