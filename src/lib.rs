//! # conc-volume library
//!
//! This crate reads and writes the text headers of conc image files and
//! converts image volumes between numpy `.npy` arrays, DICOM series and VTK
//! structured points.
//!
//!  - [`header`]: parse a header into typed blocks and write it back
//!  - [`dicom_writer`]: normalize an array to `u16` and write it as one
//!    multi-frame DICOM file or as one file per slice
//!  - [`volume_loader`]: load a DICOM series into a [`Volume`] along with
//!    its [`SeriesMetadata`]
//!  - [`vtk`]: legacy `.vtk` and XML `.vti` structured points
//!  - [`npy`]: `.npy` arrays of any numeric element type
//!
//! DICOM files are loaded in parallel using rayon. A loaded volume can be
//! sliced along the three medical axes (axial, coronal and sagittal), and
//! coronal and sagittal slices can be interpolated to keep the aspect ratio
//! of the voxels.
//!
//! # Examples
//!
//! ## Converting an array into a DICOM series
//!
//! ```no_run
//! # use conc_volume::{DicomWriteOptions, DicomWriter, FileMode, npy::read_npy_any};
//! let array = read_npy_any("volume.npy")?.to_f64();
//! let options = DicomWriteOptions::new()
//!     .with_slice_thickness(2.0)
//!     .with_file_mode(FileMode::SlicePerFile);
//! let written = DicomWriter::write(array.view(), "out/volume.dcm", &options)?;
//! println!("wrote {} files", written.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Reading DICOM files into a volume
//!
//! Read all DICOM files from the `dicom/` directory, sort them by
//! InstanceNumber, then render the image at the center of the volume in the
//! sagittal axis.
//!
//! ```no_run
//! # use conc_volume::{VolumeLoader, Orientation, Interpolation, SortBy};
//! let (volume, metadata) = VolumeLoader::load_from_directory("dicom", SortBy::InstanceNumber)
//!     .expect("should have loaded files from directory");
//! let image = volume
//!     .get_image_from_axis(volume.dim().2 / 2, Orientation::Sagittal, Interpolation::Bilinear)
//!     .expect("should have returned image at center of volume");
//! image.save("result.png").expect("should have saved the image");
//! println!("{:?}", metadata.series_instance_uid);
//! ```

pub mod array;
pub mod dicom_writer;
pub mod enums;
pub mod header;
mod interpolator;
pub mod metadata;
pub mod npy;
pub mod volume;
pub mod volume_loader;
pub mod vtk;

pub use dicom_writer::{DicomWriteOptions, DicomWriter};
pub use enums::{FileMode, Interpolation, Orientation, SortBy, VtkFormat};
pub use header::HeaderDocument;
pub use metadata::SeriesMetadata;
pub use volume::{Rescale, Volume};
pub use volume_loader::VolumeLoader;

/// Version of this crate, written to the `SoftwareVersions` of DICOM output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
