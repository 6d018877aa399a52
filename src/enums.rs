use clap::ValueEnum;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Orientation {
    #[default]
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Resample coronal and sagittal slices to isotropic pixels
    Bilinear,
    #[default]
    None,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// How an array is laid out over DICOM files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FileMode {
    /// One multi-frame file holding every slice
    #[default]
    SingleFile,
    /// One file per slice
    SlicePerFile,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VtkFormat {
    /// Legacy `.vtk` structured points, big-endian binary data
    #[default]
    LegacyBinary,
    /// Legacy `.vtk` structured points, ASCII data
    LegacyAscii,
    /// XML `.vti` image data
    XmlImageData,
}
