//! A CLI tool for conc headers and for converting image volumes between
//! numpy arrays, DICOM series and VTK files.
use std::{
    error::Error,
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use conc_volume::{
    DicomWriteOptions, DicomWriter, FileMode, HeaderDocument, Interpolation, Orientation,
    SeriesMetadata, SortBy, Volume, VolumeLoader, VtkFormat,
    array::AnyArray,
    dicom_writer::DicomWriterError,
    header::HeaderError,
    npy::{NpyError, read_npy_any, write_npy_any},
    volume::VolumeError,
    volume_loader::VolumeLoaderError,
    vtk::{self, ImageGeometry, VtkError},
};
use thiserror::Error;
use tracing::{Level, error, info};

/// Work with conc headers and convert image volumes
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// Print more information about what is read and written
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a conc header and write it back out
    Header {
        /// Path to the header file
        input: PathBuf,

        /// Path to the output (default is standard output)
        #[arg(short = 'o', long = "out")]
        output: Option<PathBuf>,

        /// Dump the parsed header as JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Convert a numpy array into DICOM
    NpyToDicom {
        /// Path to the `.npy` file
        input: PathBuf,

        /// Path to the DICOM file to write
        output: PathBuf,

        /// Slice thickness in mm
        #[arg(long)]
        slice_thickness: Option<f64>,

        /// Row and column spacing in mm
        #[arg(long, num_args = 2, value_names = ["ROW", "COLUMN"])]
        pixel_spacing: Option<Vec<f64>>,

        /// Distance between slice centres in mm (default is the slice thickness)
        #[arg(long)]
        spacing_between_slices: Option<f64>,

        /// Write one file per slice instead of a single multi-frame file
        #[arg(long)]
        split: bool,
    },

    /// Load a DICOM series into a numpy array
    DicomToNpy {
        /// A directory of `.dcm` files, or the files themselves
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Path to the `.npy` file to write
        #[arg(short = 'o', long = "out")]
        output: PathBuf,

        /// Attribute to order the slices by
        #[arg(long, value_enum, default_value_t)]
        sort_by: SortBy,

        /// Also write the series metadata as JSON to this path
        #[arg(long)]
        metadata: Option<PathBuf>,
    },

    /// Convert a numpy array into a VTK structured points file
    NpyToVtk {
        /// Path to the `.npy` file
        input: PathBuf,

        /// Path to the `.vtk` or `.vti` file to write
        output: PathBuf,

        /// Position of the first voxel
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"])]
        origin: Option<Vec<f64>>,

        /// Voxel size
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"])]
        spacing: Option<Vec<f64>>,

        /// Write legacy point data as text instead of binary
        #[arg(long)]
        ascii: bool,
    },

    /// Convert a legacy VTK structured points file into a numpy array
    VtkToNpy {
        /// Path to the `.vtk` file
        input: PathBuf,

        /// Path to the `.npy` file to write
        output: PathBuf,
    },

    /// Render one slice of a DICOM series as an image
    Preview {
        /// A directory of `.dcm` files, or the files themselves
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Path to the output image
        #[arg(short = 'o', long = "out")]
        output: PathBuf,

        /// Axis to slice along
        #[arg(long, value_enum, default_value_t)]
        orientation: Orientation,

        /// Slice index (default is the center of the volume)
        #[arg(long)]
        index: Option<usize>,

        /// Resample coronal and sagittal slices to isotropic pixels
        #[arg(long)]
        interpolate: bool,

        /// Attribute to order the slices by
        #[arg(long, value_enum, default_value_t)]
        sort_by: SortBy,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Npy(#[from] NpyError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    DicomWriter(#[from] DicomWriterError),

    #[error(transparent)]
    VolumeLoader(#[from] VolumeLoaderError),

    #[error(transparent)]
    Vtk(#[from] VtkError),

    #[error("Could not write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not serialize to JSON")]
    Json(#[from] serde_json::Error),

    #[error("Could not save image")]
    Image(#[from] image::ImageError),

    #[error("Slice {index} is out of range, the {orientation:?} axis has {len} slices")]
    SliceOutOfRange {
        index: usize,
        orientation: Orientation,
        len: usize,
    },
}

fn main() {
    let App { verbose, command } = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .finish(),
    )
    .unwrap_or_else(|e| {
        eprintln!("[ERROR] Could not set up global logging subscriber: {e}");
    });

    if let Err(e) = run(command) {
        error!("{}", report(&e));
        std::process::exit(-1);
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Header {
            input,
            output,
            json,
        } => header(&input, output.as_deref(), json),
        Command::NpyToDicom {
            input,
            output,
            slice_thickness,
            pixel_spacing,
            spacing_between_slices,
            split,
        } => {
            let mut options = DicomWriteOptions::new().with_file_mode(if split {
                FileMode::SlicePerFile
            } else {
                FileMode::SingleFile
            });
            if let Some(thickness) = slice_thickness {
                options = options.with_slice_thickness(thickness);
            }
            if let Some([row, column]) = pixel_spacing.as_deref() {
                options = options.with_pixel_spacing(*row, *column);
            }
            if let Some(spacing) = spacing_between_slices {
                options = options.with_spacing_between_slices(spacing);
            }
            npy_to_dicom(&input, &output, &options)
        }
        Command::DicomToNpy {
            inputs,
            output,
            sort_by,
            metadata,
        } => dicom_to_npy(&inputs, &output, sort_by, metadata.as_deref()),
        Command::NpyToVtk {
            input,
            output,
            origin,
            spacing,
            ascii,
        } => {
            let mut geometry = ImageGeometry::default();
            if let Some([x, y, z]) = origin.as_deref() {
                geometry.origin = [*x, *y, *z];
            }
            if let Some([x, y, z]) = spacing.as_deref() {
                geometry.spacing = [*x, *y, *z];
            }
            npy_to_vtk(&input, &output, &geometry, ascii)
        }
        Command::VtkToNpy { input, output } => vtk_to_npy(&input, &output),
        Command::Preview {
            inputs,
            output,
            orientation,
            index,
            interpolate,
            sort_by,
        } => {
            let interpolation = if interpolate {
                Interpolation::Bilinear
            } else {
                Interpolation::None
            };
            preview(&inputs, &output, sort_by, orientation, index, interpolation)
        }
    }
}

fn header(input: &Path, output: Option<&Path>, json: bool) -> Result<(), CliError> {
    let document = HeaderDocument::open(input)?;
    let rendered = if json {
        let mut text = serde_json::to_string_pretty(&document)?;
        text.push('\n');
        text
    } else {
        document.serialize()
    };

    match output {
        Some(path) => {
            std::fs::write(path, rendered).map_err(|source| CliError::Write {
                path: path.to_owned(),
                source,
            })?;
            info!("Wrote header with {} blocks to {}", document.blocks().count(), path.display());
        }
        None => io::stdout()
            .write_all(rendered.as_bytes())
            .map_err(|source| CliError::Write {
                path: PathBuf::from("<stdout>"),
                source,
            })?,
    }
    Ok(())
}

fn npy_to_dicom(input: &Path, output: &Path, options: &DicomWriteOptions) -> Result<(), CliError> {
    let array = read_npy_any(input)?.to_f64();
    let written = DicomWriter::write(array.view(), output, options)?;
    info!("Wrote {} DICOM files", written.len());
    Ok(())
}

fn load_series(inputs: &[PathBuf], sort_by: SortBy) -> Result<(Volume, SeriesMetadata), CliError> {
    let loaded = match inputs {
        [dir] if dir.is_dir() => VolumeLoader::load_from_directory(dir, sort_by)?,
        files => VolumeLoader::load_from_file_paths(files, sort_by)?,
    };
    Ok(loaded)
}

fn dicom_to_npy(
    inputs: &[PathBuf],
    output: &Path,
    sort_by: SortBy,
    metadata_path: Option<&Path>,
) -> Result<(), CliError> {
    let (volume, metadata) = load_series(inputs, sort_by)?;
    write_npy_any(output, &AnyArray::U16(volume.data.into_dyn()))?;
    info!("Wrote volume of shape {:?} to {}", metadata.image_size, output.display());

    if let Some(path) = metadata_path {
        let write_error = |source| CliError::Write {
            path: path.to_owned(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(write_error)?);
        serde_json::to_writer_pretty(&mut writer, &metadata)?;
        writer.flush().map_err(write_error)?;
        info!("Wrote series metadata to {}", path.display());
    }
    Ok(())
}

fn npy_to_vtk(
    input: &Path,
    output: &Path,
    geometry: &ImageGeometry,
    ascii: bool,
) -> Result<(), CliError> {
    let array = read_npy_any(input)?.into_3d()?;
    let is_xml = output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("vti"));
    let format = match (is_xml, ascii) {
        (true, _) => VtkFormat::XmlImageData,
        (false, true) => VtkFormat::LegacyAscii,
        (false, false) => VtkFormat::LegacyBinary,
    };
    vtk::write_any(output, &array, geometry, format)?;
    info!("Wrote {} volume of shape {:?} to {}", array.dtype(), array.shape(), output.display());
    Ok(())
}

fn vtk_to_npy(input: &Path, output: &Path) -> Result<(), CliError> {
    let (array, _) = vtk::read_structured_points(input)?;
    let array = array.into_dyn();
    write_npy_any(output, &array)?;
    info!("Wrote {} array of shape {:?} to {}", array.dtype(), array.shape(), output.display());
    Ok(())
}

fn preview(
    inputs: &[PathBuf],
    output: &Path,
    sort_by: SortBy,
    orientation: Orientation,
    index: Option<usize>,
    interpolation: Interpolation,
) -> Result<(), CliError> {
    let (volume, _) = load_series(inputs, sort_by)?;
    let (depth, height, width) = volume.dim();
    let len = match orientation {
        Orientation::Axial => depth,
        Orientation::Coronal => height,
        Orientation::Sagittal => width,
    };
    let index = index.unwrap_or(len / 2);

    let image = volume
        .get_image_from_axis(index, orientation, interpolation)
        .ok_or(CliError::SliceOutOfRange {
            index,
            orientation,
            len,
        })?;
    image.save(output)?;
    info!("Wrote {:?} slice {} to {}", orientation, index, output.display());
    Ok(())
}

/// The error and all of its sources on one line.
fn report(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
