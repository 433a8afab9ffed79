//! Loading HRIR datasets laid out like CIPIC.
//!
//! A catalog is a directory of subjects.  A subject is a directory holding two WAV files per azimuth, named
//! `{azimuth}az{left|right}.wav` where a negative azimuth is written with `neg` in place of the minus sign
//! (`neg45azleft.wav`, `0azright.wav`).
//!
//! The files are stored "sideways": every channel is one tap of the impulse response, and every frame is one
//! elevation.  The impulse response for elevation `j` is therefore frame `j` read across all channels, i.e. tap `k` is
//! channel `k` at offset `j`.  Reading channel `j` as elevation `j` instead produces a set of plausible-looking but
//! completely wrong filters, so the tests pin this down.
//!
//! Loaded sets are immutable and shared between renderers as `Arc<HrirSet>`.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;

/// Subject directories are the subdirectories of a catalog whose names start with this.
pub const SUBJECT_PREFIX: &str = "subject";

/// Folder names tried at every level when searching for a catalog.
pub const CATALOG_DIR_NAMES: &[&str] = &["cipic", "CIPIC", "hrtf", "hrtf_database"];

/// How many ancestors of each search base are tried.
pub const MAX_PARENT_LEVELS: usize = 6;

/// The azimuths CIPIC measures at, finer near the median plane.
pub const CIPIC_AZIMUTHS: [f32; 25] = [
    -80.0, -65.0, -55.0, -45.0, -40.0, -35.0, -30.0, -25.0, -20.0, -15.0, -10.0, -5.0, 0.0, 5.0, 10.0,
    15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 45.0, 55.0, 65.0, 80.0,
];

/// CIPIC elevations are `-45 + 5.625 * k` for `k` in `0..50`, running over the head and down behind it.
pub const CIPIC_ELEVATION_COUNT: usize = 50;
const CIPIC_ELEVATION_START: f32 = -45.0;
const CIPIC_ELEVATION_STEP: f32 = 5.625;

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("the {axis} axis has no angles")]
    Empty { axis: &'static str },

    #[error("the {axis} axis is not strictly increasing at index {index}")]
    NotStrictlyIncreasing { axis: &'static str, index: usize },

    #[error("expected {expected} values in the {ear} arena but got {got}")]
    ArenaSize {
        ear: Ear,
        expected: usize,
        got: usize,
    },
}

/// The sorted azimuths and elevations an [HrirSet] is measured at.
#[derive(Clone, Debug, PartialEq)]
pub struct AngularGrid {
    azimuths: Vec<f32>,
    elevations: Vec<f32>,
}

fn validate_axis(axis: &'static str, values: &[f32]) -> Result<(), GridError> {
    if values.is_empty() {
        return Err(GridError::Empty { axis });
    }

    // `!(a < b)` rather than `a >= b` so that NaN is rejected too.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    if let Some(index) = values.windows(2).position(|w| !(w[0] < w[1])) {
        return Err(GridError::NotStrictlyIncreasing {
            axis,
            index: index + 1,
        });
    }

    Ok(())
}

/// Index of the value in `sorted` closest to `target`.  Ties go to the lower index.
fn nearest_index(sorted: &[f32], target: f32) -> usize {
    let upper = sorted.partition_point(|x| *x < target);
    if upper == 0 {
        return 0;
    }
    if upper == sorted.len() {
        return sorted.len() - 1;
    }

    let below = target - sorted[upper - 1];
    let above = sorted[upper] - target;
    if above < below {
        upper
    } else {
        upper - 1
    }
}

impl AngularGrid {
    pub fn new(azimuths: Vec<f32>, elevations: Vec<f32>) -> Result<Self, GridError> {
        validate_axis("azimuth", &azimuths)?;
        validate_axis("elevation", &elevations)?;
        Ok(Self {
            azimuths,
            elevations,
        })
    }

    /// The 25 x 50 CIPIC grid.
    pub fn cipic() -> Self {
        let elevations = (0..CIPIC_ELEVATION_COUNT)
            .map(|k| CIPIC_ELEVATION_START + CIPIC_ELEVATION_STEP * k as f32)
            .collect();
        Self {
            azimuths: CIPIC_AZIMUTHS.to_vec(),
            elevations,
        }
    }

    pub fn azimuths(&self) -> &[f32] {
        &self.azimuths
    }

    pub fn elevations(&self) -> &[f32] {
        &self.elevations
    }

    pub fn nearest_azimuth(&self, azimuth: f32) -> usize {
        nearest_index(&self.azimuths, azimuth)
    }

    pub fn nearest_elevation(&self, elevation: f32) -> usize {
        nearest_index(&self.elevations, elevation)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::Display)]
pub enum Ear {
    #[display(fmt = "left")]
    Left,
    #[display(fmt = "right")]
    Right,
}

/// One measured person: a name and where their files came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subject {
    pub name: String,
    pub path: PathBuf,
}

impl Subject {
    fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Subject {
            name,
            path: path.to_path_buf(),
        }
    }
}

/// A left and right impulse response for every cell of an [AngularGrid].
///
/// The responses live in two flat arenas, one per ear, with cell `(azimuth i, elevation j)` at
/// `(i * elevations + j) * impulse_len`.  All responses in a set have the same length.
#[derive(Debug)]
pub struct HrirSet {
    subject: Subject,
    grid: AngularGrid,
    impulse_len: usize,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl HrirSet {
    /// Build a set from already laid out arenas.
    ///
    /// An `impulse_len` of zero builds an empty set, which renderers refuse to bind.
    pub fn from_parts(
        subject: Subject,
        grid: AngularGrid,
        impulse_len: usize,
        left: Vec<f32>,
        right: Vec<f32>,
    ) -> Result<Self, GridError> {
        let expected = grid.azimuths.len() * grid.elevations.len() * impulse_len;
        for (ear, arena) in [(Ear::Left, &left), (Ear::Right, &right)] {
            if arena.len() != expected {
                return Err(GridError::ArenaSize {
                    ear,
                    expected,
                    got: arena.len(),
                });
            }
        }

        Ok(HrirSet {
            subject,
            grid,
            impulse_len,
            left,
            right,
        })
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn grid(&self) -> &AngularGrid {
        &self.grid
    }

    pub fn num_azimuths(&self) -> usize {
        self.grid.azimuths.len()
    }

    pub fn num_elevations(&self) -> usize {
        self.grid.elevations.len()
    }

    pub fn impulse_len(&self) -> usize {
        self.impulse_len
    }

    /// Number of cells with a response.
    pub fn len(&self) -> usize {
        if self.impulse_len == 0 {
            0
        } else {
            self.num_azimuths() * self.num_elevations()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell_range(&self, azimuth_index: usize, elevation_index: usize) -> std::ops::Range<usize> {
        assert!(azimuth_index < self.num_azimuths());
        assert!(elevation_index < self.num_elevations());
        let start = (azimuth_index * self.num_elevations() + elevation_index) * self.impulse_len;
        start..start + self.impulse_len
    }

    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn left(&self, azimuth_index: usize, elevation_index: usize) -> &[f32] {
        &self.left[self.cell_range(azimuth_index, elevation_index)]
    }

    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn right(&self, azimuth_index: usize, elevation_index: usize) -> &[f32] {
        &self.right[self.cell_range(azimuth_index, elevation_index)]
    }

    pub fn ear(&self, ear: Ear, azimuth_index: usize, elevation_index: usize) -> &[f32] {
        match ear {
            Ear::Left => self.left(azimuth_index, elevation_index),
            Ear::Right => self.right(azimuth_index, elevation_index),
        }
    }
}

/// What went wrong inside a subject directory.
#[derive(Debug, thiserror::Error)]
pub enum DatasetFault {
    #[error("missing {}", .0.display())]
    MissingFile(PathBuf),

    #[error("unable to read {}: {source}", path.display())]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("{} has no channels", .0.display())]
    NoChannels(PathBuf),

    #[error("{} has {frames} frames, but the grid has {elevations} elevations", path.display())]
    TooFewFrames {
        path: PathBuf,
        frames: usize,
        elevations: usize,
    },

    #[error("the loaded responses do not fit the grid: {0}")]
    Grid(#[from] GridError),

    #[error("{} has impulse responses of length {found}, but earlier files had {expected}", path.display())]
    InconsistentLength {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
}

/// A subject failed to load.  Nothing of it was kept.
#[derive(Debug, thiserror::Error)]
#[error("Unable to load HRIR subject {}: {fault}", subject_dir.display())]
pub struct DatasetLoadError {
    pub subject_dir: PathBuf,
    #[source]
    pub fault: DatasetFault,
}

/// The file holding one ear's responses at one azimuth.
pub fn hrir_file_name(azimuth: f32, ear: Ear) -> String {
    let sign = if azimuth < 0.0 { "neg" } else { "" };
    let magnitude = azimuth.abs().round() as u32;
    format!("{sign}{magnitude}az{ear}.wav")
}

/// Read one file and append its responses, elevation by elevation, to `arena`.
///
/// Returns the impulse length, which is the file's channel count.
fn append_transposed(path: &Path, elevations: usize, arena: &mut Vec<f32>) -> Result<usize, DatasetFault> {
    if !path.is_file() {
        return Err(DatasetFault::MissingFile(path.to_path_buf()));
    }

    let wav_err = |source| DatasetFault::Wav {
        path: path.to_path_buf(),
        source,
    };

    let reader = hound::WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();
    let taps = spec.channels as usize;
    if taps == 0 {
        return Err(DatasetFault::NoChannels(path.to_path_buf()));
    }

    let frames = reader.duration() as usize;
    if frames < elevations {
        return Err(DatasetFault::TooFewFrames {
            path: path.to_path_buf(),
            frames,
            elevations,
        });
    }

    // Interleaved samples put frame j's channels next to each other, so frame j is exactly the response for
    // elevation j.  Frames past the last elevation are ignored.
    let wanted = elevations * taps;
    arena.reserve(wanted);
    match spec.sample_format {
        hound::SampleFormat::Float => {
            for s in reader.into_samples::<f32>().take(wanted) {
                arena.push(s.map_err(wav_err)?);
            }
        }
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            for s in reader.into_samples::<i32>().take(wanted) {
                arena.push(s.map_err(wav_err)? as f32 * scale);
            }
        }
    }

    Ok(taps)
}

/// Load a subject measured on the CIPIC grid.
pub fn load_subject(subject_path: &Path) -> Result<HrirSet, DatasetLoadError> {
    load_subject_on_grid(subject_path, AngularGrid::cipic())
}

/// Load a subject whose files follow the CIPIC naming on some other grid.
pub fn load_subject_on_grid(
    subject_path: &Path,
    grid: AngularGrid,
) -> Result<HrirSet, DatasetLoadError> {
    let fail = |fault| DatasetLoadError {
        subject_dir: subject_path.to_path_buf(),
        fault,
    };

    let elevations = grid.elevations.len();
    let mut impulse_len: Option<usize> = None;
    let mut left = vec![];
    let mut right = vec![];

    for &azimuth in grid.azimuths.iter() {
        for (ear, arena) in [(Ear::Left, &mut left), (Ear::Right, &mut right)] {
            let path = subject_path.join(hrir_file_name(azimuth, ear));
            let taps = append_transposed(&path, elevations, arena).map_err(fail)?;

            match impulse_len {
                None => impulse_len = Some(taps),
                Some(expected) if expected != taps => {
                    return Err(fail(DatasetFault::InconsistentLength {
                        path,
                        expected,
                        found: taps,
                    }));
                }
                Some(_) => {}
            }
        }
    }

    let impulse_len = impulse_len.unwrap_or(0);
    HrirSet::from_parts(
        Subject::from_path(subject_path),
        grid,
        impulse_len,
        left,
        right,
    )
    .map_err(|e| fail(DatasetFault::Grid(e)))
}

/// Names of the subject directories directly under `root`, sorted.
///
/// A missing `root` has no subjects.
pub fn discover_subjects(root: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(root) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };

    let mut subjects = vec![];
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(SUBJECT_PREFIX) {
            subjects.push(name);
        }
    }

    subjects.sort();
    Ok(subjects)
}

fn has_subjects(dir: &Path) -> bool {
    dir.is_dir()
        && discover_subjects(dir)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
}

/// Search outward from each base for a catalog directory.
///
/// At each of up to [MAX_PARENT_LEVELS] ancestors, the directory itself and then each of [CATALOG_DIR_NAMES] under
/// it are tried.  The first one holding at least one subject wins.
pub fn find_catalog_directory(bases: &[PathBuf]) -> Option<PathBuf> {
    for base in bases {
        let mut level = Some(base.as_path());
        for _ in 0..=MAX_PARENT_LEVELS {
            let Some(dir) = level else {
                break;
            };

            if has_subjects(dir) {
                return Some(dir.to_path_buf());
            }

            for name in CATALOG_DIR_NAMES {
                let candidate = dir.join(name);
                if has_subjects(&candidate) {
                    return Some(candidate);
                }
            }

            level = dir.parent();
        }
    }

    None
}

/// The executable's directory and the working directory, in that order.
pub fn default_search_bases() -> Vec<PathBuf> {
    let mut bases = vec![];
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        bases.push(dir);
    }
    if let Ok(cwd) = std::env::current_dir() {
        bases.push(cwd);
    }
    bases
}

/// A catalog directory and the subject currently loaded from it.
pub struct HrtfCatalog {
    root: PathBuf,
    subjects: Vec<String>,
    current: Option<Arc<HrirSet>>,
}

impl HrtfCatalog {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let subjects = discover_subjects(&root)?;
        log::info!(
            "HRTF catalog {} has {} subjects",
            root.display(),
            subjects.len()
        );
        Ok(HrtfCatalog {
            root,
            subjects,
            current: None,
        })
    }

    /// Find a catalog from the default search bases and open it.
    pub fn locate() -> Option<Self> {
        let root = find_catalog_directory(&default_search_bases())?;
        match Self::open(root) {
            Ok(c) => Some(c),
            Err(e) => {
                log::warn!("Found an HRTF catalog but could not open it: {}", e);
                None
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    /// Load a subject, replacing the current one.
    ///
    /// On failure the current subject, if any, is kept.
    pub fn load(&mut self, subject: &str) -> Result<Arc<HrirSet>> {
        let started = Instant::now();
        let set = Arc::new(load_subject(&self.root.join(subject))?);
        log::info!(
            "Loaded HRIR subject {} ({} cells of {} taps) in {:?}",
            subject,
            set.len(),
            set.impulse_len(),
            started.elapsed()
        );
        self.current = Some(set.clone());
        Ok(set)
    }

    pub fn current(&self) -> Option<&Arc<HrirSet>> {
        self.current.as_ref()
    }
}
