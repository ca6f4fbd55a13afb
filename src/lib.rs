/*
  Copyright© 2023 Raúl Wolters(1)

  This file is part of rustronomy-cellshed.

  rustronomy is free software: you can redistribute it and/or modify it under
  the terms of the European Union Public License version 1.2 or later, as
  published by the European Commission.

  rustronomy is distributed in the hope that it will be useful, but WITHOUT ANY
  WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
  A PARTICULAR PURPOSE. See the European Union Public License for more details.

  You should have received a copy of the EUPL in an/all official language(s) of
  the European Union along with rustronomy.  If not, see
  <https://ec.europa.eu/info/european-union-public-licence_en/>.

  (1) Resident of the Kingdom of the Netherlands; agreement between licensor and
  licensee subject to Dutch law as per article 15 of the EUPL.
*/

#![doc(
  html_logo_url = "https://raw.githubusercontent.com/smups/rustronomy/main/logos/Rustronomy_ferris.png?raw=true"
)]
//! Rustronomy-cellshed is a pure-rust implementation of a threshold-erode-label-dilate
//! watershed, used to separate touching cell bodies in grayscale microscopy images.
//!
//! # How it works
//! The transform runs a fixed sequence of passes over a 2D intensity image:
//! 1. every pixel is rescaled to `[0, 255]` and ranked by value;
//! 2. all pixels below the cutoff are marked *foreground*;
//! 3. the foreground is eroded a configurable number of times, so that cells that
//! only touch through a thin neck fall apart;
//! 4. the remaining connected foreground regions are labelled with a cell body id;
//! 5. the labelled regions are dilated back the same number of times. Wherever
//! two different cell bodies would grow into each other, a *watershed* pixel is
//! placed instead, so the bodies stay separated.
//!
//! The output is an image of cell body ids: `NO_CELL_BODY` (0) for background,
//! a positive id for every cell body and `WATERSHED` (`usize::MAX`) for the
//! separating boundaries.
//!
//! # Quickstart
//! To use the latest release of Rustronomy-cellshed in a cargo project, add
//! the rustronomy-cellshed crate as a dependency to your `Cargo.toml` file:
//! ```toml
//! [dependencies]
//! rustronomy-cellshed = "0.1.0"
//! ```
//!
//! ## Short example: separating two touching cells
//! `rustronomy-cellshed` uses the "builder pattern" to configure the transform
//! before executing it. Create a `TransformBuilder`, set the options you need and
//! call `build()` to obtain a (`Sync`&`Send`) transform object.
//! ```rust
//! use rustronomy_cellshed::prelude::*;
//! use ndarray as nd;
//!
//! //Two bright squares that touch at a single corner pixel
//! let mut img = nd::Array2::<f64>::zeros((9, 9));
//! img.slice_mut(nd::s![0..5, 0..5]).fill(255.0);
//! img.slice_mut(nd::s![4..9, 4..9]).fill(255.0);
//!
//! let cellshed = TransformBuilder::new().set_iterations(1).build().unwrap();
//! let labels = cellshed.transform(img.view()).unwrap();
//! assert_eq!(cellshed.count_cell_bodies(labels.view()), 2);
//! assert!(cellshed.count_watershed(labels.view()) > 0);
//! ```
//!
//! # Cargo feature gates
//! *By default, all features behind cargo feature gates are **disabled***
//! - `jemalloc`: this feature enables the [jemalloc allocator](https://jemalloc.net).
//! Jemalloc is enabled though usage of the `jemallocator` crate, which increases
//! compile times considerably but can improve run-time performance on machines
//! with many cores. jemalloc must be installed on the host system.
//! - `progress`: this feature adds the `ProgressStatus` sink, which drives an
//! `indicatif` progress bar with one tick per pass.
//! - `debug`: this feature prints a performance summary after each transform.
//! Enabling this feature does not add additional dependencies.

//Unconditional imports
use std::{
  collections::{BTreeMap, HashSet},
  time::{Duration, Instant},
};

use ndarray as nd;
use num_traits::ToPrimitive;

//Set Jemalloc as the global allocator for this crate
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

pub mod connectivity;
pub mod error;
pub mod grid;
pub mod labelling;
pub mod morphology;
pub mod sampling;
pub mod status;
pub mod threshold;

pub use connectivity::{Connectivity, Position};
pub use error::WatershedError;
pub use grid::{Cell, Label};
pub use sampling::{Rescale, ValueRange};
pub use status::{LogStatus, Silent, Stage, StatusSink};

#[cfg(feature = "progress")]
pub use status::ProgressStatus;

use grid::{is_cell_body, GridStore};
use sampling::{sample_pixels, RankedPixels};

/// Cell body id of pixels that do not belong to any cell body
pub const NO_CELL_BODY: usize = 0;
/// Cell body id of the boundary pixels between two cell bodies
pub const WATERSHED: usize = usize::MAX;
/// Default cutoff, in rescaled units
pub const DEFAULT_THRESHOLD: f64 = 126.0;

//Utility prelude for batch import
pub mod prelude {
  pub use crate::{
    CellShed, Connectivity, LogStatus, Rescale, Silent, Stage, StatusSink, TransformBuilder,
    ValueRange, Watershed, WatershedError, WatershedUtils, NO_CELL_BODY, WATERSHED,
  };
  #[cfg(feature = "progress")]
  pub use crate::ProgressStatus;
}

////////////////////////////////////////////////////////////////////////////////
//                              HELPER FUNCTIONS                              //
////////////////////////////////////////////////////////////////////////////////

/// Runs a single pass and reports its start and duration to `sink`.
fn timed<T>(sink: &dyn StatusSink, stage: Stage, pass: impl FnOnce() -> T) -> (T, Duration) {
  sink.stage(stage);
  let start = Instant::now();
  let out = pass();
  let took = start.elapsed();
  sink.elapsed(stage, took);
  (out, took)
}

pub type History = Vec<(Stage, nd::Array2<Cell>)>;

fn snapshot(history: &mut Option<&mut History>, stage: Stage, grid: &GridStore) {
  if let Some(history) = history {
    history.push((stage, grid.cells().to_owned()));
  }
}

////////////////////////////////////////////////////////////////////////////////
//                              OPTIONAL MODULES                              //
////////////////////////////////////////////////////////////////////////////////

#[cfg(feature = "debug")]
mod performance_monitoring {
  use crate::Stage;
  use std::time::Duration;

  #[derive(Clone, Debug, Default)]
  pub struct PerfReport {
    pub extract_ms: usize,
    pub sort_ms: usize,
    pub threshold_ms: usize,
    pub erode_ms: Vec<usize>,
    pub label_ms: usize,
    pub dilate_ms: Vec<usize>,
    pub foreground: usize,
    pub merges: usize,
    pub total_ms: usize,
  }

  impl PerfReport {
    pub fn record(&mut self, stage: Stage, took: Duration) {
      let ms = took.as_millis() as usize;
      match stage {
        Stage::Extracting => self.extract_ms = ms,
        Stage::Sorting => self.sort_ms = ms,
        Stage::Thresholding => self.threshold_ms = ms,
        Stage::Eroding => self.erode_ms.push(ms),
        Stage::Labelling => self.label_ms = ms,
        Stage::Dilating => self.dilate_ms.push(ms),
      }
    }
    pub fn erode_avg(&self) -> f64 {
      self.erode_total() / self.erode_ms.len().max(1) as f64
    }
    pub fn erode_total(&self) -> f64 {
      self.erode_ms.iter().map(|&x| x as f64).sum()
    }
    pub fn dilate_avg(&self) -> f64 {
      self.dilate_total() / self.dilate_ms.len().max(1) as f64
    }
    pub fn dilate_total(&self) -> f64 {
      self.dilate_ms.iter().map(|&x| x as f64).sum()
    }
  }

  impl std::fmt::Display for PerfReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      writeln!(f, ">---------[Performance Summary]---------")?;
      writeln!(f, ">  Extracting: {}ms; Sorting: {}ms", self.extract_ms, self.sort_ms)?;
      writeln!(f, ">  Thresholding: {}ms ({} px)", self.threshold_ms, self.foreground)?;
      writeln!(f, ">  Erosion Average: {:.1}ms; Σ {:.0}ms", self.erode_avg(), self.erode_total())?;
      writeln!(f, ">  Labelling: {}ms ({} merges)", self.label_ms, self.merges)?;
      writeln!(f, ">  Dilation Average: {:.1}ms; Σ {:.0}ms", self.dilate_avg(), self.dilate_total())?;
      writeln!(f, ">--------------------------------+ total")?;
      writeln!(
        f,
        ">  {}ms with {:.1}ms overhead (Δt)",
        self.total_ms,
        self.total_ms as f64
          - (self.extract_ms + self.sort_ms + self.threshold_ms + self.label_ms) as f64
          - self.erode_total()
          - self.dilate_total()
      )
    }
  }
}

////////////////////////////////////////////////////////////////////////////////
//                             CELLSHED TRANSFORM                             //
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
/// Builder for configuring a cellshed transform.
///
/// `TransformBuilder::new()` starts from the defaults (cutoff 126, one
/// erosion/dilation step, 8-connectivity, a fixed `[0, 255]` value range and an
/// inverted rescale). Once you have set the desired options, a transform object
/// can be generated with the `build()` associated function.
pub struct TransformBuilder {
  threshold: f64,
  iterations: usize,
  connectivity: Connectivity,
  value_range: ValueRange,
  rescale: Rescale,
}

impl Default for TransformBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl TransformBuilder {
  /// creates a new `TransformBuilder` with the default configuration
  pub fn new() -> Self {
    TransformBuilder {
      threshold: DEFAULT_THRESHOLD,
      iterations: 1,
      connectivity: Connectivity::default(),
      value_range: ValueRange::default(),
      rescale: Rescale::default(),
    }
  }

  /// Set the cutoff. Pixels whose rescaled value is strictly below the cutoff
  /// become foreground.
  pub fn set_threshold(mut self, threshold: f64) -> Self {
    self.threshold = threshold;
    self
  }

  /// Set the number of erosion passes, which is also the number of dilation
  /// passes. Zero iterations skips both.
  pub fn set_iterations(mut self, iterations: usize) -> Self {
    self.iterations = iterations;
    self
  }

  /// Set the pixel adjacency used by every pass.
  pub fn set_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = connectivity;
    self
  }

  /// Set the raw intensity range that is mapped onto `[0, 255]`.
  pub fn set_value_range(mut self, value_range: ValueRange) -> Self {
    self.value_range = value_range;
    self
  }

  /// Set the direction of the rescale.
  pub fn set_rescale(mut self, rescale: Rescale) -> Self {
    self.rescale = rescale;
    self
  }

  /// Build a `CellShed` transform from the current builder configuration. This
  /// function returns an `Err` if the cutoff is NaN or the configured value
  /// range is degenerate.
  pub fn build(self) -> Result<CellShed, WatershedError> {
    if self.threshold.is_nan() {
      return Err(WatershedError::invalid("cutoff must be a number"));
    }
    self.value_range.validate()?;

    Ok(CellShed {
      threshold: self.threshold,
      iterations: self.iterations,
      connectivity: self.connectivity,
      value_range: self.value_range,
      rescale: self.rescale,
    })
  }
}

/// This trait contains useful functions for preparing input images and for
/// inspecting the output of a cellshed transform.
pub trait WatershedUtils {
  /// Converts an image of any numeric data-type `T` into `f64` intensities.
  /// Values that have no `f64` representation become `NaN`, which the transform
  /// ignores.
  fn pre_processor<T>(&self, img: nd::ArrayView2<T>) -> nd::Array2<f64>
  where
    T: ToPrimitive + Clone,
  {
    img.mapv(|x| x.to_f64().unwrap_or(f64::NAN))
  }

  /// Number of distinct cell bodies in a label image.
  fn count_cell_bodies(&self, labels: nd::ArrayView2<usize>) -> usize {
    labels.iter().copied().filter(|&id| is_cell_body(id)).collect::<HashSet<_>>().len()
  }

  /// Number of watershed pixels in a label image.
  fn count_watershed(&self, labels: nd::ArrayView2<usize>) -> usize {
    labels.iter().filter(|&&id| id == WATERSHED).count()
  }
}

/// Trait for performing the cellshed transform. This trait is dyn-safe, which
/// means that trait objects may be constructed from it.
pub trait Watershed {
  /// Returns the cell body id of every pixel of `input`, reporting progress to
  /// `sink`.
  fn transform_with_status(
    &self,
    input: nd::ArrayView2<f64>,
    sink: &dyn StatusSink,
  ) -> Result<nd::Array2<usize>, WatershedError>;

  /// Returns the cell body id of every pixel of `input`. Progress is forwarded
  /// to the `log` facade.
  fn transform(&self, input: nd::ArrayView2<f64>) -> Result<nd::Array2<usize>, WatershedError> {
    self.transform_with_status(input, &LogStatus)
  }

  /// Returns the area (in pixels) of every cell body, sorted by cell body id.
  fn transform_to_list(
    &self,
    input: nd::ArrayView2<f64>,
  ) -> Result<Vec<(usize, usize)>, WatershedError>;

  /// Returns a snapshot of the grid after thresholding, after every erosion pass,
  /// after labelling and after every dilation pass.
  ///
  /// **Caution**: every snapshot is a full copy of the grid.
  fn transform_history(&self, input: nd::ArrayView2<f64>) -> Result<History, WatershedError>;
}

impl WatershedUtils for CellShed {}
impl WatershedUtils for dyn Watershed {}
impl WatershedUtils for dyn Watershed + Send + Sync {}

/// Implementation of the threshold-erode-label-dilate watershed.
///
/// See crate-level documentation for a general introduction to the algorithm.
///
/// # Memory usage
/// The transform keeps one grid of `Cell`s the size of the input, a sorted list
/// of samples, and a precomputed neighbour table (4 bytes per neighbour). Every
/// erosion or dilation pass allocates one extra grid, which is swapped in once
/// the pass completes.
///
/// # Artifacts and peculiarities
/// Pixels outside of the image are not neighbours. A foreground region that
/// touches the image edge is therefore not eroded from that side.
#[derive(Debug, Clone)]
pub struct CellShed {
  threshold: f64,
  iterations: usize,
  connectivity: Connectivity,
  value_range: ValueRange,
  rescale: Rescale,
}

impl CellShed {
  pub fn threshold(&self) -> f64 {
    self.threshold
  }

  pub fn iterations(&self) -> usize {
    self.iterations
  }

  pub fn connectivity(&self) -> Connectivity {
    self.connectivity
  }

  fn execute(
    &self,
    input: nd::ArrayView2<f64>,
    sink: &dyn StatusSink,
    mut history: Option<&mut History>,
  ) -> Result<GridStore, WatershedError> {
    let run_start = Instant::now();
    let (height, width) = input.dim();
    let mut grid = GridStore::new(width, height)?;
    let conn = self.connectivity;

    #[cfg(feature = "debug")]
    let mut perf = performance_monitoring::PerfReport::default();

    //(1) Turn pixels into samples
    let (samples, _took) = timed(sink, Stage::Extracting, || {
      sample_pixels(input, self.value_range, self.rescale)
    });
    let samples = samples?;
    #[cfg(feature = "debug")]
    perf.record(Stage::Extracting, _took);

    //(2) Rank them
    let (ranked, _took) = timed(sink, Stage::Sorting, || RankedPixels::new(samples));
    #[cfg(feature = "debug")]
    perf.record(Stage::Sorting, _took);

    //(3) Everything below the cutoff becomes foreground
    let (foreground, _took) = timed(sink, Stage::Thresholding, || {
      threshold::threshold(&ranked, &mut grid, self.threshold, Label::Foreground)
    });
    log::debug!("{foreground} of {} pixels are foreground", width * height);
    snapshot(&mut history, Stage::Thresholding, &grid);
    #[cfg(feature = "debug")]
    {
      perf.record(Stage::Thresholding, _took);
      perf.foreground = foreground;
    }

    //(4) Break thin necks between touching cells
    for _ in 0..self.iterations {
      let (eroded, _took) = timed(sink, Stage::Eroding, || morphology::erode(&mut grid, conn));
      log::trace!("eroded {eroded} pixels");
      snapshot(&mut history, Stage::Eroding, &grid);
      #[cfg(feature = "debug")]
      perf.record(Stage::Eroding, _took);
    }

    //(5) Give every remaining connected region its own id
    let (labelling, _took) =
      timed(sink, Stage::Labelling, || labelling::label_cell_bodies(&mut grid, conn));
    let _labelling = labelling?;
    snapshot(&mut history, Stage::Labelling, &grid);
    #[cfg(feature = "debug")]
    {
      perf.record(Stage::Labelling, _took);
      perf.merges = _labelling.merges;
    }

    //(6) Grow the cell bodies back, separating them where they meet
    for _ in 0..self.iterations {
      let (dilation, _took) = timed(sink, Stage::Dilating, || morphology::dilate(&mut grid, conn));
      log::trace!("grew {} pixels, {} new boundary pixels", dilation.grown, dilation.boundaries);
      snapshot(&mut history, Stage::Dilating, &grid);
      #[cfg(feature = "debug")]
      perf.record(Stage::Dilating, _took);
    }

    let total = run_start.elapsed();
    sink.finished(total);
    #[cfg(feature = "debug")]
    {
      perf.total_ms = total.as_millis() as usize;
      println!("{perf}");
    }

    Ok(grid)
  }
}

impl Watershed for CellShed {
  fn transform_with_status(
    &self,
    input: nd::ArrayView2<f64>,
    sink: &dyn StatusSink,
  ) -> Result<nd::Array2<usize>, WatershedError> {
    Ok(self.execute(input, sink, None)?.bodies())
  }

  fn transform_to_list(
    &self,
    input: nd::ArrayView2<f64>,
  ) -> Result<Vec<(usize, usize)>, WatershedError> {
    let grid = self.execute(input, &LogStatus, None)?;
    let mut areas = BTreeMap::<usize, usize>::new();
    for cell in grid.cells().iter().filter(|cell| cell.has_body()) {
      *areas.entry(cell.body).or_default() += 1;
    }
    Ok(areas.into_iter().collect())
  }

  fn transform_history(&self, input: nd::ArrayView2<f64>) -> Result<History, WatershedError> {
    //thresholding, labelling and one per erosion/dilation
    let mut history = Vec::with_capacity(2 + 2 * self.iterations);
    self.execute(input, &LogStatus, Some(&mut history))?;
    Ok(history)
  }
}

/// Runs the cellshed transform on a flat, row-major `intensity` buffer of
/// `width * height` pixels and returns the cell body id of every pixel as a
/// `(height, width)` array.
///
/// Uses the default value range and rescale of `TransformBuilder`.
pub fn run(
  intensity: &[f64],
  width: usize,
  height: usize,
  cutoff: f64,
  iterations: usize,
  connectivity: Connectivity,
) -> Result<nd::Array2<usize>, WatershedError> {
  if width == 0 || height == 0 {
    return Err(WatershedError::invalid(format!("image of {width}x{height} pixels is empty")));
  }
  if width.checked_mul(height) != Some(intensity.len()) {
    return Err(WatershedError::invalid(format!(
      "got {} intensities for an image of {width}x{height} pixels",
      intensity.len()
    )));
  }
  let input = nd::ArrayView2::from_shape((height, width), intensity)
    .map_err(|err| WatershedError::invalid(err.to_string()))?;

  TransformBuilder::new()
    .set_threshold(cutoff)
    .set_iterations(iterations)
    .set_connectivity(connectivity)
    .build()?
    .transform(input)
}
