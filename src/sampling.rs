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

//! Turning an intensity image into a ranked list of pixel samples.

use std::cmp::Ordering;

use ndarray as nd;
use rayon::prelude::*;

use crate::{connectivity::Position, error::WatershedError};

/// Upper end of the working range that intensities are rescaled into.
pub const RESCALED_MAX: f64 = 255.0;

/// A pixel that made it through the sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
  pub pos: Position,
  /// Rescaled value, always within `[0, RESCALED_MAX]`
  pub value: f64,
  /// Row-major scan rank of `pos`. Only used to break ties while sorting.
  pub seq: usize,
}

/// Range of raw intensities that gets mapped onto `[0, 255]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRange {
  /// Use the smallest and largest finite intensity of the input image.
  Auto,
  /// Use a caller-specified range. Intensities outside of it are dropped.
  Fixed { low: f64, high: f64 },
}

impl Default for ValueRange {
  fn default() -> Self {
    //8 bit images
    ValueRange::Fixed { low: 0.0, high: RESCALED_MAX }
  }
}

impl ValueRange {
  pub(crate) fn validate(&self) -> Result<(), WatershedError> {
    match *self {
      ValueRange::Auto => Ok(()),
      ValueRange::Fixed { low, high } => check_range(low, high),
    }
  }

  /// Returns the concrete `(low, high)` pair to be used for `img`.
  pub fn resolve(&self, img: nd::ArrayView2<f64>) -> Result<(f64, f64), WatershedError> {
    let (low, high) = match *self {
      ValueRange::Fixed { low, high } => (low, high),
      ValueRange::Auto => {
        let (low, high) = img
          .iter()
          .filter(|val| val.is_finite())
          .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &val| {
            (min.min(val), max.max(val))
          });
        if low > high {
          return Err(WatershedError::invalid("image contains no finite intensities"));
        }
        (low, high)
      }
    };
    check_range(low, high)?;
    Ok((low, high))
  }
}

fn check_range(low: f64, high: f64) -> Result<(), WatershedError> {
  if !low.is_finite() || !high.is_finite() {
    Err(WatershedError::invalid(format!("value range [{low}, {high}] is not finite")))
  } else if high <= low {
    Err(WatershedError::invalid(format!("degenerate value range [{low}, {high}]")))
  } else {
    Ok(())
  }
}

/// How raw intensities are mapped onto the working range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rescale {
  /// `255 - (value - low) * 255 / (high - low)`: bright pixels get low values and
  /// are thresholded first.
  #[default]
  Inverted,
  /// `(value - low) * 255 / (high - low)`: dark pixels get low values and are
  /// thresholded first.
  Direct,
}

impl Rescale {
  #[inline(always)]
  pub fn apply(self, value: f64, low: f64, high: f64) -> f64 {
    let scaled = (value - low) * RESCALED_MAX / (high - low);
    match self {
      Rescale::Inverted => RESCALED_MAX - scaled,
      Rescale::Direct => scaled,
    }
  }
}

/// Scans `img` in row-major order and returns one sample per pixel whose
/// rescaled value lies in `[0, 255]`. Everything else (including NaN) is dropped.
pub fn sample_pixels(
  img: nd::ArrayView2<f64>,
  range: ValueRange,
  rescale: Rescale,
) -> Result<Vec<Sample>, WatershedError> {
  let (low, high) = range.resolve(img.view())?;
  let width = img.ncols();

  Ok(
    img
      .indexed_iter()
      .filter_map(|(idx, &raw)| {
        let value = rescale.apply(raw, low, high);
        if (0.0..=RESCALED_MAX).contains(&value) {
          let pos = Position::from_index(idx);
          Some(Sample { pos, value, seq: pos.rank(width) })
        } else {
          None
        }
      })
      .collect(),
  )
}

/// Processing order of samples: ascending value, later scanned pixels first on
/// exact ties.
#[inline]
pub fn rank_order(a: &Sample, b: &Sample) -> Ordering {
  a.value.total_cmp(&b.value).then_with(|| b.seq.cmp(&a.seq))
}

/// Samples sorted by `rank_order`, ready to be consumed by the thresholder.
#[derive(Debug, Clone, Default)]
pub struct RankedPixels {
  samples: Vec<Sample>,
}

impl RankedPixels {
  pub fn new(mut samples: Vec<Sample>) -> Self {
    samples.par_sort_by(rank_order);
    RankedPixels { samples }
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
    self.samples.iter()
  }
}

impl<'a> IntoIterator for &'a RankedPixels {
  type Item = &'a Sample;
  type IntoIter = std::slice::Iter<'a, Sample>;

  fn into_iter(self) -> Self::IntoIter {
    self.samples.iter()
  }
}
