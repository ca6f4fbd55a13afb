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

//! Progress reporting. The transform tells a `StatusSink` when each pass starts
//! and how long it took; sinks never influence the result.

use std::{fmt, time::Duration};

/// Passes of the cellshed transform, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
  Extracting,
  Sorting,
  Thresholding,
  Eroding,
  Labelling,
  Dilating,
}

impl Stage {
  pub const fn name(self) -> &'static str {
    match self {
      Stage::Extracting => "extracting",
      Stage::Sorting => "sorting",
      Stage::Thresholding => "thresholding",
      Stage::Eroding => "eroding",
      Stage::Labelling => "labelling",
      Stage::Dilating => "dilating",
    }
  }

  /// Total number of passes a transform with `iterations` erosion/dilation
  /// steps executes.
  pub const fn passes(iterations: usize) -> usize {
    4 + 2 * iterations
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Receiver of progress events.
pub trait StatusSink: Send + Sync {
  /// Called when `stage` starts.
  fn stage(&self, stage: Stage);
  /// Called when `stage` has finished.
  fn elapsed(&self, stage: Stage, took: Duration);
  /// Called once after the last pass.
  fn finished(&self, _took: Duration) {}
}

/// Ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl StatusSink for Silent {
  fn stage(&self, _stage: Stage) {}
  fn elapsed(&self, _stage: Stage, _took: Duration) {}
}

/// Forwards events to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatus;

impl StatusSink for LogStatus {
  fn stage(&self, stage: Stage) {
    log::info!("{stage}");
  }

  fn elapsed(&self, stage: Stage, took: Duration) {
    log::debug!("{stage} took {} ms", took.as_millis());
  }

  fn finished(&self, took: Duration) {
    log::info!("cellshed transform took {} ms", took.as_millis());
  }
}

#[cfg(feature = "progress")]
pub use progress::ProgressStatus;

#[cfg(feature = "progress")]
mod progress {
  use super::*;

  /// Shows an `indicatif` progress bar that advances once per pass.
  #[derive(Clone)]
  pub struct ProgressStatus {
    bar: indicatif::ProgressBar,
  }

  impl ProgressStatus {
    /// Progress bar for a transform with `iterations` erosion/dilation steps.
    pub fn new(iterations: usize) -> Self {
      const TEMPLATE: &str = "{spinner}[{elapsed}/{duration}] {msg:>12} {pos}/{len}{bar:60}";
      let bar = indicatif::ProgressBar::new(Stage::passes(iterations) as u64);
      if let Ok(style) = indicatif::ProgressStyle::with_template(TEMPLATE) {
        bar.set_style(style);
      }
      ProgressStatus { bar }
    }
  }

  impl StatusSink for ProgressStatus {
    fn stage(&self, stage: Stage) {
      self.bar.set_message(stage.name());
      self.bar.tick();
    }

    fn elapsed(&self, _stage: Stage, _took: Duration) {
      self.bar.inc(1);
    }

    fn finished(&self, _took: Duration) {
      self.bar.finish();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stage_names() {
    let names: Vec<String> = [
      Stage::Extracting,
      Stage::Sorting,
      Stage::Thresholding,
      Stage::Eroding,
      Stage::Labelling,
      Stage::Dilating,
    ]
    .iter()
    .map(|stage| stage.to_string())
    .collect();
    assert_eq!(names, ["extracting", "sorting", "thresholding", "eroding", "labelling", "dilating"]);
  }

  #[test]
  fn pass_count() {
    assert_eq!(Stage::passes(0), 4);
    assert_eq!(Stage::passes(3), 10);
  }
}
