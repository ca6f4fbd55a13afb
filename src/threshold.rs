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

//! Thresholding of ranked samples into a binary grid.

use crate::{
  grid::{GridStore, Label},
  sampling::RankedPixels,
};

/// Labels every pixel of `ranked` whose value is strictly below `cutoff` as
/// `label`. Iteration stops at the first sample at or above the cutoff, which
/// is correct because `ranked` is sorted ascending. Returns the number of
/// pixels that were labelled.
pub fn threshold(ranked: &RankedPixels, grid: &mut GridStore, cutoff: f64, label: Label) -> usize {
  let mut count = 0;
  for sample in ranked.iter().take_while(|sample| sample.value < cutoff) {
    grid.set_label(sample.pos, label);
    count += 1;
  }
  count
}
