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

//! Binary erosion and cell-body-aware dilation.
//!
//! Both passes are double-buffered: every cell decides its next state from the
//! grid as it was at the start of the pass, and the new grid is committed in one
//! go afterwards. This makes the result independent of scan order, and lets us
//! evaluate all cells in parallel.

use ndarray as nd;

use crate::{
  connectivity::{Connectivity, Position},
  grid::{Cell, Contact, GridStore, Label},
};

/// Outcome of one dilation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dilation {
  /// Background cells that joined a cell body
  pub grown: usize,
  /// Background cells that became watershed boundaries
  pub boundaries: usize,
}

/// One erosion pass: a foreground cell with at least one background neighbour
/// becomes background (and loses its cell body id). Positions outside of the
/// image are not neighbours, so the image edge by itself never erodes a cell.
/// Returns the number of eroded cells.
pub fn erode(grid: &mut GridStore, connectivity: Connectivity) -> usize {
  let table = grid.neighbour_table(connectivity);
  let cells = grid.cells();
  let next = nd::Zip::indexed(&cells).par_map_collect(|idx, &cell| {
    let exposed = cell.is_foreground()
      && table.indices(Position::from_index(idx)).any(|neigh| cells[neigh].label == Label::Background);
    if exposed {
      Cell::BACKGROUND
    } else {
      cell
    }
  });

  let eroded = count_changes(cells, next.view());
  grid.commit(next);
  eroded
}

/// One dilation pass. Every background cell looks at the distinct cell bodies
/// around it:
/// - none: it stays background;
/// - exactly one: it joins that cell body;
/// - two or more: it becomes a watershed boundary.
///
/// Two cells that join different cell bodies in the same pass would end up
/// touching. When that happens the one joining the higher id becomes a
/// watershed boundary instead. Watershed cells are never regrown or reassigned.
pub fn dilate(grid: &mut GridStore, connectivity: Connectivity) -> Dilation {
  //(1) Decide per cell, against the current grid
  let tentative = grid.sweep_contacts(connectivity, |cell, contact| {
    if cell.is_foreground() || cell.is_watershed() {
      return cell;
    }
    match contact {
      Contact::Isolated => cell,
      Contact::Single(body) => Cell { label: Label::Foreground, body },
      Contact::Contested(..) => Cell::WATERSHED,
    }
  });

  //(2) Resolve cells that grew into each other during this pass
  let table = grid.neighbour_table(connectivity);
  let cells = grid.cells();
  let next = nd::Zip::indexed(&tentative).and(&cells).par_map_collect(|idx, &new, &old| {
    if old.is_foreground() || !new.is_foreground() {
      return new;
    }
    let collides = table
      .indices(Position::from_index(idx))
      .map(|neigh| tentative[neigh])
      .any(|neigh| neigh.is_foreground() && neigh.has_body() && neigh.body < new.body);
    if collides {
      Cell::WATERSHED
    } else {
      new
    }
  });

  let mut report = Dilation::default();
  for (old, new) in cells.iter().zip(next.iter()) {
    if old != new {
      if new.is_watershed() {
        report.boundaries += 1;
      } else {
        report.grown += 1;
      }
    }
  }
  grid.commit(next);
  report
}

fn count_changes(old: nd::ArrayView2<Cell>, new: nd::ArrayView2<Cell>) -> usize {
  old.iter().zip(new.iter()).filter(|(old, new)| old != new).count()
}
