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

//! The grid label store: per-pixel state shared by every pass of the transform.

use ndarray as nd;

use crate::{
  connectivity::{Connectivity, NeighbourTable, Neighbourhoods, Position},
  error::WatershedError,
  NO_CELL_BODY, WATERSHED,
};

/// Binary classification of a pixel during thresholding and morphology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Label {
  #[default]
  Background,
  Foreground,
}

/// State of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cell {
  pub label: Label,
  /// `NO_CELL_BODY`, a positive cell body id, or `WATERSHED`
  pub body: usize,
}

impl Cell {
  pub const BACKGROUND: Cell = Cell { label: Label::Background, body: NO_CELL_BODY };
  pub const FOREGROUND: Cell = Cell { label: Label::Foreground, body: NO_CELL_BODY };
  pub const WATERSHED: Cell = Cell { label: Label::Background, body: WATERSHED };

  #[inline(always)]
  pub fn is_foreground(&self) -> bool {
    self.label == Label::Foreground
  }

  #[inline(always)]
  pub fn is_watershed(&self) -> bool {
    self.body == WATERSHED
  }

  /// True if this cell belongs to an actual cell body.
  #[inline(always)]
  pub fn has_body(&self) -> bool {
    is_cell_body(self.body)
  }
}

/// True for ids that denote a cell body (so neither `NO_CELL_BODY` nor `WATERSHED`).
#[inline(always)]
pub fn is_cell_body(id: usize) -> bool {
  id != NO_CELL_BODY && id != WATERSHED
}

/// Summary of the distinct cell bodies around a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Contact {
  /// No neighbouring cell bodies
  #[default]
  Isolated,
  /// Every neighbouring cell body pixel carries this id
  Single(usize),
  /// At least two distinct ids; the first two in neighbour order
  Contested(usize, usize),
}

/// 2D store of `Cell`s with shape `(height, width)`.
///
/// Neighbour lists are precomputed once per store and looked up by position, so
/// cells never refer to each other directly. The per-cell set of neighbouring
/// cell bodies is cached until the grid is modified.
#[derive(Debug)]
pub struct GridStore {
  cells: nd::Array2<Cell>,
  neighbourhoods: Neighbourhoods,
  contacts: Option<(Connectivity, nd::Array2<Contact>)>,
}

impl GridStore {
  /// Creates an all-background grid.
  pub fn new(width: usize, height: usize) -> Result<Self, WatershedError> {
    Self::from_cells(nd::Array2::from_elem((height, width), Cell::BACKGROUND))
  }

  pub fn from_cells(cells: nd::Array2<Cell>) -> Result<Self, WatershedError> {
    let (height, width) = cells.dim();
    if width == 0 || height == 0 {
      Err(WatershedError::invalid(format!("image dimensions must be positive, got {width}x{height}")))?
    }
    match width.checked_mul(height) {
      Some(len) if len <= u32::MAX as usize => {}
      _ => Err(WatershedError::invalid(format!("image of {width}x{height} pixels is too large")))?,
    }
    Ok(GridStore { cells, neighbourhoods: Neighbourhoods::new(width, height), contacts: None })
  }

  pub fn width(&self) -> usize {
    self.cells.ncols()
  }

  pub fn height(&self) -> usize {
    self.cells.nrows()
  }

  pub fn cells(&self) -> nd::ArrayView2<Cell> {
    self.cells.view()
  }

  #[inline]
  pub fn cell(&self, pos: Position) -> Cell {
    self.cells[pos.index()]
  }

  pub fn set_label(&mut self, pos: Position, label: Label) {
    self.cells[pos.index()].label = label;
    self.contacts = None;
  }

  pub fn set_body(&mut self, pos: Position, body: usize) {
    self.cells[pos.index()].body = body;
    self.contacts = None;
  }

  /// Rewrites every cell body id with `f`, in parallel.
  pub fn map_bodies<F>(&mut self, f: F)
  where
    F: Fn(usize) -> usize + Sync + Send,
  {
    self.cells.par_mapv_inplace(|cell| Cell { body: f(cell.body), ..cell });
    self.contacts = None;
  }

  /// Replaces the whole grid with the result of a full sweep.
  pub fn commit(&mut self, next: nd::Array2<Cell>) {
    debug_assert_eq!(next.dim(), self.cells.dim());
    self.cells = next;
    self.contacts = None;
  }

  pub fn neighbour_table(&self, connectivity: Connectivity) -> &NeighbourTable {
    self.neighbourhoods.table(connectivity)
  }

  /// Precomputes the 4- and 8-connected neighbour lists of every cell.
  pub fn cache_neighbours(&self) {
    self.neighbourhoods.warm_up()
  }

  /// Distinct cell body ids around `pos`, in neighbour order.
  pub fn neighbour_bodies(&self, pos: Position, connectivity: Connectivity) -> Vec<usize> {
    let mut bodies = Vec::new();
    for idx in self.neighbour_table(connectivity).indices(pos) {
      let body = self.cells[idx].body;
      if is_cell_body(body) && !bodies.contains(&body) {
        bodies.push(body);
      }
    }
    bodies
  }

  /// Returns the cached neighbour contacts of all cells, recomputing them if the
  /// grid changed since the last call (or a different connectivity is asked for).
  pub fn contacts(&mut self, connectivity: Connectivity) -> nd::ArrayView2<Contact> {
    let GridStore { cells, neighbourhoods, contacts } = self;
    fresh_contacts(contacts, cells, neighbourhoods, connectivity).view()
  }

  /// Computes the next state of every cell from its current state and its
  /// neighbour contacts. All cells see the same snapshot; nothing is committed.
  pub fn sweep_contacts<F>(&mut self, connectivity: Connectivity, f: F) -> nd::Array2<Cell>
  where
    F: Fn(Cell, Contact) -> Cell + Sync + Send,
  {
    let GridStore { cells, neighbourhoods, contacts } = self;
    let contacts = fresh_contacts(contacts, cells, neighbourhoods, connectivity);
    nd::Zip::from(&*cells).and(contacts).par_map_collect(|&cell, &contact| f(cell, contact))
  }

  pub fn count_foreground(&self) -> usize {
    self.cells.iter().filter(|cell| cell.is_foreground()).count()
  }

  pub fn count_watershed(&self) -> usize {
    self.cells.iter().filter(|cell| cell.is_watershed()).count()
  }

  /// The cell body id of every pixel.
  pub fn bodies(&self) -> nd::Array2<usize> {
    self.cells.mapv(|cell| cell.body)
  }
}

fn fresh_contacts<'a>(
  cache: &'a mut Option<(Connectivity, nd::Array2<Contact>)>,
  cells: &nd::Array2<Cell>,
  neighbourhoods: &Neighbourhoods,
  connectivity: Connectivity,
) -> &'a nd::Array2<Contact> {
  if !matches!(cache, Some((conn, _)) if *conn == connectivity) {
    *cache = None;
  }
  let (_, contacts) = cache.get_or_insert_with(|| {
    let table = neighbourhoods.table(connectivity);
    let contacts = nd::Zip::indexed(cells)
      .par_map_collect(|idx, _| contact_at(cells, table, Position::from_index(idx)));
    (connectivity, contacts)
  });
  contacts
}

fn contact_at(cells: &nd::Array2<Cell>, table: &NeighbourTable, pos: Position) -> Contact {
  let mut contact = Contact::Isolated;
  for idx in table.indices(pos) {
    let body = cells[idx].body;
    if !is_cell_body(body) {
      continue;
    }
    contact = match contact {
      Contact::Isolated => Contact::Single(body),
      Contact::Single(first) if first != body => return Contact::Contested(first, body),
      unchanged => unchanged,
    };
  }
  contact
}
