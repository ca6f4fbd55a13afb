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

//! Pixel connectivity: which grid positions count as neighbours of each other.
//!
//! Neighbour order is fixed. The 8-connected neighbourhood is walked clockwise
//! starting north-east, the 4-connected one as west, north, east, south. Later
//! passes rely on this order to resolve ties deterministically.

use std::{fmt, str::FromStr, sync::OnceLock};

use crate::error::WatershedError;

//Offsets (dx, dy) with y pointing down (north = y - 1)
const OFFSETS_8CON: [(isize, isize); 8] =
  [(1, -1), (1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0), (-1, -1), (0, -1)];
const OFFSETS_4CON: [(isize, isize); 4] = [(-1, 0), (0, -1), (1, 0), (0, 1)];

/// Position of a pixel in the image. `x` runs along a row (`0..width`), `y`
/// along a column (`0..height`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
  pub x: usize,
  pub y: usize,
}

impl Position {
  pub const fn new(x: usize, y: usize) -> Self {
    Position { x, y }
  }

  /// Index of this position into a `(height, width)` shaped ndarray.
  #[inline(always)]
  pub const fn index(self) -> (usize, usize) {
    (self.y, self.x)
  }

  #[inline(always)]
  pub const fn from_index(index: (usize, usize)) -> Self {
    Position { x: index.1, y: index.0 }
  }

  /// Row-major rank of this position in an image of the given width.
  #[inline(always)]
  pub const fn rank(self, width: usize) -> usize {
    self.y * width + self.x
  }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {})", self.x, self.y)
  }
}

/// Adjacency rule between grid positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Connectivity {
  /// Only the west, north, east and south neighbours.
  Four,
  /// The full Moore neighbourhood.
  #[default]
  Eight,
}

impl Connectivity {
  #[inline(always)]
  fn offsets(self) -> &'static [(isize, isize)] {
    match self {
      Connectivity::Four => &OFFSETS_4CON,
      Connectivity::Eight => &OFFSETS_8CON,
    }
  }

  /// Number of neighbours of a position that is not on the image edge.
  pub const fn count(self) -> usize {
    match self {
      Connectivity::Four => 4,
      Connectivity::Eight => 8,
    }
  }
}

impl fmt::Display for Connectivity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-connected", self.count())
  }
}

impl TryFrom<usize> for Connectivity {
  type Error = WatershedError;

  fn try_from(value: usize) -> Result<Self, Self::Error> {
    match value {
      4 => Ok(Connectivity::Four),
      8 => Ok(Connectivity::Eight),
      other => Err(WatershedError::invalid(format!("connectivity must be 4 or 8, got {other}"))),
    }
  }
}

impl TryFrom<u8> for Connectivity {
  type Error = WatershedError;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    Connectivity::try_from(value as usize)
  }
}

impl FromStr for Connectivity {
  type Err = WatershedError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "4" | "four" => Ok(Connectivity::Four),
      "8" | "eight" => Ok(Connectivity::Eight),
      other => Err(WatershedError::invalid(format!("connectivity must be 4 or 8, got {other:?}"))),
    }
  }
}

/// Returns the in-bounds neighbours of `pos` in the fixed order of the
/// connectivity model. Positions outside `[0, width) x [0, height)` are left out,
/// there is no wraparound.
pub fn neighbours(
  pos: Position,
  width: usize,
  height: usize,
  connectivity: Connectivity,
) -> Vec<Position> {
  let (x, y): (isize, isize) = (pos.x as isize, pos.y as isize);
  connectivity
    .offsets()
    .iter()
    .map(|&(dx, dy)| (x + dx, y + dy))
    .filter_map(|(x, y)| {
      if x < 0 || y < 0 || x as usize >= width || y as usize >= height {
        None
      } else {
        Some(Position::new(x as usize, y as usize))
      }
    })
    .collect()
}

/// Precomputed neighbour lists for every position of a grid, stored as
/// row-major ranks in one flat buffer.
#[derive(Debug, Clone)]
pub struct NeighbourTable {
  connectivity: Connectivity,
  width: usize,
  starts: Vec<usize>,
  entries: Vec<u32>,
}

impl NeighbourTable {
  /// Builds the table. Callers guarantee that `width * height` fits a `u32`.
  pub fn new(width: usize, height: usize, connectivity: Connectivity) -> Self {
    let mut starts = Vec::with_capacity(width * height + 1);
    let mut entries = Vec::with_capacity(width * height * connectivity.count());
    starts.push(0);
    for y in 0..height {
      for x in 0..width {
        entries.extend(
          neighbours(Position::new(x, y), width, height, connectivity)
            .into_iter()
            .map(|neigh| neigh.rank(width) as u32),
        );
        starts.push(entries.len());
      }
    }
    NeighbourTable { connectivity, width, starts, entries }
  }

  pub fn connectivity(&self) -> Connectivity {
    self.connectivity
  }

  /// Row-major ranks of the neighbours of `pos`, in connectivity order.
  #[inline]
  pub fn ranks(&self, pos: Position) -> &[u32] {
    let rank = pos.rank(self.width);
    &self.entries[self.starts[rank]..self.starts[rank + 1]]
  }

  /// ndarray indices (`(y, x)`) of the neighbours of `pos`, in connectivity order.
  #[inline]
  pub fn indices(&self, pos: Position) -> impl Iterator<Item = (usize, usize)> + '_ {
    let width = self.width;
    self.ranks(pos).iter().map(move |&rank| (rank as usize / width, rank as usize % width))
  }

  /// Neighbour positions of `pos`, in connectivity order.
  pub fn positions(&self, pos: Position) -> impl Iterator<Item = Position> + '_ {
    self.indices(pos).map(Position::from_index)
  }
}

/// Lazily built 4- and 8-connected neighbour tables for one grid size.
#[derive(Debug, Default)]
pub struct Neighbourhoods {
  width: usize,
  height: usize,
  four: OnceLock<NeighbourTable>,
  eight: OnceLock<NeighbourTable>,
}

impl Neighbourhoods {
  pub fn new(width: usize, height: usize) -> Self {
    Neighbourhoods { width, height, four: OnceLock::new(), eight: OnceLock::new() }
  }

  /// Returns (and on first use builds) the table for `connectivity`.
  pub fn table(&self, connectivity: Connectivity) -> &NeighbourTable {
    let (width, height) = (self.width, self.height);
    match connectivity {
      Connectivity::Four => self.four.get_or_init(|| NeighbourTable::new(width, height, connectivity)),
      Connectivity::Eight => {
        self.eight.get_or_init(|| NeighbourTable::new(width, height, connectivity))
      }
    }
  }

  /// Builds both tables up front.
  pub fn warm_up(&self) {
    self.table(Connectivity::Eight);
    self.table(Connectivity::Four);
  }
}
