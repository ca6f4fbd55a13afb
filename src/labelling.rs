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

//! Connected-component labelling of the eroded foreground.
//!
//! Labelling happens in two steps. A single row-major scan hands out provisional
//! cell body ids, recording an equivalence whenever a pixel touches two
//! different ids. Afterwards every id is replaced by the root of its
//! equivalence class. Because the lower id always wins a merge, the root of a
//! class is its smallest id.

use std::collections::HashMap;

use crate::{
  connectivity::{Connectivity, Position},
  error::WatershedError,
  grid::{is_cell_body, GridStore},
  NO_CELL_BODY, WATERSHED,
};

/// Union-find node for one provisional cell body id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquivalenceNode {
  pub id: usize,
  pub parent: Option<usize>,
}

/// Union-find forest over cell body ids. Only ids that are registered (already
/// on the grid, or handed out by `allocate`) get a node, so sparse or very
/// large ids cost nothing extra. `NO_CELL_BODY` is never part of the forest.
#[derive(Debug, Clone)]
pub struct Equivalences {
  nodes: HashMap<usize, EquivalenceNode>,
  next_id: usize,
}

impl Default for Equivalences {
  fn default() -> Self {
    Self::new()
  }
}

impl Equivalences {
  pub fn new() -> Self {
    Equivalences { nodes: HashMap::new(), next_id: NO_CELL_BODY + 1 }
  }

  /// Creates a forest in which `ids` already exist as singletons. Freshly
  /// allocated ids start above the largest of them, so they never collide with
  /// ids already on the grid. Ids that are not cell body ids are skipped.
  pub fn with_existing(ids: impl IntoIterator<Item = usize>) -> Self {
    let mut forest = Self::new();
    for id in ids.into_iter().filter(|&id| is_cell_body(id)) {
      forest.nodes.entry(id).or_insert(EquivalenceNode { id, parent: None });
      forest.next_id = forest.next_id.max(id.saturating_add(1));
    }
    forest
  }

  /// Registers a new singleton class and returns its id. Ids count up from 1.
  /// Fails once the id space below `WATERSHED` is used up.
  pub fn allocate(&mut self) -> Result<usize, WatershedError> {
    let id = self.next_id;
    if !is_cell_body(id) {
      return Err(WatershedError::invalid(format!("no cell body ids left below {WATERSHED}")));
    }
    self.nodes.insert(id, EquivalenceNode { id, parent: None });
    self.next_id += 1;
    Ok(id)
  }

  pub fn contains(&self, id: usize) -> bool {
    self.nodes.contains_key(&id)
  }

  pub fn node(&self, id: usize) -> Option<&EquivalenceNode> {
    self.nodes.get(&id)
  }

  /// Root of the class containing `id`, without modifying the forest. `None`
  /// for unknown ids.
  pub fn root(&self, mut id: usize) -> Option<usize> {
    while let Some(parent) = self.nodes.get(&id)?.parent {
      id = parent;
    }
    Some(id)
  }

  /// Root of the class containing `id`. Compresses the path on the way.
  pub fn find(&mut self, id: usize) -> Option<usize> {
    let root = self.root(id)?;
    let mut current = id;
    while let Some(node) = self.nodes.get_mut(&current) {
      match node.parent {
        Some(parent) => {
          node.parent = Some(root);
          current = parent;
        }
        None => break,
      }
    }
    Some(root)
  }

  /// Merges the classes of `a` and `b`. The lower of the two roots becomes the
  /// parent of the higher one. Returns the surviving root, or `None` if either
  /// id is unknown.
  pub fn union(&mut self, a: usize, b: usize) -> Option<usize> {
    let (ra, rb) = (self.find(a)?, self.find(b)?);
    if ra == rb {
      return Some(ra);
    }
    let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
    self.nodes.get_mut(&high)?.parent = Some(low);
    Some(low)
  }

  /// Lookup table from every registered id to the root of its class.
  pub fn resolve(&mut self) -> HashMap<usize, usize> {
    let ids: Vec<usize> = self.nodes.keys().copied().collect();
    ids.into_iter().filter_map(|id| Some((id, self.find(id)?))).collect()
  }

  /// Number of distinct classes.
  pub fn classes(&self) -> usize {
    self.nodes.values().filter(|node| node.parent.is_none()).count()
  }
}

/// Statistics of one labelling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Labelling {
  /// Provisional ids handed out during the scan
  pub provisional: usize,
  /// Equivalences that actually joined two classes
  pub merges: usize,
}

/// Provisional labelling scan. Every foreground pixel without a cell body id
/// gets one:
/// - the id of its neighbours if they agree;
/// - the lowest neighbouring id if they do not, after recording that all of the
///   neighbouring ids are equivalent;
/// - a fresh id if no neighbour has one yet.
///
/// The scan runs in row-major order, which determines which id a component gets.
pub fn label_provisional(
  grid: &mut GridStore,
  connectivity: Connectivity,
) -> Result<(Equivalences, Labelling), WatershedError> {
  grid.cache_neighbours();

  let mut forest = Equivalences::with_existing(grid.cells().iter().map(|cell| cell.body));
  let mut stats = Labelling::default();

  for y in 0..grid.height() {
    for x in 0..grid.width() {
      let pos = Position::new(x, y);
      let cell = grid.cell(pos);
      if !cell.is_foreground() || cell.body != NO_CELL_BODY {
        continue;
      }

      let bodies = grid.neighbour_bodies(pos, connectivity);
      let body = match bodies.as_slice() {
        [] => {
          stats.provisional += 1;
          forest.allocate()?
        }
        [only] => *only,
        many => {
          let lowest = many.iter().copied().min().unwrap_or(NO_CELL_BODY);
          for &other in many {
            if forest.find(other) != forest.find(lowest) {
              forest.union(lowest, other);
              stats.merges += 1;
            }
          }
          lowest
        }
      };
      grid.set_body(pos, body);
    }
  }

  Ok((forest, stats))
}

/// Rewrites every cell body id on the grid to the root of its class. Ids the
/// forest does not know about are left alone.
pub fn flatten(grid: &mut GridStore, forest: &mut Equivalences) {
  let roots = forest.resolve();
  grid.map_bodies(|body| roots.get(&body).copied().unwrap_or(body));
}

/// Checks that no two neighbouring cell bodies carry different ids.
pub fn verify_flattened(grid: &GridStore, connectivity: Connectivity) -> Result<(), WatershedError> {
  let table = grid.neighbour_table(connectivity);
  let cells = grid.cells();
  for (idx, cell) in cells.indexed_iter() {
    if !cell.is_foreground() || !cell.has_body() {
      continue;
    }
    let pos = Position::from_index(idx);
    if let Some(other) = table
      .indices(pos)
      .map(|neigh| cells[neigh])
      .find(|neigh| neigh.is_foreground() && neigh.has_body() && neigh.body != cell.body)
    {
      return Err(WatershedError::InconsistentState {
        x: pos.x,
        y: pos.y,
        first: cell.body,
        second: other.body,
      });
    }
  }
  Ok(())
}

/// Full labelling pass: provisional scan, flattening and a consistency check.
pub fn label_cell_bodies(
  grid: &mut GridStore,
  connectivity: Connectivity,
) -> Result<Labelling, WatershedError> {
  let (mut forest, stats) = label_provisional(grid, connectivity)?;
  flatten(grid, &mut forest);
  verify_flattened(grid, connectivity)?;
  Ok(stats)
}
