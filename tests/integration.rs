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

use ndarray as nd;
use ndarray_rand::{rand_distr::Uniform, RandomExt};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rustronomy_cellshed::{
  connectivity::neighbours, grid::GridStore, labelling::label_cell_bodies, prelude::*, run, Cell,
  Position,
};

//Paints `count` bright discs with random centres and radii on a dark background
fn blobs(seed: u64, shape: (usize, usize), count: usize) -> nd::Array2<f64> {
  let mut rng = StdRng::seed_from_u64(seed);
  let mut img = nd::Array2::<f64>::zeros(shape);
  for _ in 0..count {
    let cy = rng.gen_range(0..shape.0) as f64;
    let cx = rng.gen_range(0..shape.1) as f64;
    let r: f64 = rng.gen_range(3.0..8.0);
    img.indexed_iter_mut().for_each(|((y, x), px)| {
      if (y as f64 - cy).powi(2) + (x as f64 - cx).powi(2) <= r * r {
        *px = 255.0;
      }
    });
  }
  img
}

fn assert_no_bleed(labels: &nd::Array2<usize>, conn: Connectivity) {
  let (height, width) = labels.dim();
  for ((y, x), &id) in labels.indexed_iter() {
    if id == NO_CELL_BODY || id == WATERSHED {
      continue;
    }
    for neigh in neighbours(Position::new(x, y), width, height, conn) {
      let other = labels[neigh.index()];
      assert!(
        other == id || other == NO_CELL_BODY || other == WATERSHED,
        "cell body {id} at ({x}, {y}) touches cell body {other} at {neigh}"
      );
    }
  }
}

fn foreground(cells: &nd::Array2<Cell>) -> usize {
  cells.iter().filter(|cell| cell.is_foreground()).count()
}

////////////////////////////////////////////////////////////////////////////////
//                                 SCENARIOS                                  //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn dark_block_becomes_one_cell_body() {
  let mut img = nd::Array2::from_elem((5, 5), 200.0);
  img.slice_mut(nd::s![1..4, 1..4]).fill(10.0);

  let cellshed = TransformBuilder::new()
    .set_threshold(100.0)
    .set_iterations(1)
    .set_rescale(Rescale::Direct)
    .build()
    .unwrap();
  let labels = cellshed.transform(img.view()).unwrap();

  let mut expected = nd::Array2::<usize>::zeros((5, 5));
  expected.slice_mut(nd::s![1..4, 1..4]).fill(1);
  assert_eq!(labels, expected);
  assert_eq!(cellshed.count_watershed(labels.view()), 0);
}

#[test]
fn bright_block_through_flat_buffer() {
  //Default rescale is inverted: bright pixels end up below the cutoff
  let mut img = nd::Array2::<f64>::zeros((5, 5));
  img.slice_mut(nd::s![1..4, 1..4]).fill(255.0);
  let flat: Vec<f64> = img.iter().copied().collect();

  let labels = run(&flat, 5, 5, 126.0, 1, Connectivity::Eight).unwrap();
  let mut expected = nd::Array2::<usize>::zeros((5, 5));
  expected.slice_mut(nd::s![1..4, 1..4]).fill(1);
  assert_eq!(labels, expected);
}

#[test]
fn separate_blocks_get_separate_ids() {
  let mut img = nd::Array2::from_elem((5, 5), 200.0);
  img.slice_mut(nd::s![0..2, 0..2]).fill(10.0);
  img.slice_mut(nd::s![3..5, 3..5]).fill(10.0);

  let cellshed = TransformBuilder::new()
    .set_threshold(100.0)
    .set_rescale(Rescale::Direct)
    .build()
    .unwrap();
  let labels = cellshed.transform(img.view()).unwrap();

  let mut expected = nd::Array2::<usize>::zeros((5, 5));
  expected.slice_mut(nd::s![0..2, 0..2]).fill(1);
  expected.slice_mut(nd::s![3..5, 3..5]).fill(2);
  assert_eq!(labels, expected);
}

#[test]
fn touching_cells_are_separated_by_watershed() {
  //Two 5x5 cells overlapping in a single corner pixel
  let mut img = nd::Array2::<f64>::zeros((9, 9));
  img.slice_mut(nd::s![0..5, 0..5]).fill(255.0);
  img.slice_mut(nd::s![4..9, 4..9]).fill(255.0);

  let cellshed = TransformBuilder::new().build().unwrap();
  let labels = cellshed.transform(img.view()).unwrap();

  let boundary: Vec<(usize, usize)> =
    labels.indexed_iter().filter(|(_, &id)| id == WATERSHED).map(|(idx, _)| idx).collect();
  assert_eq!(boundary, vec![(4, 4), (4, 5), (5, 4)]);
  assert_eq!(labels[(0, 0)], 1);
  assert_eq!(labels[(8, 8)], 2);
  assert_eq!(cellshed.transform_to_list(img.view()).unwrap(), vec![(1, 24), (2, 22)]);
  assert_no_bleed(&labels, Connectivity::Eight);
}

#[test]
fn nothing_below_cutoff_gives_empty_output() {
  let img = nd::Array2::from_elem((6, 4), 10.0);
  let cellshed = TransformBuilder::new().set_iterations(2).build().unwrap();
  let labels = cellshed.transform(img.view()).unwrap();
  assert!(labels.iter().all(|&id| id == NO_CELL_BODY));
}

#[test]
fn everything_below_cutoff_is_one_body() {
  let img = nd::Array2::from_elem((4, 6), 100.0);
  let cellshed = TransformBuilder::new().set_threshold(f64::INFINITY).build().unwrap();

  //The image edge never erodes anything
  let history = cellshed.transform_history(img.view()).unwrap();
  assert_eq!(history[1].0, Stage::Eroding);
  assert_eq!(foreground(&history[1].1), 24);

  let labels = cellshed.transform(img.view()).unwrap();
  assert!(labels.iter().all(|&id| id == 1));
}

#[test]
fn zero_iterations_only_labels() {
  let mut img = nd::Array2::<f64>::zeros((3, 7));
  img.slice_mut(nd::s![.., 0..3]).fill(255.0);
  img.slice_mut(nd::s![.., 4..7]).fill(255.0);

  let cellshed = TransformBuilder::new().set_iterations(0).build().unwrap();
  let history = cellshed.transform_history(img.view()).unwrap();
  let stages: Vec<Stage> = history.iter().map(|(stage, _)| *stage).collect();
  assert_eq!(stages, vec![Stage::Thresholding, Stage::Labelling]);

  let labels = cellshed.transform(img.view()).unwrap();
  assert_eq!(labels.column(0), nd::Array1::from_elem(3, 1));
  assert_eq!(labels.column(3), nd::Array1::from_elem(3, 0));
  assert_eq!(labels.column(6), nd::Array1::from_elem(3, 2));
}

#[test]
fn pre_processed_integer_image() {
  let mut img = nd::Array2::<u16>::zeros((5, 5));
  img.slice_mut(nd::s![1..4, 1..4]).fill(1000);

  let cellshed = TransformBuilder::new().set_value_range(ValueRange::Auto).build().unwrap();
  let input = cellshed.pre_processor(img.view());
  let labels = cellshed.transform(input.view()).unwrap();
  assert_eq!(cellshed.count_cell_bodies(labels.view()), 1);
  assert_eq!(labels[(2, 2)], 1);
  assert_eq!(labels[(0, 0)], NO_CELL_BODY);
}

////////////////////////////////////////////////////////////////////////////////
//                                 PROPERTIES                                 //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn deterministic_across_thread_counts() {
  let mut rng = StdRng::seed_from_u64(7);
  let rf = nd::Array2::<f64>::random_using((96, 80), Uniform::new(0.0, 255.0), &mut rng);
  let cellshed = TransformBuilder::new().set_threshold(180.0).set_iterations(2).build().unwrap();

  let reference = cellshed.transform_with_status(rf.view(), &Silent).unwrap();
  for threads in [1, 2, 4] {
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
    let labels = pool.install(|| cellshed.transform_with_status(rf.view(), &Silent)).unwrap();
    assert_eq!(labels, reference, "result differs with {threads} threads");
  }
}

#[test]
fn erosion_only_removes_foreground() {
  let img = blobs(1, (64, 64), 14);
  let cellshed = TransformBuilder::new().set_iterations(3).build().unwrap();
  let history = cellshed.transform_history(img.view()).unwrap();

  let passes: Vec<&nd::Array2<Cell>> = history
    .iter()
    .filter(|(stage, _)| matches!(stage, Stage::Thresholding | Stage::Eroding))
    .map(|(_, cells)| cells)
    .collect();
  assert_eq!(passes.len(), 4);
  for pair in passes.windows(2) {
    let (before, after) = (pair[0], pair[1]);
    assert!(foreground(after) <= foreground(before));
    nd::Zip::from(before).and(after).for_each(|old, new| {
      assert!(!new.is_foreground() || old.is_foreground());
    });
  }
}

#[test]
fn watershed_cells_are_permanent() {
  let img = blobs(2, (64, 64), 20);
  let cellshed = TransformBuilder::new().set_iterations(3).build().unwrap();
  let history = cellshed.transform_history(img.view()).unwrap();

  let passes: Vec<&nd::Array2<Cell>> = history
    .iter()
    .skip_while(|(stage, _)| *stage != Stage::Labelling)
    .map(|(_, cells)| cells)
    .collect();
  assert_eq!(passes.len(), 4);
  for pair in passes.windows(2) {
    nd::Zip::from(pair[0]).and(pair[1]).for_each(|old, new| {
      if old.is_watershed() {
        assert_eq!(new, old);
      }
      //Cell bodies never change hands either
      if old.has_body() {
        assert_eq!(new.body, old.body);
      }
    });
  }
}

#[test]
fn no_label_bleed() {
  for seed in 0..6 {
    let img = blobs(seed, (64, 64), 25);
    for conn in [Connectivity::Four, Connectivity::Eight] {
      for iterations in 1..=3 {
        let cellshed = TransformBuilder::new()
          .set_connectivity(conn)
          .set_iterations(iterations)
          .build()
          .unwrap();
        let labels = cellshed.transform(img.view()).unwrap();
        assert_no_bleed(&labels, conn);
      }
    }
  }
}

#[test]
fn labelling_is_idempotent() {
  let img = blobs(3, (64, 64), 16);
  for conn in [Connectivity::Four, Connectivity::Eight] {
    let cellshed = TransformBuilder::new().set_connectivity(conn).build().unwrap();
    let history = cellshed.transform_history(img.view()).unwrap();
    let (_, labelled) = history
      .into_iter()
      .find(|(stage, _)| *stage == Stage::Labelling)
      .expect("labelling snapshot");

    let mut grid = GridStore::from_cells(labelled.clone()).unwrap();
    let stats = label_cell_bodies(&mut grid, conn).unwrap();
    assert_eq!(stats.merges, 0);
    assert_eq!(grid.cells(), labelled.view());
  }
}

#[test]
fn status_sinks_do_not_change_the_result() {
  let img = blobs(4, (48, 48), 10);
  let cellshed = TransformBuilder::new().set_iterations(2).build().unwrap();
  let silent = cellshed.transform_with_status(img.view(), &Silent).unwrap();
  let logged = cellshed.transform_with_status(img.view(), &LogStatus).unwrap();
  assert_eq!(silent, logged);
}

////////////////////////////////////////////////////////////////////////////////
//                                   ERRORS                                   //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn invalid_connectivity() {
  assert!(matches!(Connectivity::try_from(6u8), Err(WatershedError::InvalidArgument(_))));
  assert!(matches!("5".parse::<Connectivity>(), Err(WatershedError::InvalidArgument(_))));
  assert_eq!(Connectivity::try_from(4usize), Ok(Connectivity::Four));
}

#[test]
fn degenerate_value_range() {
  let built = TransformBuilder::new()
    .set_value_range(ValueRange::Fixed { low: 255.0, high: 0.0 })
    .build();
  assert!(matches!(built, Err(WatershedError::InvalidArgument(_))));

  //An automatic range fails on flat images
  let cellshed = TransformBuilder::new().set_value_range(ValueRange::Auto).build().unwrap();
  let flat = nd::Array2::from_elem((4, 4), 3.0);
  assert!(matches!(cellshed.transform(flat.view()), Err(WatershedError::InvalidArgument(_))));
}

#[test]
fn run_rejects_bad_dimensions() {
  let pixels = vec![0.0; 12];
  assert!(matches!(
    run(&pixels, 0, 12, 126.0, 1, Connectivity::Eight),
    Err(WatershedError::InvalidArgument(_))
  ));
  assert!(matches!(
    run(&pixels, 5, 2, 126.0, 1, Connectivity::Eight),
    Err(WatershedError::InvalidArgument(_))
  ));
  assert!(matches!(
    run(&pixels, usize::MAX, 2, 126.0, 1, Connectivity::Eight),
    Err(WatershedError::InvalidArgument(_))
  ));
  assert!(run(&pixels, 4, 3, 126.0, 1, Connectivity::Four).is_ok());
}
