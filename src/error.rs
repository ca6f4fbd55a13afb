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

//! Error type shared by every pass of the transform.

/// Errors that can be returned by the cellshed transform. A failed run never
/// yields a (partial) label grid.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum WatershedError {
  /// Bad input: unknown connectivity, degenerate value range, empty image or
  /// mismatched dimensions.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// Two neighbouring foreground cells ended up with different cell body ids
  /// after the merge step. This is a library bug, not a user error.
  #[error(
    "inconsistent state at ({x}, {y}): neighbouring cell bodies {first} and {second} were not merged"
  )]
  InconsistentState { x: usize, y: usize, first: usize, second: usize },
}

impl WatershedError {
  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    WatershedError::InvalidArgument(msg.into())
  }
}
