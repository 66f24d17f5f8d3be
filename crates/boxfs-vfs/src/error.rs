// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use thiserror::Error;

/// Errors specific to overlay setup; operation-level failures are
/// returned to the kernel as errnos instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured source directory cannot be served.
    #[error("Invalid overlay source: {0}")]
    InvalidSource(String),

    /// A generic string error.
    #[error("{0}")]
    String(String),
}
