// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Ambient support shared by the rest of the workspace: the error taxonomy,
//! string/byte-size helpers, and logging setup.

mod error;
pub mod strutil;
pub mod tracing_setup;

// `bail!` is exported at the crate root by `#[macro_export]` in `error.rs`.
pub use crate::error::{Error, ErrorKind, ResultExt};
