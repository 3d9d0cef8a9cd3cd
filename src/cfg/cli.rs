// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

/// The first positional argument, when present, names the configuration
/// file.
pub fn config_path_from_args() -> Option<String> {
    env::args().nth(1)
}

/// Resolves a user-supplied config path to an absolute, existing file.
/// Relative paths are taken from the current working directory.
pub fn resolve_config_path(arg: &str) -> Result<PathBuf> {
    let path = Path::new(arg);

    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .context("cannot get current working dir")?
            .join(path)
    };

    abs.canonicalize()
        .with_context(|| format!("config file not found: {abs:?}"))
}
