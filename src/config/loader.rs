//! Reading edit bundles from TOML.
//!
//! Loading resolves what the bundle can know before any file is opened:
//! an unnamed bundle takes the stem of its file name, and `meta.file` has
//! static variables and a leading `~/` expanded before validation.

use crate::config::schema::{EditBundle, Metadata, ValidationError, VarPromise};
use crate::expand::Context;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read edit bundle from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse edit bundle TOML{}: {source}", origin(None, path.as_deref()))]
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    #[error("invalid edit bundle{}: {source}", origin(Some(bundle.as_str()), path.as_deref()))]
    Validation {
        bundle: String,
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

/// ` 'name' (path)` suffix naming where a bundle came from.
fn origin(bundle: Option<&str>, path: Option<&Path>) -> String {
    let mut out = String::new();
    if let Some(name) = bundle.filter(|name| !name.is_empty()) {
        out.push_str(&format!(" '{name}'"));
    }
    if let Some(path) = path {
        out.push_str(&format!(" ({})", path.display()));
    }
    out
}

pub fn load_from_str(input: &str) -> Result<EditBundle, ConfigError> {
    parse(input, None)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<EditBundle, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents, Some(path))
}

fn parse(input: &str, path: Option<&Path>) -> Result<EditBundle, ConfigError> {
    let mut bundle: EditBundle = toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml {
        path: path.map(Path::to_path_buf),
        source,
    })?;

    if bundle.meta.name.is_empty() {
        if let Some(stem) = path.and_then(Path::file_stem) {
            bundle.meta.name = stem.to_string_lossy().into_owned();
        }
    }
    resolve_target(&mut bundle.meta, &bundle.vars);

    bundle.validate().map_err(|source| ConfigError::Validation {
        bundle: bundle.meta.name.clone(),
        path: path.map(Path::to_path_buf),
        source,
    })?;

    tracing::debug!(
        target: "edit.config",
        bundle = %bundle.meta.name,
        promises = bundle.promise_count(),
        "loaded edit bundle"
    );
    Ok(bundle)
}

/// Expand static variables and a leading `~/` in `meta.file`.
fn resolve_target(meta: &mut Metadata, vars: &[VarPromise]) {
    let Some(file) = &meta.file else {
        return;
    };

    let mut context = Context::new();
    for var in vars {
        context.define_var(var.name.as_str(), var.value.as_str());
    }
    let expanded = context.snapshot().expand(&file.to_string_lossy());

    let resolved = match (expanded.strip_prefix("~/"), home::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(expanded),
    };
    meta.file = Some(resolved);
}
