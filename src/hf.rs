//! HuggingFace API

use crate::error::Result;
use hf_hub::api::sync::ApiBuilder;
use log::debug;
use std::path::{Path, PathBuf};

/// Resolves `file` from a hub model repo, downloading into the hub cache when
/// needed, and returns the cached path.
pub fn fetch_hub_file(repo: &str, file: &str, cache_dir: Option<&Path>) -> Result<PathBuf> {
    let mut builder = ApiBuilder::new().with_progress(true);
    if let Some(cache_dir) = cache_dir {
        builder = builder.with_cache_dir(cache_dir.to_path_buf());
    }
    let api = builder.build()?;
    let repo_handle = api.model(repo.to_string());
    debug!("using HuggingFace repo '{}'", repo);
    let path = repo_handle.get(file)?;
    debug!("resolved '{}' to {:?}", file, path);
    Ok(path)
}
