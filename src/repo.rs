//! Generate an image repo from a set of specs.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    config::BuildConfig,
    image::{self, BuiltImage},
    lago,
    spec::{RepoFormat, Spec},
    virt_builder,
};

/// Expand directories into the spec files directly inside them.
///
/// Files inside a directory are sorted by name so images are always built
/// in the same order. Other paths are kept as given.
pub async fn resolve_specs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut specs = Vec::new();
    for path in paths {
        if tokio::fs::metadata(path).await.is_ok_and(|meta| meta.is_dir()) {
            let mut found = vec![];
            let mut entries = tokio::fs::read_dir(path)
                .await
                .with_context(|| format!("Cannot list specs in {}", path.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let spec_path = entry.path();
                if tokio::fs::metadata(&spec_path).await.is_ok_and(|meta| meta.is_file()) {
                    found.push(spec_path);
                }
            }
            found.sort();
            specs.extend(found);
        } else {
            specs.push(path.clone());
        }
    }
    Ok(specs)
}

/// Arguments for [`generate_repo`].
#[derive(Debug)]
pub struct RepoRequest<'a> {
    pub specs: &'a [PathBuf],
    pub repo_dir: &'a Path,
    pub base_url: &'a str,
    pub repo_name: &'a str,
    pub format: RepoFormat,
    pub with_update: bool,
}

/// Build every image and write the metadata for `request.format`.
///
/// The first failure aborts the run. Anything already written to the repo
/// dir is left in place.
pub async fn generate_repo(
    request: &RepoRequest<'_>,
    config: &BuildConfig,
) -> Result<Vec<BuiltImage>> {
    let RepoRequest {
        specs,
        repo_dir,
        base_url,
        repo_name,
        format,
        with_update,
    } = *request;

    let spec_list: Vec<String> = specs.iter().map(|s| s.display().to_string()).collect();
    info!("Creating repo for specs {}", spec_list.join(","));

    tokio::fs::create_dir_all(repo_dir)
        .await
        .with_context(|| format!("Cannot create repo dir {}", repo_dir.display()))?;

    let policy = format.policy();
    let mut built: Vec<(Spec, BuiltImage)> = Vec::with_capacity(specs.len());

    for spec_path in specs {
        info!("");
        info!("  Creating template for {}", spec_path.display());
        let spec = Spec::load(spec_path, policy).await?;

        let image = image::generate_image(&spec, repo_dir, with_update, config)
            .await
            .with_context(|| format!("Cannot build image for {}", spec_path.display()))?;

        if format.includes_lago() {
            lago::write_image_metadata(&spec, repo_dir, &image.facts).await?;
        }
        built.push((spec, image));
    }

    if format.includes_lago() {
        lago::write_repo_metadata(repo_dir, repo_name, base_url).await?;
    }

    if format.includes_virt_builder() {
        let revision = virt_builder::current_revision();
        let mut entries = Vec::with_capacity(built.len());
        for (spec, image) in &built {
            let entry = virt_builder::image_entry(
                spec,
                &image.path,
                &image.facts,
                &config.image_format,
                revision,
            )
            .await?;
            entries.push(entry);
        }
        virt_builder::write_index(repo_dir, &entries).await?;
    }

    info!("Done");
    Ok(built.into_iter().map(|(_, image)| image).collect())
}
