//! Lago template repo metadata.
//!
//! Every image gets two sidecars next to it, `<image>.metadata` with the spec
//! properties as JSON and `<image>.hash` with the SHA-1 of the uncompressed
//! image. The repo as a whole is described by `repo.metadata`, which lago
//! clients fetch first.
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use tracing::debug;

use crate::{
    image::{COMPRESSED_EXTENSION, UncompressedFacts},
    spec::Spec,
    utils::{filename_to_string, strip_last_extension},
};

pub const REPO_METADATA_FILE: &str = "repo.metadata";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RepoMetadata {
    pub name: String,
    pub templates: BTreeMap<String, Template>,
    pub sources: BTreeMap<String, Source>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Template {
    pub versions: BTreeMap<String, TemplateVersion>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TemplateVersion {
    pub source: String,
    pub handle: String,
    /// Modification time of the compressed image, in seconds since the epoch.
    pub timestamp: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Source {
    pub args: SourceArgs,
    #[serde(rename = "type")]
    pub source_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SourceArgs {
    pub baseurl: String,
}

/// Single line JSON with `", "` between items and `": "` after keys, the
/// layout lago's own tooling writes and existing repos already contain.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

fn to_spaced_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut serializer)?;
    Ok(buf)
}

/// Write `<image>.metadata` and `<image>.hash` for one image.
pub async fn write_image_metadata(
    spec: &Spec,
    repo_dir: &Path,
    facts: &UncompressedFacts,
) -> Result<()> {
    let metadata_path = repo_dir.join(format!("{}.metadata", spec.image_name));
    tokio::fs::write(&metadata_path, to_spaced_json(&spec.props)?)
        .await
        .with_context(|| format!("Writing file {}", metadata_path.display()))?;

    let hash_path = repo_dir.join(format!("{}.hash", spec.image_name));
    tokio::fs::write(&hash_path, facts.sha1.as_str())
        .await
        .with_context(|| format!("Writing file {}", hash_path.display()))?;

    debug!(
        "Wrote {} and {}",
        metadata_path.display(),
        hash_path.display()
    );
    Ok(())
}

async fn mtime_seconds(path: &Path) -> Result<f64> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .with_context(|| format!("{} was modified before 1970", path.display()))?;
    Ok(since_epoch.as_secs_f64())
}

/// Describe every compressed image found directly under `repo_dir`.
pub async fn scan_repo(repo_dir: &Path, repo_name: &str, base_url: &str) -> Result<RepoMetadata> {
    let mut templates = BTreeMap::new();
    let suffix = format!(".{COMPRESSED_EXTENSION}");

    let mut entries = tokio::fs::read_dir(repo_dir)
        .await
        .with_context(|| format!("Listing directory {}", repo_dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !tokio::fs::metadata(&path).await.is_ok_and(|meta| meta.is_file()) {
            continue;
        }

        let file_name = filename_to_string(&path)?;
        if !file_name.ends_with(&suffix) {
            continue;
        }

        let handle = strip_last_extension(&file_name).to_string();
        let latest = TemplateVersion {
            source: repo_name.to_string(),
            handle: handle.clone(),
            timestamp: mtime_seconds(&path)
                .await
                .with_context(|| format!("Reading mtime of {}", path.display()))?,
        };
        templates.insert(
            handle,
            Template {
                versions: BTreeMap::from([("latest".to_string(), latest)]),
            },
        );
    }

    let source = Source {
        args: SourceArgs {
            baseurl: base_url.to_string(),
        },
        source_type: "http".to_string(),
    };

    Ok(RepoMetadata {
        name: repo_name.to_string(),
        templates,
        sources: BTreeMap::from([(repo_name.to_string(), source)]),
    })
}

/// Regenerate `repo.metadata` from the directory contents.
pub async fn write_repo_metadata(repo_dir: &Path, repo_name: &str, base_url: &str) -> Result<()> {
    let metadata = scan_repo(repo_dir, repo_name, base_url).await?;
    let path = repo_dir.join(REPO_METADATA_FILE);
    tokio::fs::write(&path, to_spaced_json(&metadata)?)
        .await
        .with_context(|| format!("Writing file {}", path.display()))?;
    debug!(
        "Wrote {} with {} templates",
        path.display(),
        metadata.templates.len()
    );
    Ok(())
}
