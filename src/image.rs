//! Build one disk image from a spec.
//!
//! The heavy lifting is done by libguestfs and xz; this module only strings
//! the commands together and records what the metadata generators need
//! about the image before it is compressed.
use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::{
    command::CommandLine,
    config::BuildConfig,
    hash::{FileDigests, HexDigest},
    spec::Spec,
};

/// Extension of the compressed images published in the repo.
pub const COMPRESSED_EXTENSION: &str = "xz";

/// Size and checksums of an image before compression.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UncompressedFacts {
    pub size: u64,
    pub sha1: HexDigest,
    pub sha512: HexDigest,
}

/// A compressed image sitting in the repo directory.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub path: PathBuf,
    pub compressed_size: u64,
    pub facts: UncompressedFacts,
    pub duration: Duration,
}

/// Where the image for `spec` is written, before compression.
pub fn uncompressed_path(repo_dir: &Path, spec: &Spec) -> PathBuf {
    repo_dir.join(&spec.image_name)
}

/// Where the compressed image for `spec` ends up.
pub fn compressed_path(repo_dir: &Path, spec: &Spec) -> PathBuf {
    repo_dir.join(format!("{}.{COMPRESSED_EXTENSION}", spec.image_name))
}

/// The uncompressed image. Removed from disk when dropped.
///
/// Only one of these should exist at a time; a raw image can be many
/// gigabytes.
struct UncompressedImage {
    path: PathBuf,
}

impl UncompressedImage {
    const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UncompressedImage {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        info!("    Removing temporary image {}", self.path.display());
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!("Cannot remove {}: {err}", self.path.display());
        }
    }
}

async fn build_disk_image(
    spec: &Spec,
    dst_image: &Path,
    with_update: bool,
    config: &BuildConfig,
) -> Result<()> {
    let base = spec
        .base()
        .ok_or_else(|| anyhow!("Spec {} has no base image", spec.commands_file.display()))?;

    info!("    Building disk image {}", dst_image.display());
    CommandLine::new(&config.tools.virt_builder)
        .opt("commands-from-file", &spec.commands_file)
        .opt("output", dst_image)
        .opt(
            "root-password",
            format!("password:{}", config.root_password),
        )
        .opt("format", &config.image_format)
        .arg_if(with_update, "--update")
        .arg(base)
        .run()
        .await?;
    Ok(())
}

/// Strip the image of host specific data and give back unused blocks.
async fn cleanup_disk_image(disk_image: &Path, config: &BuildConfig) -> Result<()> {
    info!("    Cleaning up disk image {}", disk_image.display());
    CommandLine::new(&config.tools.virt_sysprep)
        .opt("format", &config.image_format)
        .opt("add", disk_image)
        .run()
        .await?;

    info!("    Sparsifying image {}", disk_image.display());
    CommandLine::new(&config.tools.virt_sparsify)
        .opt("format", &config.image_format)
        .arg("--in-place")
        .arg(disk_image)
        .run()
        .await?;
    Ok(())
}

/// Compress next to the original; xz is told to keep the input.
async fn compress_disk_image(disk_image: &Path, config: &BuildConfig) -> Result<()> {
    info!("    Compressing disk image {}", disk_image.display());
    let compression = &config.compression;
    CommandLine::new(&config.tools.xz)
        .arg("--compress")
        .arg("--keep")
        .opt("threads", compression.threads.to_string())
        .arg(compression.level_arg()?)
        .arg("--force")
        .arg("--verbose")
        .opt("block-size", compression.block_size.to_string())
        .arg(disk_image)
        .run()
        .await?;
    Ok(())
}

/// Build, clean and compress the image for `spec` into `repo_dir`.
///
/// The uncompressed image is deleted before returning, whether or not the
/// build succeeded.
pub async fn generate_image(
    spec: &Spec,
    repo_dir: &Path,
    with_update: bool,
    config: &BuildConfig,
) -> Result<BuiltImage> {
    let start = Instant::now();
    let image = UncompressedImage::new(uncompressed_path(repo_dir, spec));

    build_disk_image(spec, image.path(), with_update, config).await?;
    cleanup_disk_image(image.path(), config).await?;

    let size = tokio::fs::metadata(image.path())
        .await
        .with_context(|| format!("Cannot stat {}", image.path().display()))?
        .len();

    compress_disk_image(image.path(), config).await?;

    let digests = FileDigests::from_async_path(image.path())
        .await
        .with_context(|| format!("Cannot hash {}", image.path().display()))?;

    let path = compressed_path(repo_dir, spec);
    let compressed = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("Compressed image {} was not created", path.display()))?;
    if !compressed.is_file() {
        anyhow::bail!("Compressed image {} is not a file", path.display());
    }

    drop(image);

    Ok(BuiltImage {
        path,
        compressed_size: compressed.len(),
        facts: UncompressedFacts {
            size,
            sha1: digests.sha1,
            sha512: digests.sha512,
        },
        duration: start.elapsed(),
    })
}

#[cfg(all(test, unix))]
pub mod testing {
    //! Shell script stand-ins for the libguestfs tools and xz.
    #![allow(clippy::unwrap_used)]
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use crate::config::{BuildConfig, Tools};

    /// Writes `disk image` followed by the base name to `--output=`.
    const FAKE_VIRT_BUILDER: &str = r#"#!/bin/sh
for arg in "$@"; do
    case "$arg" in
        --output=*) out="${arg#--output=}" ;;
    esac
    base="$arg"
done
printf 'disk image %s\n' "$base" > "$out"
"#;

    pub const FAKE_NOOP: &str = "#!/bin/sh\nexit 0\n";

    const FAKE_FAIL: &str = "#!/bin/sh\necho 'virt-sysprep: error: no disk' >&2\nexit 1\n";

    /// Copies the last argument to `<arg>.xz`, keeping the input.
    const FAKE_XZ: &str = r#"#!/bin/sh
for arg in "$@"; do last="$arg"; done
printf 'xz:' > "$last.xz"
cat "$last" >> "$last.xz"
"#;

    pub fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A config pointing at fake tools in `dir`.
    pub fn fake_config(dir: &Path) -> BuildConfig {
        BuildConfig {
            tools: Tools {
                virt_builder: write_script(dir, "virt-builder", FAKE_VIRT_BUILDER),
                virt_sysprep: write_script(dir, "virt-sysprep", FAKE_NOOP),
                virt_sparsify: write_script(dir, "virt-sparsify", FAKE_NOOP),
                xz: write_script(dir, "xz", FAKE_XZ),
            },
            ..BuildConfig::default()
        }
    }

    /// Like [`fake_config`] but virt-sysprep always fails.
    pub fn failing_config(dir: &Path) -> BuildConfig {
        let mut config = fake_config(dir);
        config.tools.virt_sysprep = write_script(dir, "virt-sysprep-broken", FAKE_FAIL);
        config
    }
}
