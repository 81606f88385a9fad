//! virt-builder repo index.
//!
//! The index is a list of ini-like sections, one per image, separated by a
//! blank line. See `virt-builder(1)`, "Creating and signing the index file".
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, Timelike};
use tap::Pipe;
use tracing::debug;

use crate::{
    hash::sha512_async_path,
    image::UncompressedFacts,
    spec::Spec,
    utils::{filename_to_string, stem_before_first_dot},
};

pub const INDEX_FILE: &str = "index";

/// Revision of an index generated at `now`, e.g. `20190521143005`.
///
/// Clients only refetch images whose revision went up, so this has to grow
/// with every regeneration.
pub fn revision_at(now: DateTime<Local>) -> u64 {
    let date = u64::from(now.year().unsigned_abs()) * 10_000
        + u64::from(now.month()) * 100
        + u64::from(now.day());
    let time =
        u64::from(now.hour()) * 10_000 + u64::from(now.minute()) * 100 + u64::from(now.second());
    date * 1_000_000 + time
}

pub fn current_revision() -> u64 {
    revision_at(Local::now())
}

/// One image as it will appear in the index.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IndexEntry {
    pub section: String,
    pub file: String,
    pub format: String,
    pub compressed_size: u64,
    pub size: u64,
    pub uncompressed_checksum: String,
    pub checksum: String,
    pub revision: u64,
    pub props: Vec<(String, String)>,
}

impl IndexEntry {
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("[{}]", self.section),
            format!("file={}", self.file),
            format!("format={}", self.format),
            format!("compressed_size={}", self.compressed_size),
            format!("size={}", self.size),
            format!("uncompressed_checksum={}", self.uncompressed_checksum),
            format!("checksum={}", self.checksum),
            format!("revision={}", self.revision),
        ];
        lines.extend(self.props.iter().map(|(key, value)| format!("{key}={value}")));
        lines
    }
}

impl std::fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}

/// Gather the index entry for the compressed image at `image_path`.
pub async fn image_entry(
    spec: &Spec,
    image_path: &Path,
    facts: &UncompressedFacts,
    image_format: &str,
    revision: u64,
) -> Result<IndexEntry> {
    debug!(
        "Getting virt-builder metadata for spec {} and image {}",
        spec.commands_file.display(),
        image_path.display()
    );

    let file = filename_to_string(image_path)?;
    let compressed_size = tokio::fs::metadata(image_path)
        .await
        .with_context(|| format!("Cannot stat {}", image_path.display()))?
        .len();
    let checksum = sha512_async_path(image_path)
        .await
        .with_context(|| format!("Cannot hash {}", image_path.display()))?;

    IndexEntry {
        section: format!("lago-{}", stem_before_first_dot(&file)),
        file,
        format: image_format.to_string(),
        compressed_size,
        size: facts.size,
        uncompressed_checksum: facts.sha512.to_string(),
        checksum: checksum.to_string(),
        revision,
        props: spec
            .props
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    }
    .pipe(Ok)
}

/// Render the whole index file.
pub fn render_index(entries: &[IndexEntry]) -> String {
    let blocks: Vec<String> = entries.iter().map(ToString::to_string).collect();
    blocks.join("\n\n") + "\n"
}

/// Overwrite `index` in `repo_dir`.
pub async fn write_index(repo_dir: &Path, entries: &[IndexEntry]) -> Result<()> {
    let path = repo_dir.join(INDEX_FILE);
    tokio::fs::write(&path, render_index(entries))
        .await
        .with_context(|| format!("Writing file {}", path.display()))?;
    debug!("Wrote {} with {} entries", path.display(), entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use chrono::TimeZone;

    use super::*;
    use crate::hash::HexDigest;

    fn fedora30() -> Spec {
        Spec {
            props: BTreeMap::from([
                ("base".to_string(), "fedora-30".to_string()),
                ("name".to_string(), "fedora30".to_string()),
                ("osinfo".to_string(), "fedora30".to_string()),
                ("arch".to_string(), "x86_64".to_string()),
                ("expand".to_string(), "/dev/sda3".to_string()),
            ]),
            commands_file: PathBuf::from("image-specs/fedora30"),
            image_name: "fedora30".to_string(),
        }
    }

    #[test]
    fn test_revision_at() {
        let now = Local.with_ymd_and_hms(2019, 5, 21, 14, 30, 5).unwrap();
        assert_eq!(revision_at(now), 20_190_521_143_005);

        let later = Local.with_ymd_and_hms(2019, 5, 21, 14, 30, 6).unwrap();
        assert!(revision_at(later) > revision_at(now));

        let new_year = Local.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(revision_at(new_year), 20_200_101_000_000);
        let eve = Local.with_ymd_and_hms(2019, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(revision_at(eve), 20_191_231_235_959);
        assert!(revision_at(new_year) > revision_at(eve));
    }

    #[tokio::test]
    async fn test_write_index_overwrites() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join(INDEX_FILE), "stale contents\n").unwrap();

        write_index(repo.path(), &[]).await.unwrap();

        let text = std::fs::read_to_string(repo.path().join(INDEX_FILE)).unwrap();
        assert_eq!(text, "\n");
    }

    #[tokio::test]
    async fn test_image_entry() {
        let repo = tempfile::tempdir().unwrap();
        let image_path = repo.path().join("fedora30.xz");
        std::fs::write(&image_path, b"abc").unwrap();
        let facts = UncompressedFacts {
            size: 4096,
            sha1: HexDigest::new("11"),
            sha512: HexDigest::new("22"),
        };

        let entry = image_entry(&fedora30(), &image_path, &facts, "qcow2", 42)
            .await
            .unwrap();

        let text = entry.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[lago-fedora30]");
        assert_eq!(lines[1], "file=fedora30.xz");
        assert_eq!(lines[2], "format=qcow2");
        assert_eq!(lines[3], "compressed_size=3");
        assert_eq!(lines[4], "size=4096");
        assert_eq!(lines[5], "uncompressed_checksum=22");
        assert!(lines[6].starts_with("checksum=ddaf35a193617aba"));
        assert_eq!(lines[7], "revision=42");
        for prop in [
            "arch=x86_64",
            "base=fedora-30",
            "expand=/dev/sda3",
            "name=fedora30",
            "osinfo=fedora30",
        ] {
            assert!(lines.contains(&prop), "missing {prop}");
        }
        assert_eq!(lines.len(), 13);
    }

    #[test]
    fn test_section_uses_first_dot() {
        let entry = IndexEntry {
            section: format!("lago-{}", stem_before_first_dot("el7.5.xz")),
            file: "el7.5.xz".to_string(),
            format: "qcow2".to_string(),
            compressed_size: 1,
            size: 2,
            uncompressed_checksum: "a".to_string(),
            checksum: "b".to_string(),
            revision: 3,
            props: vec![],
        };
        assert_eq!(entry.lines()[0], "[lago-el7]");
    }

    #[test]
    fn test_render_index() {
        let entry = |name: &str| IndexEntry {
            section: format!("lago-{name}"),
            file: format!("{name}.xz"),
            format: "qcow2".to_string(),
            compressed_size: 1,
            size: 2,
            uncompressed_checksum: "a".to_string(),
            checksum: "b".to_string(),
            revision: 3,
            props: vec![("name".to_string(), name.to_string())],
        };

        let text = render_index(&[entry("one"), entry("two")]);
        assert!(text.ends_with("name=two\n"));
        let blocks: Vec<&str> = text.trim_end().split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("[lago-one]\n"));
        assert!(blocks[1].starts_with("[lago-two]\n"));
    }
}
