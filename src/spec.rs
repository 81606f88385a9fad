//! Image spec files.
//!
//! A spec is a virt-builder commands file whose comment lines carry the
//! image properties:
//!
//! ```text
//! #name=fedora30
//! #base=fedora-30
//! install vim
//! #arch=x86_64
//! run-command dnf clean all
//! ```
//!
//! Lines that are not properties are provisioning commands; they are handed
//! to virt-builder untouched and ignored here.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::utils::{FilenameError, filename_to_string};

#[allow(clippy::unwrap_used)]
static PROP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#(?P<key>[A-Za-z0-9_]+)\s*=\s*(?P<value>.*)$").unwrap());

/// A spec is missing properties needed for the selected repo format.
#[derive(Error, Debug)]
#[error("Malformed spec file {}, missing props {}", .path.display(), .missing.join(", "))]
pub struct MalformedSpecError {
    pub path: PathBuf,
    pub missing: Vec<String>,
}

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Cannot read spec file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error(transparent)]
    Malformed(#[from] MalformedSpecError),
    #[error("Invalid spec file name: {0}")]
    Filename(#[from] FilenameError),
}

/// Checks that a spec carries the properties a repo format needs.
pub trait RequiredProperties {
    fn required(&self) -> BTreeSet<&'static str>;

    fn verify(&self, spec: &Spec) -> Result<(), MalformedSpecError> {
        let missing: Vec<String> = self
            .required()
            .into_iter()
            .filter(|prop| !spec.props.contains_key(*prop))
            .map(ToString::to_string)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MalformedSpecError {
                path: spec.commands_file.clone(),
                missing,
            })
        }
    }
}

const BASE_PROPS: &[&str] = &["name"];

/// Lago templates need `base`, `name` and `distro` (fc23, el7, ...).
pub struct LagoSpec;

impl RequiredProperties for LagoSpec {
    fn required(&self) -> BTreeSet<&'static str> {
        BASE_PROPS
            .iter()
            .chain(&["base", "name", "distro"])
            .copied()
            .collect()
    }
}

/// virt-builder templates need `base`, `name`, `osinfo`, `arch` and
/// `expand` (the partition to grow, like `/dev/sda3`).
pub struct VirtBuilderSpec;

impl RequiredProperties for VirtBuilderSpec {
    fn required(&self) -> BTreeSet<&'static str> {
        BASE_PROPS
            .iter()
            .chain(&["base", "osinfo", "arch", "expand"])
            .copied()
            .collect()
    }
}

/// Specs usable by both repo formats.
pub struct AllSpec;

impl RequiredProperties for AllSpec {
    fn required(&self) -> BTreeSet<&'static str> {
        let mut props = LagoSpec.required();
        props.extend(VirtBuilderSpec.required());
        props
    }
}

/// Which metadata to generate for the repo.
#[derive(Copy, Clone, clap::ValueEnum, Debug, Eq, PartialEq)]
pub enum RepoFormat {
    /// virt-builder `index` file.
    VirtBuilder,
    /// Lago `repo.metadata` plus per image sidecars.
    Lago,
    /// Both of the above.
    All,
}

impl RepoFormat {
    pub fn policy(self) -> &'static dyn RequiredProperties {
        match self {
            Self::VirtBuilder => &VirtBuilderSpec,
            Self::Lago => &LagoSpec,
            Self::All => &AllSpec,
        }
    }

    pub const fn includes_lago(self) -> bool {
        matches!(self, Self::Lago | Self::All)
    }

    pub const fn includes_virt_builder(self) -> bool {
        matches!(self, Self::VirtBuilder | Self::All)
    }
}

/// A parsed spec file.
#[derive(Debug, Clone)]
pub struct Spec {
    pub props: BTreeMap<String, String>,
    pub commands_file: PathBuf,
    /// Base file name of the spec, also the image file name.
    pub image_name: String,
}

impl Spec {
    /// Collect the `#key=value` properties of `text`.
    pub fn parse_props(text: &str) -> BTreeMap<String, String> {
        text.lines()
            .filter_map(|line| PROP_REGEX.captures(line))
            .map(|caps| (caps["key"].to_string(), caps["value"].to_string()))
            .collect()
    }

    /// Read a spec file and check it against `policy`.
    pub async fn load(path: &Path, policy: &dyn RequiredProperties) -> Result<Self, SpecError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| SpecError::Io(path.to_path_buf(), err))?;

        let spec = Spec {
            props: Self::parse_props(&text),
            commands_file: path.to_path_buf(),
            image_name: filename_to_string(path)?,
        };
        policy.verify(&spec)?;
        Ok(spec)
    }

    pub fn base(&self) -> Option<&str> {
        self.props.get("base").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    const FEDORA30: &str = "\
#base=fedora-30
#name=fedora30
install vim-enhanced
#osinfo=fedora30
#arch = x86_64
run-command dnf clean all
#expand=/dev/sda3
";

    fn write_spec(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_parse_props_interleaved() {
        let props = Spec::parse_props(FEDORA30);
        assert_eq!(props.len(), 5);
        assert_eq!(props["arch"], "x86_64");
        assert_eq!(props["expand"], "/dev/sda3");
        assert!(!props.contains_key("install"));
    }

    #[test]
    fn test_parse_props_ignores_commands() {
        let props = Spec::parse_props("# comment only\nupdate\n#not a prop\n#k=\n");
        assert_eq!(props.len(), 1);
        assert_eq!(props["k"], "");
    }

    #[test]
    fn test_parse_props_value_keeps_inner_equals() {
        let props = Spec::parse_props("#notes=a=b c\n");
        assert_eq!(props["notes"], "a=b c");
    }

    #[test]
    fn test_parse_props_value_keeps_trailing_whitespace() {
        let props = Spec::parse_props("#motd = keep trailing  \n#tabbed=\tx\t\n");
        assert_eq!(props["motd"], "keep trailing  ");
        assert_eq!(props["tabbed"], "x\t");
    }

    #[test]
    fn test_parse_props_keys_are_ascii() {
        let props = Spec::parse_props("#caf\u{e9}=1\n#r\u{e9}sum\u{e9}=2\n#os_2=ok\n");
        assert_eq!(props.len(), 1);
        assert_eq!(props["os_2"], "ok");
    }

    #[tokio::test]
    async fn test_load_virt_builder() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_spec(dir.path(), "fedora30", FEDORA30);
        let spec = Spec::load(&path, RepoFormat::VirtBuilder.policy())
            .await
            .unwrap();
        assert_eq!(spec.image_name, "fedora30");
        assert_eq!(spec.base(), Some("fedora-30"));
        assert_eq!(spec.commands_file, path);
    }

    #[tokio::test]
    async fn test_load_missing_props() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_spec(dir.path(), "fedora30", FEDORA30);

        let err = match Spec::load(&path, RepoFormat::Lago.policy()).await.unwrap_err() {
            SpecError::Malformed(err) => err,
            other => panic!("unexpected error {other}"),
        };
        assert_eq!(err.path, path);
        assert_eq!(err.missing, vec!["distro".to_string()]);
        assert!(err.to_string().contains("fedora30"));

        let err = Spec::load(&path, RepoFormat::All.policy())
            .await
            .unwrap_err();
        assert!(matches!(err, SpecError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Spec::load(&dir.path().join("nope"), &LagoSpec)
            .await
            .unwrap_err();
        assert!(matches!(err, SpecError::Io(..)));
    }

    #[test]
    fn test_required_sets() {
        assert_eq!(
            LagoSpec.required(),
            BTreeSet::from(["base", "distro", "name"])
        );
        assert_eq!(
            VirtBuilderSpec.required(),
            BTreeSet::from(["arch", "base", "expand", "name", "osinfo"])
        );
        assert_eq!(AllSpec.required().len(), 6);
    }

    #[test]
    fn test_format_flags() {
        assert!(RepoFormat::All.includes_lago());
        assert!(RepoFormat::All.includes_virt_builder());
        assert!(!RepoFormat::Lago.includes_virt_builder());
        assert!(!RepoFormat::VirtBuilder.includes_lago());
    }
}
