//! File name helpers shared by the metadata generators.

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilenameError {
    #[error("file name of {0} is not valid unicode")]
    Unicode(String),
    #[error("{0} has no file name")]
    IllegalFilename(String),
}

/// The final component of `path` as a `String`.
pub fn filename_to_string(path: &Path) -> Result<String, FilenameError> {
    let result = path
        .file_name()
        .ok_or_else(|| FilenameError::IllegalFilename(path.display().to_string()))?
        .to_str()
        .ok_or_else(|| FilenameError::Unicode(path.display().to_string()))?
        .to_string();
    Ok(result)
}

/// Drop the last `.ext` of a file name, if any.
///
/// `fedora30.xz` becomes `fedora30`, `el7.5.xz` becomes `el7.5`.
pub fn strip_last_extension(file_name: &str) -> &str {
    file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem)
}

/// Everything before the first `.` of a file name.
///
/// `el7.5.xz` becomes `el7`.
pub fn stem_before_first_dot(file_name: &str) -> &str {
    file_name
        .split_once('.')
        .map_or(file_name, |(stem, _)| stem)
}
