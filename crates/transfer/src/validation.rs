use std::path::{Component, Path};

use crate::TransferError;

/// Validates a file name announced to the remote service.
///
/// The receiver stores chunks under this name, so it must be a single plain
/// path component.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent or current directory references (`..`, `.`)
/// - Anything with more than one component (`a/b`)
pub fn validate_upload_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidPath("empty file name".into()));
    }

    let path = Path::new(file_name);
    let mut components = path.components();
    let first = components.next();

    if components.next().is_some() {
        return Err(TransferError::InvalidPath(format!(
            "file name must not contain directories: {file_name}"
        )));
    }

    match first {
        Some(Component::Normal(_)) => Ok(()),
        Some(Component::ParentDir) => Err(TransferError::InvalidPath(format!(
            "parent directory traversal not allowed: {file_name}"
        ))),
        Some(Component::RootDir) | Some(Component::Prefix(_)) => Err(
            TransferError::InvalidPath(format!("absolute path not allowed: {file_name}")),
        ),
        Some(Component::CurDir) | None => Err(TransferError::InvalidPath(format!(
            "not a file name: {file_name}"
        ))),
    }
}
