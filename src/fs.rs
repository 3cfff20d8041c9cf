//! Capability-scoped filesystem helpers for absolute UTF-8 paths.
//!
//! Each helper opens the parent directory with ambient authority and then
//! performs a single operation relative to it.

use std::io::{self, Write};

use camino::Utf8Path;
use cap_std::{
    ambient_authority,
    fs_utf8::{Dir, OpenOptions},
};

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{path} does not name a file or directory"),
        )
    })?;
    Ok((parent, file_name))
}

fn open_parent(path: &Utf8Path) -> io::Result<(Dir, &str)> {
    let (parent, file_name) = split(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Returns `true` when `path` exists. A missing parent counts as absent.
pub(crate) fn exists(path: &Utf8Path) -> io::Result<bool> {
    match open_parent(path) {
        Ok((dir, name)) => dir.try_exists(name),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub(crate) fn create_dir_all(path: &Utf8Path) -> io::Result<()> {
    Dir::create_ambient_dir_all(path, ambient_authority())
}

/// Removes a directory tree. Returns `false` when nothing was there.
pub(crate) fn remove_tree(path: &Utf8Path) -> io::Result<bool> {
    let outcome = open_parent(path).and_then(|(dir, name)| dir.remove_dir_all(name));
    absent_is_ok(outcome)
}

/// Removes a single file. Returns `false` when nothing was there.
pub(crate) fn remove_file(path: &Utf8Path) -> io::Result<bool> {
    let outcome = open_parent(path).and_then(|(dir, name)| dir.remove_file(name));
    absent_is_ok(outcome)
}

pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (dir, name) = open_parent(path)?;
    dir.read_to_string(name)
}

/// Writes `contents` to `path`, creating parent directories first.
pub(crate) fn write(path: &Utf8Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    let (parent, _) = split(path)?;
    create_dir_all(parent)?;
    let (dir, name) = open_parent(path)?;
    dir.write(name, contents)
}

/// Creates `path` with `contents` only if nothing is there yet, creating
/// parent directories first. Returns `false` when the file already existed.
pub(crate) fn create_new(path: &Utf8Path, contents: impl AsRef<[u8]>) -> io::Result<bool> {
    let (parent, _) = split(path)?;
    create_dir_all(parent)?;
    let (dir, name) = open_parent(path)?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    match dir.open_with(name, &options) {
        Ok(mut file) => file.write_all(contents.as_ref()).map(|()| true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

fn absent_is_ok(outcome: io::Result<()>) -> io::Result<bool> {
    match outcome {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
