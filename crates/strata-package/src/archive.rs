//! Package archives: gzip-compressed tarballs of regular files and directories.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use strata_ledger::Digest;
use tar::{Archive, Builder, EntryType, Header};

use crate::error::PackageError;
use crate::package::Package;

/// SHA-256 of a file on disk.
pub fn hash_file(path: &Path) -> Result<Digest, PackageError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PackageError::ArchiveNotFound(path.to_path_buf()),
        _ => PackageError::Io(e),
    })?;
    Ok(Digest::sha256_reader(BufReader::new(file))?)
}

/// Recompute the archive hash and compare it with the declared one.
pub fn verify_archive(package: &Package) -> Result<Digest, PackageError> {
    let actual = hash_file(&package.archive)?;
    if actual != package.archive_hash {
        return Err(PackageError::HashMismatch {
            package_id: package.package_id.clone(),
            expected: package.archive_hash.to_hex(),
            actual: actual.to_hex(),
        });
    }
    Ok(actual)
}

/// A regular file read out of an archive.
#[derive(Clone, Debug)]
pub struct ArchiveFile {
    /// Relative path, free of `..` and root components.
    pub path: PathBuf,
    pub mode: u32,
    pub data: Vec<u8>,
    /// SHA-256 of `data`.
    pub hash: Digest,
}

impl ArchiveFile {
    /// Write under `root`, then hash what actually landed on disk.
    pub fn write_to(&self, root: &Path) -> io::Result<Digest> {
        let target = root.join(&self.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        file.write_all(&self.data)?;
        file.sync_all()?;
        drop(file);
        set_mode(&target, self.mode)?;
        Digest::sha256_reader(BufReader::new(File::open(&target)?))
    }
}

/// Everything an archive contains, validated.
#[derive(Clone, Debug, Default)]
pub struct ArchiveContents {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<ArchiveFile>,
}

/// Read and validate a package archive.
///
/// Rejects absolute paths, `..` components and entry types other than
/// regular files and directories.
pub fn read_archive(path: &Path) -> Result<ArchiveContents, PackageError> {
    let fail = |reason: String| PackageError::ExtractionFailed {
        archive: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PackageError::ArchiveNotFound(path.to_path_buf()),
        _ => PackageError::Io(e),
    })?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut contents = ArchiveContents::default();

    let entries = archive.entries().map_err(|e| fail(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| fail(e.to_string()))?;
        let raw_path = entry.path().map_err(|e| fail(e.to_string()))?.into_owned();
        let Some(rel) = safe_relative_path(&raw_path) else {
            return Err(fail(format!("unsafe entry path {}", raw_path.display())));
        };
        if rel.as_os_str().is_empty() {
            continue;
        }

        match entry.header().entry_type() {
            EntryType::Directory => contents.dirs.push(rel),
            EntryType::Regular | EntryType::Continuous => {
                let mode = entry.header().mode().unwrap_or(0o644);
                let mut data = Vec::with_capacity(entry.size() as usize);
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| fail(format!("{}: {e}", rel.display())))?;
                let hash = Digest::sha256(&data);
                contents.files.push(ArchiveFile {
                    path: rel,
                    mode,
                    data,
                    hash,
                });
            }
            other => {
                return Err(fail(format!(
                    "unsupported entry type {other:?} at {}",
                    rel.display()
                )))
            }
        }
    }
    Ok(contents)
}

/// Strip `.` components; `None` when the path is absolute or climbs.
pub fn safe_relative_path(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// Build a tar.gz archive from in-memory files. Returns its SHA-256.
pub fn pack_files(out: &Path, files: &[(&str, &[u8])]) -> Result<Digest, PackageError> {
    let encoder = GzEncoder::new(File::create(out)?, Compression::default());
    let mut builder = Builder::new(encoder);
    for (name, data) in files {
        let mut header = Header::new_gnu();
        header.set_path(name)?;
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        builder.append(&header, *data)?;
    }
    builder.into_inner()?.finish()?.sync_all()?;
    hash_file(out)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
