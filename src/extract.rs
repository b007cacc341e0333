use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use tempfile::Builder;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::domain::ArchiveFormat;
use crate::error::ClimateError;
use crate::store::Store;

pub const DATA_SUFFIX: &str = ".nc";

/// Extracts the `.nc` members of `archive` into the store's canonical
/// directory for that archive and returns their paths in archive order.
pub fn extract(
    store: &Store,
    archive: &Utf8Path,
    force: bool,
) -> Result<Vec<Utf8PathBuf>, ClimateError> {
    let target_dir = store.extract_dir(archive);
    let paths = extract_members(archive.as_std_path(), target_dir.as_std_path(), force)?;
    paths
        .into_iter()
        .map(|path| {
            Utf8PathBuf::from_path_buf(path)
                .map_err(|path| ClimateError::Filesystem(format!("non UTF-8 path {}", path.display())))
        })
        .collect()
}

pub fn extract_members(
    archive: &Path,
    target_dir: &Path,
    force: bool,
) -> Result<Vec<PathBuf>, ClimateError> {
    let format =
        ArchiveFormat::from_path(archive).ok_or_else(|| ClimateError::UnsupportedArchive(archive.to_path_buf()))?;
    fs::create_dir_all(target_dir).map_err(|err| ClimateError::Filesystem(err.to_string()))?;

    let paths = match format {
        ArchiveFormat::Zip => extract_zip(archive, target_dir, force)?,
        ArchiveFormat::Tgz => extract_tgz(archive, target_dir, force)?,
    };
    if paths.is_empty() {
        return Err(ClimateError::NoDataFiles(archive.to_path_buf()));
    }
    info!(
        archive = %archive.display(),
        target = %target_dir.display(),
        files = paths.len(),
        "extracted archive"
    );
    Ok(paths)
}

fn extract_zip(archive: &Path, target_dir: &Path, force: bool) -> Result<Vec<PathBuf>, ClimateError> {
    let extraction_err = |message: String| ClimateError::Extraction {
        archive: archive.to_path_buf(),
        message,
    };
    let file = fs::File::open(archive).map_err(|err| extraction_err(err.to_string()))?;
    let mut zip = ZipArchive::new(file).map_err(|err| extraction_err(err.to_string()))?;

    let mut paths = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|err| extraction_err(err.to_string()))?;
        if entry.is_dir() || !is_data_member(entry.name()) {
            continue;
        }
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ClimateError::UnsafeArchiveMember(entry.name().to_string()))?;
        let destination = target_dir.join(relative);
        write_member(&mut entry, &destination, force).map_err(|err| extraction_err(err.to_string()))?;
        paths.push(destination);
    }
    Ok(paths)
}

fn extract_tgz(archive: &Path, target_dir: &Path, force: bool) -> Result<Vec<PathBuf>, ClimateError> {
    let extraction_err = |message: String| ClimateError::Extraction {
        archive: archive.to_path_buf(),
        message,
    };
    let file = fs::File::open(archive).map_err(|err| extraction_err(err.to_string()))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));

    let mut paths = Vec::new();
    let entries = tar.entries().map_err(|err| extraction_err(err.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| extraction_err(err.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|err| extraction_err(err.to_string()))?
            .into_owned();
        let display = name.to_string_lossy().into_owned();
        if !is_data_member(&display) {
            continue;
        }
        let relative = enclosed(&name).ok_or(ClimateError::UnsafeArchiveMember(display))?;
        let destination = target_dir.join(relative);
        write_member(&mut entry, &destination, force).map_err(|err| extraction_err(err.to_string()))?;
        paths.push(destination);
    }
    Ok(paths)
}

fn is_data_member(name: &str) -> bool {
    name.to_lowercase().ends_with(DATA_SUFFIX)
}

/// Relative form of `path` when it stays inside the extraction directory.
fn enclosed(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() { None } else { Some(out) }
}

fn write_member(reader: &mut impl Read, destination: &Path, force: bool) -> io::Result<()> {
    if destination.exists() && !force {
        debug!(path = %destination.display(), "member already extracted");
        return Ok(());
    }
    let parent = destination.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    let mut temp = Builder::new().prefix(".extract-").tempfile_in(parent)?;
    io::copy(reader, &mut temp)?;
    temp.persist(destination).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclosed_rejects_escapes() {
        assert_eq!(enclosed(Path::new("a/./b.nc")), Some(PathBuf::from("a/b.nc")));
        assert_eq!(enclosed(Path::new("../b.nc")), None);
        assert_eq!(enclosed(Path::new("/etc/b.nc")), None);
        assert_eq!(enclosed(Path::new(".")), None);
    }

    #[test]
    fn data_member_suffix() {
        assert!(is_data_member("tas_Amon.nc"));
        assert!(is_data_member("dir/TAS.NC"));
        assert!(!is_data_member("manifest.json"));
        assert!(!is_data_member("tas.nc.md5"));
    }
}
