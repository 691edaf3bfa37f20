//! Archive extraction for sectioned uploads
//!
//! Controllers ship each section part as a ZIP of PNG frames, sometimes with
//! nested directories and stray non-image members. Extraction flattens to
//! the destination directory and keeps only image members.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use wavecap_common::{Error, Result};

/// Image extension accepted from archive members (case-insensitive).
const IMAGE_EXT: &str = ".png";

/// Extract the image members of `archive_path` into `dest_dir`.
///
/// Directory components of member names are stripped; a member collides with
/// an earlier one of the same base name by overwriting it. Non-image members
/// are skipped silently. Returns the extracted paths sorted lexicographically.
///
/// A ZIP that cannot be opened is a hard error: it means the transfer was
/// corrupted and the sender should retry the part.
pub fn extract_images(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::InvalidInput(format!("Cannot open archive: {}", e)))?;

    fs::create_dir_all(dest_dir)?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::InvalidInput(format!("Cannot read archive member: {}", e)))?;
        if entry.is_dir() {
            continue;
        }

        let base_name = match base_image_name(entry.name()) {
            Some(name) => name,
            None => {
                debug!("Skipping non-image archive member: {}", entry.name());
                continue;
            }
        };

        let out_path = dest_dir.join(&base_name);
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents)?;
        fs::write(&out_path, &contents)?;
        extracted.push(out_path);
    }

    extracted.sort();
    Ok(extracted)
}

/// Base filename of an image member, or None for non-image members.
fn base_image_name(member_name: &str) -> Option<String> {
    let base = member_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(member_name);
    if base.to_ascii_lowercase().ends_with(IMAGE_EXT) {
        Some(base.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_test_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, contents) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extraction_is_filtered_flattened_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("part.zip");
        write_test_zip(
            &archive,
            &[
                ("b.png", b"bbb"),
                ("a.PNG", b"aaa"),
                ("c.txt", b"not an image"),
                ("sub/d.png", b"ddd"),
            ],
        );

        let dest = dir.path().join("out");
        let extracted = extract_images(&archive, &dest).unwrap();

        let names: Vec<_> = extracted
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.png", "d.png"]);
        let mut sorted = extracted.clone();
        sorted.sort();
        assert_eq!(extracted, sorted);
        assert!(!dest.join("c.txt").exists());
        assert_eq!(fs::read(dest.join("d.png")).unwrap(), b"ddd");
    }

    #[test]
    fn colliding_base_names_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("part.zip");
        write_test_zip(&archive, &[("x/f.png", b"first"), ("y/f.png", b"second")]);

        let dest = dir.path().join("out");
        let extracted = extract_images(&archive, &dest).unwrap();

        assert_eq!(extracted.len(), 2);
        assert_eq!(fs::read(dest.join("f.png")).unwrap(), b"second");
    }

    #[test]
    fn corrupt_archive_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"this is not a zip").unwrap();

        let result = extract_images(&archive, &dir.path().join("out"));
        assert!(result.is_err());
    }
}
