//! One training example per `.npz` archive
//!
//! An archive holds `pianoroll.npy` (`bar x beat x pitch x track`) and
//! `genre.txt` with the genre label token.

use super::npy::{read_npy, write_npy, DType};
use crate::error::{Error, Result};
use std::io::{Cursor, Read, Write};
use std::path::Path;

pub const PIANOROLL_ENTRY: &str = "pianoroll.npy";
pub const GENRE_ENTRY: &str = "genre.txt";

/// A decoded archive
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub shape: Vec<usize>,
    pub roll: Vec<f32>,
    pub genre: String,
}

/// Genre prefix of a file name: everything before the first `-`
pub fn genre_prefix(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    name.split('-').next().filter(|p| !p.is_empty() && name.contains('-'))
}

/// Read and decode one archive; every failure is an [`Error::Data`] naming the file
pub fn read_example(path: &Path) -> Result<Example> {
    let bytes = std::fs::read(path).map_err(|e| Error::data(path, e.to_string()))?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Error::data(path, format!("not a zip archive: {e}")))?;

    let mut npy = Vec::new();
    archive
        .by_name(PIANOROLL_ENTRY)
        .map_err(|_| Error::data(path, format!("missing {PIANOROLL_ENTRY}")))?
        .read_to_end(&mut npy)
        .map_err(|e| Error::data(path, e.to_string()))?;

    let mut genre = String::new();
    archive
        .by_name(GENRE_ENTRY)
        .map_err(|_| Error::data(path, format!("missing {GENRE_ENTRY}")))?
        .read_to_string(&mut genre)
        .map_err(|e| Error::data(path, e.to_string()))?;

    let array = read_npy(&npy).map_err(|e| Error::data(path, e.to_string()))?;
    Ok(Example { shape: array.shape, roll: array.data, genre: genre.trim().to_string() })
}

/// Write a binary piano-roll and its genre as a deflated archive
pub fn write_example(path: &Path, shape: &[usize], roll: &[f32], genre: &str) -> Result<()> {
    let npy = write_npy(shape, roll, DType::Bool)?;
    let mut buffer = Cursor::new(Vec::new());

    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(PIANOROLL_ENTRY, options).map_err(std::io::Error::from)?;
        zip.write_all(&npy)?;
        zip.start_file(GENRE_ENTRY, options).map_err(std::io::Error::from)?;
        zip.write_all(genre.as_bytes())?;
        zip.finish().map_err(std::io::Error::from)?;
    }

    std::fs::write(path, buffer.into_inner())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_genre_prefix() {
        assert_eq!(genre_prefix(Path::new("/data/Pop-00012.npz")), Some("Pop"));
        assert_eq!(genre_prefix(Path::new("Jazz-a-b.npz")), Some("Jazz"));
        assert_eq!(genre_prefix(Path::new("README.md")), None);
        assert_eq!(genre_prefix(Path::new("-x.npz")), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Rock-1.npz");
        let roll = vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0];
        write_example(&path, &[1, 2, 3, 1], &roll, "Rock").unwrap();

        let example = read_example(&path).unwrap();
        assert_eq!(example.shape, vec![1, 2, 3, 1]);
        assert_eq!(example.roll, roll);
        assert_eq!(example.genre, "Rock");
    }

    #[test]
    fn test_corrupt_archive_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Pop-bad.npz");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        let err = read_example(&path).unwrap_err();
        assert!(matches!(&err, Error::Data { path: p, .. } if p == &path));

        let missing = PathBuf::from(dir.path()).join("Pop-missing.npz");
        assert!(matches!(read_example(&missing), Err(Error::Data { .. })));
    }

    #[test]
    fn test_missing_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Pop-empty.npz");
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            zip.start_file(GENRE_ENTRY, zip::write::SimpleFileOptions::default()).unwrap();
            zip.write_all(b"Pop").unwrap();
            zip.finish().unwrap();
        }
        std::fs::write(&path, buffer.into_inner()).unwrap();

        let err = read_example(&path).unwrap_err();
        assert!(err.to_string().contains(PIANOROLL_ENTRY));
    }
}
