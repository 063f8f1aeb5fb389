//! Shuffled, fixed-size batches over a directory of example archives

use super::archive::{genre_prefix, read_example};
use crate::autograd::Tensor;
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

/// One batch of real piano-rolls
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[B, bars, beats, pitches, tracks]`, `B` counting only readable examples
    pub rolls: Tensor,
    /// Genre index per example
    pub labels: Vec<usize>,
    /// Archives the batch was read from
    pub paths: Vec<PathBuf>,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.labels.len()
    }
}

/// Corpus feeder.
///
/// Archives are filtered by file-name genre prefix and shuffled once at
/// construction. Batches are consecutive windows of the shuffled list; when a
/// window would run past the end the list is reshuffled and the epoch counter
/// advances, so every batch has exactly `batch_size` candidates.
#[derive(Debug)]
pub struct Dataset {
    paths: Vec<PathBuf>,
    genres: Vec<String>,
    batch_size: usize,
    roll_shape: Vec<usize>,
    cursor: usize,
    epoch: usize,
    rng: StdRng,
}

impl Dataset {
    /// Scan `dir` for archives whose prefix is one of `genres`
    pub fn open(
        dir: &Path,
        genres: &[String],
        batch_size: usize,
        roll_shape: &[usize],
        seed: Option<u64>,
    ) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match genre_prefix(&path) {
                Some(prefix) if genres.iter().any(|g| g == prefix) => paths.push(path),
                _ => tracing::debug!(path = %path.display(), "skipping file outside genre list"),
            }
        }
        // read_dir order is platform dependent
        paths.sort();

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::from_paths(paths, genres, batch_size, roll_shape, rng)
            .map_err(|e| match e {
                Error::Data { message, .. } => Error::data(dir, message),
                other => other,
            })
    }

    fn from_paths(
        mut paths: Vec<PathBuf>,
        genres: &[String],
        batch_size: usize,
        roll_shape: &[usize],
        mut rng: StdRng,
    ) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::data(PathBuf::new(), "no archives match the genre list"));
        }
        if batch_size == 0 || batch_size > paths.len() {
            return Err(Error::Config(format!(
                "batch_size {batch_size} must be between 1 and the corpus size {}",
                paths.len()
            )));
        }
        paths.shuffle(&mut rng);
        tracing::info!(examples = paths.len(), batch_size, "corpus loaded");

        Ok(Self {
            paths,
            genres: genres.to_vec(),
            batch_size,
            roll_shape: roll_shape.to_vec(),
            cursor: 0,
            epoch: 0,
            rng,
        })
    }

    pub fn num_examples(&self) -> usize {
        self.paths.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whole batches per pass over the corpus
    pub fn batches_per_epoch(&self) -> usize {
        self.paths.len() / self.batch_size
    }

    /// Number of reshuffles so far
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn genres(&self) -> &[String] {
        &self.genres
    }

    /// Paths of the next window, reshuffling on rollover
    fn next_window(&mut self) -> &[PathBuf] {
        let mut start = self.cursor;
        self.cursor += self.batch_size;
        if self.cursor > self.paths.len() {
            self.paths.shuffle(&mut self.rng);
            self.epoch += 1;
            start = 0;
            self.cursor = self.batch_size;
        }
        &self.paths[start..self.cursor]
    }

    /// Load the next batch, skipping unreadable examples.
    ///
    /// Fails with [`Error::Data`] only when no example in the window could be used.
    pub fn next_batch(&mut self) -> Result<Batch> {
        let window = self.next_window().to_vec();
        let mut rolls = Vec::with_capacity(window.len() * self.roll_shape.iter().product::<usize>());
        let mut labels = Vec::with_capacity(window.len());
        let mut paths = Vec::with_capacity(window.len());

        for path in window {
            match self.load(&path) {
                Ok((roll, label)) => {
                    rolls.extend(roll);
                    labels.push(label);
                    paths.push(path);
                }
                Err(e) => tracing::warn!(error = %e, "skipping example"),
            }
        }

        if labels.is_empty() {
            return Err(Error::data(
                self.paths.first().and_then(|p| p.parent()).unwrap_or(Path::new("")),
                "every example in the batch was unreadable",
            ));
        }

        let mut shape = vec![labels.len()];
        shape.extend_from_slice(&self.roll_shape);
        let rolls = Tensor::from_shape_vec(&shape, rolls, false)?;
        Ok(Batch { rolls, labels, paths })
    }

    fn load(&self, path: &Path) -> Result<(Vec<f32>, usize)> {
        let example = read_example(path)?;
        if example.shape != self.roll_shape {
            return Err(Error::data(
                path,
                format!("piano-roll shape {:?}, expected {:?}", example.shape, self.roll_shape),
            ));
        }
        let label = self
            .genres
            .iter()
            .position(|g| *g == example.genre)
            .ok_or_else(|| Error::data(path, format!("unknown genre '{}'", example.genre)))?;
        Ok((example.roll, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::write_example;
    use std::collections::HashSet;

    const SHAPE: [usize; 4] = [1, 2, 3, 2];

    fn genres() -> Vec<String> {
        vec!["Pop".to_string(), "Rock".to_string()]
    }

    fn write(dir: &Path, name: &str, genre: &str, fill: f32) {
        let roll = vec![fill; SHAPE.iter().product()];
        write_example(&dir.join(name), &SHAPE, &roll, genre).unwrap();
    }

    #[test]
    fn test_filters_by_genre_prefix() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Pop-1.npz", "Pop", 1.0);
        write(dir.path(), "Rock-1.npz", "Rock", 0.0);
        write(dir.path(), "Jazz-1.npz", "Jazz", 1.0);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let dataset = Dataset::open(dir.path(), &genres(), 2, &SHAPE, Some(0)).unwrap();
        assert_eq!(dataset.num_examples(), 2);
        assert_eq!(dataset.batches_per_epoch(), 1);
    }

    #[test]
    fn test_batch_layout_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Pop-1.npz", "Pop", 1.0);
        write(dir.path(), "Rock-1.npz", "Rock", 0.0);

        let mut dataset = Dataset::open(dir.path(), &genres(), 2, &SHAPE, Some(3)).unwrap();
        let batch = dataset.next_batch().unwrap();
        assert_eq!(batch.rolls.shape(), &[2, 1, 2, 3, 2]);
        for (i, &label) in batch.labels.iter().enumerate() {
            let row = &batch.rolls.as_slice()[i * 12..(i + 1) * 12];
            let expected = if label == 0 { 1.0 } else { 0.0 };
            assert!(row.iter().all(|&v| v == expected));
        }
    }

    #[test]
    fn test_wraps_around_with_reshuffle() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write(dir.path(), &format!("Pop-{i}.npz"), "Pop", 1.0);
        }
        let mut dataset = Dataset::open(dir.path(), &genres(), 2, &SHAPE, Some(7)).unwrap();

        let first: HashSet<PathBuf> = dataset.next_batch().unwrap().paths.into_iter().collect();
        let second: HashSet<PathBuf> = dataset.next_batch().unwrap().paths.into_iter().collect();
        assert!(first.is_disjoint(&second));
        assert_eq!(dataset.epoch(), 0);

        // Only one example left: the window restarts on a reshuffled list
        let third = dataset.next_batch().unwrap();
        assert_eq!(third.size(), 2);
        assert_eq!(dataset.epoch(), 1);
    }

    #[test]
    fn test_skips_corrupt_and_mislabelled_examples() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Pop-good.npz", "Pop", 1.0);
        std::fs::write(dir.path().join("Pop-corrupt.npz"), b"garbage").unwrap();
        write(dir.path(), "Rock-odd.npz", "Metal", 1.0);

        let mut dataset = Dataset::open(dir.path(), &genres(), 3, &SHAPE, Some(1)).unwrap();
        let batch = dataset.next_batch().unwrap();
        assert_eq!(batch.size(), 1);
        assert_eq!(batch.labels, vec![0]);
        assert_eq!(batch.rolls.shape()[0], 1);
    }

    #[test]
    fn test_wrong_shape_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Pop-1.npz", "Pop", 1.0);
        write_example(&dir.path().join("Pop-2.npz"), &[1, 1, 1, 1], &[1.0], "Pop").unwrap();

        let mut dataset = Dataset::open(dir.path(), &genres(), 2, &SHAPE, Some(1)).unwrap();
        assert_eq!(dataset.next_batch().unwrap().size(), 1);
    }

    #[test]
    fn test_all_unreadable_batch_is_data_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Pop-a.npz"), b"x").unwrap();
        std::fs::write(dir.path().join("Pop-b.npz"), b"y").unwrap();

        let mut dataset = Dataset::open(dir.path(), &genres(), 2, &SHAPE, Some(1)).unwrap();
        assert!(matches!(dataset.next_batch(), Err(Error::Data { .. })));
    }

    #[test]
    fn test_construction_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Dataset::open(dir.path(), &genres(), 1, &SHAPE, None),
            Err(Error::Data { .. })
        ));

        write(dir.path(), "Pop-1.npz", "Pop", 1.0);
        assert!(matches!(
            Dataset::open(dir.path(), &genres(), 2, &SHAPE, None),
            Err(Error::Config(_))
        ));
    }
}
