//! End-to-end training on a small synthetic corpus

use museforge::autograd::Context;
use museforge::config::HyperParams;
use museforge::data::{write_example, Dataset};
use museforge::io::{load_checkpoint, CheckpointMeta};
use museforge::nn::{Classifier, Module};
use museforge::train::{train, ClassifierTrainer, REPORT_FILE};
use std::path::{Path, PathBuf};

fn tiny_params(models_dir: &Path) -> HyperParams {
    HyperParams {
        num_bars: 2,
        num_tracks: 1,
        genres: vec!["Pop".to_string(), "Rock".to_string()],
        latent_size: 8,
        residual_layers: 1,
        batch_size: 2,
        learning_rate: 1e-3,
        classifier_epochs: 1,
        gan_epochs: 1,
        models_dir: models_dir.to_path_buf(),
        seed: Some(3),
        ..HyperParams::default()
    }
}

/// Pop rolls hold low notes, Rock rolls high notes
fn write_corpus(dir: &Path, params: &HyperParams, per_genre: usize) {
    let shape = params.example_shape();
    let len: usize = shape.iter().product();
    let notes = params.num_notes;
    for (label, genre) in params.genres.iter().enumerate() {
        for id in 0..per_genre {
            let roll: Vec<f32> = (0..len)
                .map(|i| {
                    let pitch = (i / params.num_tracks) % notes;
                    let low = pitch < notes / 2;
                    if low == (label == 0) && (i + id) % 7 == 0 {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            let path = dir.join(format!("{genre}-{id:03}.npz"));
            write_example(&path, &shape, &roll, genre).expect("archive should be written");
        }
    }
    // Not a listed genre, must be ignored
    std::fs::write(dir.join("Jazz-000.npz"), b"ignored").expect("file should be written");
}

fn checkpoint_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "safetensors"))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[test]
fn test_classifier_training_keeps_only_improving_checkpoints() {
    let data = tempfile::tempdir().expect("temp dir should be created");
    let models = tempfile::tempdir().expect("temp dir should be created");
    let params = tiny_params(models.path());
    write_corpus(data.path(), &params, 3);

    let mut dataset =
        Dataset::open(data.path(), &params.genres, 2, &params.example_shape(), Some(1))
            .expect("corpus should open");
    assert_eq!(dataset.num_examples(), 6);
    assert_eq!(dataset.batches_per_epoch(), 3);

    let mut ctx = Context::with_seed(5);
    let mut classifier =
        Classifier::new(&params.model_config(), &mut ctx).expect("classifier should build");
    let mut trainer = ClassifierTrainer::new(1e-3, 0.1, 4, models.path());
    let result = trainer.train(&mut classifier, &mut dataset).expect("training should run");

    assert_eq!(result.steps, 12);
    assert_eq!(result.skipped_steps, 0);
    assert!(result.final_loss.is_finite());

    let files = checkpoint_files(models.path());
    let best = result.best_accuracy.expect("the first offer always improves on nothing");
    assert!(!files.is_empty());

    // Every write improved on the previous one, so the newest holds the best accuracy
    let mut accuracies: Vec<f32> = files
        .iter()
        .map(|path| {
            let mut fresh = Classifier::new(&params.model_config(), &mut ctx)
                .expect("classifier should build");
            let meta: CheckpointMeta =
                load_checkpoint(&mut fresh, path).expect("checkpoint should load");
            meta.accuracy
        })
        .collect();
    accuracies.sort_by(f32::total_cmp);
    accuracies.windows(2).for_each(|w| assert!(w[0] < w[1]));
    assert_eq!(accuracies.last().copied(), Some(best));
}

#[test]
fn test_loaded_checkpoint_restores_parameters() {
    let data = tempfile::tempdir().expect("temp dir should be created");
    let models = tempfile::tempdir().expect("temp dir should be created");
    let params = tiny_params(models.path());
    write_corpus(data.path(), &params, 2);

    let mut dataset =
        Dataset::open(data.path(), &params.genres, 2, &params.example_shape(), Some(2))
            .expect("corpus should open");
    let mut ctx = Context::with_seed(6);
    let mut classifier =
        Classifier::new(&params.model_config(), &mut ctx).expect("classifier should build");
    let mut trainer = ClassifierTrainer::new(1e-3, 0.0, 1, models.path());
    trainer.train(&mut classifier, &mut dataset).expect("training should run");

    let files = checkpoint_files(models.path());
    let first = files.first().expect("step zero always offers a checkpoint");
    let mut restored =
        Classifier::new(&params.model_config(), &mut ctx).expect("classifier should build");
    load_checkpoint(&mut restored, first).expect("checkpoint should load");
    assert_eq!(restored.named_parameters().len(), classifier.named_parameters().len());
}

#[test]
fn test_full_pipeline_on_tiny_corpus() {
    let data = tempfile::tempdir().expect("temp dir should be created");
    let models = tempfile::tempdir().expect("temp dir should be created");
    let params = tiny_params(models.path());
    write_corpus(data.path(), &params, 2);

    let report = train(&params, data.path()).expect("pipeline should run");
    assert_eq!(report.classifier.steps, 2);
    assert_eq!(report.gan.steps, 2);
    assert_eq!(report.gan.epochs, 1);
    assert!(report.summary.trainable() > 0);
    assert!((0.0..=1.0).contains(&report.gan.accuracy));

    assert!(!checkpoint_files(models.path()).is_empty());
    assert_eq!(checkpoint_files(&models.path().join("gan")).len(), 1);
    assert!(models.path().join(REPORT_FILE).is_file());
}

#[test]
fn test_pipeline_rejects_missing_corpus() {
    let models = tempfile::tempdir().expect("temp dir should be created");
    let params = tiny_params(models.path());
    assert!(train(&params, Path::new("/nonexistent/museforge-data")).is_err());
}

#[test]
fn test_pipeline_rejects_invalid_params() {
    let data = tempfile::tempdir().expect("temp dir should be created");
    let models = tempfile::tempdir().expect("temp dir should be created");
    let params = HyperParams { estimator: "gumbel".into(), ..tiny_params(models.path()) };
    write_corpus(data.path(), &params, 2);
    assert!(train(&params, data.path()).is_err());
}

#[test]
fn test_pipeline_rejects_reinforce_without_sampling() {
    let data = tempfile::tempdir().expect("temp dir should be created");
    let models = tempfile::tempdir().expect("temp dir should be created");
    let params = HyperParams {
        estimator: "reinforce".into(),
        stochastic_binarization: false,
        ..tiny_params(models.path())
    };
    write_corpus(data.path(), &params, 2);
    let err = train(&params, data.path()).expect_err("thresholding would bypass REINFORCE");
    assert!(matches!(err, museforge::Error::Config(_)));
    assert!(checkpoint_files(models.path()).is_empty());
}
