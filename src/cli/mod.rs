//! Command-line interface
//!
//! ```bash
//! museforge ./data
//! MUSEFORGE_CONFIG=small.yaml museforge ./data
//! ```

use crate::config::HyperParams;
use crate::error::Result;
use clap::Parser;
use std::path::{Path, PathBuf};

/// Environment variable naming an optional YAML hyperparameter file
pub const CONFIG_ENV: &str = "MUSEFORGE_CONFIG";

/// Train a genre-conditional multi-track piano-roll GAN
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "museforge")]
#[command(version)]
#[command(about = "Train a genre-conditional multi-track piano-roll GAN")]
pub struct Cli {
    /// Directory of `<genre>-<id>.npz` training examples
    #[arg(value_name = "DATA_DIR")]
    pub data_dir: PathBuf,
}

/// Parse arguments (for testing)
pub fn parse_args<I, T>(args: I) -> std::result::Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Defaults, or the YAML file at `config` when given
pub fn load_params(config: Option<&Path>) -> Result<HyperParams> {
    match config {
        Some(path) => HyperParams::from_yaml_file(path),
        None => Ok(HyperParams::default()),
    }
}

/// Load hyperparameters and run both training phases
pub fn run(cli: &Cli) -> Result<()> {
    let config = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let params = load_params(config.as_deref())?;
    if let Some(path) = &config {
        tracing::info!(path = %path.display(), "loaded hyperparameters");
    }

    let report = crate::train::train(&params, &cli.data_dir)?;
    tracing::info!(
        classifier_accuracy = report.classifier.accuracy,
        conditioning_accuracy = report.gan.accuracy,
        parameters = report.summary.trainable(),
        "training complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_single_positional_argument() {
        let cli = parse_args(["museforge", "corpus"]).unwrap();
        assert_eq!(cli.data_dir, PathBuf::from("corpus"));

        assert!(parse_args(["museforge"]).is_err());
        assert!(parse_args(["museforge", "a", "b"]).is_err());
        assert!(parse_args(["museforge", "corpus", "--epochs", "3"]).is_err());
    }

    #[test]
    fn test_load_params() {
        assert_eq!(load_params(None).unwrap(), HyperParams::default());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "gan_epochs: 2").unwrap();
        assert_eq!(load_params(Some(file.path())).unwrap().gan_epochs, 2);
    }

    #[test]
    fn test_missing_data_dir_fails() {
        let cli = parse_args(["museforge", "/nonexistent/museforge-data"]).unwrap();
        std::env::remove_var(CONFIG_ENV);
        assert!(run(&cli).is_err());
    }
}
