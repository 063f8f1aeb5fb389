//! # museforge
//!
//! A genre-conditional, multi-track piano-roll GAN with binary stochastic
//! neurons, built on a small tape-based autograd engine.
//!
//! ## Architecture
//!
//! - **autograd**: tensors, differentiable ops and the backward pass
//! - **binary**: straight-through and REINFORCE binary neurons
//! - **nn**: generator, refiner, discriminator and classifier networks
//! - **train**: losses, gradient penalty, metrics and training loops
//! - **optim**: Adam
//! - **data**: `.npz` example corpus and batch feeder
//! - **io**: SafeTensors checkpoints
//! - **config**: YAML hyperparameters
//!
//! ## Example
//!
//! ```
//! use museforge::autograd::Context;
//! use museforge::binary::BinaryNeuron;
//! use museforge::nn::{ModelConfig, MuseGan};
//!
//! let config = ModelConfig {
//!     num_tracks: 1,
//!     num_bars: 2,
//!     latent_size: 8,
//!     residual_layers: 1,
//!     ..ModelConfig::default()
//! };
//! let mut ctx = Context::with_seed(0);
//! let neuron = BinaryNeuron::from_name("straight_through", true, 1.0)?;
//! let mut gan = MuseGan::new(&config, neuron, &mut ctx)?;
//!
//! let rolls = gan.sample(&[0, 2], &mut ctx)?;
//! assert_eq!(rolls.shape(), &[2, 2, 96, 84, 1]);
//! # Ok::<(), museforge::Error>(())
//! ```

pub mod autograd;
pub mod binary;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod logging;
pub mod nn;
pub mod optim;
pub mod train;

pub use autograd::{Context, Tensor};
pub use error::{Error, Result};
