//! Generator: genre-conditioned latent vector to real-valued piano-roll
//!
//! ```text
//! genre -> embedding ─┐
//!                     * -> SharedGenerator -> [B, bars, 16, 7, 64]
//! latent ─────────────┘        │ (same output for every track)
//!                              ├─ PitchTimeBranch ─┐
//!                              └─ TimePitchBranch ─┴ concat -> MergeBranch -> [B, bars, 96, 84, 1]
//! tracks concatenated on the last axis -> [B, bars, 96, 84, tracks]
//! ```

use super::layers::{BatchNorm, ConvTranspose3d, Dense, Embedding};
use super::module::scoped;
use super::{Module, ModelConfig};
use crate::autograd::{concat_last, mul, relu, reshape, sigmoid, Context, Tensor};
use crate::error::{Error, Result};

/// Channels of the dense layer output, per bar pair
const DENSE_CHANNELS: usize = 512;

/// `(kernel, stride, out_channels)` of the shared transposed-convolution stack
const SHARED_STAGES: [([usize; 3], [usize; 3], usize); 5] = [
    ([2, 1, 1], [1, 1, 1], 256),
    ([1, 4, 1], [1, 4, 1], 128),
    ([1, 1, 3], [1, 1, 3], 128),
    ([1, 4, 1], [1, 4, 1], 64),
    ([1, 1, 3], [1, 1, 2], 64),
];

/// Channels of the shared trunk output
pub const SHARED_CHANNELS: usize = 64;

/// Transposed convolution, relu, batch norm
fn deconv_block(
    deconv: &ConvTranspose3d,
    norm: &mut BatchNorm,
    x: &Tensor,
    ctx: &Context,
) -> Result<Tensor> {
    norm.forward(&relu(&deconv.forward(x)?), ctx)
}

/// Trunk shared by every track: one parameter set, evaluated once per forward pass
pub struct SharedGenerator {
    dense: Dense,
    dense_norm: BatchNorm,
    stages: Vec<(ConvTranspose3d, BatchNorm)>,
    num_bars: usize,
}

impl SharedGenerator {
    pub fn new(latent_size: usize, num_bars: usize, ctx: &mut Context) -> Self {
        let width = (num_bars - 1) * DENSE_CHANNELS;
        let dense = Dense::new(latent_size, width, ctx);
        let mut in_channels = DENSE_CHANNELS;
        let stages = SHARED_STAGES
            .iter()
            .map(|&(kernel, stride, out)| {
                let deconv = ConvTranspose3d::new(kernel, in_channels, out, stride, ctx);
                in_channels = out;
                (deconv, BatchNorm::new(out))
            })
            .collect();
        Self { dense, dense_norm: BatchNorm::new(width), stages, num_bars }
    }

    /// `[B, latent]` -> `[B, bars, 16, 7, 64]`
    pub fn forward(&mut self, class_input: &Tensor, ctx: &Context) -> Result<Tensor> {
        let batch = class_input.shape()[0];
        let h = self.dense_norm.forward(&relu(&self.dense.forward(class_input)?), ctx)?;
        let mut h = reshape(&h, &[batch, self.num_bars - 1, 1, 1, DENSE_CHANNELS])?;
        for (deconv, norm) in &mut self.stages {
            h = deconv_block(deconv, norm, &h, ctx)?;
        }
        Ok(h)
    }
}

impl Module for SharedGenerator {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = scoped("dense", self.dense.named_parameters());
        out.extend(scoped("bn0", self.dense_norm.named_parameters()));
        for (i, (deconv, norm)) in self.stages.iter().enumerate() {
            out.extend(scoped(&format!("deconv{}", i + 1), deconv.named_parameters()));
            out.extend(scoped(&format!("bn{}", i + 1), norm.named_parameters()));
        }
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = scoped("dense", self.dense.named_parameters_mut());
        out.extend(scoped("bn0", self.dense_norm.named_parameters_mut()));
        for (i, (deconv, norm)) in self.stages.iter_mut().enumerate() {
            out.extend(scoped(&format!("deconv{}", i + 1), deconv.named_parameters_mut()));
            out.extend(scoped(&format!("bn{}", i + 1), norm.named_parameters_mut()));
        }
        out
    }
}

/// Two upsampling stages, each a transposed convolution + relu + batch norm
struct UpsamplePair {
    deconv1: ConvTranspose3d,
    bn1: BatchNorm,
    deconv2: ConvTranspose3d,
    bn2: BatchNorm,
}

impl UpsamplePair {
    fn new(first: ([usize; 3], usize), second: ([usize; 3], usize), ctx: &mut Context) -> Self {
        let (k1, c1) = first;
        let (k2, c2) = second;
        Self {
            deconv1: ConvTranspose3d::new(k1, SHARED_CHANNELS, c1, k1, ctx),
            bn1: BatchNorm::new(c1),
            deconv2: ConvTranspose3d::new(k2, c1, c2, k2, ctx),
            bn2: BatchNorm::new(c2),
        }
    }

    fn forward(&mut self, x: &Tensor, ctx: &Context) -> Result<Tensor> {
        let h = deconv_block(&self.deconv1, &mut self.bn1, x, ctx)?;
        deconv_block(&self.deconv2, &mut self.bn2, &h, ctx)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = scoped("deconv1", self.deconv1.named_parameters());
        out.extend(scoped("bn1", self.bn1.named_parameters()));
        out.extend(scoped("deconv2", self.deconv2.named_parameters()));
        out.extend(scoped("bn2", self.bn2.named_parameters()));
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = scoped("deconv1", self.deconv1.named_parameters_mut());
        out.extend(scoped("bn1", self.bn1.named_parameters_mut()));
        out.extend(scoped("deconv2", self.deconv2.named_parameters_mut()));
        out.extend(scoped("bn2", self.bn2.named_parameters_mut()));
        out
    }
}

/// Pitch first (7 -> 84), then time (16 -> 96)
pub struct PitchTimeBranch(UpsamplePair);

impl PitchTimeBranch {
    pub fn new(ctx: &mut Context) -> Self {
        Self(UpsamplePair::new(([1, 1, 12], 64), ([1, 6, 1], 32), ctx))
    }

    /// `[B, bars, 16, 7, 64]` -> `[B, bars, 96, 84, 32]`
    pub fn forward(&mut self, shared: &Tensor, ctx: &Context) -> Result<Tensor> {
        self.0.forward(shared, ctx)
    }
}

impl Module for PitchTimeBranch {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        self.0.named_parameters()
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        self.0.named_parameters_mut()
    }
}

/// Time first (16 -> 96), then pitch (7 -> 84)
pub struct TimePitchBranch(UpsamplePair);

impl TimePitchBranch {
    pub fn new(ctx: &mut Context) -> Self {
        Self(UpsamplePair::new(([1, 6, 1], 64), ([1, 1, 12], 32), ctx))
    }

    /// `[B, bars, 16, 7, 64]` -> `[B, bars, 96, 84, 32]`
    pub fn forward(&mut self, shared: &Tensor, ctx: &Context) -> Result<Tensor> {
        self.0.forward(shared, ctx)
    }
}

impl Module for TimePitchBranch {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        self.0.named_parameters()
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        self.0.named_parameters_mut()
    }
}

/// 1x1x1 transposed convolution to a single channel, sigmoid, batch norm
pub struct MergeBranch {
    deconv: ConvTranspose3d,
    norm: BatchNorm,
}

impl MergeBranch {
    pub fn new(in_channels: usize, ctx: &mut Context) -> Self {
        Self {
            deconv: ConvTranspose3d::new([1, 1, 1], in_channels, 1, [1, 1, 1], ctx),
            norm: BatchNorm::new(1),
        }
    }

    pub fn forward(&mut self, x: &Tensor, ctx: &Context) -> Result<Tensor> {
        self.norm.forward(&sigmoid(&self.deconv.forward(x)?), ctx)
    }
}

impl Module for MergeBranch {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = scoped("deconv", self.deconv.named_parameters());
        out.extend(scoped("bn", self.norm.named_parameters()));
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = scoped("deconv", self.deconv.named_parameters_mut());
        out.extend(scoped("bn", self.norm.named_parameters_mut()));
        out
    }
}

/// Private generator of one track
pub struct TrackGenerator {
    pitch_time: PitchTimeBranch,
    time_pitch: TimePitchBranch,
    merge: MergeBranch,
}

impl TrackGenerator {
    pub fn new(ctx: &mut Context) -> Self {
        Self {
            pitch_time: PitchTimeBranch::new(ctx),
            time_pitch: TimePitchBranch::new(ctx),
            merge: MergeBranch::new(64, ctx),
        }
    }

    /// `[B, bars, 16, 7, 64]` -> `[B, bars, 96, 84, 1]`
    pub fn forward(&mut self, shared: &Tensor, ctx: &Context) -> Result<Tensor> {
        let pt = self.pitch_time.forward(shared, ctx)?;
        let tp = self.time_pitch.forward(shared, ctx)?;
        self.merge.forward(&concat_last(&[pt, tp])?, ctx)
    }
}

impl Module for TrackGenerator {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = scoped("pitch_time", self.pitch_time.named_parameters());
        out.extend(scoped("time_pitch", self.time_pitch.named_parameters()));
        out.extend(scoped("merge", self.merge.named_parameters()));
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = scoped("pitch_time", self.pitch_time.named_parameters_mut());
        out.extend(scoped("time_pitch", self.time_pitch.named_parameters_mut()));
        out.extend(scoped("merge", self.merge.named_parameters_mut()));
        out
    }
}

/// Class-conditional multi-track generator
pub struct Generator {
    embedding: Embedding,
    shared: SharedGenerator,
    tracks: Vec<TrackGenerator>,
    latent_size: usize,
}

impl Generator {
    pub fn new(config: &ModelConfig, ctx: &mut Context) -> Result<Self> {
        config.validate()?;
        let embedding = Embedding::new(config.num_classes, config.latent_size, ctx);
        if embedding.dim() != config.latent_size {
            return Err(Error::Config(format!(
                "genre embedding width {} must equal latent size {}",
                embedding.dim(),
                config.latent_size
            )));
        }
        let shared = SharedGenerator::new(config.latent_size, config.num_bars, ctx);
        let tracks = (0..config.num_tracks).map(|_| TrackGenerator::new(ctx)).collect();
        Ok(Self { embedding, shared, tracks, latent_size: config.latent_size })
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// `genres` (one id per example) and `latent [B, latent_size]` to
    /// `[B, bars, 96, 84, tracks]`
    pub fn forward(&mut self, genres: &[usize], latent: &Tensor, ctx: &Context) -> Result<Tensor> {
        let expected = [genres.len(), self.latent_size];
        if genres.is_empty() || latent.shape() != expected {
            return Err(Error::shape(&expected, latent.shape()));
        }
        let class_input = mul(latent, &self.embedding.forward(genres)?);
        let shared = self.shared.forward(&class_input, ctx)?;
        let tracks = self
            .tracks
            .iter_mut()
            .map(|track| track.forward(&shared, ctx))
            .collect::<Result<Vec<_>>>()?;
        concat_last(&tracks)
    }
}

impl Module for Generator {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = scoped("embedding", self.embedding.named_parameters());
        out.extend(scoped("shared", self.shared.named_parameters()));
        for (i, track) in self.tracks.iter().enumerate() {
            out.extend(scoped(&format!("track{i}"), track.named_parameters()));
        }
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = scoped("embedding", self.embedding.named_parameters_mut());
        out.extend(scoped("shared", self.shared.named_parameters_mut()));
        for (i, track) in self.tracks.iter_mut().enumerate() {
            out.extend(scoped(&format!("track{i}"), track.named_parameters_mut()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{backward, sum};

    #[test]
    fn test_shared_trunk_shape() {
        let mut ctx = Context::with_seed(0);
        let mut shared = SharedGenerator::new(8, 4, &mut ctx);
        let x = Tensor::from_shape_vec(&[2, 8], ctx.normal(16).to_vec(), false).unwrap();
        let h = shared.forward(&x, &ctx).unwrap();
        assert_eq!(h.shape(), &[2, 4, 16, 7, 64]);
    }

    #[test]
    fn test_branches_reach_full_resolution() {
        let mut ctx = Context::with_seed(0);
        let shared = Tensor::zeros_shaped(&[1, 2, 16, 7, 64], false);
        let mut pt = PitchTimeBranch::new(&mut ctx);
        let mut tp = TimePitchBranch::new(&mut ctx);
        assert_eq!(pt.forward(&shared, &ctx).unwrap().shape(), &[1, 2, 96, 84, 32]);
        assert_eq!(tp.forward(&shared, &ctx).unwrap().shape(), &[1, 2, 96, 84, 32]);
    }

    #[test]
    fn test_parameter_names() {
        let mut ctx = Context::with_seed(0);
        let config = ModelConfig { num_tracks: 2, latent_size: 8, ..ModelConfig::default() };
        let generator = Generator::new(&config, &mut ctx).unwrap();
        let names: Vec<String> =
            generator.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"embedding.table".to_string()));
        assert!(names.contains(&"shared.deconv5.weight".to_string()));
        assert!(names.contains(&"track1.pitch_time.deconv1.weight".to_string()));
        assert!(names.contains(&"track0.merge.bn.running_var".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("track2")));
    }

    #[test]
    fn test_rejects_mismatched_latent() {
        let mut ctx = Context::with_seed(0);
        let config = ModelConfig { num_tracks: 1, latent_size: 8, ..ModelConfig::default() };
        let mut generator = Generator::new(&config, &mut ctx).unwrap();
        let latent = Tensor::zeros_shaped(&[2, 7], false);
        assert!(matches!(
            generator.forward(&[0, 1], &latent, &ctx),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_shared_trunk_collects_gradient_from_every_track() {
        let mut ctx = Context::with_seed(3);
        let config = ModelConfig { num_tracks: 2, latent_size: 4, ..ModelConfig::default() };
        let mut generator = Generator::new(&config, &mut ctx).unwrap();
        let latent = Tensor::from_shape_vec(&[2, 4], ctx.normal(8).to_vec(), false).unwrap();
        let out = generator.forward(&[0, 2], &latent, &ctx).unwrap();
        assert_eq!(out.shape(), &[2, 4, 96, 84, 2]);

        // Gradient from track 1 alone still reaches the shared dense layer
        let mut loss = sum(&crate::autograd::slice_last(&out, 1, 1).unwrap());
        backward(&mut loss, None);
        assert!(generator.shared.dense.weight.grad().is_some());
        let untouched = generator.tracks[0].merge.deconv.weight.grad().unwrap();
        assert!(untouched.iter().all(|&g| g == 0.0));
        assert!(generator.tracks[1].merge.deconv.weight.grad().is_some());
    }
}
