//! Feature extractor shared in structure by the discriminator and the classifier
//!
//! Each track goes through its own [`TrackEncoder`]; the encoded tracks are
//! folded into the batch axis so that a single [`SharedEncoder`] (one set of
//! weights) processes all of them, then unfolded back to per-example
//! channels. Chroma and onset summaries of the whole piano-roll are encoded
//! alongside and everything is merged across adjacent bars.

use super::config::CHROMA_BEAT_GROUPS;
use super::layers::Conv3d;
use super::module::scoped;
use super::{Module, ModelConfig};
use crate::autograd::{
    chroma, concat_last, leaky_relu, onset, permute, reshape, slice_last, Context, Padding,
    Tensor, OCTAVE,
};
use crate::error::{Error, Result};

/// Negative slope of every critic activation
pub const LEAKY_ALPHA: f32 = 0.5;

const TRACK_CHANNELS: usize = 64;
const SHARED_CHANNELS: usize = 256;
const SUMMARY_CHANNELS: usize = 128;
const MERGED_CHANNELS: usize = 512;

type Stage = ([usize; 3], [usize; 3], usize);

/// Valid convolutions, each followed by a leaky relu
struct ConvChain {
    convs: Vec<Conv3d>,
}

impl ConvChain {
    fn new(in_channels: usize, stages: &[Stage], ctx: &mut Context) -> Self {
        let mut channels = in_channels;
        let convs = stages
            .iter()
            .map(|&(kernel, stride, out)| {
                let conv = Conv3d::new(kernel, channels, out, stride, Padding::Valid, ctx);
                channels = out;
                conv
            })
            .collect();
        Self { convs }
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut h = x.clone();
        for conv in &self.convs {
            h = leaky_relu(&conv.forward(&h)?, LEAKY_ALPHA);
        }
        Ok(h)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = Vec::new();
        for (i, conv) in self.convs.iter().enumerate() {
            out.extend(scoped(&format!("conv{}", i + 1), conv.named_parameters()));
        }
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = Vec::new();
        for (i, conv) in self.convs.iter_mut().enumerate() {
            out.extend(scoped(&format!("conv{}", i + 1), conv.named_parameters_mut()));
        }
        out
    }
}

macro_rules! chain_module {
    ($name:ident) => {
        impl Module for $name {
            fn named_parameters(&self) -> Vec<(String, &Tensor)> {
                self.0.named_parameters()
            }

            fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
                self.0.named_parameters_mut()
            }
        }
    };
}

/// Private encoder of one track: `[B, bars, 96, 84, 1]` -> `[B, bars, 16, 7, 64]`
pub struct TrackEncoder {
    pitch_time: ConvChain,
    time_pitch: ConvChain,
    merge: Conv3d,
}

impl TrackEncoder {
    pub fn new(ctx: &mut Context) -> Self {
        Self {
            pitch_time: ConvChain::new(
                1,
                &[([1, 1, 12], [1, 1, 12], 32), ([1, 6, 1], [1, 6, 1], 64)],
                ctx,
            ),
            time_pitch: ConvChain::new(
                1,
                &[([1, 6, 1], [1, 6, 1], 32), ([1, 1, 12], [1, 1, 12], 64)],
                ctx,
            ),
            merge: Conv3d::new([1, 1, 1], 128, TRACK_CHANNELS, [1, 1, 1], Padding::Valid, ctx),
        }
    }

    pub fn forward(&self, track: &Tensor) -> Result<Tensor> {
        let joined = concat_last(&[self.pitch_time.forward(track)?, self.time_pitch.forward(track)?])?;
        Ok(leaky_relu(&self.merge.forward(&joined)?, LEAKY_ALPHA))
    }
}

impl Module for TrackEncoder {
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

/// Trunk applied to every encoded track: `[N, bars, 16, 7, 64]` -> `[N, bars, 1, 1, 256]`
pub struct SharedEncoder(ConvChain);

impl SharedEncoder {
    pub fn new(ctx: &mut Context) -> Self {
        Self(ConvChain::new(
            TRACK_CHANNELS,
            &[([1, 4, 3], [1, 4, 2], 128), ([1, 4, 3], [1, 4, 2], SHARED_CHANNELS)],
            ctx,
        ))
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.0.forward(x)
    }
}

chain_module!(SharedEncoder);

/// Pitch-class profile per beat group: `[B, bars, 96, 84, T]` -> `[B, bars, 1, 1, 128]`
pub struct ChromaBranch(ConvChain);

impl ChromaBranch {
    pub fn new(num_tracks: usize, ctx: &mut Context) -> Self {
        Self(ConvChain::new(
            num_tracks,
            &[([1, 1, OCTAVE], [1, 1, OCTAVE], 64), ([1, 4, 1], [1, 4, 1], SUMMARY_CHANNELS)],
            ctx,
        ))
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.0.forward(&chroma(x, CHROMA_BEAT_GROUPS)?)
    }
}

chain_module!(ChromaBranch);

/// Note onsets summed over pitch: `[B, bars, 96, 84, T]` -> `[B, bars, 1, 1, 128]`
pub struct OnsetBranch(ConvChain);

impl OnsetBranch {
    pub fn new(num_tracks: usize, ctx: &mut Context) -> Self {
        Self(ConvChain::new(
            num_tracks,
            &[
                ([1, 6, 1], [1, 6, 1], 32),
                ([1, 4, 1], [1, 4, 1], 64),
                ([1, 4, 1], [1, 4, 1], SUMMARY_CHANNELS),
            ],
            ctx,
        ))
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.0.forward(&onset(x)?)
    }
}

chain_module!(OnsetBranch);

/// Piano-roll to a flat `[B, (bars - 1) * 512]` feature
pub struct FeatureExtractor {
    tracks: Vec<TrackEncoder>,
    shared: SharedEncoder,
    chroma: ChromaBranch,
    onset: OnsetBranch,
    merge: Conv3d,
    config: ModelConfig,
}

impl FeatureExtractor {
    pub fn new(config: &ModelConfig, ctx: &mut Context) -> Result<Self> {
        config.validate()?;
        let num_tracks = config.num_tracks;
        let merged_in = num_tracks * SHARED_CHANNELS + 2 * SUMMARY_CHANNELS;
        Ok(Self {
            tracks: (0..num_tracks).map(|_| TrackEncoder::new(ctx)).collect(),
            shared: SharedEncoder::new(ctx),
            chroma: ChromaBranch::new(num_tracks, ctx),
            onset: OnsetBranch::new(num_tracks, ctx),
            merge: Conv3d::new([2, 1, 1], merged_in, MERGED_CHANNELS, [1, 1, 1], Padding::Valid, ctx),
            config: config.clone(),
        })
    }

    pub fn output_width(&self) -> usize {
        self.config.feature_width()
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let batch = x.shape().first().copied().unwrap_or(0);
        let expected = self.config.piano_roll_shape(batch);
        if batch == 0 || x.shape() != expected {
            return Err(Error::shape(&expected, x.shape()));
        }
        let tracks = self.tracks.len();
        let bars = self.config.num_bars;

        let encoded = self
            .tracks
            .iter()
            .enumerate()
            .map(|(t, encoder)| encoder.forward(&slice_last(x, t, 1)?))
            .collect::<Result<Vec<_>>>()?;
        let (h, w) = (encoded[0].shape()[2], encoded[0].shape()[3]);

        // [B, bars, h, w, T*C] -> [T*B, bars, h, w, C]
        let stacked = reshape(&concat_last(&encoded)?, &[batch, bars, h, w, tracks, TRACK_CHANNELS])?;
        let folded = reshape(
            &permute(&stacked, &[4, 0, 1, 2, 3, 5])?,
            &[tracks * batch, bars, h, w, TRACK_CHANNELS],
        )?;
        let shared = self.shared.forward(&folded)?;

        // [T*B, bars, 1, 1, S] -> [B, bars, 1, 1, T*S]
        let per_track = reshape(&shared, &[tracks, batch, bars, SHARED_CHANNELS])?;
        let unfolded = reshape(
            &permute(&per_track, &[1, 2, 0, 3])?,
            &[batch, bars, 1, 1, tracks * SHARED_CHANNELS],
        )?;

        let joined = concat_last(&[unfolded, self.chroma.forward(x)?, self.onset.forward(x)?])?;
        let merged = leaky_relu(&self.merge.forward(&joined)?, LEAKY_ALPHA);
        reshape(&merged, &[batch, self.output_width()])
    }
}

impl Module for FeatureExtractor {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = Vec::new();
        for (i, track) in self.tracks.iter().enumerate() {
            out.extend(scoped(&format!("track{i}"), track.named_parameters()));
        }
        out.extend(scoped("shared", self.shared.named_parameters()));
        out.extend(scoped("chroma", self.chroma.named_parameters()));
        out.extend(scoped("onset", self.onset.named_parameters()));
        out.extend(scoped("merge", self.merge.named_parameters()));
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = Vec::new();
        for (i, track) in self.tracks.iter_mut().enumerate() {
            out.extend(scoped(&format!("track{i}"), track.named_parameters_mut()));
        }
        out.extend(scoped("shared", self.shared.named_parameters_mut()));
        out.extend(scoped("chroma", self.chroma.named_parameters_mut()));
        out.extend(scoped("onset", self.onset.named_parameters_mut()));
        out.extend(scoped("merge", self.merge.named_parameters_mut()));
        out
    }
}
