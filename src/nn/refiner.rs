//! Refiner: per-track residual stacks followed by a binary neuron

use super::layers::{BatchNorm, Conv3d};
use super::module::scoped;
use super::{Module, ModelConfig};
use crate::autograd::{add, concat_last, relu, slice_last, Context, Padding, Tensor};
use crate::binary::{BinaryEstimator, BinaryNeuron, BinaryOutput, SamplingMode};
use crate::error::{Error, Result};

const KERNEL: [usize; 3] = [1, 3, 12];
const HIDDEN_CHANNELS: usize = 64;

/// `x + conv2(bn(relu(conv1(bn(relu(x))))))` on a single-channel track
pub struct ResidualUnit {
    bn_in: BatchNorm,
    conv1: Conv3d,
    bn_hidden: BatchNorm,
    conv2: Conv3d,
}

impl ResidualUnit {
    pub fn new(ctx: &mut Context) -> Self {
        Self {
            bn_in: BatchNorm::new(1),
            conv1: Conv3d::new(KERNEL, 1, HIDDEN_CHANNELS, [1, 1, 1], Padding::Same, ctx),
            bn_hidden: BatchNorm::new(HIDDEN_CHANNELS),
            conv2: Conv3d::new(KERNEL, HIDDEN_CHANNELS, 1, [1, 1, 1], Padding::Same, ctx),
        }
    }

    pub fn forward(&mut self, x: &Tensor, ctx: &Context) -> Result<Tensor> {
        let h = self.bn_in.forward(&relu(x), ctx)?;
        let h = self.bn_hidden.forward(&relu(&self.conv1.forward(&h)?), ctx)?;
        Ok(add(x, &self.conv2.forward(&h)?))
    }
}

impl Module for ResidualUnit {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = scoped("bn_in", self.bn_in.named_parameters());
        out.extend(scoped("conv1", self.conv1.named_parameters()));
        out.extend(scoped("bn_hidden", self.bn_hidden.named_parameters()));
        out.extend(scoped("conv2", self.conv2.named_parameters()));
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = scoped("bn_in", self.bn_in.named_parameters_mut());
        out.extend(scoped("conv1", self.conv1.named_parameters_mut()));
        out.extend(scoped("bn_hidden", self.bn_hidden.named_parameters_mut()));
        out.extend(scoped("conv2", self.conv2.named_parameters_mut()));
        out
    }
}

/// Residual stack of one track
pub struct TrackRefiner {
    units: Vec<ResidualUnit>,
}

impl TrackRefiner {
    pub fn new(residual_layers: usize, ctx: &mut Context) -> Self {
        Self { units: (0..residual_layers).map(|_| ResidualUnit::new(ctx)).collect() }
    }

    pub fn forward(&mut self, x: &Tensor, ctx: &Context) -> Result<Tensor> {
        let mut h = x.clone();
        for unit in &mut self.units {
            h = unit.forward(&h, ctx)?;
        }
        Ok(h)
    }
}

impl Module for TrackRefiner {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = Vec::new();
        for (i, unit) in self.units.iter().enumerate() {
            out.extend(scoped(&format!("residual{i}"), unit.named_parameters()));
        }
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = Vec::new();
        for (i, unit) in self.units.iter_mut().enumerate() {
            out.extend(scoped(&format!("residual{i}"), unit.named_parameters_mut()));
        }
        out
    }
}

/// Refines each generated track independently, then binarises all of them
pub struct Refiner {
    tracks: Vec<TrackRefiner>,
    neuron: BinaryNeuron,
}

impl Refiner {
    pub fn new(config: &ModelConfig, neuron: BinaryNeuron, ctx: &mut Context) -> Result<Self> {
        config.validate()?;
        let tracks = (0..config.num_tracks)
            .map(|_| TrackRefiner::new(config.residual_layers, ctx))
            .collect();
        Ok(Self { tracks, neuron })
    }

    pub fn neuron(&self) -> &BinaryNeuron {
        &self.neuron
    }

    pub fn neuron_mut(&mut self) -> &mut BinaryNeuron {
        &mut self.neuron
    }

    /// `[B, bars, 96, 84, tracks]` real values to binary values of the same shape
    pub fn forward(
        &mut self,
        generated: &Tensor,
        mode: SamplingMode,
        ctx: &mut Context,
    ) -> Result<BinaryOutput> {
        let tracks = self.tracks.len();
        if generated.ndim() != 5 || generated.shape()[4] != tracks {
            let mut expected = generated.shape().to_vec();
            expected.resize(5, 1);
            expected[4] = tracks;
            return Err(Error::shape(&expected, generated.shape()));
        }
        let refined = self
            .tracks
            .iter_mut()
            .enumerate()
            .map(|(t, track)| track.forward(&slice_last(generated, t, 1)?, ctx))
            .collect::<Result<Vec<_>>>()?;
        self.neuron.forward(&concat_last(&refined)?, mode, ctx)
    }
}

impl Module for Refiner {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = Vec::new();
        for (i, track) in self.tracks.iter().enumerate() {
            out.extend(scoped(&format!("track{i}"), track.named_parameters()));
        }
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = Vec::new();
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
    use crate::binary::{EstimatorKind, DEFAULT_LOSS_NAME};

    fn small_config() -> ModelConfig {
        ModelConfig { num_tracks: 2, residual_layers: 1, num_bars: 2, ..ModelConfig::default() }
    }

    #[test]
    fn test_residual_unit_keeps_shape() {
        let mut ctx = Context::with_seed(0);
        let mut unit = ResidualUnit::new(&mut ctx);
        let x = Tensor::from_shape_vec(&[1, 1, 6, 24, 1], ctx.normal(144).to_vec(), false).unwrap();
        assert_eq!(unit.forward(&x, &ctx).unwrap().shape(), &[1, 1, 6, 24, 1]);
    }

    #[test]
    fn test_residual_unit_is_identity_with_zero_output_conv() {
        let mut ctx = Context::with_seed(0);
        let mut unit = ResidualUnit::new(&mut ctx);
        unit.conv2.weight.data_mut().fill(0.0);
        let x = Tensor::from_shape_vec(&[2, 1, 3, 12, 1], ctx.normal(72).to_vec(), false).unwrap();
        let y = unit.forward(&x, &ctx).unwrap();
        assert_eq!(y.data(), x.data());
    }

    #[test]
    fn test_refiner_outputs_binary_tracks() {
        let mut ctx = Context::with_seed(1);
        let neuron = BinaryNeuron::new(EstimatorKind::StraightThrough, false, 1.0, DEFAULT_LOSS_NAME);
        let mut refiner = Refiner::new(&small_config(), neuron, &mut ctx).unwrap();
        let len = 2 * 96 * 84 * 2;
        let x = Tensor::from_shape_vec(&[1, 2, 96, 84, 2], ctx.normal(len).to_vec(), false).unwrap();

        let out = refiner.forward(&x, SamplingMode::Deterministic, &mut ctx).unwrap();
        assert_eq!(out.values.shape(), &[1, 2, 96, 84, 2]);
        assert!(out.values.data().iter().all(|&v| v == 0.0 || v == 1.0));

        let mut loss = sum(&out.values);
        backward(&mut loss, None);
        assert!(refiner.tracks[1].units[0].conv1.weight.grad().is_some());
    }

    #[test]
    fn test_refiner_rejects_wrong_track_count() {
        let mut ctx = Context::with_seed(1);
        let neuron = BinaryNeuron::new(EstimatorKind::StraightThrough, true, 1.0, DEFAULT_LOSS_NAME);
        let mut refiner = Refiner::new(&small_config(), neuron, &mut ctx).unwrap();
        let x = Tensor::zeros_shaped(&[1, 2, 96, 84, 3], false);
        assert!(matches!(
            refiner.forward(&x, SamplingMode::Stochastic, &mut ctx),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
