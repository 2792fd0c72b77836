//! Fixture graphs.
//!
//! Each fixture owns its layers, can evaluate itself on its sample data and
//! exports itself as a single-graph ONNX model with inputs `input_0..` and
//! output `output_0`.

use std::path::PathBuf;

use tinyq_core::Tensor;
use tinyq_nn::{Conv2d, Initializer, Linear, Module};
use tinyq_onnx::{Export, GraphBuilder, OnnxModel};

use crate::params::ConvParams;
use crate::{FixtureError, Result};

/// A generated test graph.
pub trait Fixture {
    /// Graph name, also used in logs.
    fn name(&self) -> String;

    /// Location below the output root.
    fn relative_path(&self) -> PathBuf;

    /// Shape of `output_0`, known without evaluating.
    fn output_shape(&self) -> Vec<usize>;

    /// Literal data the fixture is evaluated on before export.
    fn sample_inputs(&self) -> Vec<Tensor>;

    fn forward(&self, inputs: &[Tensor]) -> Result<Tensor>;

    fn export(&self) -> Result<OnnxModel>;
}

fn expect_inputs<'a>(fixture: &dyn Fixture, inputs: &'a [Tensor], n: usize) -> Result<&'a [Tensor]> {
    if inputs.len() != n {
        return Err(FixtureError::InputCount {
            fixture: fixture.name(),
            expected: n,
            got: inputs.len(),
        });
    }
    Ok(inputs)
}

/// `[1, 1, n, n]` where every row is `0, 1, .., n-1`.
pub fn ramp_rows(n: usize) -> Tensor {
    let data: Vec<f32> = (0..n * n).map(|i| (i % n) as f32).collect();
    Tensor::from_f32(&data, &[1, 1, n, n])
}

/// `[1, n]` holding `0, 1, .., n-1`.
pub fn ramp_vector(n: usize) -> Tensor {
    let data: Vec<f32> = (0..n).map(|i| i as f32).collect();
    Tensor::from_f32(&data, &[1, n])
}

// ---------------------------------------------------------------------------
// add/add-{L}.onnx

/// Elementwise sum of two `[1, L]` vectors.
pub struct AddFixture {
    length: usize,
}

impl AddFixture {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Fixture for AddFixture {
    fn name(&self) -> String {
        format!("add-{}", self.length)
    }

    fn relative_path(&self) -> PathBuf {
        PathBuf::from("add").join(format!("{}.onnx", self.name()))
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![1, self.length]
    }

    fn sample_inputs(&self) -> Vec<Tensor> {
        vec![ramp_vector(self.length), ramp_vector(self.length)]
    }

    fn forward(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let inputs = expect_inputs(self, inputs, 2)?;
        Ok(inputs[0].add(&inputs[1])?)
    }

    fn export(&self) -> Result<OnnxModel> {
        let mut g = GraphBuilder::new(self.name());
        let a = g.add_input(&[1, self.length]);
        let b = g.add_input(&[1, self.length]);
        let sum = g.add_node("Add", &[&a, &b], vec![]);
        g.add_output(&sum, &self.output_shape())?;
        Ok(g.finish().into())
    }
}

// ---------------------------------------------------------------------------
// conv2d/conv2d-is.._ic.._oc.._ks.._s.._p...onnx

/// A single default-initialized convolution, evaluated on zeros.
pub struct ConvFixture {
    params: ConvParams,
    conv: Conv2d,
}

impl ConvFixture {
    pub fn new(params: ConvParams) -> Result<Self> {
        if !params.is_feasible() {
            return Err(FixtureError::Infeasible(params));
        }
        let mut conv = Conv2d::new(
            params.input_channels,
            params.output_channels,
            params.kernel_size,
            params.stride,
            params.padding,
            true,
            &Initializer::default(),
        );
        conv.set_trainable(false);
        Ok(Self { params, conv })
    }

    pub fn conv(&self) -> &Conv2d {
        &self.conv
    }
}

impl Fixture for ConvFixture {
    fn name(&self) -> String {
        format!("conv2d-{}", self.params)
    }

    fn relative_path(&self) -> PathBuf {
        PathBuf::from("conv2d").join(self.params.file_name())
    }

    fn output_shape(&self) -> Vec<usize> {
        // Feasibility is checked in `new`, so the output exists.
        self.params.output_shape().map(|s| s.to_vec()).unwrap_or_default()
    }

    fn sample_inputs(&self) -> Vec<Tensor> {
        vec![Tensor::zeros(&self.params.input_shape())]
    }

    fn forward(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let inputs = expect_inputs(self, inputs, 1)?;
        Ok(self.conv.forward(&inputs[0])?)
    }

    fn export(&self) -> Result<OnnxModel> {
        let mut g = GraphBuilder::new(self.name());
        let x = g.add_input(&self.params.input_shape());
        let y = self.conv.export(&mut g, "conv", &x);
        g.add_output(&y, &self.output_shape())?;
        Ok(g.finish().into())
    }
}

// ---------------------------------------------------------------------------
// simple-models/simple-conv2d-add{,-v2}.onnx

/// Which tensor the second conv branch consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvAddVariant {
    /// `x2` is chained after `x1`; input `[1, 1, 5, 5]`.
    Chained,
    /// `x2` reads the graph input in parallel with `x1`; input `[1, 1, 7, 7]`.
    Parallel,
}

impl ConvAddVariant {
    fn input_size(self) -> usize {
        match self {
            ConvAddVariant::Chained => 5,
            ConvAddVariant::Parallel => 7,
        }
    }

    fn salt(self) -> u64 {
        match self {
            ConvAddVariant::Chained => 1,
            ConvAddVariant::Parallel => 2,
        }
    }
}

/// `r1(x3(x1(x) + x2(..)))` with a `[1, 1, 1, 1]` output.
pub struct ConvAddFixture {
    variant: ConvAddVariant,
    x1: Conv2d,
    x2: Conv2d,
    x3: Conv2d,
    r1: Conv2d,
}

impl ConvAddFixture {
    pub fn new(variant: ConvAddVariant) -> Self {
        let init = Initializer::new(variant.salt());
        let (mut x1, mut x2) = match variant {
            ConvAddVariant::Chained => (
                Conv2d::new(1, 3, 3, 1, 1, true, &init.derive(0)),
                Conv2d::new(3, 3, 3, 1, 1, true, &init.derive(1)),
            ),
            ConvAddVariant::Parallel => (
                Conv2d::new(1, 3, 3, 1, 0, true, &init.derive(0)),
                Conv2d::new(1, 3, 3, 1, 0, true, &init.derive(1)),
            ),
        };
        let mut x3 = Conv2d::new(3, 5, 3, 1, 0, true, &init.derive(2));
        let mut r1 = Conv2d::new(5, 1, 3, 1, 0, true, &init.derive(3));
        for layer in [&mut x1, &mut x2, &mut x3, &mut r1] {
            layer.set_trainable(false);
        }
        Self { variant, x1, x2, x3, r1 }
    }
}

impl Fixture for ConvAddFixture {
    fn name(&self) -> String {
        match self.variant {
            ConvAddVariant::Chained => "simple-conv2d-add".into(),
            ConvAddVariant::Parallel => "simple-conv2d-add-v2".into(),
        }
    }

    fn relative_path(&self) -> PathBuf {
        PathBuf::from("simple-models").join(format!("{}.onnx", self.name()))
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![1, 1, 1, 1]
    }

    fn sample_inputs(&self) -> Vec<Tensor> {
        vec![ramp_rows(self.variant.input_size())]
    }

    fn forward(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let x = &expect_inputs(self, inputs, 1)?[0];
        let rx1 = self.x1.forward(x)?;
        let rx2 = match self.variant {
            ConvAddVariant::Chained => self.x2.forward(&rx1)?,
            ConvAddVariant::Parallel => self.x2.forward(x)?,
        };
        let rx3 = rx1.add(&rx2)?;
        let rx4 = self.x3.forward(&rx3)?;
        Ok(self.r1.forward(&rx4)?)
    }

    fn export(&self) -> Result<OnnxModel> {
        let n = self.variant.input_size();
        let mut g = GraphBuilder::new(self.name());
        let x = g.add_input(&[1, 1, n, n]);
        let rx1 = self.x1.export(&mut g, "x1", &x);
        let rx2 = match self.variant {
            ConvAddVariant::Chained => self.x2.export(&mut g, "x2", &rx1),
            ConvAddVariant::Parallel => self.x2.export(&mut g, "x2", &x),
        };
        let rx3 = g.add_node("Add", &[&rx1, &rx2], vec![]);
        let rx4 = self.x3.export(&mut g, "x3", &rx3);
        let out = self.r1.export(&mut g, "r1", &rx4);
        g.add_output(&out, &self.output_shape())?;
        Ok(g.finish().into())
    }
}

// ---------------------------------------------------------------------------
// simple-models/simple.onnx

/// `Linear(100 → 2)`: row 0 all 2, row 1 all 5, zero bias.
pub struct SimpleLinearFixture {
    fc: Linear,
}

impl SimpleLinearFixture {
    pub const IN_FEATURES: usize = 100;

    pub fn new() -> Result<Self> {
        let n = Self::IN_FEATURES;
        let mut w = vec![2.0f32; n];
        w.extend(std::iter::repeat(5.0f32).take(n));
        let mut fc = Linear::from_weight(Tensor::from_vec(w, &[2, n])?, Some(Tensor::zeros(&[2])))?;
        fc.set_trainable(false);
        Ok(Self { fc })
    }
}

impl Fixture for SimpleLinearFixture {
    fn name(&self) -> String {
        "simple".into()
    }

    fn relative_path(&self) -> PathBuf {
        PathBuf::from("simple-models/simple.onnx")
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![1, 2]
    }

    fn sample_inputs(&self) -> Vec<Tensor> {
        vec![ramp_vector(Self::IN_FEATURES)]
    }

    fn forward(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let inputs = expect_inputs(self, inputs, 1)?;
        Ok(self.fc.forward(&inputs[0])?)
    }

    fn export(&self) -> Result<OnnxModel> {
        let mut g = GraphBuilder::new(self.name());
        let x = g.add_input(&[1, Self::IN_FEATURES]);
        let y = self.fc.export(&mut g, "fc", &x);
        g.add_output(&y, &self.output_shape())?;
        Ok(g.finish().into())
    }
}

// ---------------------------------------------------------------------------
// simple-models/conv.onnx

/// Single-channel 3×3 Laplacian edge filter.
pub struct LaplaceConvFixture {
    conv: Conv2d,
}

impl LaplaceConvFixture {
    pub const KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 4.0, -1.0, 0.0, -1.0, 0.0];

    pub fn new() -> Result<Self> {
        let weight = Tensor::from_vec(Self::KERNEL.to_vec(), &[1, 1, 3, 3])?;
        let mut conv = Conv2d::from_weight(weight, Some(Tensor::zeros(&[1])), 1, 0)?;
        conv.set_trainable(false);
        Ok(Self { conv })
    }
}

impl Fixture for LaplaceConvFixture {
    fn name(&self) -> String {
        "conv".into()
    }

    fn relative_path(&self) -> PathBuf {
        PathBuf::from("simple-models/conv.onnx")
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![1, 1, 3, 3]
    }

    fn sample_inputs(&self) -> Vec<Tensor> {
        vec![ramp_rows(5)]
    }

    fn forward(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let inputs = expect_inputs(self, inputs, 1)?;
        Ok(self.conv.forward(&inputs[0])?)
    }

    fn export(&self) -> Result<OnnxModel> {
        let mut g = GraphBuilder::new(self.name());
        let x = g.add_input(&[1, 1, 5, 5]);
        let y = self.conv.export(&mut g, "conv", &x);
        g.add_output(&y, &self.output_shape())?;
        Ok(g.finish().into())
    }
}

// ---------------------------------------------------------------------------
// simple-models/two-inputs.onnx

/// `conv(y) * linear(x)` over a `[1, 2]` and a `[1, 1, 4, 4]` input.
pub struct TwoInputsFixture {
    fulllayer: Linear,
    convolution: Conv2d,
}

impl TwoInputsFixture {
    pub fn new() -> Result<Self> {
        let mut fulllayer = Linear::from_weight(
            Tensor::from_vec(vec![3.0, 4.0], &[1, 2])?,
            Some(Tensor::from_vec(vec![1.0], &[1])?),
        )?;
        let cross = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let mut convolution =
            Conv2d::from_weight(Tensor::from_vec(cross, &[1, 1, 3, 3])?, Some(Tensor::zeros(&[1])), 1, 1)?;
        fulllayer.set_trainable(false);
        convolution.set_trainable(false);
        Ok(Self { fulllayer, convolution })
    }
}

impl Fixture for TwoInputsFixture {
    fn name(&self) -> String {
        "two-inputs".into()
    }

    fn relative_path(&self) -> PathBuf {
        PathBuf::from("simple-models/two-inputs.onnx")
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![1, 1, 4, 4]
    }

    fn sample_inputs(&self) -> Vec<Tensor> {
        let y = [2.0, 3.0, 4.0, 1.0, 0.0, 4.0, 5.0, 6.0, 1.0, 8.0, 1.0, 1.0, 0.0, 3.0, 0.0, 2.0];
        vec![
            Tensor::from_f32(&[1.0, 2.5], &[1, 2]),
            Tensor::from_f32(&y, &[1, 1, 4, 4]),
        ]
    }

    fn forward(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let inputs = expect_inputs(self, inputs, 2)?;
        let val1 = self.fulllayer.forward(&inputs[0])?;
        let val2 = self.convolution.forward(&inputs[1])?;
        Ok(val2.mul(&val1)?)
    }

    fn export(&self) -> Result<OnnxModel> {
        let mut g = GraphBuilder::new(self.name());
        let x = g.add_input(&[1, 2]);
        let y = g.add_input(&[1, 1, 4, 4]);
        let val1 = self.fulllayer.export(&mut g, "fulllayer", &x);
        let val2 = self.convolution.export(&mut g, "convolution", &y);
        let val = g.add_node("Mul", &[&val2, &val1], vec![]);
        g.add_output(&val, &self.output_shape())?;
        Ok(g.finish().into())
    }
}
