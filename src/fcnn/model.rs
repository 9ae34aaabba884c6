//! Network dimensions, the key layout of a shared model and the plaintext file formats.
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    ops::Range,
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The first key of the input activations.
pub const INPUT_START: u32 = 1000;

/// The lowest key used for weights.
pub const MIN_WEIGHT_START: u32 = 3000;

/// The dimensions of the three fully connected layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkShape {
    /// Number of input values (pixels).
    pub input: u32,
    /// Width of the two hidden layers.
    pub hidden: [u32; 2],
    /// Number of output logits.
    pub output: u32,
}

impl Default for NetworkShape {
    fn default() -> Self {
        Self {
            input: 784,
            hidden: [128, 128],
            output: 10,
        }
    }
}

impl NetworkShape {
    /// The widths of all four activation vectors, input first.
    pub fn dimensions(&self) -> [u32; 4] {
        [self.input, self.hidden[0], self.hidden[1], self.output]
    }

    /// The number of neurons, i.e. neuron tasks per inference.
    pub fn neurons(&self) -> u32 {
        self.hidden[0] + self.hidden[1] + self.output
    }

    /// The number of values in a weights file of this shape.
    pub fn model_len(&self) -> usize {
        self.layers()
            .iter()
            .map(|l| ((l.input_size + 1) * l.output_size) as usize)
            .sum()
    }

    /// The key layout of all three layers.
    ///
    /// Activations are laid out consecutively from [`INPUT_START`], weights (followed by the
    /// biases of the same layer) start at [`MIN_WEIGHT_START`] or after the last activation.
    pub fn layers(&self) -> [LayerConfig; 3] {
        let dims = self.dimensions();
        let activations_end = INPUT_START + dims.iter().sum::<u32>();
        let mut input_start = INPUT_START;
        let mut weight_start = MIN_WEIGHT_START.max(activations_end);
        std::array::from_fn(|l| {
            let config = LayerConfig {
                input_size: dims[l],
                output_size: dims[l + 1],
                input_start,
                output_start: input_start + dims[l],
                weight_start,
                relu: l < 2,
            };
            input_start = config.output_start;
            weight_start = config.weight_end();
            config
        })
    }
}

/// Sizes and key ranges of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerConfig {
    /// Number of inputs per neuron.
    pub input_size: u32,
    /// Number of neurons.
    pub output_size: u32,
    /// Key of the first input activation.
    pub input_start: u32,
    /// Key of the first output activation.
    pub output_start: u32,
    /// Key of the first weight.
    pub weight_start: u32,
    /// Whether ReLU is applied to the outputs.
    pub relu: bool,
}

impl LayerConfig {
    /// The keys of the input activations.
    pub fn inputs(&self) -> Range<u32> {
        self.input_start..self.input_start + self.input_size
    }

    /// The key of weight `i` of `neuron`. Weights are stored row by row.
    pub fn weight_key(&self, neuron: u32, i: u32) -> u32 {
        self.weight_start + self.input_size * neuron + i
    }

    /// The keys of the weights of `neuron`.
    pub fn weights_of(&self, neuron: u32) -> Range<u32> {
        self.weight_key(neuron, 0)..self.weight_key(neuron, self.input_size)
    }

    /// The key of the first bias.
    pub fn bias_start(&self) -> u32 {
        self.weight_start + self.input_size * self.output_size
    }

    /// The key of the bias of `neuron`.
    pub fn bias_key(&self, neuron: u32) -> u32 {
        self.bias_start() + neuron
    }

    /// One past the key of the last bias.
    pub fn weight_end(&self) -> u32 {
        self.bias_start() + self.output_size
    }

    /// The key of the output activation of `neuron`.
    pub fn output_key(&self, neuron: u32) -> u32 {
        self.output_start + neuron
    }
}

/// An error while reading model or test data.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("could not read data: {0}")]
    Io(#[from] io::Error),
    /// The data ends before all expected values were read.
    #[error("expected {expected} values, found {actual}")]
    Truncated {
        /// The number of values required.
        expected: usize,
        /// The number of values present.
        actual: usize,
    },
    /// The data does not split evenly into values or records.
    #[error("{len} is not a multiple of {unit}")]
    Misaligned {
        /// The length of the data.
        len: usize,
        /// The size of a value or record.
        unit: usize,
    },
}

/// Reads a sequence of little-endian `u64` values until the end of the input.
pub fn read_values(mut reader: impl Read) -> Result<Vec<u64>, LoadError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    if bytes.len() % 8 != 0 {
        return Err(LoadError::Misaligned {
            len: bytes.len(),
            unit: 8,
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut value = [0; 8];
            value.copy_from_slice(chunk);
            u64::from_le_bytes(value)
        })
        .collect())
}

/// Writes values as little-endian `u64`s.
pub fn write_values(mut writer: impl Write, values: &[u64]) -> io::Result<()> {
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()
}

/// The plaintext weights and biases of one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerWeights {
    /// `output_size × input_size` weights, row by row.
    pub weights: Vec<u64>,
    /// One bias per neuron.
    pub bias: Vec<u64>,
}

impl LayerWeights {
    /// The weights of `neuron`.
    pub fn row(&self, neuron: usize, input_size: usize) -> &[u64] {
        &self.weights[neuron * input_size..(neuron + 1) * input_size]
    }
}

/// The plaintext parameters of a network, in fixed-point encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelWeights {
    shape: NetworkShape,
    layers: [LayerWeights; 3],
}

impl ModelWeights {
    /// Splits a flat value sequence (`fc1.w, fc1.b, fc2.w, fc2.b, fc3.w, fc3.b`) into layers.
    pub fn from_values(shape: NetworkShape, values: &[u64]) -> Result<Self, LoadError> {
        if values.len() < shape.model_len() {
            return Err(LoadError::Truncated {
                expected: shape.model_len(),
                actual: values.len(),
            });
        }
        let mut rest = values;
        let layers = shape.layers().map(|l| {
            let (weights, tail) = rest.split_at((l.input_size * l.output_size) as usize);
            let (bias, tail) = tail.split_at(l.output_size as usize);
            rest = tail;
            LayerWeights {
                weights: weights.to_vec(),
                bias: bias.to_vec(),
            }
        });
        Ok(Self { shape, layers })
    }

    /// Reads a weights file of the given shape.
    pub fn read_from(reader: impl Read, shape: NetworkShape) -> Result<Self, LoadError> {
        Self::from_values(shape, &read_values(reader)?)
    }

    /// Loads a weights file of the given shape.
    pub fn load(path: impl AsRef<Path>, shape: NetworkShape) -> Result<Self, LoadError> {
        Self::read_from(BufReader::new(File::open(path)?), shape)
    }

    /// Writes the weights in the format [`Self::read_from`] reads.
    pub fn write_to(&self, mut writer: impl Write) -> io::Result<()> {
        for layer in &self.layers {
            write_values(&mut writer, &layer.weights)?;
            write_values(&mut writer, &layer.bias)?;
        }
        Ok(())
    }

    /// Saves the weights to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    /// The shape of the network.
    pub fn shape(&self) -> NetworkShape {
        self.shape
    }

    /// The parameters of the three layers.
    pub fn layers(&self) -> &[LayerWeights; 3] {
        &self.layers
    }

    /// The values party 1 stores before sharing `layer`, keyed as in [`LayerConfig`].
    pub fn keyed_values(&self, layer: usize) -> impl Iterator<Item = (u32, u64)> + '_ {
        let config = self.shape.layers()[layer];
        let weights = &self.layers[layer];
        let keys = config.weight_start..config.weight_end();
        keys.zip(weights.weights.iter().chain(&weights.bias).copied())
    }
}

/// Reads test images of `input` pixels each.
pub fn read_pixels(reader: impl Read, input: u32) -> Result<Vec<Vec<u64>>, LoadError> {
    let values = read_values(reader)?;
    let input = input as usize;
    if input == 0 || values.len() % input != 0 {
        return Err(LoadError::Misaligned {
            len: values.len(),
            unit: input,
        });
    }
    Ok(values.chunks_exact(input).map(<[u64]>::to_vec).collect())
}

/// Loads a test image file.
pub fn load_test_pixels(path: impl AsRef<Path>, input: u32) -> Result<Vec<Vec<u64>>, LoadError> {
    read_pixels(BufReader::new(File::open(path)?), input)
}

/// Reads one label per image.
pub fn read_labels(reader: impl Read) -> Result<Vec<u64>, LoadError> {
    read_values(reader)
}

/// Loads a test label file.
pub fn load_test_labels(path: impl AsRef<Path>) -> Result<Vec<u64>, LoadError> {
    read_labels(BufReader::new(File::open(path)?))
}
