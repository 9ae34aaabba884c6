//! Plaintext inference with the same fixed-point arithmetic as the shared pipeline.
//!
//! A neuron computes the dot product of its inputs and weights in `Z_2^64`, shifts the sum
//! arithmetically by 13 bits, adds its bias and (in hidden layers) applies ReLU. For values well
//! inside 61 bits this is bit-for-bit what the five parties compute.
use super::model::ModelWeights;
use crate::protocol::truncation::TRUNCATED_BITS;

/// The fixed-point output of one neuron.
pub fn neuron(inputs: &[u64], weights: &[u64], bias: u64, relu: bool) -> u64 {
    let dot = inputs
        .iter()
        .zip(weights)
        .fold(0u64, |acc, (x, w)| acc.wrapping_add(x.wrapping_mul(*w)));
    let z = (((dot as i64) >> TRUNCATED_BITS) as u64).wrapping_add(bias);
    if relu && (z as i64) < 0 { 0 } else { z }
}

/// The logits of `image`, as signed fixed-point values.
pub fn reference_logits(model: &ModelWeights, image: &[u64]) -> Vec<i64> {
    let mut activations = image.to_vec();
    for (config, layer) in model.shape().layers().iter().zip(model.layers()) {
        let input_size = config.input_size as usize;
        activations = (0..config.output_size as usize)
            .map(|o| {
                neuron(
                    &activations,
                    layer.row(o, input_size),
                    layer.bias[o],
                    config.relu,
                )
            })
            .collect();
    }
    activations.into_iter().map(|v| v as i64).collect()
}

/// The class predicted for `image`.
pub fn reference_inference(model: &ModelWeights, image: &[u64]) -> usize {
    argmax(&reference_logits(model, image))
}

/// The index of the largest logit. Ties go to the lowest index.
pub fn argmax(logits: &[i64]) -> usize {
    logits
        .iter()
        .enumerate()
        .fold((0, i64::MIN), |(best, max), (i, &v)| {
            if v > max { (i, v) } else { (best, max) }
        })
        .0
}
