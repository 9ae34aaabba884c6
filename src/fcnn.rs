//! Secure inference of a 3-layer fully connected network.
//!
//! Party 1 owns both the model and the images; party 5 learns the logits. The model is shared
//! once and every image is evaluated neuron by neuron: each neuron runs as its own task with its
//! own [`Node`], computing a dot product, the fixed-point truncation, the bias addition and (in
//! hidden layers) ReLU.
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{Level, debug, info, instrument};

use crate::{
    channel::{TaskId, Transport},
    config::Config,
    node::Node,
    prf::{Prf, SessionKey},
    protocol::{
        Error,
        dot::{DotOperands, dot_product},
        linear::add,
        reconstruction::open,
        relu::relu,
        sharing::share_all,
        truncation::truncate,
    },
    ring::Z64,
    share::{PartyId, ReplicatedShare},
};

mod model;
pub mod reference;

pub use model::{
    INPUT_START, LayerConfig, LayerWeights, LoadError, MIN_WEIGHT_START, ModelWeights,
    NetworkShape, load_test_labels, load_test_pixels, read_labels, read_pixels, read_values,
    write_values,
};
pub use reference::{argmax, reference_inference, reference_logits};

/// The task that shares the model.
pub const MODEL_TASK: TaskId = 0;

/// The party owning the model and the images.
pub const DATA_OWNER: PartyId = PartyId::P1;

/// The party learning the logits.
pub const RESULT_PARTY: PartyId = PartyId::P5;

/// The parties that send the logits to [`RESULT_PARTY`].
pub const RESULT_INFORMANTS: [PartyId; 3] = [PartyId::P2, PartyId::P3, PartyId::P4];

const DOT_KEY: u32 = 1;
const TRUNCATED_KEY: u32 = 2;
const BIASED_KEY: u32 = 3;
const ACTIVATED_KEY: u32 = 100;

/// The shared weights and biases, one read-only store per layer.
#[derive(Debug, Clone)]
pub struct SharedModel {
    layers: [Arc<HashMap<u32, ReplicatedShare>>; 3],
}

/// The outcome of an inference, known to [`RESULT_PARTY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    /// The signed fixed-point logits.
    pub logits: Vec<i64>,
    /// The index of the largest logit.
    pub class: usize,
}

/// One party's inference engine.
#[derive(Debug)]
pub struct Engine<T> {
    transport: Arc<T>,
    prf: Prf,
    shape: NetworkShape,
    parallelism: usize,
    model_shared: AtomicBool,
}

impl<T> Engine<T> {
    /// Creates an engine running at most `parallelism` neuron tasks per image at once.
    ///
    /// The limit applies to each [`Self::infer`] call separately, so `n` concurrent images run
    /// up to `n · parallelism` neuron tasks.
    pub fn new(
        transport: Arc<T>,
        key: &SessionKey,
        shape: NetworkShape,
        parallelism: usize,
    ) -> Self {
        Self {
            transport,
            prf: Prf::new(key),
            shape,
            parallelism: parallelism.max(1),
            model_shared: AtomicBool::new(false),
        }
    }

    /// Creates an engine with the key, shape and pool size of `config`.
    pub fn from_config(transport: Arc<T>, config: &Config) -> Self {
        Self::new(transport, &config.prf_key, config.shape, config.parallelism)
    }

    /// The shape of the evaluated network.
    pub fn shape(&self) -> NetworkShape {
        self.shape
    }

    /// The transport the engine runs on.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The id of the first task of the `index`-th image.
    ///
    /// An image uses one task for its input and one per neuron, so the ranges of two images
    /// never overlap and never contain [`MODEL_TASK`].
    pub fn image_task(&self, index: u32) -> TaskId {
        (index + 1) * (self.shape.neurons() + 1)
    }
}

impl<T: Transport + 'static> Engine<T> {
    fn node(&self, task: TaskId) -> Node<T> {
        Node::new(self.transport.id(), task, self.transport.clone(), self.prf.clone())
    }

    /// Shares the model of [`DATA_OWNER`], which must pass `Some`. All others pass `None`.
    ///
    /// The model is always shared as [`MODEL_TASK`], whose masks must not be drawn twice, so an
    /// engine shares at most one model. Later calls fail with [`Error::TaskReused`].
    #[instrument(level = Level::DEBUG, skip_all, fields(party = %self.transport.id()), err)]
    pub async fn share_model(&self, model: Option<&ModelWeights>) -> Result<SharedModel, Error> {
        let me = self.transport.id();
        let mut node = self.node(MODEL_TASK);
        if me == DATA_OWNER {
            let model = model.ok_or(Error::WrongRole(me))?;
            let expected = self.shape.model_len();
            if model.shape() != self.shape {
                return Err(Error::DimensionMismatch {
                    left: model.shape().model_len(),
                    right: expected,
                });
            }
        }
        if self.model_shared.swap(true, Ordering::SeqCst) {
            return Err(Error::TaskReused(MODEL_TASK));
        }
        let mut layers: [Arc<HashMap<u32, ReplicatedShare>>; 3] = Default::default();
        for (i, config) in self.shape.layers().iter().enumerate() {
            if let Some(model) = model.filter(|_| me == DATA_OWNER) {
                for (key, value) in model.keyed_values(i) {
                    node.set_value(key, value);
                }
            }
            let keys = config.weight_start..config.weight_end();
            share_all::<Z64, T>(&mut node, DATA_OWNER, keys).await?;
            layers[i] = Arc::new(node.beta_shares_snapshot());
            node.reset_beta_shares();
            debug!(party = %me, layer = i, "layer shared");
        }
        node.release();
        info!(party = %me, "model shared");
        Ok(SharedModel { layers })
    }

    /// Classifies one image as `task` (see [`Self::image_task`]).
    ///
    /// [`DATA_OWNER`] passes the image, all other parties `None`. Only [`RESULT_PARTY`] gets a
    /// prediction back.
    #[instrument(
        level = Level::DEBUG,
        skip(self, model, image),
        fields(party = %self.transport.id()),
        err
    )]
    pub async fn infer(
        &self,
        model: &SharedModel,
        image: Option<&[u64]>,
        task: TaskId,
    ) -> Result<Option<Prediction>, Error> {
        let me = self.transport.id();
        let layers = self.shape.layers();
        let mut node = self.node(task);
        if me == DATA_OWNER {
            let image = image.ok_or(Error::WrongRole(me))?;
            if image.len() != self.shape.input as usize {
                return Err(Error::DimensionMismatch {
                    left: image.len(),
                    right: self.shape.input as usize,
                });
            }
            for (key, pixel) in layers[0].inputs().zip(image) {
                node.set_value(key, *pixel);
            }
        }
        share_all::<Z64, T>(&mut node, DATA_OWNER, layers[0].inputs()).await?;

        // Every party acquires permits in neuron order, so the lowest pending neuron always
        // runs on all five parties.
        let pool = Arc::new(Semaphore::new(self.parallelism));
        let mut next_task = task + 1;
        for (l, (config, weights)) in layers.iter().zip(&model.layers).enumerate() {
            let inputs = Arc::new(node.beta_shares_snapshot());
            node.reset_beta_shares();
            let mut neurons = JoinSet::new();
            for neuron in 0..config.output_size {
                let permit = pool.clone().acquire_owned().await?;
                let node = self.node(next_task + neuron);
                let (config, inputs, weights) = (*config, inputs.clone(), weights.clone());
                neurons.spawn(async move {
                    let result = evaluate_neuron(node, config, neuron, &inputs, &weights).await;
                    drop(permit);
                    result
                });
            }
            next_task += config.output_size;
            while let Some(finished) = neurons.join_next().await {
                let (key, share) = finished??;
                node.set_beta_share(key, share);
            }
            debug!(party = %me, task, layer = l, "layer evaluated");
        }

        let output = layers[2];
        let mut logits = Vec::with_capacity(output.output_size as usize);
        for neuron in 0..output.output_size {
            let share = node.beta_share(output.output_key(neuron))?;
            let opened =
                open::<Z64, T>(&mut node, &share, RESULT_INFORMANTS, RESULT_PARTY).await?;
            if let Some(logit) = opened {
                logits.push(logit as i64);
            }
        }
        node.release();
        if me != RESULT_PARTY {
            return Ok(None);
        }
        let class = argmax(&logits);
        info!(party = %me, task, class, "image classified");
        Ok(Some(Prediction { logits, class }))
    }
}

/// Computes one neuron in its own task and returns its output key and share.
async fn evaluate_neuron<T: Transport>(
    mut node: Node<T>,
    config: LayerConfig,
    neuron: u32,
    inputs: &HashMap<u32, ReplicatedShare>,
    weights: &HashMap<u32, ReplicatedShare>,
) -> Result<(u32, ReplicatedShare), Error> {
    let bias = config.bias_key(neuron);
    node.import_beta_shares(inputs, config.inputs())?;
    node.import_beta_shares(weights, config.weights_of(neuron))?;
    node.import_beta_shares(weights, bias..bias + 1)?;
    let operands = DotOperands {
        x_start: config.input_start,
        y_start: config.weight_key(neuron, 0),
        len: config.input_size,
    };
    dot_product::<Z64, T>(&mut node, operands, DOT_KEY).await?;
    truncate(&mut node, DOT_KEY, TRUNCATED_KEY).await?;
    let mut share = add(&mut node, TRUNCATED_KEY, bias, BIASED_KEY)?;
    if config.relu {
        share = relu(&mut node, BIASED_KEY, ACTIVATED_KEY).await?;
    }
    node.release();
    Ok((config.output_key(neuron), share))
}
