//! Runs one of the five parties of a secure FCNN inference, or the plaintext reference.
use std::{fs::File, io::BufReader, ops::Range, path::PathBuf, sync::Arc, time::Instant};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use futures::future::try_join_all;
use quintet::{
    channel::Transport,
    config::Config,
    fcnn::{
        DATA_OWNER, Engine, ModelWeights, RESULT_PARTY, load_test_labels, load_test_pixels,
        reference_inference,
    },
    net::TcpTransport,
    share::PartyId,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Secure inference of a 3-layer fully connected network among five parties.
///
/// Logging can be controlled with an EnvFilter via the `QUINTET_LOG` environment variable.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs one party of the secure inference.
    Infer {
        /// The id of this party (1-5).
        #[arg(long)]
        id: u8,
        /// Number of images classified at the same time. Must be the same for all parties.
        #[arg(long, default_value_t = 1)]
        concurrent: u32,
        #[command(flatten)]
        setup: Setup,
    },
    /// Classifies the images in the clear, with the same fixed-point arithmetic.
    Reference {
        #[command(flatten)]
        setup: Setup,
    },
    /// Prints the default configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, Args)]
struct Setup {
    /// JSON configuration file; defaults are used for missing fields.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Use five consecutive localhost ports starting here instead of the configured addresses.
    #[arg(long, conflicts_with = "process")]
    base_port: Option<u16>,
    /// Use the port block of the given process group, so several groups can share a host.
    #[arg(long)]
    process: Option<u16>,
    /// Number of neuron tasks running concurrently per image.
    #[arg(long)]
    parallelism: Option<usize>,
    /// The model weights (needed by party 1).
    #[arg(long)]
    model: Option<PathBuf>,
    /// The test images (needed by party 1).
    #[arg(long)]
    pixels: Option<PathBuf>,
    /// The test labels, used by party 5 to report the accuracy.
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Number of images to classify. Must be the same for all parties.
    #[arg(long, default_value_t = 1)]
    images: u32,
}

impl Setup {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("could not open {}", path.display()))?;
                serde_json::from_reader(BufReader::new(file))
                    .with_context(|| format!("could not parse {}", path.display()))?
            }
            None => Config::default(),
        };
        if let Some(base_port) = self.base_port {
            config = config.with_base_port(base_port);
        }
        if let Some(process) = self.process {
            config = config.with_process_ports(process);
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        config.validate()?;
        Ok(config)
    }

    fn model(&self, config: &Config) -> anyhow::Result<ModelWeights> {
        let path = self.model.as_ref().context("--model is required")?;
        ModelWeights::load(path, config.shape)
            .with_context(|| format!("could not load the model from {}", path.display()))
    }

    fn pixels(&self, config: &Config) -> anyhow::Result<Vec<Vec<u64>>> {
        let path = self.pixels.as_ref().context("--pixels is required")?;
        let pixels = load_test_pixels(path, config.shape.input)
            .with_context(|| format!("could not load images from {}", path.display()))?;
        if pixels.len() < self.images as usize {
            bail!("{} contains only {} images", path.display(), pixels.len());
        }
        Ok(pixels)
    }

    fn labels(&self) -> anyhow::Result<Option<Vec<u64>>> {
        self.labels
            .as_ref()
            .map(|path| {
                load_test_labels(path)
                    .with_context(|| format!("could not load labels from {}", path.display()))
            })
            .transpose()
    }
}

#[derive(Debug, Default)]
struct Accuracy {
    correct: u32,
    total: u32,
}

impl Accuracy {
    fn record(&mut self, index: u32, class: usize, labels: Option<&[u64]>) {
        let Some(label) = labels.and_then(|l| l.get(index as usize)) else {
            println!("image {index}: class {class}");
            return;
        };
        self.total += 1;
        if *label == class as u64 {
            self.correct += 1;
        }
        println!("image {index}: class {class}, label {label}");
    }

    fn report(&self) {
        if self.total > 0 {
            println!(
                "accuracy: {}/{} ({:.2}%)",
                self.correct,
                self.total,
                100.0 * self.correct as f64 / self.total as f64
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing().context("tracing initialization")?;

    match Cli::parse().command {
        Command::Infer {
            id,
            concurrent,
            setup,
        } => {
            let id = PartyId::new(id)?;
            let config = setup.config()?;
            let transport = TcpTransport::start(id, &config)
                .await
                .context("could not start the transport")?;
            let result = run_party(id, concurrent, &setup, &config, transport.clone()).await;
            if result.is_ok() {
                transport.shutdown().await;
            } else {
                transport.stop();
            }
            result
        }
        Command::Reference { setup } => run_reference(&setup),
        Command::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&Config::default())?);
            Ok(())
        }
    }
}

async fn run_party(
    id: PartyId,
    concurrent: u32,
    setup: &Setup,
    config: &Config,
    transport: Arc<TcpTransport>,
) -> anyhow::Result<()> {
    let (model, pixels) = if id == DATA_OWNER {
        (Some(setup.model(config)?), setup.pixels(config)?)
    } else {
        (None, Vec::new())
    };
    let labels = if id == RESULT_PARTY {
        setup.labels()?
    } else {
        None
    };

    let start = Instant::now();
    let engine = Engine::from_config(transport, config);
    let shared = engine
        .share_model(model.as_ref())
        .await
        .context("model sharing failed")?;
    let mut accuracy = Accuracy::default();
    for wave in waves(setup.images, concurrent) {
        let runs = wave.map(|index| {
            let (engine, shared) = (&engine, &shared);
            let image = pixels.get(index as usize).map(Vec::as_slice);
            async move {
                let prediction = engine
                    .infer(shared, image, engine.image_task(index))
                    .await
                    .with_context(|| format!("inference of image {index} failed"))?;
                anyhow::Ok((index, prediction))
            }
        });
        for (index, prediction) in try_join_all(runs).await? {
            if let Some(prediction) = prediction {
                accuracy.record(index, prediction.class, labels.as_deref());
            }
        }
    }
    accuracy.report();
    if id == RESULT_PARTY {
        println!("total time: {:.3}s", start.elapsed().as_secs_f64());
    }
    info!(party = %id, images = setup.images, concurrent, "done");
    Ok(())
}

/// Splits `0..images` into consecutive runs of at most `concurrent` images.
fn waves(images: u32, concurrent: u32) -> impl Iterator<Item = Range<u32>> {
    let concurrent = concurrent.max(1);
    (0..images)
        .step_by(concurrent as usize)
        .map(move |start| start..images.min(start + concurrent))
}

fn run_reference(setup: &Setup) -> anyhow::Result<()> {
    let config = setup.config()?;
    let model = setup.model(&config)?;
    let pixels = setup.pixels(&config)?;
    let labels = setup.labels()?;
    let mut accuracy = Accuracy::default();
    for (index, image) in (0..setup.images).zip(&pixels) {
        accuracy.record(index, reference_inference(&model, image), labels.as_deref());
    }
    accuracy.report();
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_env_var("QUINTET_LOG")
        .with_default_directive("quintet=info".parse()?)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_are_split_into_waves() {
        let runs: Vec<_> = waves(7, 3).collect();
        assert_eq!(runs, [0..3, 3..6, 6..7]);
        assert_eq!(waves(2, 0).collect::<Vec<_>>(), [0..1, 1..2]);
        assert_eq!(waves(0, 4).count(), 0);
    }

    #[test]
    fn process_groups_get_their_own_ports() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "quintet-party",
            "infer",
            "--id",
            "5",
            "--concurrent",
            "4",
            "--process",
            "2",
        ])?;
        let Command::Infer {
            id,
            concurrent,
            setup,
        } = cli.command
        else {
            panic!("expected the infer command");
        };
        assert_eq!((id, concurrent), (5, 4));
        let config = setup.config()?;
        assert_eq!(config.address(PartyId::P1).port(), 5566);
        assert_eq!(config.address(PartyId::P5).port(), 5570);
        let conflicting = ["reference", "--process", "1", "--base-port", "9000"];
        assert!(Cli::try_parse_from(std::iter::once("quintet-party").chain(conflicting)).is_err());
        Ok(())
    }
}
