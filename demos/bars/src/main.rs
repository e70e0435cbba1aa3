use anyhow::Result;
use clap::Parser;
use convnet::{Activation, Matrix, Network};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SIZE: usize = 8;

/// Trains a small convolutional network to classify the orientation of bars.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Options {
    #[arg(long, default_value_t = 20)]
    epochs: usize,
    #[arg(long, default_value_t = 0.05)]
    learning_rate: f64,
    #[arg(long, default_value_t = 16)]
    batch_size: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Number of training samples.
    #[arg(long, default_value_t = 1_000)]
    train: usize,
    /// Number of test samples.
    #[arg(long, default_value_t = 200)]
    test: usize,
}

/// Images with a horizontal, vertical, or diagonal bar plus noise.
///
/// Targets are one hot over the 3 orientations.
fn bars(rng: &mut StdRng, count: usize) -> Result<(Matrix, Matrix)> {
    let mut x = Vec::with_capacity(count * SIZE * SIZE);
    let mut y = Vec::with_capacity(count * 3);
    for _ in 0..count {
        let class = rng.gen_range(0..3);
        let line = rng.gen_range(0..SIZE);
        for r in 0..SIZE {
            for c in 0..SIZE {
                let on = match class {
                    0 => r == line,
                    1 => c == line,
                    _ => r == c,
                };
                let value = if on { 1. } else { 0. };
                x.push(value + rng.gen_range(-0.2..0.2));
            }
        }
        y.extend((0..3).map(|i| if i == class { 1. } else { 0. }));
    }
    Ok((
        Matrix::from_shape_vec(count, SIZE * SIZE, x)?,
        Matrix::from_shape_vec(count, 3, y)?,
    ))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
    let options = Options::parse();
    println!("{options:#?}");

    let mut rng = StdRng::seed_from_u64(options.seed);
    let (train_x, train_y) = bars(&mut rng, options.train)?;
    let (test_x, test_y) = bars(&mut rng, options.test)?;

    let mut network = Network::new(SIZE, SIZE, 1);
    network
        .append_conv2d(6, 3, 1, 1, 1, Activation::Relu)?
        .append_max_pool(2)?
        .append_conv2d(8, 3, 6, 0, 1, Activation::Tanh)?
        .append_flatten()?
        .append_dense(3, Activation::Softmax)?;
    network.compile_with_rng(&mut rng)?;
    network.init_random_with_rng(&mut rng, -0.3, 0.3)?;

    let start = Instant::now();
    for epoch in 1..=options.epochs {
        let train = network.fit(
            &train_x,
            &train_y,
            options.batch_size,
            options.learning_rate,
        )?;
        let test = network.evaluate(&test_x, &test_y)?;
        println!(
            "epoch: {epoch} elapsed: {:.2?} train_loss: {:.5} train_accuracy: {:.2}% test_loss: {:.5} test_accuracy: {:.2}%",
            start.elapsed(),
            train.loss.unwrap_or_default(),
            100. * train.accuracy().unwrap_or_default(),
            test.loss.unwrap_or_default(),
            100. * test.accuracy().unwrap_or_default(),
        );
    }
    Ok(())
}
