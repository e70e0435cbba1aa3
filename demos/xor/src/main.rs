use anyhow::Result;
use clap::Parser;
use convnet::{Activation, Matrix, Network};
use rand::{rngs::StdRng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Trains a 2-2-1 sigmoid network on XOR.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Options {
    #[arg(long, default_value_t = 10_000)]
    epochs: usize,
    #[arg(long, default_value_t = 1.)]
    learning_rate: f64,
    #[arg(long, default_value_t = 1)]
    batch_size: usize,
    /// Seed for parameter initialization.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
    let options = Options::parse();
    println!("{options:#?}");

    let x = Matrix::from_shape_vec(4, 2, vec![0., 0., 0., 1., 1., 0., 1., 1.])?;
    let y = Matrix::from_shape_vec(4, 1, vec![0., 1., 1., 0.])?;

    let mut network = Network::new(1, 2, 1);
    network
        .append_dense(2, Activation::Sigmoid)?
        .append_dense(1, Activation::Sigmoid)?;
    match options.seed {
        Some(seed) => network.compile_with_rng(&mut StdRng::seed_from_u64(seed))?,
        None => network.compile()?,
    }

    let report = (options.epochs / 10).max(1);
    for epoch in 1..=options.epochs {
        let stats = network.fit(&x, &y, options.batch_size, options.learning_rate)?;
        if epoch % report == 0 {
            println!("epoch: {epoch} loss: {:.6}", stats.loss.unwrap_or_default());
        }
    }

    for row in x.view().rows() {
        let input = Matrix::column(row.to_vec());
        let output = network.forward(&input)?[(0, 0)];
        println!("{:?} -> {output:.4}", row.to_vec());
    }
    Ok(())
}
