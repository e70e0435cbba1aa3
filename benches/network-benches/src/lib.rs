use anyhow::Result;
use convnet::{Activation, Matrix, Network, Sgd};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// LeNet5 on 28 x 28 images.
pub struct Lenet5Classifier {
    network: Network,
    optimizer: Sgd,
    x: Matrix,
    y: Matrix,
}

impl Lenet5Classifier {
    /// A classifier with `samples` random images and targets.
    pub fn new(samples: usize) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(0);
        let mut network = Network::new(28, 28, 1);
        network
            .append_conv2d(6, 5, 1, 2, 1, Activation::Relu)?
            .append_max_pool(2)?
            .append_conv2d(16, 5, 6, 0, 1, Activation::Relu)?
            .append_max_pool(2)?
            .append_flatten()?
            .append_dense(120, Activation::Relu)?
            .append_dense(84, Activation::Relu)?
            .append_dense(10, Activation::Softmax)?;
        network.compile_with_rng(&mut rng)?;
        network.init_random_with_rng(&mut rng, -0.1, 0.1)?;
        let mut x = Matrix::zeros(samples, 28 * 28);
        x.fill_random(&mut rng, 0., 1.)?;
        let mut y = Matrix::zeros(samples, 10);
        for row in 0..samples {
            y[(row, rng.gen_range(0..10))] = 1.;
        }
        Ok(Self {
            network,
            optimizer: Sgd::builder().learning_rate(0.01).momentum(0.01).build()?,
            x,
            y,
        })
    }
    pub fn with_sgd(self, momentum: bool) -> Result<Self> {
        let mut builder = Sgd::builder().learning_rate(0.01);
        if momentum {
            builder = builder.momentum(0.01);
        }
        Ok(Self {
            optimizer: builder.build()?,
            ..self
        })
    }
    pub fn infer(&mut self) -> Result<()> {
        self.network.evaluate(&self.x, &self.y)?;
        Ok(())
    }
    pub fn train(&mut self, batch_size: usize) -> Result<()> {
        self.network
            .fit_with(&mut self.optimizer, &self.x, &self.y, batch_size)?;
        Ok(())
    }
}
