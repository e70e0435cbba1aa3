/*!
# convnet
A feed forward neural network engine in pure Rust.

Networks are built from dense, convolutional, pooling and flatten layers, compiled
to infer shapes and allocate buffers, and trained by mini-batch gradient descent
with backpropagation.

```no_run
# use convnet::{Activation, Matrix, Network};
# fn main() -> convnet::Result<()> {
let mut network = Network::new(1, 2, 1);
network
    .append_dense(2, Activation::Sigmoid)?
    .append_dense(1, Activation::Sigmoid)?;
network.compile()?;
let x = Matrix::from_shape_vec(4, 2, vec![0., 0., 0., 1., 1., 0., 1., 1.])?;
let y = Matrix::from_shape_vec(4, 1, vec![0., 1., 1., 0.])?;
for _ in 0..10_000 {
    network.fit(&x, &y, 1, 1.)?;
}
# Ok(())
# }
```

Parallel loops are run with [rayon](https://docs.rs/rayon), and events are
emitted with [tracing](https://docs.rs/tracing).

# Features
- "serde": Derives [`Serialize`](serde::Serialize) and [`Deserialize`](serde::Deserialize)
  for configuration types.
*/
#![warn(missing_debug_implementations)]

pub mod error;
pub mod gradient;
/// Layers.
pub mod layer;
pub mod learn;
/// Matrices.
pub mod matrix;
pub mod network;
pub mod optimizer;

pub use error::{Error, Result};
pub use gradient::Gradient;
pub use layer::{Activation, Layer, PoolKind};
pub use learn::Stats;
pub use matrix::Matrix;
pub use network::Network;
pub use optimizer::{Optimizer, Sgd};
