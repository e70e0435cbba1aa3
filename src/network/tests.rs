use super::*;
use crate::optimizer::{Optimizer, Sgd};
use approx::assert_abs_diff_eq;
use ndarray::arr2;
use rand::{rngs::StdRng, SeedableRng};

fn assert_elems_eq(actual: &Matrix, expected: &[f64], epsilon: f64) {
    assert_eq!(actual.len(), expected.len());
    for (a, b) in actual.iter().zip(expected) {
        assert_abs_diff_eq!(*a, *b, epsilon = epsilon);
    }
}

fn two_layer_sigmoid() -> Network {
    let mut network = Network::new(2, 1, 1);
    network
        .append_dense(2, Activation::Sigmoid)
        .unwrap()
        .append_dense(2, Activation::Sigmoid)
        .unwrap();
    network.compile_with_rng(&mut StdRng::seed_from_u64(0)).unwrap();
    for (index, weights, bias) in [
        (1, [[0.15, 0.25], [0.2, 0.3]], 0.35),
        (2, [[0.4, 0.5], [0.45, 0.55]], 0.6),
    ] {
        let dense = network.dense_mut(index).unwrap();
        dense.weights_mut().assign(&arr2(&weights));
        dense.set_bias(bias);
    }
    network
}

#[test]
fn forward() {
    let mut network = two_layer_sigmoid();
    let output = network
        .forward(&Matrix::column(vec![0.05, 0.1]))
        .unwrap()
        .clone();
    assert_elems_eq(
        &network.layers()[1].outputs()[0],
        &[0.593269992, 0.596884378],
        5e-9,
    );
    assert_elems_eq(&output, &[0.75136507, 0.772928465], 5e-9);
    assert_eq!(network.output().unwrap(), &output);
}

#[test]
fn forward_accepts_row_input() {
    let mut network = two_layer_sigmoid();
    let column = network
        .forward(&Matrix::column(vec![0.05, 0.1]))
        .unwrap()
        .clone();
    let row = network
        .forward(&Matrix::from_shape_vec(1, 2, vec![0.05, 0.1]).unwrap())
        .unwrap();
    assert_eq!(row, &column);
}

#[test]
fn backprop_gradient() {
    let mut network = two_layer_sigmoid();
    network.forward(&Matrix::column(vec![0.05, 0.1])).unwrap();
    let gradient = network
        .backprop(&Matrix::column(vec![0.01, 0.99]))
        .unwrap();
    assert_eq!(gradient.layers().len(), 3);
    assert_elems_eq(
        gradient.dense(2).unwrap().weights(),
        &[0.082167041, -0.022602540, 0.082667628, -0.022740242],
        5e-9,
    );
    assert_elems_eq(
        gradient.dense(1).unwrap().weights(),
        &[0.000438568, 0.000497712, 0.000877139, 0.000995420],
        5e-9,
    );
    assert!(gradient.dense(0).is_none());
}

#[test]
fn fit_step() {
    let mut network = two_layer_sigmoid();
    let x = Matrix::from_shape_vec(1, 2, vec![0.05, 0.1]).unwrap();
    let y = Matrix::from_shape_vec(1, 2, vec![0.01, 0.99]).unwrap();
    let stats = network.fit(&x, &y, 1, 0.5).unwrap();
    assert_eq!(stats.count, 1);
    assert_abs_diff_eq!(stats.loss.unwrap(), 0.298371109, epsilon = 1e-8);
    let weights = |index: usize| network.layers()[index].as_dense().unwrap().weights().clone();
    assert_elems_eq(
        &weights(2),
        &[0.358916480, 0.511301270, 0.408666186, 0.561370121],
        5e-9,
    );
    assert_elems_eq(
        &weights(1),
        &[0.149780716, 0.24975114, 0.19956143, 0.29950229],
        5e-9,
    );
}

#[test]
fn partial_batch_uses_own_size() {
    let mut a = two_layer_sigmoid();
    let mut b = two_layer_sigmoid();
    let x = Matrix::from_shape_vec(3, 2, vec![0.05, 0.1, 0.3, -0.2, 0.5, 0.5]).unwrap();
    let y = Matrix::from_shape_vec(3, 2, vec![0.01, 0.99, 0.5, 0.5, 1., 0.]).unwrap();
    a.fit(&x, &y, 2, 0.5).unwrap();
    // same steps by hand: one batch of 2 then one of 1
    let mut sgd = Sgd::new(0.5).unwrap();
    for (rows, batch) in [(0..2, 2), (2..3, 1)] {
        let mut gradient = Gradient::zeros(&b).unwrap();
        for i in rows {
            let x = Matrix::column(x.view().row(i).to_vec());
            let t = Matrix::column(y.view().row(i).to_vec());
            b.forward(&x).unwrap();
            gradient.accumulate(&b.backprop(&t).unwrap()).unwrap();
        }
        sgd.step(&mut b, &gradient, batch).unwrap();
    }
    for index in 1..3 {
        let (a, b) = (
            a.layers()[index].as_dense().unwrap(),
            b.layers()[index].as_dense().unwrap(),
        );
        assert_elems_eq(a.weights(), &b.weights().to_vec(), 1e-12);
        assert_abs_diff_eq!(a.bias(), b.bias(), epsilon = 1e-12);
    }
}

#[test]
fn forward_is_deterministic() {
    let mut network = Network::new(4, 4, 1);
    network
        .append_conv2d(2, 3, 1, 1, 1, Activation::Tanh)
        .unwrap()
        .append_avg_pool(2)
        .unwrap()
        .append_dense(3, Activation::Softmax)
        .unwrap();
    network.compile_with_rng(&mut StdRng::seed_from_u64(3)).unwrap();
    let input = Matrix::from_shape_vec(4, 4, (0..16).map(|x| x as f64 / 16.).collect()).unwrap();
    let first = network.forward(&input).unwrap().clone();
    assert_abs_diff_eq!(first.sum(), 1., epsilon = 1e-12);
    assert_eq!(network.forward(&input).unwrap(), &first);
}

#[test]
fn compile_infers_shapes() {
    let mut network = Network::new(28, 28, 1);
    network
        .append_conv2d(6, 5, 1, 2, 1, Activation::Relu)
        .unwrap()
        .append_max_pool(2)
        .unwrap()
        .append_conv2d(16, 5, 6, 0, 1, Activation::Relu)
        .unwrap()
        .append_max_pool(2)
        .unwrap()
        .append_flatten()
        .unwrap()
        .append_dense(120, Activation::Relu)
        .unwrap()
        .append_dense(10, Activation::Softmax)
        .unwrap();
    network.compile().unwrap();
    let spatial = |height, width, channels| Shape::Spatial {
        height,
        width,
        channels,
    };
    assert_eq!(
        network.shapes().unwrap(),
        vec![
            spatial(28, 28, 1),
            spatial(28, 28, 6),
            spatial(14, 14, 6),
            spatial(10, 10, 16),
            spatial(5, 5, 16),
            Shape::Flat(400),
            Shape::Flat(120),
            Shape::Flat(10),
        ]
    );
    let dense = network.layers()[6].as_dense().unwrap();
    assert_eq!(dense.weights().dim(), [400, 120]);
    assert!(dense.weights().iter().all(|w| (-1.0..1.0).contains(w)));
    assert_eq!(network.output_len().unwrap(), 10);
}

#[test]
fn compile_is_atomic() {
    let mut network = Network::new(5, 5, 1);
    network
        .append_conv2d(2, 3, 1, 0, 1, Activation::Relu)
        .unwrap()
        .append_conv2d(2, 3, 3, 0, 1, Activation::Relu)
        .unwrap();
    assert_eq!(
        network.compile(),
        Err(Error::ChannelMismatch {
            op: "conv2d",
            expected: 3,
            found: 2,
        })
    );
    assert!(!network.is_compiled());
    assert!(network.layers().iter().all(|layer| layer.outputs().is_empty()));
}

#[test]
fn uncompiled_network() {
    let mut network = Network::new(2, 1, 1);
    network.append_dense(1, Activation::Relu).unwrap();
    let x = Matrix::column(vec![1., 2.]);
    assert_eq!(
        network.forward(&x),
        Err(Error::UncompiledNetwork { op: "forward" })
    );
    assert!(matches!(
        network.backprop(&Matrix::column(vec![1.])),
        Err(Error::UncompiledNetwork { .. })
    ));
    assert!(matches!(
        network.init_random(-1., 1.),
        Err(Error::UncompiledNetwork { .. })
    ));
    assert!(matches!(
        Gradient::zeros(&network),
        Err(Error::UncompiledNetwork { .. })
    ));
}

#[test]
fn empty_network() {
    assert_eq!(Network::new(1, 1, 1).compile(), Err(Error::EmptyNetwork));
}

#[test]
fn append_after_compile() {
    let mut network = two_layer_sigmoid();
    assert!(matches!(
        network.append_flatten(),
        Err(Error::AlreadyCompiled)
    ));
    assert_eq!(network.compile(), Err(Error::AlreadyCompiled));
}

#[test]
fn length_mismatches() {
    let mut network = two_layer_sigmoid();
    assert_eq!(
        network.forward(&Matrix::column(vec![1.; 3])),
        Err(Error::LengthMismatch {
            op: "forward",
            expected: 2,
            found: 3,
        })
    );
    network.forward(&Matrix::column(vec![1.; 2])).unwrap();
    assert!(matches!(
        network.backprop(&Matrix::column(vec![1.])),
        Err(Error::LengthMismatch { op: "backprop", .. })
    ));
}

#[test]
fn invalid_batch_size() {
    let mut network = two_layer_sigmoid();
    let before = network.layers()[2].as_dense().unwrap().weights().clone();
    let x = Matrix::zeros(1, 2);
    let y = Matrix::zeros(1, 2);
    assert_eq!(network.fit(&x, &y, 0, 0.5), Err(Error::InvalidBatchSize));
    assert!(matches!(
        network.fit(&x, &Matrix::zeros(2, 2), 1, 0.5),
        Err(Error::LengthMismatch { op: "fit", .. })
    ));
    assert_eq!(network.layers()[2].as_dense().unwrap().weights(), &before);
}

#[test]
fn gradient_mismatch_is_rejected() {
    let mut network = two_layer_sigmoid();
    let mut other = Network::new(2, 1, 1);
    other.append_dense(3, Activation::Relu).unwrap();
    other.compile().unwrap();
    let gradient = Gradient::zeros(&other).unwrap();
    let mut sgd = Sgd::new(0.1).unwrap();
    assert!(matches!(
        sgd.step(&mut network, &gradient, 1),
        Err(Error::LengthMismatch { .. })
    ));
    let mut zeros = Gradient::zeros(&network).unwrap();
    assert!(matches!(
        zeros.accumulate(&gradient),
        Err(Error::LengthMismatch { .. })
    ));
    assert_eq!(
        sgd.step(&mut network, &zeros, 0),
        Err(Error::InvalidBatchSize)
    );
}

#[test]
fn init_zero() {
    let mut network = two_layer_sigmoid();
    network.init_zero().unwrap();
    let output = network.forward(&Matrix::column(vec![0.3, 0.7])).unwrap();
    assert_eq!(output.to_vec(), vec![0.5, 0.5]);
}

#[test]
fn multi_channel_output() {
    let mut network = Network::new(3, 3, 2);
    network
        .append_conv2d(2, 2, 2, 0, 1, Activation::Relu)
        .unwrap();
    network.compile().unwrap();
    let input = [Matrix::zeros(3, 3), Matrix::zeros(3, 3)];
    assert_eq!(network.forward_channels(&input).unwrap().len(), 2);
    assert!(matches!(
        network.output(),
        Err(Error::ChannelMismatch { op: "output", .. })
    ));
    assert_eq!(
        network.forward_channels(&input[..1]),
        Err(Error::ChannelMismatch {
            op: "forward",
            expected: 2,
            found: 1,
        })
    );
}

#[test]
fn parameter_handles_match_layer_kind() {
    let mut network = Network::new(4, 4, 1);
    network
        .append_conv2d(2, 3, 1, 0, 1, Activation::Relu)
        .unwrap()
        .append_flatten()
        .unwrap()
        .append_dense(2, Activation::Sigmoid)
        .unwrap();
    network.compile().unwrap();
    assert!(network.dense_mut(0).is_none());
    assert!(network.dense_mut(1).is_none());
    assert!(network.conv2d_mut(1).is_some());
    assert!(network.conv2d_mut(3).is_none());
    assert!(network.dense_mut(3).is_some());
    assert!(network.dense_mut(4).is_none());
    assert_eq!(network.input().unwrap().shape().len(), 16);
}

#[test]
fn missing_input_layer() {
    let mut network = two_layer_sigmoid();
    network.layers[0] = network.layers[1].clone();
    let expected = Err(Error::UnsupportedLayerKind {
        index: 0,
        kind: "dense",
    });
    assert_eq!(network.input().map(|_| ()), expected);
    let x = Matrix::column(vec![0.05, 0.1]);
    assert_eq!(network.forward(&x).map(|_| ()), expected);
    assert_eq!(network.forward_channels(&[x.clone()]).map(|_| ()), expected);
    assert_eq!(network.forward_flat(&x).map(|_| ()), expected);
}

#[test]
fn conv_hyperparameter_overflow() {
    let mut network = Network::new(4, 4, 1);
    network
        .append_conv2d(1, 3, 1, usize::MAX / 2 + 1, 1, Activation::Relu)
        .unwrap();
    assert!(matches!(
        network.compile(),
        Err(Error::InvalidParameter { name: "padding", .. })
    ));
    assert!(!network.is_compiled());

    let mut network = Network::new(4, 4, 2);
    network
        .append_conv2d(usize::MAX / 2 + 1, 1, 2, 0, 1, Activation::Relu)
        .unwrap();
    assert!(matches!(
        network.compile(),
        Err(Error::InvalidParameter {
            name: "kernel_count",
            ..
        })
    ));

    let mut network = Network::new(4, 4, 1);
    network
        .append_conv2d(usize::MAX / 4, 1, 1, 0, 1, Activation::Relu)
        .unwrap();
    assert!(matches!(
        network.compile(),
        Err(Error::AllocationFailure { .. })
    ));
}

#[test]
fn input_size_overflow() {
    let mut network = Network::new(usize::MAX / 2 + 1, 2, 1);
    network.append_flatten().unwrap();
    assert!(matches!(
        network.compile(),
        Err(Error::AllocationFailure { .. })
    ));
}
