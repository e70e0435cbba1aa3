use convnet::Matrix;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use network_benches::Lenet5Classifier;
use num_format::{Locale, ToFormattedString};

pub fn criterion_benchmark(c: &mut Criterion) {
    {
        let mut g = c.benchmark_group("multiply");
        for n in [16, 64, 256] {
            let a = Matrix::zeros(n, n);
            let b = Matrix::zeros(n, n);
            let mut output = Matrix::zeros(n, n);
            let id = BenchmarkId::new("f64", n.to_formatted_string(&Locale::en));
            g.bench_function(id, |bench| {
                bench.iter(|| a.multiply_into(&b, &mut output).unwrap());
            });
        }
    }
    {
        let mut g = c.benchmark_group("convolve2d");
        for n in [28, 128] {
            let input = Matrix::zeros(n, n);
            let kernel = Matrix::zeros(5, 5);
            let id = BenchmarkId::new("5x5", n.to_formatted_string(&Locale::en));
            g.bench_function(id, |bench| {
                bench.iter(|| input.convolve2d(&kernel, 1, 2).unwrap());
            });
        }
    }
    {
        // training
        let samples = 100;
        let mut g = c.benchmark_group(format!(
            "LeNet5(training, samples = {})",
            samples.to_formatted_string(&Locale::en)
        ));
        g.sample_size(10);
        for (momentum, name) in [(false, "sgd"), (true, "sgd_momentum")] {
            let id = BenchmarkId::new("convnet", name);
            g.bench_function(id, |b| {
                let mut model = Lenet5Classifier::new(samples)
                    .unwrap()
                    .with_sgd(momentum)
                    .unwrap();
                b.iter(|| {
                    model.train(10).unwrap();
                });
            });
        }
    }
    {
        // inference
        let samples = 1_000;
        let mut g = c.benchmark_group(format!(
            "LeNet5(inference, samples = {})",
            samples.to_formatted_string(&Locale::en)
        ));
        g.sample_size(10);
        g.bench_function(BenchmarkId::new("convnet", "f64"), |b| {
            let mut model = Lenet5Classifier::new(samples).unwrap();
            b.iter(|| {
                model.infer().unwrap();
            });
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
