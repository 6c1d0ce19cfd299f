//! Benchmarks for signal processing and detection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::DMatrix;

use neurorelay_core::config::SsvepConfig;
use neurorelay_core::types::DetectionMethod;
use neurorelay_native::processing::{
    cca::canonical_correlation,
    fft::ChannelSpectra,
    filters::{ZeroPhaseFilter, BANDPASS_ORDER},
    references::reference_signals,
};
use neurorelay_native::ssvep::SsvepDetector;

const SAMPLE_RATE: f64 = 250.0;

/// Synthetic occipital EEG (sinusoidal with pseudo-noise), samples x channels
fn generate_window(n: usize, channels: usize, freq_hz: f64) -> DMatrix<f64> {
    use std::f64::consts::PI;

    DMatrix::from_fn(n, channels, |i, c| {
        let t = i as f64 / SAMPLE_RATE;
        let signal = (2.0 * PI * freq_hz * t).sin();
        let noise = ((i * (c + 3)) as f64 * 0.123).sin() * 0.3; // Pseudo-noise
        signal + noise
    })
}

fn bench_filtfilt(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtfilt");

    let filter = ZeroPhaseFilter::butterworth_bandpass(SAMPLE_RATE, 5.0, 40.0, BANDPASS_ORDER)
        .expect("valid bandpass");

    for size in [250, 500, 750, 1000].iter() {
        let samples: Vec<f64> = generate_window(*size, 1, 12.0).column(0).iter().copied().collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(filter.filtfilt(black_box(&samples))));
        });
    }

    group.finish();
}

fn bench_cca(c: &mut Criterion) {
    let mut group = c.benchmark_group("cca");

    for channels in [3, 8, 16].iter() {
        let window = generate_window(750, *channels, 12.0);
        let reference = reference_signals(12.0, SAMPLE_RATE, 750, 2);

        group.bench_with_input(BenchmarkId::from_parameter(channels), channels, |b, _| {
            b.iter(|| black_box(canonical_correlation(black_box(&window), black_box(&reference))));
        });
    }

    group.finish();
}

fn bench_spectra(c: &mut Criterion) {
    let window = generate_window(750, 3, 12.0);

    c.bench_function("channel_spectra_750x3", |b| {
        b.iter(|| {
            let spectra = ChannelSpectra::compute(black_box(&window), SAMPLE_RATE);
            black_box(spectra.mean_power_at(12.0))
        });
    });
}

fn bench_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect");
    let window = generate_window(750, 3, 12.0);

    for method in [DetectionMethod::Cca, DetectionMethod::Power] {
        let detector = SsvepDetector::new(SsvepConfig { method, notch_hz: Some(50.0), ..Default::default() })
            .expect("valid detector config");

        group.bench_function(method.as_str(), |b| {
            b.iter(|| black_box(detector.detect(black_box(&window), None)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_filtfilt, bench_cca, bench_spectra, bench_detect);
criterion_main!(benches);
