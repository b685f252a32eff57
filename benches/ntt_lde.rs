use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ff::Field;
use rand::rngs::OsRng;
use std::hint::black_box;
use zeknox_ntt::{
    Buffer, BufferMut, Goldilocks as Scalar, NttConfig, NttDirection, Platform, PlatformConfig,
    TransposeConfig,
};

const MAX_LG: u32 = 20;

fn platform(devices: usize) -> Option<Platform> {
    match Platform::new(PlatformConfig::with_devices(devices)) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("Device runtime not available, skipping benchmarks: {}", e);
            None
        }
    }
}

fn bench_batched_ntt(c: &mut Criterion) {
    let Some(p) = platform(1) else { return };
    p.init_twiddle_factors(0, MAX_LG).expect("Failed to init twiddles");

    let mut group = c.benchmark_group("Batched NTT");
    for (lg, batches) in [(16u32, 1u32), (12, 16), (20, 1)] {
        let mut data: Vec<Scalar> = (0..(batches as usize) << lg)
            .map(|_| Scalar::random(&mut OsRng))
            .collect();
        let cfg = NttConfig {
            batches,
            ..Default::default()
        };
        group.bench_with_input(
            BenchmarkId::new("forward", format!("{} x 2^{}", batches, lg)),
            &lg,
            |b, &lg| {
                b.iter(|| {
                    p.compute_batched_ntt(
                        0,
                        BufferMut::host(&mut data),
                        lg,
                        NttDirection::Forward,
                        cfg,
                    )
                    .unwrap();
                    black_box(&data);
                });
            },
        );
    }
    group.finish();
}

fn bench_lde(c: &mut Criterion) {
    let devices = std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(1);
    let Some(p) = platform(devices) else { return };
    for id in 0..devices {
        p.init_twiddle_factors(id, 18).expect("Failed to init twiddles");
        p.init_coset(id, 18, 7).expect("Failed to init coset");
    }

    let (lg, rate, batches) = (15u32, 3u32, 16u32);
    let input: Vec<Scalar> = (0..(batches as usize) << lg)
        .map(|_| Scalar::random(&mut OsRng))
        .collect();
    let mut output = vec![Scalar::ZERO; input.len() << rate];
    let cfg = NttConfig {
        batches,
        extension_rate_bits: rate,
        ..Default::default()
    };

    let mut group = c.benchmark_group("LDE 16 x 2^15 -> 2^18");
    group.sample_size(10);
    group.bench_function("single device", |b| {
        b.iter(|| {
            p.compute_batched_lde(
                0,
                BufferMut::host(&mut output),
                Buffer::host(&input),
                lg,
                NttDirection::Forward,
                cfg,
            )
            .unwrap();
            black_box(&output);
        });
    });
    group.bench_function(format!("{} devices", devices), |b| {
        b.iter(|| {
            let total_in = input.len();
            let total_out = output.len();
            p.compute_batched_lde_multi_gpu(
                BufferMut::host(&mut output),
                Buffer::host(&input),
                devices,
                NttDirection::Forward,
                cfg,
                lg,
                total_in,
                total_out,
            )
            .unwrap();
            black_box(&output);
        });
    });
    group.finish();
}

fn bench_transpose(c: &mut Criterion) {
    let Some(p) = platform(1) else { return };
    let (lg, batches) = (16u32, 32u32);
    let input: Vec<Scalar> = (0..(batches as u64) << lg).map(Scalar::from).collect();
    let mut output = vec![Scalar::ZERO; input.len()];
    let cfg = TransposeConfig {
        batches,
        ..Default::default()
    };

    let mut group = c.benchmark_group("Transpose 32 x 2^16");
    group.bench_function("tiled", |b| {
        b.iter(|| {
            p.compute_transpose_rev(0, BufferMut::host(&mut output), Buffer::host(&input), lg, cfg)
                .unwrap();
            black_box(&output);
        });
    });
    group.bench_function("naive", |b| {
        b.iter(|| {
            p.compute_naive_transpose_rev(
                0,
                BufferMut::host(&mut output),
                Buffer::host(&input),
                lg,
                cfg,
            )
            .unwrap();
            black_box(&output);
        });
    });
    group.finish();
}

criterion_group!(benches, bench_batched_ntt, bench_lde, bench_transpose);
criterion_main!(benches);
