//! Tiled and naive transpose-with-bit-reversal agree for every tile size.

use zeknox_ntt::{
    Buffer, BufferMut, DeviceBuffer, Goldilocks as Scalar, Platform, PlatformConfig,
    TransposeConfig,
};

fn platform(tile_log: u32) -> Platform {
    Platform::new(
        PlatformConfig::with_devices(1)
            .threads(2)
            .tile_log(tile_log)
            .device_memory(64 << 20),
    )
    .expect("Failed to create platform")
}

fn reverse(i: usize, lg: u32) -> usize {
    if lg == 0 {
        0
    } else {
        i.reverse_bits() >> (usize::BITS - lg)
    }
}

#[test]
fn tiled_matches_naive() {
    for tile_log in [1u32, 3, 5, 8] {
        let p = platform(tile_log);
        for (batches, lg_n) in [(1u32, 0u32), (1, 6), (3, 5), (17, 7), (64, 10)] {
            let input: Vec<Scalar> = (0..(batches as u64) << lg_n).map(Scalar::from).collect();
            let cfg = TransposeConfig {
                batches,
                ..Default::default()
            };
            let mut tiled = vec![Scalar::from(0u64); input.len()];
            let mut naive = vec![Scalar::from(0u64); input.len()];
            p.compute_transpose_rev(0, BufferMut::host(&mut tiled), Buffer::host(&input), lg_n, cfg)
                .expect("Transpose failed");
            p.compute_naive_transpose_rev(
                0,
                BufferMut::host(&mut naive),
                Buffer::host(&input),
                lg_n,
                cfg,
            )
            .expect("Naive transpose failed");
            assert_eq!(tiled, naive, "tile 2^{}, {} x 2^{}", tile_log, batches, lg_n);

            let n = 1usize << lg_n;
            for b in 0..batches as usize {
                for i in 0..n {
                    assert_eq!(tiled[reverse(i, lg_n) * batches as usize + b], input[b * n + i]);
                }
            }
        }
    }
}

#[test]
fn host_to_device_transpose() {
    let p = platform(5);
    let device = p.device(0).expect("device 0");
    let (batches, lg_n) = (12u32, 6u32);
    let input: Vec<Scalar> = (0..(batches as u64) << lg_n).map(Scalar::from).collect();

    let mut d_out = DeviceBuffer::zeroed(device, input.len()).expect("Failed to allocate");
    let cfg = TransposeConfig {
        batches,
        are_inputs_on_device: false,
        are_outputs_on_device: true,
    };
    p.compute_transpose_rev(0, d_out.as_buffer_mut(), Buffer::host(&input), lg_n, cfg)
        .expect("Transpose failed");

    let mut naive = vec![Scalar::from(0u64); input.len()];
    let host_cfg = TransposeConfig {
        batches,
        ..Default::default()
    };
    p.compute_naive_transpose_rev(
        0,
        BufferMut::host(&mut naive),
        Buffer::host(&input),
        lg_n,
        host_cfg,
    )
    .expect("Naive transpose failed");
    assert_eq!(d_out.to_host(), naive);
}
