/*
 * Copyright (C) 2026 Zeknox NTT Engine Contributors
 *
 * SPDX-License-Identifier: GPL-3.0-or-later
 *
 * This file is part of Zeknox NTT Engine.
 *
 * Zeknox NTT Engine is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Zeknox NTT Engine is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Zeknox NTT Engine.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Transpose with bit reversal.
//!
//! Turns `batches` rows of `n = 2^lg_n` elements into `n` rows of `batches`
//! elements, bit-reversing the domain index on the way:
//!
//! `out[rev(i) * batches + b] = in[b * n + i]`
//!
//! The tiled kernel walks the output in blocks of `2^tile_log` rows by
//! `2^tile_log` batches. The naive kernel is a plain double loop kept as a
//! reference; both produce identical output.

use rayon::prelude::*;
use tracing::debug;

use crate::device::memory::{check_disjoint, check_residency, Buffer, BufferMut};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::field::Goldilocks as Scalar;
use crate::ntt::reverse_index;
use crate::types::{total_elements, TransposeConfig};

/// Reference kernel.
pub fn naive_transpose_rev<T: Copy>(out: &mut [T], inp: &[T], batches: usize, lg_n: u32) {
    let n = 1usize << lg_n;
    for b in 0..batches {
        for i in 0..n {
            out[reverse_index(i, lg_n) * batches + b] = inp[b * n + i];
        }
    }
}

/// Tiled kernel. Output row blocks are independent and run in parallel when
/// `parallel` is set.
pub fn tiled_transpose_rev<T: Copy + Send + Sync>(
    out: &mut [T],
    inp: &[T],
    batches: usize,
    lg_n: u32,
    tile_log: u32,
    parallel: bool,
) {
    let n = 1usize << lg_n;
    let tile = 1usize << tile_log.min(lg_n);
    let rows_per_block = tile * batches;

    // output row r holds in[b * n + rev(r)] for every b
    let fill_block = |(blk, rows): (usize, &mut [T])| {
        let r0 = blk * tile;
        for b0 in (0..batches).step_by(tile) {
            let b1 = (b0 + tile).min(batches);
            for (dr, row) in rows.chunks_mut(batches).enumerate() {
                let i = reverse_index(r0 + dr, lg_n);
                for b in b0..b1 {
                    row[b] = inp[b * n + i];
                }
            }
        }
    };

    if parallel {
        out.par_chunks_mut(rows_per_block).enumerate().for_each(fill_block);
    } else {
        out.chunks_mut(rows_per_block).enumerate().for_each(fill_block);
    }
}

/// Validates a transpose call, returning the element count.
fn validate(
    device: &Device,
    output: &BufferMut<'_, Scalar>,
    input: &Buffer<'_, Scalar>,
    lg_n: u32,
    cfg: &TransposeConfig,
) -> Result<usize> {
    cfg.validate(lg_n)?;
    let len = total_elements(cfg.batches as usize, lg_n)?;
    if input.len() != len || output.len() != len {
        return Err(Error::invalid(format!(
            "transpose of {} x 2^{} needs {} elements, got input {} and output {}",
            cfg.batches,
            lg_n,
            len,
            input.len(),
            output.len()
        )));
    }
    check_residency("transpose input", input.residency(), cfg.are_inputs_on_device, device.id())?;
    check_residency(
        "transpose output",
        output.residency(),
        cfg.are_outputs_on_device,
        device.id(),
    )?;
    check_disjoint(output, input)?;
    Ok(len)
}

/// Tiled transpose with bit reversal of `cfg.batches` rows of `2^lg_n`.
pub fn compute_transpose_rev(
    device: &Device,
    output: BufferMut<'_, Scalar>,
    input: Buffer<'_, Scalar>,
    lg_n: u32,
    cfg: TransposeConfig,
) -> Result<()> {
    let len = validate(device, &output, &input, lg_n, &cfg)?;
    let batches = cfg.batches as usize;
    let tile_log = device.transpose_tile_log();
    let parallel = device.parallel_for(len);
    debug!(
        "Transpose on device {}: {} x 2^{} (tile 2^{})",
        device.id(),
        batches,
        lg_n,
        tile_log
    );
    device.launch_out_of_place("transpose_rev", output, input, |out, inp| {
        tiled_transpose_rev(out, inp, batches, lg_n, tile_log, parallel)
    })
}

/// Reference transpose with bit reversal; same contract as
/// [`compute_transpose_rev`].
pub fn compute_naive_transpose_rev(
    device: &Device,
    output: BufferMut<'_, Scalar>,
    input: Buffer<'_, Scalar>,
    lg_n: u32,
    cfg: TransposeConfig,
) -> Result<()> {
    validate(device, &output, &input, lg_n, &cfg)?;
    let batches = cfg.batches as usize;
    device.launch_out_of_place("naive_transpose_rev", output, input, |out, inp| {
        naive_transpose_rev(out, inp, batches, lg_n)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::{DeviceBuffer, Residency};
    use crate::error::ErrorCode;
    use crate::ntt::tests::test_platform;

    #[test]
    fn test_small_example() {
        // 2 rows of 4: out[rev(i) * 2 + b] = in[b * 4 + i]
        let inp: Vec<u32> = (0..8).collect();
        let mut out = vec![0u32; 8];
        naive_transpose_rev(&mut out, &inp, 2, 2);
        assert_eq!(out, vec![0, 4, 2, 6, 1, 5, 3, 7]);
    }

    #[test]
    fn test_tiled_matches_naive() {
        for (batches, lg_n, tile_log) in [(1, 0, 1), (3, 4, 1), (7, 5, 2), (32, 6, 5), (5, 10, 8)] {
            let inp: Vec<u64> = (0..(batches << lg_n) as u64).collect();
            let mut naive = vec![0u64; inp.len()];
            naive_transpose_rev(&mut naive, &inp, batches, lg_n);
            for parallel in [false, true] {
                let mut tiled = vec![0u64; inp.len()];
                tiled_transpose_rev(&mut tiled, &inp, batches, lg_n, tile_log, parallel);
                assert_eq!(tiled, naive, "{} x 2^{} tile 2^{}", batches, lg_n, tile_log);
            }
        }
    }

    #[test]
    fn test_compute_variants_agree() {
        let p = test_platform(1);
        let dev = p.device(0).expect("device 0");
        let cfg = TransposeConfig {
            batches: 6,
            ..Default::default()
        };
        let inp: Vec<Scalar> = (0..6u64 << 5).map(Scalar::from).collect();
        let mut tiled = vec![Scalar::from(0u64); inp.len()];
        let mut naive = vec![Scalar::from(0u64); inp.len()];
        compute_transpose_rev(dev, BufferMut::host(&mut tiled), Buffer::host(&inp), 5, cfg)
            .expect("Transpose failed");
        compute_naive_transpose_rev(dev, BufferMut::host(&mut naive), Buffer::host(&inp), 5, cfg)
            .expect("Naive transpose failed");
        assert_eq!(tiled, naive);
        assert_eq!(tiled[1], inp[32]);
    }

    #[test]
    fn test_device_resident_transpose() {
        let p = test_platform(1);
        let dev = p.device(0).expect("device 0");
        let inp: Vec<Scalar> = (0..4u64 << 3).map(Scalar::from).collect();
        let d_in = DeviceBuffer::from_host(dev, &inp).expect("Failed to upload");
        let mut d_out = DeviceBuffer::zeroed(dev, inp.len()).expect("Failed to allocate");
        let cfg = TransposeConfig {
            batches: 4,
            are_inputs_on_device: true,
            are_outputs_on_device: true,
        };
        compute_transpose_rev(dev, d_out.as_buffer_mut(), d_in.as_buffer(), 3, cfg)
            .expect("Transpose failed");

        let mut expected = vec![Scalar::from(0u64); inp.len()];
        naive_transpose_rev(&mut expected, &inp, 4, 3);
        assert_eq!(d_out.to_host(), expected);
    }

    #[test]
    fn test_transpose_validation() {
        let p = test_platform(1);
        let dev = p.device(0).expect("device 0");
        let cfg = TransposeConfig {
            batches: 2,
            ..Default::default()
        };
        let inp = vec![Scalar::from(1u64); 16];
        let mut short = vec![Scalar::from(0u64); 8];
        let err = compute_transpose_rev(
            dev,
            BufferMut::host(&mut short),
            Buffer::host(&inp),
            3,
            cfg,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let mut data = vec![Scalar::from(0u64); 16];
        let ptr = data.as_mut_ptr();
        // SAFETY: the call is rejected before either view is dereferenced
        let (out, same) = unsafe {
            (
                BufferMut::from_raw_parts(ptr, 16, Residency::Host),
                Buffer::from_raw_parts(ptr as *const Scalar, 16, Residency::Host),
            )
        };
        let err = compute_naive_transpose_rev(dev, out, same, 3, cfg).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AliasingViolation);
    }
}
