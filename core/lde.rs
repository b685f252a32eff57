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

//! Low-Degree Extension (LDE)
//!
//! Evaluates polynomials of size `n = 2^lg` on a domain `2^rate` times larger,
//! optionally shifted by the cached coset generator:
//!
//! 1. interpolate (only for [`NttDirection::Inverse`], where the input holds
//!    evaluations over the `2^lg` subgroup),
//! 2. zero-pad every vector to `2^(lg + rate)`,
//! 3. multiply coefficient `i` by `g^i` when `cfg.with_coset`,
//! 4. forward NTT over the extended domain, natural or bit-reversed output.
//!
//! [`compute_batched_lde_multi_gpu`] splits the batch into equal contiguous
//! shards, runs shard `i` on device `i` and joins all of them before
//! returning.

use std::thread;

use ff::Field;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::device::memory::{check_disjoint, check_residency, Buffer, BufferMut, DeviceBuffer};
use crate::device::{Device, Platform};
use crate::error::{Error, Result};
use crate::field::Goldilocks as Scalar;
use crate::ntt::{bit_reverse_permute, CosetTable, Transform, TwiddleTable};
use crate::types::{total_elements, NttConfig, NttDirection, NttInputOutputOrder};

/// Per-vector extension kernel.
#[derive(Clone, Copy)]
struct Extension<'t> {
    lg_n: u32,
    lg_out: u32,
    direction: NttDirection,
    input_rev: bool,
    output_rev: bool,
    twiddles: &'t TwiddleTable,
    coset: Option<&'t CosetTable>,
}

impl Extension<'_> {
    fn extend(&self, dst: &mut [Scalar], src: &[Scalar], parallel: bool) {
        let n = src.len();
        let (coeffs, padding) = dst.split_at_mut(n);
        coeffs.copy_from_slice(src);
        padding.fill(Scalar::ZERO);

        match self.direction {
            NttDirection::Inverse => Transform {
                lg_n: self.lg_n,
                direction: NttDirection::Inverse,
                order: NttInputOutputOrder::from_flags(self.input_rev, false),
                twiddles: self.twiddles,
                coset: None,
            }
            .apply(coeffs, parallel),
            NttDirection::Forward if self.input_rev => bit_reverse_permute(coeffs),
            NttDirection::Forward => {}
        }

        Transform {
            lg_n: self.lg_out,
            direction: NttDirection::Forward,
            order: NttInputOutputOrder::from_flags(false, self.output_rev),
            twiddles: self.twiddles,
            coset: self.coset,
        }
        .apply(dst, parallel);
    }

    fn extend_batch(&self, out: &mut [Scalar], inp: &[Scalar], parallel: bool) {
        let n = 1usize << self.lg_n;
        let n_out = 1usize << self.lg_out;
        if parallel && inp.len() > n {
            out.par_chunks_mut(n_out)
                .zip(inp.par_chunks(n))
                .for_each(|(dst, src)| self.extend(dst, src, false));
        } else {
            out.chunks_mut(n_out)
                .zip(inp.chunks(n))
                .for_each(|(dst, src)| self.extend(dst, src, parallel));
        }
    }
}

/// Batched LDE of `cfg.batches` vectors from `2^lg_domain_size` to
/// `2^(lg_domain_size + cfg.extension_rate_bits)` elements.
///
/// The device's twiddle table must cover the extended domain, and with
/// `cfg.with_coset` so must its coset table. `output` must not overlap
/// `input`.
pub fn compute_batched_lde(
    device: &Device,
    output: BufferMut<'_, Scalar>,
    input: Buffer<'_, Scalar>,
    lg_domain_size: u32,
    direction: NttDirection,
    cfg: NttConfig,
) -> Result<()> {
    let lg_out = cfg.validate_lde(lg_domain_size)?;
    let batches = cfg.batch_count();
    let in_len = total_elements(batches, lg_domain_size)?;
    let out_len = total_elements(batches, lg_out)?;

    if input.len() != in_len {
        return Err(Error::invalid(format!(
            "LDE input holds {} elements, expected {} x 2^{} = {}",
            input.len(),
            batches,
            lg_domain_size,
            in_len
        )));
    }
    if output.len() != out_len {
        return Err(Error::domain_ratio(format!(
            "LDE output holds {} elements, expected {} x 2^{} = {}",
            output.len(),
            batches,
            lg_out,
            out_len
        )));
    }
    check_residency("LDE input", input.residency(), cfg.are_inputs_on_device, device.id())?;
    check_residency("LDE output", output.residency(), cfg.are_outputs_on_device, device.id())?;
    check_disjoint(&output, &input)?;

    let twiddles = device.twiddles_for(lg_out)?;
    let coset = if cfg.with_coset {
        Some(device.coset_for(lg_out)?)
    } else {
        None
    };
    let extension = Extension {
        lg_n: lg_domain_size,
        lg_out,
        direction,
        input_rev: cfg.is_input_in_bitrev(),
        output_rev: cfg.is_output_in_bitrev(),
        twiddles: &twiddles,
        coset: coset.as_deref(),
    };
    let parallel = device.parallel_for(out_len);

    debug!(
        "Batched LDE on device {}: {} x 2^{} -> 2^{} ({:?}, {:?}, coset: {})",
        device.id(),
        batches,
        lg_domain_size,
        lg_out,
        direction,
        cfg.order,
        cfg.with_coset
    );

    device.launch_out_of_place("batched_lde", output, input, |out, inp| {
        extension.extend_batch(out, inp, parallel)
    })
}

/// Runs one shard on `device`. Device-resident shards live on device 0 and are
/// peer-copied to the shard's device and back.
fn run_shard(
    device: &Device,
    mut output: BufferMut<'_, Scalar>,
    input: Buffer<'_, Scalar>,
    lg_domain_size: u32,
    direction: NttDirection,
    cfg: NttConfig,
) -> Result<()> {
    let peer_in = cfg.are_inputs_on_device && device.id() != 0;
    let peer_out = cfg.are_outputs_on_device && device.id() != 0;
    if !peer_in && !peer_out {
        return compute_batched_lde(device, output, input, lg_domain_size, direction, cfg);
    }

    let local_in = if peer_in {
        Some(DeviceBuffer::from_host(device, input.as_slice())?)
    } else {
        None
    };
    let mut local_out = if peer_out {
        Some(DeviceBuffer::zeroed(device, output.len())?)
    } else {
        None
    };
    debug!(
        "Device {}: peer copy (input: {}, output: {})",
        device.id(),
        peer_in,
        peer_out
    );

    let shard_input = local_in.as_ref().map(DeviceBuffer::as_buffer).unwrap_or(input);
    match local_out.as_mut() {
        Some(local) => {
            compute_batched_lde(
                device,
                local.as_buffer_mut(),
                shard_input,
                lg_domain_size,
                direction,
                cfg,
            )?;
            output.as_mut_slice().copy_from_slice(local.as_slice());
            Ok(())
        }
        None => compute_batched_lde(device, output, shard_input, lg_domain_size, direction, cfg),
    }
}

/// Batched LDE with the batch split evenly across devices `0..num_gpu`.
///
/// `cfg.batches` must be a multiple of `num_gpu`. `total_num_input_elements`
/// and `total_num_output_elements` must match the buffers and the per-shard
/// sizes. Every shard runs to completion; the error of the lowest-indexed
/// failing shard is returned.
#[allow(clippy::too_many_arguments)]
pub fn compute_batched_lde_multi_gpu(
    platform: &Platform,
    output: BufferMut<'_, Scalar>,
    input: Buffer<'_, Scalar>,
    num_gpu: usize,
    direction: NttDirection,
    cfg: NttConfig,
    lg_domain_size: u32,
    total_num_input_elements: usize,
    total_num_output_elements: usize,
) -> Result<()> {
    let available = platform.device_count();
    if num_gpu == 0 || num_gpu > available {
        return Err(Error::invalid(format!(
            "num_gpu {} out of range (1..={})",
            num_gpu, available
        )));
    }
    let lg_out = cfg.validate_lde(lg_domain_size)?;
    let batches = cfg.batch_count();
    if batches % num_gpu != 0 {
        return Err(Error::uneven_partition(format!(
            "{} batches cannot be split across {} devices",
            batches, num_gpu
        )));
    }

    let shard_batches = batches / num_gpu;
    let shard_in = total_elements(shard_batches, lg_domain_size)?;
    let shard_out = total_elements(shard_batches, lg_out)?;
    let expected_in = total_elements(batches, lg_domain_size)?;
    let expected_out = total_elements(batches, lg_out)?;
    if total_num_input_elements != expected_in || input.len() != expected_in {
        return Err(Error::domain_ratio(format!(
            "input: {} elements declared, {} supplied, {} shards of {} expected",
            total_num_input_elements,
            input.len(),
            num_gpu,
            shard_in
        )));
    }
    if total_num_output_elements != expected_out || output.len() != expected_out {
        return Err(Error::domain_ratio(format!(
            "output: {} elements declared, {} supplied, {} shards of {} expected",
            total_num_output_elements,
            output.len(),
            num_gpu,
            shard_out
        )));
    }
    check_residency("LDE input", input.residency(), cfg.are_inputs_on_device, 0)?;
    check_residency("LDE output", output.residency(), cfg.are_outputs_on_device, 0)?;
    check_disjoint(&output, &input)?;

    let devices = &platform.devices()[..num_gpu];
    for device in devices {
        device.twiddles_for(lg_out)?;
        if cfg.with_coset {
            device.coset_for(lg_out)?;
        }
    }

    let shard_cfg = NttConfig {
        batches: shard_batches as u32,
        ..cfg
    };
    debug!(
        "Multi-device LDE: {} batches over {} devices, {} per shard",
        batches, num_gpu, shard_batches
    );

    let inputs = input.split_chunks(num_gpu);
    let outputs = output.split_chunks_mut(num_gpu);

    let results: Vec<Result<()>> = thread::scope(|s| {
        let handles: Vec<_> = devices
            .iter()
            .zip(inputs.into_iter().zip(outputs))
            .map(|(device, (inp, out))| {
                s.spawn(move || run_shard(device, out, inp, lg_domain_size, direction, shard_cfg))
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(i, h)| {
                h.join()
                    .unwrap_or_else(|_| Err(Error::kernel(format!("shard {} panicked", i))))
            })
            .collect()
    });

    for (i, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            warn!("Multi-device LDE: shard {} failed: {}", i, e);
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::Residency;
    use crate::error::ErrorCode;
    use crate::field::root_of_unity;
    use crate::ntt::compute_batched_ntt;
    use crate::ntt::tests::test_platform;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_vec(len: usize, seed: u64) -> Vec<Scalar> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| Scalar::random(&mut rng)).collect()
    }

    fn eval(coeffs: &[Scalar], x: Scalar) -> Scalar {
        coeffs.iter().rev().fold(Scalar::ZERO, |acc, c| acc * x + c)
    }

    /// Test LDE output equals direct evaluation on the shifted extended domain
    #[test]
    fn test_lde_matches_evaluation() {
        let p = test_platform(1);
        let dev = p.device(0).expect("device 0");
        dev.init_twiddle_factors(6).expect("Failed to init twiddles");
        dev.init_coset(6, 7).expect("Failed to init coset");

        let (lg, rate, batches) = (3u32, 2u32, 2usize);
        let coeffs = random_vec(batches << lg, 10);
        let mut out = vec![Scalar::ZERO; batches << (lg + rate)];
        let cfg = NttConfig {
            batches: batches as u32,
            extension_rate_bits: rate,
            ..Default::default()
        };
        compute_batched_lde(
            dev,
            BufferMut::host(&mut out),
            Buffer::host(&coeffs),
            lg,
            NttDirection::Forward,
            cfg,
        )
        .expect("LDE failed");

        let g = Scalar::from(7u64);
        let omega: Scalar = root_of_unity(lg + rate).expect("root exists");
        let n_out = 1 << (lg + rate);
        for b in 0..batches {
            let poly = &coeffs[b << lg..(b + 1) << lg];
            for k in 0..n_out {
                let x = g * omega.pow_vartime([k as u64]);
                assert_eq!(out[b * n_out + k], eval(poly, x), "batch {} point {}", b, k);
            }
        }
    }

    /// Test interpolate-then-extend agrees with extending the coefficients
    #[test]
    fn test_inverse_lde_interpolates() {
        let p = test_platform(1);
        let dev = p.device(0).expect("device 0");
        dev.init_twiddle_factors(7).expect("Failed to init twiddles");
        dev.init_coset(7, 7).expect("Failed to init coset");

        let (lg, rate) = (4u32, 3u32);
        let coeffs = random_vec(1 << lg, 11);
        let mut evals = coeffs.clone();
        compute_batched_ntt(
            dev,
            BufferMut::host(&mut evals),
            lg,
            NttDirection::Forward,
            NttConfig::default(),
        )
        .expect("NTT failed");

        let cfg = NttConfig {
            extension_rate_bits: rate,
            ..Default::default()
        };
        let mut from_coeffs = vec![Scalar::ZERO; 1 << (lg + rate)];
        let mut from_evals = vec![Scalar::ZERO; 1 << (lg + rate)];
        compute_batched_lde(
            dev,
            BufferMut::host(&mut from_coeffs),
            Buffer::host(&coeffs),
            lg,
            NttDirection::Forward,
            cfg,
        )
        .expect("LDE failed");
        compute_batched_lde(
            dev,
            BufferMut::host(&mut from_evals),
            Buffer::host(&evals),
            lg,
            NttDirection::Inverse,
            cfg,
        )
        .expect("LDE failed");
        assert_eq!(from_coeffs, from_evals);
    }

    /// Test inverse transform of the extension, truncated to `2^lg` per
    /// vector, gives back the coefficients, with and without the coset
    #[test]
    fn test_lde_restricts_to_input() {
        let p = test_platform(1);
        let dev = p.device(0).expect("device 0");
        let (lg, rate, batches) = (4u32, 2u32, 3usize);
        dev.init_twiddle_factors(lg + rate).expect("Failed to init twiddles");
        dev.init_coset(lg + rate, 7).expect("Failed to init coset");
        let coeffs = random_vec(batches << lg, 13);

        for with_coset in [true, false] {
            let cfg = NttConfig {
                batches: batches as u32,
                extension_rate_bits: rate,
                with_coset,
                ..Default::default()
            };
            let mut extended = vec![Scalar::ZERO; batches << (lg + rate)];
            compute_batched_lde(
                dev,
                BufferMut::host(&mut extended),
                Buffer::host(&coeffs),
                lg,
                NttDirection::Forward,
                cfg,
            )
            .expect("LDE failed");

            let ntt_type = if with_coset {
                crate::types::NttType::Coset
            } else {
                crate::types::NttType::Standard
            };
            let inverse_cfg = NttConfig {
                batches: batches as u32,
                ntt_type,
                ..Default::default()
            };
            compute_batched_ntt(
                dev,
                BufferMut::host(&mut extended),
                lg + rate,
                NttDirection::Inverse,
                inverse_cfg,
            )
            .expect("Inverse NTT failed");

            for (row, expected) in extended
                .chunks(1 << (lg + rate))
                .zip(coeffs.chunks(1 << lg))
            {
                assert_eq!(&row[..1 << lg], expected, "with_coset = {}", with_coset);
                assert!(row[1 << lg..].iter().all(|x| *x == Scalar::ZERO));
            }
        }
    }

    /// Test bit-reversed input and output orders
    #[test]
    fn test_lde_orders() {
        let p = test_platform(1);
        let dev = p.device(0).expect("device 0");
        dev.init_twiddle_factors(5).expect("Failed to init twiddles");

        let (lg, rate) = (3u32, 2u32);
        let coeffs = random_vec(1 << lg, 12);
        let cfg = NttConfig {
            extension_rate_bits: rate,
            with_coset: false,
            ..Default::default()
        };
        let mut natural = vec![Scalar::ZERO; 1 << (lg + rate)];
        compute_batched_lde(
            dev,
            BufferMut::host(&mut natural),
            Buffer::host(&coeffs),
            lg,
            NttDirection::Forward,
            cfg,
        )
        .expect("LDE failed");

        let mut rev_coeffs = coeffs.clone();
        bit_reverse_permute(&mut rev_coeffs);
        let mut reversed = vec![Scalar::ZERO; 1 << (lg + rate)];
        let rr = NttConfig {
            order: NttInputOutputOrder::RR,
            ..cfg
        };
        compute_batched_lde(
            dev,
            BufferMut::host(&mut reversed),
            Buffer::host(&rev_coeffs),
            lg,
            NttDirection::Forward,
            rr,
        )
        .expect("LDE failed");
        bit_reverse_permute(&mut reversed);
        assert_eq!(natural, reversed);
    }

    #[test]
    fn test_lde_validation() {
        let p = test_platform(1);
        let dev = p.device(0).expect("device 0");
        let input = vec![Scalar::ONE; 8];
        let cfg = NttConfig {
            extension_rate_bits: 1,
            ..Default::default()
        };

        let mut wrong_out = vec![Scalar::ZERO; 8];
        let err = compute_batched_lde(
            dev,
            BufferMut::host(&mut wrong_out),
            Buffer::host(&input),
            3,
            NttDirection::Forward,
            cfg,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidDomainRatio);

        let mut out = vec![Scalar::ZERO; 16];
        let err = compute_batched_lde(
            dev,
            BufferMut::host(&mut out),
            Buffer::host(&input[..4]),
            3,
            NttDirection::Forward,
            cfg,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        // twiddles must cover the extended domain
        dev.init_twiddle_factors(3).expect("Failed to init twiddles");
        let err = compute_batched_lde(
            dev,
            BufferMut::host(&mut out),
            Buffer::host(&input),
            3,
            NttDirection::Forward,
            cfg,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UninitializedState);

        // coset table is required by default
        dev.init_twiddle_factors(4).expect("Failed to init twiddles");
        let err = compute_batched_lde(
            dev,
            BufferMut::host(&mut out),
            Buffer::host(&input),
            3,
            NttDirection::Forward,
            cfg,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UninitializedState);
        assert!(out.iter().all(|x| *x == Scalar::ZERO));
    }

    #[test]
    fn test_lde_rejects_aliasing() {
        let p = test_platform(1);
        let dev = p.device(0).expect("device 0");
        dev.init_twiddle_factors(4).expect("Failed to init twiddles");
        let mut data = vec![Scalar::ONE; 24];
        let ptr = data.as_mut_ptr();
        let cfg = NttConfig {
            extension_rate_bits: 1,
            with_coset: false,
            ..Default::default()
        };
        // SAFETY: the call is rejected before either view is dereferenced
        let (out, inp) = unsafe {
            (
                BufferMut::from_raw_parts(ptr, 16, Residency::Host),
                Buffer::from_raw_parts(ptr.add(8) as *const Scalar, 8, Residency::Host),
            )
        };
        let err = compute_batched_lde(dev, out, inp, 3, NttDirection::Forward, cfg).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AliasingViolation);
    }

    /// Test multi-device LDE on two devices with device-resident buffers
    #[test]
    fn test_multi_gpu_device_resident() {
        let p = test_platform(2);
        for dev in p.devices() {
            dev.init_twiddle_factors(6).expect("Failed to init twiddles");
            dev.init_coset(6, 7).expect("Failed to init coset");
        }
        let (lg, rate, batches) = (4u32, 2u32, 4usize);
        let input = random_vec(batches << lg, 13);
        let cfg = NttConfig {
            batches: batches as u32,
            extension_rate_bits: rate,
            ..Default::default()
        };

        let dev0 = p.device(0).expect("device 0");
        let mut expected = vec![Scalar::ZERO; batches << (lg + rate)];
        compute_batched_lde(
            dev0,
            BufferMut::host(&mut expected),
            Buffer::host(&input),
            lg,
            NttDirection::Forward,
            cfg,
        )
        .expect("LDE failed");

        let d_in = DeviceBuffer::from_host(dev0, &input).expect("Failed to upload");
        let mut d_out = DeviceBuffer::zeroed(dev0, expected.len()).expect("Failed to allocate");
        let on_device = NttConfig {
            are_inputs_on_device: true,
            are_outputs_on_device: true,
            ..cfg
        };
        let baseline: Vec<usize> = p.devices().iter().map(|d| d.memory_in_use()).collect();
        compute_batched_lde_multi_gpu(
            &p,
            d_out.as_buffer_mut(),
            d_in.as_buffer(),
            2,
            NttDirection::Forward,
            on_device,
            lg,
            input.len(),
            expected.len(),
        )
        .expect("Multi-device LDE failed");
        assert_eq!(d_out.to_host(), expected);
        let after: Vec<usize> = p.devices().iter().map(|d| d.memory_in_use()).collect();
        assert_eq!(baseline, after);
    }

    #[test]
    fn test_multi_gpu_validation() {
        let p = test_platform(2);
        let input = vec![Scalar::ONE; 3 << 2];
        let mut out = vec![Scalar::ZERO; 3 << 3];
        let cfg = NttConfig {
            batches: 3,
            extension_rate_bits: 1,
            with_coset: false,
            ..Default::default()
        };

        let err = compute_batched_lde_multi_gpu(
            &p,
            BufferMut::host(&mut out),
            Buffer::host(&input),
            3,
            NttDirection::Forward,
            cfg,
            2,
            12,
            24,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = compute_batched_lde_multi_gpu(
            &p,
            BufferMut::host(&mut out),
            Buffer::host(&input),
            2,
            NttDirection::Forward,
            cfg,
            2,
            12,
            24,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnevenPartition);
        assert!(out.iter().all(|x| *x == Scalar::ZERO));

        let cfg = NttConfig { batches: 2, ..cfg };
        let input = vec![Scalar::ONE; 8];
        let mut out = vec![Scalar::ZERO; 16];
        let err = compute_batched_lde_multi_gpu(
            &p,
            BufferMut::host(&mut out),
            Buffer::host(&input),
            2,
            NttDirection::Forward,
            cfg,
            2,
            8,
            24,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidDomainRatio);

        // tables are checked on every participating device before dispatch
        p.device(0).expect("device 0").init_twiddle_factors(3).expect("Failed to init twiddles");
        let err = compute_batched_lde_multi_gpu(
            &p,
            BufferMut::host(&mut out),
            Buffer::host(&input),
            2,
            NttDirection::Forward,
            cfg,
            2,
            8,
            16,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UninitializedState);
        assert!(out.iter().all(|x| *x == Scalar::ZERO));
    }

    /// Test the lowest failing shard is reported after all shards join
    #[test]
    fn test_multi_gpu_shard_failure() {
        let p = test_platform(2);
        for dev in p.devices() {
            dev.init_twiddle_factors(4).expect("Failed to init twiddles");
        }
        p.device(1).expect("device 1").raise_fault("injected");

        // two constant polynomials p(x) = 1
        let mut input = vec![Scalar::ZERO; 2 << 3];
        input[0] = Scalar::ONE;
        input[8] = Scalar::ONE;
        let mut out = vec![Scalar::ZERO; 2 << 4];
        let cfg = NttConfig {
            batches: 2,
            extension_rate_bits: 1,
            with_coset: false,
            ..Default::default()
        };
        let err = compute_batched_lde_multi_gpu(
            &p,
            BufferMut::host(&mut out),
            Buffer::host(&input),
            2,
            NttDirection::Forward,
            cfg,
            3,
            16,
            32,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::KernelExecutionFailure);
        // shard 0 ran to completion
        assert!(out[..16].iter().all(|x| *x == Scalar::ONE));

        p.clear_errors();
        compute_batched_lde_multi_gpu(
            &p,
            BufferMut::host(&mut out),
            Buffer::host(&input),
            2,
            NttDirection::Forward,
            cfg,
            3,
            16,
            32,
        )
        .expect("Multi-device LDE failed after clear_errors");
    }
}
