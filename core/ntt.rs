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

//! Batched Number Theoretic Transform (NTT)
//!
//! Converts between coefficient and evaluation representations of
//! polynomials over the Goldilocks field, for `batches` independent vectors of
//! `2^lg` elements laid out back to back.
//!
//! # Architecture
//!
//! - **Twiddle cache**: each device holds one [`TwiddleTable`] with
//!   `ω^0..ω^(N-1)` for its largest domain `N = 2^lg_N`. Smaller transforms
//!   read it with stride `2^(lg_N - lg)`; inverse twiddles are read backwards.
//! - **Coset cache**: one [`CosetTable`] with `g^i` and `g^-i` per device.
//! - **Butterflies**: a decimation-in-frequency network maps natural order to
//!   bit-reversed order, a decimation-in-time network maps bit-reversed order
//!   to natural order. The four [`NttInputOutputOrder`]s combine them with an
//!   explicit bit-reversal permutation.
//!
//! Vectors of a batch are transformed in parallel on the device's worker
//! pool; every vector sees exactly the arithmetic of a single-vector run.
//!
//! # Usage
//!
//! ```rust,ignore
//! let device = zeknox_ntt::platform()?.device(0)?;
//! device.init_twiddle_factors(16)?;
//!
//! let cfg = NttConfig { batches: 4, ..Default::default() };
//! compute_batched_ntt(device, BufferMut::host(&mut data), 16, NttDirection::Forward, cfg)?;
//! ```

use ff::Field;
use rayon::prelude::*;
use tracing::debug;

use crate::device::memory::{check_residency, try_filled_vec, BufferMut};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::field::{domain_size_inverse, root_of_unity, Goldilocks as Scalar};
use crate::types::{total_elements, NttConfig, NttDirection, NttInputOutputOrder, NttType};

/// Below this many butterflies per block, a layer is split by blocks rather
/// than within a block.
const PAR_CHUNK: usize = 1 << 10;

/// Chunk length for parallel table generation.
const POWERS_CHUNK: usize = 1 << 12;

/// `base^0..base^(count-1)`, generated chunk-wise on the current pool.
fn compute_powers(base: Scalar, count: usize, parallel: bool) -> Result<Vec<Scalar>> {
    let mut out = try_filled_vec::<Scalar>(count)?;
    let fill = |(c, chunk): (usize, &mut [Scalar])| {
        let mut acc = base.pow_vartime([(c * POWERS_CHUNK) as u64]);
        for x in chunk.iter_mut() {
            *x = acc;
            acc *= base;
        }
    };
    if parallel {
        out.par_chunks_mut(POWERS_CHUNK).enumerate().for_each(fill);
    } else {
        out.chunks_mut(POWERS_CHUNK).enumerate().for_each(fill);
    }
    Ok(out)
}

// ============================================================================
// Cached tables
// ============================================================================

/// Powers of the primitive `2^lg_n`-th root of unity.
#[derive(Debug, Clone)]
pub struct TwiddleTable {
    lg_n: u32,
    powers: Vec<Scalar>,
}

impl TwiddleTable {
    pub fn new(lg_n: u32, parallel: bool) -> Result<Self> {
        let omega = root_of_unity::<Scalar>(lg_n)
            .ok_or_else(|| Error::invalid(format!("no 2^{}-th root of unity", lg_n)))?;
        let powers = compute_powers(omega, 1usize << lg_n, parallel)?;
        Ok(Self { lg_n, powers })
    }

    /// Largest `lg` this table serves.
    pub fn lg_n(&self) -> u32 {
        self.lg_n
    }

    pub fn len(&self) -> usize {
        self.powers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.powers.is_empty()
    }

    /// `ω_N^idx`, or `ω_N^-idx` when `inverse`.
    #[inline(always)]
    fn get(&self, idx: usize, inverse: bool) -> Scalar {
        if inverse && idx != 0 {
            self.powers[self.powers.len() - idx]
        } else {
            self.powers[idx]
        }
    }
}

/// `g^i` and `g^-i` for `i < 2^lg_n`.
#[derive(Debug, Clone)]
pub struct CosetTable {
    lg_n: u32,
    generator: Scalar,
    powers: Vec<Scalar>,
    inv_powers: Vec<Scalar>,
}

impl CosetTable {
    pub fn new(lg_n: u32, generator: Scalar, parallel: bool) -> Result<Self> {
        let inverse: Option<Scalar> = generator.invert().into();
        let inverse = inverse.ok_or_else(|| Error::invalid("coset generator must be non-zero"))?;
        let len = 1usize << lg_n;
        Ok(Self {
            lg_n,
            generator,
            powers: compute_powers(generator, len, parallel)?,
            inv_powers: compute_powers(inverse, len, parallel)?,
        })
    }

    pub fn lg_n(&self) -> u32 {
        self.lg_n
    }

    pub fn generator(&self) -> Scalar {
        self.generator
    }

    pub fn powers(&self) -> &[Scalar] {
        &self.powers
    }

    pub fn inv_powers(&self) -> &[Scalar] {
        &self.inv_powers
    }
}

// ============================================================================
// Kernels
// ============================================================================

/// Reverses the low `lg_n` bits of `i`.
#[inline(always)]
pub fn reverse_index(i: usize, lg_n: u32) -> usize {
    if lg_n == 0 {
        0
    } else {
        i.reverse_bits() >> (usize::BITS - lg_n)
    }
}

/// In-place bit-reversal permutation of a power-of-two vector.
pub fn bit_reverse_permute<T>(v: &mut [T]) {
    let n = v.len();
    if n <= 2 {
        return;
    }
    let lg_n = n.trailing_zeros();
    for i in 0..n {
        let j = reverse_index(i, lg_n);
        if i < j {
            v.swap(i, j);
        }
    }
}

#[inline(always)]
fn dif_butterflies(
    lo: &mut [Scalar],
    hi: &mut [Scalar],
    offset: usize,
    stride: usize,
    twiddles: &TwiddleTable,
    inverse: bool,
) {
    for (k, (a, b)) in lo.iter_mut().zip(hi.iter_mut()).enumerate() {
        let w = twiddles.get((offset + k) * stride, inverse);
        let u = *a;
        let v = *b;
        *a = u + v;
        *b = (u - v) * w;
    }
}

#[inline(always)]
fn dit_butterflies(
    lo: &mut [Scalar],
    hi: &mut [Scalar],
    offset: usize,
    stride: usize,
    twiddles: &TwiddleTable,
    inverse: bool,
) {
    for (k, (a, b)) in lo.iter_mut().zip(hi.iter_mut()).enumerate() {
        let w = twiddles.get((offset + k) * stride, inverse);
        let u = *a;
        let v = *b * w;
        *a = u + v;
        *b = u - v;
    }
}

type Butterflies = fn(&mut [Scalar], &mut [Scalar], usize, usize, &TwiddleTable, bool);

/// One layer of half-width `m`: every block of `2m` pairs element `j` with
/// element `j + m` using twiddle `ω_{2m}^j`.
fn layer(
    v: &mut [Scalar],
    m: usize,
    twiddles: &TwiddleTable,
    inverse: bool,
    parallel: bool,
    butterflies: Butterflies,
) {
    let stride = twiddles.len() / (2 * m);
    let block = |b: &mut [Scalar]| {
        let (lo, hi) = b.split_at_mut(m);
        butterflies(lo, hi, 0, stride, twiddles, inverse);
    };
    if !parallel {
        v.chunks_mut(2 * m).for_each(block);
    } else if m < PAR_CHUNK {
        v.par_chunks_mut(2 * m).for_each(block);
    } else {
        for b in v.chunks_mut(2 * m) {
            let (lo, hi) = b.split_at_mut(m);
            lo.par_chunks_mut(PAR_CHUNK)
                .zip(hi.par_chunks_mut(PAR_CHUNK))
                .enumerate()
                .for_each(|(c, (lo, hi))| {
                    butterflies(lo, hi, c * PAR_CHUNK, stride, twiddles, inverse)
                });
        }
    }
}

/// Decimation in frequency: natural order in, bit-reversed order out.
fn dif(v: &mut [Scalar], twiddles: &TwiddleTable, inverse: bool, parallel: bool) {
    let mut m = v.len() / 2;
    while m >= 1 {
        layer(v, m, twiddles, inverse, parallel, dif_butterflies);
        m /= 2;
    }
}

/// Decimation in time: bit-reversed order in, natural order out.
fn dit(v: &mut [Scalar], twiddles: &TwiddleTable, inverse: bool, parallel: bool) {
    let mut m = 1;
    while m < v.len() {
        layer(v, m, twiddles, inverse, parallel, dit_butterflies);
        m *= 2;
    }
}

fn scale(v: &mut [Scalar], parallel: bool, f: impl Fn(usize, &mut Scalar) + Sync + Send) {
    if parallel {
        v.par_iter_mut().enumerate().for_each(|(i, x)| f(i, x));
    } else {
        v.iter_mut().enumerate().for_each(|(i, x)| f(i, x));
    }
}

/// A fully resolved transform of one `2^lg_n` vector.
#[derive(Clone, Copy)]
pub(crate) struct Transform<'t> {
    pub lg_n: u32,
    pub direction: NttDirection,
    pub order: NttInputOutputOrder,
    pub twiddles: &'t TwiddleTable,
    /// Transform over the coset `g·H` instead of `H`.
    pub coset: Option<&'t CosetTable>,
}

impl Transform<'_> {
    fn butterflies(&self, v: &mut [Scalar], input_rev: bool, output_rev: bool, parallel: bool) {
        let inverse = self.direction == NttDirection::Inverse;
        match (input_rev, output_rev) {
            (false, true) => dif(v, self.twiddles, inverse, parallel),
            (true, false) => dit(v, self.twiddles, inverse, parallel),
            (false, false) => {
                dif(v, self.twiddles, inverse, parallel);
                bit_reverse_permute(v);
            }
            (true, true) => {
                dit(v, self.twiddles, inverse, parallel);
                bit_reverse_permute(v);
            }
        }
    }

    /// Transforms one vector in place.
    pub(crate) fn apply(&self, v: &mut [Scalar], parallel: bool) {
        debug_assert_eq!(v.len(), 1usize << self.lg_n);
        let input_rev = self.order.is_input_in_bitrev();
        let output_rev = self.order.is_output_in_bitrev();

        match (self.direction, self.coset) {
            (NttDirection::Forward, None) => self.butterflies(v, input_rev, output_rev, parallel),
            (NttDirection::Inverse, None) => {
                self.butterflies(v, input_rev, output_rev, parallel);
                let n_inv: Scalar = domain_size_inverse(self.lg_n);
                scale(v, parallel, |_, x| *x *= n_inv);
            }
            (NttDirection::Forward, Some(coset)) => {
                // coefficient i must meet g^i in natural order
                if input_rev {
                    bit_reverse_permute(v);
                }
                let powers = coset.powers();
                scale(v, parallel, |i, x| *x *= powers[i]);
                self.butterflies(v, false, output_rev, parallel);
            }
            (NttDirection::Inverse, Some(coset)) => {
                self.butterflies(v, input_rev, false, parallel);
                let n_inv: Scalar = domain_size_inverse(self.lg_n);
                let inv_powers = coset.inv_powers();
                scale(v, parallel, |i, x| *x *= n_inv * inv_powers[i]);
                if output_rev {
                    bit_reverse_permute(v);
                }
            }
        }
    }

    /// Transforms `data.len() / 2^lg_n` vectors in place.
    pub(crate) fn apply_batch(&self, data: &mut [Scalar], parallel: bool) {
        let n = 1usize << self.lg_n;
        if parallel && data.len() > n {
            data.par_chunks_mut(n).for_each(|v| self.apply(v, false));
        } else {
            data.chunks_mut(n).for_each(|v| self.apply(v, parallel));
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// In-place NTT over `cfg.batches` vectors of `2^lg_domain_size` elements.
///
/// `inout` must hold exactly `batches << lg_domain_size` elements and be
/// resident where `cfg.are_inputs_on_device` says. The device's twiddle table
/// must cover `lg_domain_size`, and so must its coset table for
/// [`NttType::Coset`]. Inverse transforms are normalized by `n^-1`.
pub fn compute_batched_ntt(
    device: &Device,
    inout: BufferMut<'_, Scalar>,
    lg_domain_size: u32,
    direction: NttDirection,
    cfg: NttConfig,
) -> Result<()> {
    cfg.validate(lg_domain_size)?;
    let len = total_elements(cfg.batch_count(), lg_domain_size)?;
    if inout.len() != len {
        return Err(Error::invalid(format!(
            "NTT buffer holds {} elements, expected {} x 2^{} = {}",
            inout.len(),
            cfg.batches,
            lg_domain_size,
            len
        )));
    }
    if cfg.are_inputs_on_device != cfg.are_outputs_on_device {
        return Err(Error::invalid(
            "in-place NTT needs matching input and output residency",
        ));
    }
    check_residency("NTT buffer", inout.residency(), cfg.are_inputs_on_device, device.id())?;

    let twiddles = device.twiddles_for(lg_domain_size)?;
    let coset = match cfg.ntt_type {
        NttType::Standard => None,
        NttType::Coset => Some(device.coset_for(lg_domain_size)?),
    };
    let transform = Transform {
        lg_n: lg_domain_size,
        direction,
        order: cfg.order,
        twiddles: &twiddles,
        coset: coset.as_deref(),
    };
    let parallel = device.parallel_for(len);

    debug!(
        "Batched NTT on device {}: {} x 2^{} ({:?}, {:?}, {:?})",
        device.id(),
        cfg.batches,
        lg_domain_size,
        direction,
        cfg.order,
        cfg.ntt_type
    );

    device.launch_in_place("batched_ntt", inout, |data| transform.apply_batch(data, parallel))
}
