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

//! The Goldilocks prime field, `p = 2^64 - 2^32 + 1`.
//!
//! Arithmetic comes from `ff`'s `PrimeField` derive (Montgomery form over two
//! limbs). The multiplicative group has order `2^32 * (2^32 - 1)`, so radix-2
//! domains up to `2^32` points exist; `7` generates the whole group.
//!
//! The engine itself only relies on the `ff::Field` / `ff::PrimeField` traits,
//! so callers treat elements as opaque values with add/sub/mul and a fixed
//! 16-byte little-endian serialization (canonical value in the low 8 bytes).

use ff::{Field, PrimeField};

/// Element of the Goldilocks field.
#[derive(PrimeField)]
#[PrimeFieldModulus = "18446744069414584321"]
#[PrimeFieldGenerator = "7"]
#[PrimeFieldReprEndianness = "little"]
pub struct Goldilocks([u64; 2]);

/// The field modulus as a machine word.
pub const GOLDILOCKS_MODULUS: u64 = 0xffff_ffff_0000_0001;

/// Largest supported `lg_n`: the two-adicity of `p - 1`.
pub const TWO_ADICITY: u32 = Goldilocks::S;

impl Goldilocks {
    /// Reduces `value` modulo `p`.
    pub fn from_canonical_u64(value: u64) -> Self {
        Self::from(value)
    }

    /// The canonical representative in `[0, p)`.
    pub fn as_canonical_u64(&self) -> u64 {
        let repr = self.to_repr();
        let mut low = [0u8; 8];
        low.copy_from_slice(&repr.as_ref()[..8]);
        u64::from_le_bytes(low)
    }
}

/// Primitive `2^lg_n`-th root of unity, or `None` if `lg_n` exceeds the
/// two-adicity of the field.
pub fn root_of_unity<F: PrimeField>(lg_n: u32) -> Option<F> {
    if lg_n > F::S {
        return None;
    }
    let mut omega = F::ROOT_OF_UNITY;
    for _ in lg_n..F::S {
        omega = omega.square();
    }
    Some(omega)
}

/// `2^-lg_n`, the normalization applied by an inverse transform.
pub fn domain_size_inverse<F: PrimeField>(lg_n: u32) -> F {
    // 2 is invertible in every odd-characteristic field
    let two_inv = F::TWO_INV;
    (0..lg_n).fold(F::ONE, |acc, _| acc * two_inv)
}
