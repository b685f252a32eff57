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

//! Transform descriptors passed by value into every NTT, LDE and transpose call.

use crate::error::{Error, Result};
use crate::field::TWO_ADICITY;

/// Transform direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub enum NttDirection {
    /// Coefficients -> evaluations
    Forward,
    /// Evaluations -> coefficients, normalized by `n^-1`
    Inverse,
}

/// Index order of inputs and outputs: `N`atural or bit-`R`eversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub enum NttInputOutputOrder {
    /// Natural in, natural out
    #[default]
    NN,
    /// Natural in, bit-reversed out
    NR,
    /// Bit-reversed in, natural out
    RN,
    /// Bit-reversed in, bit-reversed out
    RR,
}

impl NttInputOutputOrder {
    pub fn from_flags(input_bitrev: bool, output_bitrev: bool) -> Self {
        match (input_bitrev, output_bitrev) {
            (false, false) => NttInputOutputOrder::NN,
            (false, true) => NttInputOutputOrder::NR,
            (true, false) => NttInputOutputOrder::RN,
            (true, true) => NttInputOutputOrder::RR,
        }
    }

    pub fn is_input_in_bitrev(self) -> bool {
        matches!(self, NttInputOutputOrder::RN | NttInputOutputOrder::RR)
    }

    pub fn is_output_in_bitrev(self) -> bool {
        matches!(self, NttInputOutputOrder::NR | NttInputOutputOrder::RR)
    }
}

/// Plain subgroup transform or transform over the cached coset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub enum NttType {
    #[default]
    Standard,
    Coset,
}

/// Configuration for batched NTT and LDE calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NttConfig {
    /// Number of independent vectors in the buffer.
    pub batches: u32,
    /// Input/output index order.
    pub order: NttInputOutputOrder,
    /// Coset transform (NTT only).
    pub ntt_type: NttType,
    /// LDE output vectors are `2^extension_rate_bits` times longer than inputs.
    pub extension_rate_bits: u32,
    pub are_inputs_on_device: bool,
    pub are_outputs_on_device: bool,
    /// Apply the cached coset shift during LDE.
    pub with_coset: bool,
}

impl Default for NttConfig {
    fn default() -> Self {
        Self {
            batches: 1,
            order: NttInputOutputOrder::NN,
            ntt_type: NttType::Standard,
            extension_rate_bits: 0,
            are_inputs_on_device: false,
            are_outputs_on_device: false,
            with_coset: true,
        }
    }
}

impl NttConfig {
    pub fn is_input_in_bitrev(&self) -> bool {
        self.order.is_input_in_bitrev()
    }

    pub fn is_output_in_bitrev(&self) -> bool {
        self.order.is_output_in_bitrev()
    }

    pub(crate) fn batch_count(&self) -> usize {
        self.batches as usize
    }

    /// Checks that the configuration describes a transform of `2^lg_n`
    /// elements per vector that the field supports.
    pub(crate) fn validate(&self, lg_n: u32) -> Result<()> {
        if self.batches == 0 {
            return Err(Error::invalid("batch size must be at least 1"));
        }
        validate_lg_n(lg_n)?;
        Ok(())
    }

    /// Like [`NttConfig::validate`], additionally checking that the extended
    /// LDE domain `2^(lg_n + extension_rate_bits)` exists.
    pub(crate) fn validate_lde(&self, lg_n: u32) -> Result<u32> {
        self.validate(lg_n)?;
        let lg_out = lg_n
            .checked_add(self.extension_rate_bits)
            .filter(|&lg| lg <= TWO_ADICITY)
            .ok_or_else(|| {
                Error::domain_ratio(format!(
                    "extended domain 2^({} + {}) exceeds the field's two-adicity {}",
                    lg_n, self.extension_rate_bits, TWO_ADICITY
                ))
            })?;
        Ok(lg_out)
    }
}

/// Configuration for transpose-with-bit-reversal calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransposeConfig {
    pub batches: u32,
    pub are_inputs_on_device: bool,
    pub are_outputs_on_device: bool,
}

impl Default for TransposeConfig {
    fn default() -> Self {
        Self {
            batches: 1,
            are_inputs_on_device: false,
            are_outputs_on_device: false,
        }
    }
}

impl TransposeConfig {
    pub(crate) fn validate(&self, lg_n: u32) -> Result<()> {
        if self.batches == 0 {
            return Err(Error::invalid("batch size must be at least 1"));
        }
        // row length has to fit a usize shift
        if lg_n >= usize::BITS {
            return Err(Error::invalid(format!("lg_n {} is too large", lg_n)));
        }
        Ok(())
    }
}

pub(crate) fn validate_lg_n(lg_n: u32) -> Result<()> {
    if lg_n > TWO_ADICITY {
        return Err(Error::invalid(format!(
            "lg_n {} exceeds the field's two-adicity {}",
            lg_n, TWO_ADICITY
        )));
    }
    Ok(())
}

/// `batches << lg`, or an error if it overflows.
pub(crate) fn total_elements(batches: usize, lg: u32) -> Result<usize> {
    1usize
        .checked_shl(lg)
        .and_then(|n| n.checked_mul(batches))
        .ok_or_else(|| Error::invalid(format!("{} vectors of 2^{} elements overflow", batches, lg)))
}
