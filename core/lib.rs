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

//! Batched multi-device NTT and LDE engine for the Goldilocks field.
//!
//! Callers bootstrap the device runtime, cache twiddle and coset tables per
//! device, then run batched transforms:
//!
//! ```rust,ignore
//! use zeknox_ntt::{Buffer, BufferMut, NttConfig, NttDirection};
//!
//! let platform = zeknox_ntt::platform()?;
//! for device in platform.devices() {
//!     device.init_twiddle_factors(lg_n + rate)?;
//!     device.init_coset(lg_n + rate, 7)?;
//! }
//! let cfg = NttConfig { batches, extension_rate_bits: rate, ..Default::default() };
//! let total_out = out.len();
//! platform.compute_batched_lde_multi_gpu(
//!     BufferMut::host(&mut out), Buffer::host(&coeffs),
//!     platform.device_count(), NttDirection::Forward, cfg, lg_n,
//!     coeffs.len(), total_out,
//! )?;
//! ```
//!
//! # Features
//!
//! - `trace-ntt`: per-kernel timing at `debug` level.

pub mod config;
pub mod device;
pub mod error;
pub mod field;
pub mod lde;
pub mod ntt;
pub mod transpose;
pub mod types;

pub use config::PlatformConfig;
pub use device::memory::{Buffer, BufferMut, DeviceBuffer, Residency};
pub use device::{
    clear_errors_all_devices, count_devices, init, init_degree, list_devices, platform, Device,
    DeviceId, DeviceInfo, Platform,
};
pub use error::{Error, ErrorCode, Result};
pub use field::Goldilocks;
pub use lde::{compute_batched_lde, compute_batched_lde_multi_gpu};
pub use ntt::{compute_batched_ntt, CosetTable, TwiddleTable};
pub use transpose::{compute_naive_transpose_rev, compute_transpose_rev};
pub use types::{NttConfig, NttDirection, NttInputOutputOrder, NttType, TransposeConfig};
