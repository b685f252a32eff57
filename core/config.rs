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

//! Runtime configuration for the host-backed device runtime.
//!
//! Values are read once from the environment and cached. [`PlatformConfig`]
//! carries the same settings explicitly so embedders and tests can build a
//! [`Platform`](crate::device::Platform) without touching the environment.
//!
//! # Environment Variables
//!
//! - `ZEKNOX_NUM_DEVICES`: Number of devices the runtime exposes (default: 1)
//! - `ZEKNOX_DEVICE_MEMORY_MB`: Per-device memory budget in MiB (default: 4096)
//! - `ZEKNOX_DEVICE_THREADS`: Worker threads per device (default: cores / devices)
//! - `ZEKNOX_TRANSPOSE_TILE_LOG`: log2 of the transpose tile edge (default: 5)
//! - `ZEKNOX_PAR_MIN_K`: Calls smaller than 2^K elements run on a single
//!   device thread (default: 10)

use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Default per-device memory budget (4 GiB).
pub const DEFAULT_DEVICE_MEMORY_MB: usize = 4096;

/// Default transpose tile edge is `2^5 = 32` elements.
pub const DEFAULT_TRANSPOSE_TILE_LOG: u32 = 5;

/// Default parallel threshold, `2^10` elements.
pub const DEFAULT_PAR_MIN_K: u32 = 10;

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Unparsable {} value '{}', using default", name, raw);
            None
        }
    }
}

/// Number of devices exposed by the runtime.
///
/// Reads `ZEKNOX_NUM_DEVICES`. Zero is accepted and makes the runtime report
/// itself as unavailable.
pub fn num_devices() -> usize {
    static NUM_DEVICES: OnceLock<usize> = OnceLock::new();
    *NUM_DEVICES.get_or_init(|| {
        parse_env::<usize>("ZEKNOX_NUM_DEVICES")
            .map(|n| {
                info!("ZEKNOX_NUM_DEVICES={}", n);
                n
            })
            .unwrap_or(1)
    })
}

/// Per-device memory budget in bytes.
pub fn device_memory_bytes() -> usize {
    static MEMORY: OnceLock<usize> = OnceLock::new();
    *MEMORY.get_or_init(|| {
        let mb = parse_env::<usize>("ZEKNOX_DEVICE_MEMORY_MB")
            .map(|mb| {
                info!("ZEKNOX_DEVICE_MEMORY_MB={}", mb);
                mb
            })
            .unwrap_or(DEFAULT_DEVICE_MEMORY_MB);
        mb.saturating_mul(1 << 20)
    })
}

/// Worker threads backing each device.
///
/// Reads `ZEKNOX_DEVICE_THREADS`; by default the host's cores are shared
/// evenly between the configured devices, with at least one thread each.
pub fn device_threads() -> usize {
    static THREADS: OnceLock<usize> = OnceLock::new();
    *THREADS.get_or_init(|| {
        parse_env::<usize>("ZEKNOX_DEVICE_THREADS")
            .filter(|&t| t > 0)
            .map(|t| {
                info!("ZEKNOX_DEVICE_THREADS={}", t);
                t
            })
            .unwrap_or_else(|| default_threads_per_device(num_devices()))
    })
}

pub(crate) fn default_threads_per_device(devices: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / devices.max(1)).max(1)
}

/// log2 of the tile edge used by the tiled transpose kernel, clamped to 1..=8.
pub fn transpose_tile_log() -> u32 {
    static TILE: OnceLock<u32> = OnceLock::new();
    *TILE.get_or_init(|| {
        parse_env::<u32>("ZEKNOX_TRANSPOSE_TILE_LOG")
            .map(|t| {
                let clamped = t.clamp(1, 8);
                if clamped != t {
                    warn!("ZEKNOX_TRANSPOSE_TILE_LOG={} out of range, using {}", t, clamped);
                }
                clamped
            })
            .unwrap_or(DEFAULT_TRANSPOSE_TILE_LOG)
    })
}

/// Minimum call size (in elements) for splitting a kernel across a device's
/// worker threads.
///
/// Parsed from `ZEKNOX_PAR_MIN_K` as a log2 value.
pub fn min_parallel_size() -> usize {
    static MIN_SIZE: OnceLock<usize> = OnceLock::new();
    *MIN_SIZE.get_or_init(|| {
        parse_env::<u32>("ZEKNOX_PAR_MIN_K")
            .filter(|&k| k < usize::BITS)
            .map(|k| {
                let size = 1usize << k;
                info!("ZEKNOX_PAR_MIN_K={} -> min_parallel_size={}", k, size);
                size
            })
            .unwrap_or(1 << DEFAULT_PAR_MIN_K)
    })
}

/// Explicit platform settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Number of devices to create.
    pub num_devices: usize,
    /// Memory budget per device, in bytes.
    pub device_memory_bytes: usize,
    /// Worker threads per device.
    pub threads_per_device: usize,
    /// log2 of the tiled transpose tile edge.
    pub transpose_tile_log: u32,
    /// Calls below this many elements stay on one worker thread.
    pub min_parallel_size: usize,
}

impl PlatformConfig {
    /// Settings taken from the `ZEKNOX_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            num_devices: num_devices(),
            device_memory_bytes: device_memory_bytes(),
            threads_per_device: device_threads(),
            transpose_tile_log: transpose_tile_log(),
            min_parallel_size: min_parallel_size(),
        }
    }

    /// Defaults for `num_devices` devices, independent of the environment.
    pub fn with_devices(num_devices: usize) -> Self {
        Self {
            num_devices,
            device_memory_bytes: DEFAULT_DEVICE_MEMORY_MB << 20,
            threads_per_device: default_threads_per_device(num_devices),
            transpose_tile_log: DEFAULT_TRANSPOSE_TILE_LOG,
            min_parallel_size: 1 << DEFAULT_PAR_MIN_K,
        }
    }

    pub fn device_memory(mut self, bytes: usize) -> Self {
        self.device_memory_bytes = bytes;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads_per_device = threads.max(1);
        self
    }

    pub fn tile_log(mut self, tile_log: u32) -> Self {
        self.transpose_tile_log = tile_log.clamp(1, 8);
        self
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Log the effective environment configuration.
pub fn log_config() {
    debug!("Device runtime configuration:");
    debug!("  Devices: {}", num_devices());
    debug!("  Memory per device: {} MiB", device_memory_bytes() >> 20);
    debug!("  Threads per device: {}", device_threads());
    debug!("  Transpose tile: {0}x{0}", 1usize << transpose_tile_log());
    debug!(
        "  Min parallel size: {} (K >= {})",
        min_parallel_size(),
        min_parallel_size().trailing_zeros()
    );
}
