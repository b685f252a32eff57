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

//! Device handles and per-device context.
//!
//! A [`Platform`] owns the devices of one process. Each [`Device`] has a
//! dedicated worker pool that runs its kernels, a memory budget, a scratch
//! pool, one cached twiddle table, one cached coset table, and a sticky fault
//! latch. Tables are only ever built by explicit `init_*` calls; transforms
//! that need a missing or too small table fail with
//! [`ErrorCode::UninitializedState`](crate::ErrorCode::UninitializedState).
//!
//! The process-wide platform is bootstrapped lazily from the environment (see
//! [`crate::config`]) by [`init`], [`count_devices`] and friends. Tests and
//! embedders can build private platforms with [`Platform::new`].

pub mod memory;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
#[cfg(feature = "trace-ntt")]
use std::time::Instant;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{self, PlatformConfig};
use crate::error::{Error, Result};
use crate::field::{Goldilocks as Scalar, GOLDILOCKS_MODULUS, TWO_ADICITY};
use crate::ntt::{CosetTable, TwiddleTable};
use crate::types::{NttConfig, NttDirection, TransposeConfig};
use memory::{Allocation, Buffer, BufferMut, DeviceMemory, ScratchLease, ScratchPool};

/// Index of a device within its platform, `0..count`.
pub type DeviceId = usize;

/// A cached table together with its device memory charge.
struct Cached<T> {
    table: Arc<T>,
    allocation: Allocation,
}

/// Snapshot of one device's state, as reported by [`list_devices`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub memory_capacity: usize,
    pub memory_in_use: usize,
    pub threads: usize,
    /// `lg_n` of the cached twiddle table, if any.
    pub twiddle_lg_n: Option<u32>,
    /// `lg_n` of the cached coset table, if any.
    pub coset_lg_n: Option<u32>,
    pub faulted: bool,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} threads, {}/{} MiB",
            self.id,
            self.name,
            self.threads,
            self.memory_in_use >> 20,
            self.memory_capacity >> 20
        )?;
        if let Some(lg) = self.twiddle_lg_n {
            write!(f, ", twiddles 2^{}", lg)?;
        }
        if let Some(lg) = self.coset_lg_n {
            write!(f, ", coset 2^{}", lg)?;
        }
        if self.faulted {
            f.write_str(", FAULTED")?;
        }
        Ok(())
    }
}

/// One accelerator and its cached context.
pub struct Device {
    id: DeviceId,
    name: String,
    pool: rayon::ThreadPool,
    memory: Arc<DeviceMemory>,
    scratch: ScratchPool,
    twiddles: RwLock<Option<Cached<TwiddleTable>>>,
    coset: RwLock<Option<Cached<CosetTable>>>,
    fault: Mutex<Option<String>>,
    transpose_tile_log: u32,
    min_parallel_size: usize,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl Device {
    fn new(id: DeviceId, cfg: &PlatformConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.threads_per_device.max(1))
            .thread_name(move |i| format!("zeknox-dev{}-{}", id, i))
            .build()
            .map_err(|e| Error::device_query(format!("device {}: worker pool: {}", id, e)))?;

        Ok(Self {
            id,
            name: format!("zeknox-host-{}", id),
            pool,
            memory: DeviceMemory::new(id, cfg.device_memory_bytes),
            scratch: ScratchPool::default(),
            twiddles: RwLock::new(None),
            coset: RwLock::new(None),
            fault: Mutex::new(None),
            transpose_tile_log: cfg.transpose_tile_log,
            min_parallel_size: cfg.min_parallel_size,
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory.capacity()
    }

    /// Bytes currently charged against this device, including cached tables
    /// and the reserved scratch slab.
    pub fn memory_in_use(&self) -> usize {
        self.memory.in_use()
    }

    pub(crate) fn memory(&self) -> &Arc<DeviceMemory> {
        &self.memory
    }

    pub(crate) fn transpose_tile_log(&self) -> u32 {
        self.transpose_tile_log
    }

    /// Whether a call over `elements` should be split across the worker pool.
    pub(crate) fn parallel_for(&self, elements: usize) -> bool {
        elements >= self.min_parallel_size && self.threads() > 1
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            name: self.name.clone(),
            memory_capacity: self.memory_capacity(),
            memory_in_use: self.memory_in_use(),
            threads: self.threads(),
            twiddle_lg_n: self.twiddle_lg_n(),
            coset_lg_n: self.coset_lg_n(),
            faulted: self.fault().is_some(),
        }
    }

    // ========================================================================
    // Context cache
    // ========================================================================

    /// Computes and caches the twiddle factors for domains up to `2^lg_n`,
    /// replacing any previous table.
    ///
    /// The table serves every transform with `lg <= lg_n`.
    pub fn init_twiddle_factors(&self, lg_n: u32) -> Result<()> {
        if lg_n > TWO_ADICITY {
            return Err(Error::invalid(format!(
                "twiddle domain 2^{} exceeds the field's two-adicity {}",
                lg_n, TWO_ADICITY
            )));
        }
        let len = 1usize << lg_n;
        let parallel = self.parallel_for(len);
        self.install(&self.twiddles, "init_twiddle_factors", len, || {
            TwiddleTable::new(lg_n, parallel)
        })?;
        debug!("Device {}: twiddle table initialized for 2^{}", self.id, lg_n);
        Ok(())
    }

    /// Computes and caches `g^i` and `g^-i` for `i < 2^lg_domain_size`,
    /// replacing any previous coset table.
    pub fn init_coset(&self, lg_domain_size: u32, coset_gen: u64) -> Result<()> {
        if lg_domain_size > TWO_ADICITY {
            return Err(Error::invalid(format!(
                "coset domain 2^{} exceeds the field's two-adicity {}",
                lg_domain_size, TWO_ADICITY
            )));
        }
        if coset_gen % GOLDILOCKS_MODULUS == 0 {
            return Err(Error::invalid("coset generator must be non-zero"));
        }
        let generator = Scalar::from_canonical_u64(coset_gen);
        let len = 1usize << lg_domain_size;
        let parallel = self.parallel_for(len);
        self.install(&self.coset, "init_coset", 2 * len, || {
            CosetTable::new(lg_domain_size, generator, parallel)
        })?;
        debug!(
            "Device {}: coset table initialized for 2^{} (generator {})",
            self.id, lg_domain_size, coset_gen
        );
        Ok(())
    }

    /// Builds a table of `elements` field elements and swaps it into `cache`.
    ///
    /// Only growth over the replaced table is charged, so a smaller table
    /// always fits where the old one did. On failure the old table stays.
    fn install<T, F>(
        &self,
        cache: &RwLock<Option<Cached<T>>>,
        kernel: &'static str,
        elements: usize,
        build: F,
    ) -> Result<()>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        let bytes = elements
            .checked_mul(std::mem::size_of::<Scalar>())
            .ok_or_else(|| Error::allocation(format!("{} elements overflow", elements)))?;
        let mut slot = cache
            .write()
            .map_err(|_| Error::kernel(format!("device {}: {} cache poisoned", self.id, kernel)))?;
        let held = slot.as_ref().map(|c| c.allocation.bytes()).unwrap_or(0);
        let growth = self.memory.reserve(bytes.saturating_sub(held))?;
        let table = self.launch(kernel, build)??;

        let allocation = match slot.take() {
            Some(old) => {
                let mut allocation = old.allocation;
                allocation.absorb(growth);
                allocation.shrink_to(bytes);
                allocation
            }
            None => growth,
        };
        *slot = Some(Cached {
            table: Arc::new(table),
            allocation,
        });
        Ok(())
    }

    pub fn twiddle_lg_n(&self) -> Option<u32> {
        self.twiddles
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|c| c.table.lg_n()))
    }

    pub fn coset_lg_n(&self) -> Option<u32> {
        self.coset
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|c| c.table.lg_n()))
    }

    /// Snapshot of the twiddle table, which must cover `2^lg_n`.
    pub(crate) fn twiddles_for(&self, lg_n: u32) -> Result<Arc<TwiddleTable>> {
        let slot = self
            .twiddles
            .read()
            .map_err(|_| Error::kernel(format!("device {}: twiddle cache poisoned", self.id)))?;
        match slot.as_ref() {
            None => Err(Error::uninitialized(format!(
                "no twiddle table on device {}; call init_twiddle_factors",
                self.id
            ))),
            Some(c) if c.table.lg_n() < lg_n => Err(Error::uninitialized(format!(
                "twiddle table on device {} covers 2^{}, call needs 2^{}",
                self.id,
                c.table.lg_n(),
                lg_n
            ))),
            Some(c) => Ok(Arc::clone(&c.table)),
        }
    }

    /// Snapshot of the coset table, which must cover `2^lg_n`.
    pub(crate) fn coset_for(&self, lg_n: u32) -> Result<Arc<CosetTable>> {
        let slot = self
            .coset
            .read()
            .map_err(|_| Error::kernel(format!("device {}: coset cache poisoned", self.id)))?;
        match slot.as_ref() {
            None => Err(Error::uninitialized(format!(
                "no coset table on device {}; call init_coset",
                self.id
            ))),
            Some(c) if c.table.lg_n() < lg_n => Err(Error::uninitialized(format!(
                "coset table on device {} covers 2^{}, call needs 2^{}",
                self.id,
                c.table.lg_n(),
                lg_n
            ))),
            Some(c) => Ok(Arc::clone(&c.table)),
        }
    }

    // ========================================================================
    // Faults and kernel launches
    // ========================================================================

    /// The pending fault, if any.
    pub fn fault(&self) -> Option<String> {
        match self.fault.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Latches a fault on this device. Every launch fails with
    /// `KernelExecutionFailure` until [`Device::clear_errors`].
    pub fn raise_fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Device {} faulted: {}", self.id, reason);
        let mut slot = self.fault.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    /// Resets the fault latch. Cached tables are kept.
    pub fn clear_errors(&self) {
        let mut slot = self.fault.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(reason) = slot.take() {
            debug!("Device {}: cleared fault ({})", self.id, reason);
        }
    }

    /// Runs `kernel` on the device's worker pool, blocking until it returns.
    ///
    /// A panicking kernel latches the device fault.
    pub(crate) fn launch<R, F>(&self, kernel: &'static str, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        if let Some(reason) = self.fault() {
            return Err(Error::kernel(format!(
                "device {} has a pending fault ({}); call clear_errors",
                self.id, reason
            )));
        }

        #[cfg(feature = "trace-ntt")]
        let start = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.pool.install(f)));

        #[cfg(feature = "trace-ntt")]
        debug!("Device {}: {} took {:?}", self.id, kernel, start.elapsed());

        outcome.map_err(|payload| {
            let reason = format!("{}: {}", kernel, panic_message(payload.as_ref()));
            self.raise_fault(reason.clone());
            Error::kernel(format!("device {}: kernel {}", self.id, reason))
        })
    }

    /// Runs an in-place kernel over `inout`. Host views are copied into device
    /// scratch and back; the copy-back is skipped when the kernel faults.
    pub(crate) fn launch_in_place<F>(
        &self,
        kernel: &'static str,
        mut inout: BufferMut<'_, Scalar>,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut [Scalar]) + Send,
    {
        if inout.residency().is_device() {
            let data = inout.as_mut_slice();
            return self.launch(kernel, || f(data));
        }
        let mut staged = self.scratch(inout.len())?;
        staged.copy_from_host(inout.as_slice())?;
        let data = staged.as_mut_slice();
        self.launch(kernel, || f(data))?;
        staged.copy_to_host(inout.as_mut_slice())
    }

    /// Runs a kernel reading `input` and writing `output`, staging host views
    /// through device scratch.
    pub(crate) fn launch_out_of_place<F>(
        &self,
        kernel: &'static str,
        mut output: BufferMut<'_, Scalar>,
        input: Buffer<'_, Scalar>,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut [Scalar], &[Scalar]) + Send,
    {
        let staged_input;
        let src: &[Scalar] = if input.residency().is_device() {
            input.as_slice()
        } else {
            let mut lease = self.scratch(input.len())?;
            lease.copy_from_host(input.as_slice())?;
            staged_input = lease;
            staged_input.as_slice()
        };

        if output.residency().is_device() {
            let dst = output.as_mut_slice();
            return self.launch(kernel, || f(dst, src));
        }
        let mut staged_output = self.scratch(output.len())?;
        let dst = staged_output.as_mut_slice();
        self.launch(kernel, || f(dst, src))?;
        staged_output.copy_to_host(output.as_mut_slice())
    }

    /// Borrows `len` elements of staging memory on this device.
    pub(crate) fn scratch(&self, len: usize) -> Result<ScratchLease<'_>> {
        self.scratch.lease(self, len)
    }

    /// Grows this device's scratch slab to `elements`; the single-device
    /// form of [`Platform::init_degree`].
    pub fn reserve_scratch(&self, elements: usize) -> Result<()> {
        self.scratch.reserve(self, elements)
    }

    /// Elements reserved in the scratch slab.
    pub fn scratch_capacity(&self) -> usize {
        self.scratch.capacity()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "kernel panicked".to_string()
    }
}

// ============================================================================
// Platform
// ============================================================================

/// The set of devices visible to one process.
#[derive(Debug)]
pub struct Platform {
    devices: Vec<Device>,
}

impl Platform {
    /// Creates `cfg.num_devices` devices.
    pub fn new(cfg: PlatformConfig) -> Result<Self> {
        if cfg.num_devices == 0 {
            return Err(Error::device_query("no devices available"));
        }
        let devices = (0..cfg.num_devices)
            .map(|id| Device::new(id, &cfg))
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Device runtime ready: {} device(s), {} threads and {} MiB each",
            devices.len(),
            cfg.threads_per_device,
            cfg.device_memory_bytes >> 20
        );
        Ok(Self { devices })
    }

    /// Platform configured from the `ZEKNOX_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(PlatformConfig::from_env())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device> {
        self.devices.get(id).ok_or_else(|| {
            Error::invalid(format!(
                "device {} out of range ({} available)",
                id,
                self.devices.len()
            ))
        })
    }

    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        let infos: Vec<_> = self.devices.iter().map(Device::info).collect();
        for info in &infos {
            info!("{}", info);
        }
        infos
    }

    /// Pre-sizes every device's scratch pool for domains up to
    /// `2^max_degree` elements. Never shrinks an existing reservation.
    ///
    /// All devices are charged before any slab is replaced: if one device
    /// cannot fit the slab, no device changes.
    pub fn init_degree(&self, max_degree: u32) -> Result<()> {
        if max_degree > TWO_ADICITY {
            return Err(Error::invalid(format!(
                "max_degree {} exceeds the field's two-adicity {}",
                max_degree, TWO_ADICITY
            )));
        }
        let elements = 1usize << max_degree;
        let mut slabs = self
            .devices
            .iter()
            .map(|device| device.scratch.lock())
            .collect::<Result<Vec<_>>>()?;
        let growths = self
            .devices
            .iter()
            .zip(&slabs)
            .map(|(device, slab)| ScratchPool::prepare(slab, device, elements))
            .collect::<Result<Vec<_>>>()?;
        for (slab, growth) in slabs.iter_mut().zip(growths) {
            if let Some(growth) = growth {
                ScratchPool::commit(slab, growth);
            }
        }
        debug!("Scratch pools sized for 2^{}", max_degree);
        Ok(())
    }

    /// Resets the fault latch of every device.
    pub fn clear_errors(&self) {
        for device in &self.devices {
            device.clear_errors();
        }
    }

    pub fn init_twiddle_factors(&self, device: DeviceId, lg_n: u32) -> Result<()> {
        self.device(device)?.init_twiddle_factors(lg_n)
    }

    pub fn init_coset(&self, device: DeviceId, lg_domain_size: u32, coset_gen: u64) -> Result<()> {
        self.device(device)?.init_coset(lg_domain_size, coset_gen)
    }

    pub fn compute_batched_ntt(
        &self,
        device: DeviceId,
        inout: BufferMut<'_, Scalar>,
        lg_domain_size: u32,
        direction: NttDirection,
        cfg: NttConfig,
    ) -> Result<()> {
        crate::ntt::compute_batched_ntt(self.device(device)?, inout, lg_domain_size, direction, cfg)
    }

    pub fn compute_batched_lde(
        &self,
        device: DeviceId,
        output: BufferMut<'_, Scalar>,
        input: Buffer<'_, Scalar>,
        lg_domain_size: u32,
        direction: NttDirection,
        cfg: NttConfig,
    ) -> Result<()> {
        crate::lde::compute_batched_lde(
            self.device(device)?,
            output,
            input,
            lg_domain_size,
            direction,
            cfg,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compute_batched_lde_multi_gpu(
        &self,
        output: BufferMut<'_, Scalar>,
        input: Buffer<'_, Scalar>,
        num_gpu: usize,
        direction: NttDirection,
        cfg: NttConfig,
        lg_domain_size: u32,
        total_num_input_elements: usize,
        total_num_output_elements: usize,
    ) -> Result<()> {
        crate::lde::compute_batched_lde_multi_gpu(
            self,
            output,
            input,
            num_gpu,
            direction,
            cfg,
            lg_domain_size,
            total_num_input_elements,
            total_num_output_elements,
        )
    }

    pub fn compute_transpose_rev(
        &self,
        device: DeviceId,
        output: BufferMut<'_, Scalar>,
        input: Buffer<'_, Scalar>,
        lg_n: u32,
        cfg: TransposeConfig,
    ) -> Result<()> {
        crate::transpose::compute_transpose_rev(self.device(device)?, output, input, lg_n, cfg)
    }

    pub fn compute_naive_transpose_rev(
        &self,
        device: DeviceId,
        output: BufferMut<'_, Scalar>,
        input: Buffer<'_, Scalar>,
        lg_n: u32,
        cfg: TransposeConfig,
    ) -> Result<()> {
        crate::transpose::compute_naive_transpose_rev(
            self.device(device)?,
            output,
            input,
            lg_n,
            cfg,
        )
    }
}

// ============================================================================
// Process-wide platform
// ============================================================================

static PLATFORM: OnceCell<Platform> = OnceCell::new();

/// The process-wide platform, created from the environment on first use.
pub fn platform() -> Result<&'static Platform> {
    PLATFORM.get_or_try_init(|| {
        config::log_config();
        Platform::from_env()
    })
}

/// Bootstraps the runtime. Idempotent.
pub fn init() -> Result<()> {
    platform().map(|_| ())
}

/// Bootstraps the runtime and pre-sizes scratch memory for domains up to
/// `2^max_degree`.
pub fn init_degree(max_degree: u32) -> Result<()> {
    platform()?.init_degree(max_degree)
}

/// Number of devices, bootstrapping the runtime if needed.
pub fn count_devices() -> Result<usize> {
    Ok(platform()?.device_count())
}

/// Descriptors of every device, logged at `info`.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    Ok(platform()?.list_devices())
}

/// Resets the fault latch of every device. No-op before bootstrap.
pub fn clear_errors_all_devices() {
    if let Some(platform) = PLATFORM.get() {
        platform.clear_errors();
    }
}
