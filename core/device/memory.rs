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

//! Device memory: budget accounting, owned device buffers and the
//! residency-tagged views every engine call takes.
//!
//! Device memory lives in the host address space, but every byte is charged
//! against the owning device's budget so exhaustion surfaces as
//! [`ErrorCode::AllocationFailure`](crate::ErrorCode::AllocationFailure)
//! instead of an abort. Charges are released by RAII on every path.

use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut, Range};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{Device, DeviceId};
use crate::error::{Error, Result};
use crate::field::Goldilocks as Scalar;

// ============================================================================
// Accounting
// ============================================================================

/// Byte budget of one device.
#[derive(Debug)]
pub(crate) struct DeviceMemory {
    device: DeviceId,
    capacity: usize,
    in_use: AtomicUsize,
}

impl DeviceMemory {
    pub(crate) fn new(device: DeviceId, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            device,
            capacity,
            in_use: AtomicUsize::new(0),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Charges `bytes` against the budget; released when the returned guard drops.
    pub(crate) fn reserve(self: &Arc<Self>, bytes: usize) -> Result<Allocation> {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let next = current
                .checked_add(bytes)
                .filter(|&next| next <= self.capacity)
                .ok_or_else(|| {
                    Error::allocation(format!(
                        "device {}: cannot allocate {} bytes ({} of {} in use)",
                        self.device, bytes, current, self.capacity
                    ))
                })?;
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Ok(Allocation {
                        memory: Arc::clone(self),
                        bytes,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn reserve_elements<T>(self: &Arc<Self>, len: usize) -> Result<Allocation> {
        let bytes = len.checked_mul(std::mem::size_of::<T>()).ok_or_else(|| {
            Error::allocation(format!("{} elements overflow the address space", len))
        })?;
        self.reserve(bytes)
    }
}

/// A live charge against a device budget.
#[derive(Debug)]
pub(crate) struct Allocation {
    memory: Arc<DeviceMemory>,
    bytes: usize,
}

impl Allocation {
    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    /// Folds `other` into this charge.
    pub(crate) fn absorb(&mut self, mut other: Allocation) {
        debug_assert!(Arc::ptr_eq(&self.memory, &other.memory));
        self.bytes += other.bytes;
        other.bytes = 0;
    }

    /// Releases everything above `bytes`.
    pub(crate) fn shrink_to(&mut self, bytes: usize) {
        if bytes < self.bytes {
            self.memory.in_use.fetch_sub(self.bytes - bytes, Ordering::AcqRel);
            self.bytes = bytes;
        }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.memory.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

pub(crate) fn try_filled_vec<T: Copy + Default>(len: usize) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        Error::allocation(format!("host allocation of {} elements failed: {}", len, e))
    })?;
    data.resize(len, T::default());
    Ok(data)
}

// ============================================================================
// Owned device buffers
// ============================================================================

/// A buffer resident on one device.
///
/// Construction charges the device's memory budget; dropping releases it.
pub struct DeviceBuffer<T> {
    device: DeviceId,
    data: Vec<T>,
    allocation: Allocation,
}

impl<T: Copy + Default> DeviceBuffer<T> {
    /// Allocates `len` zeroed elements on `device`.
    pub fn zeroed(device: &Device, len: usize) -> Result<Self> {
        Self::with_capacity(device, len, len)
    }

    /// Allocates a device buffer and copies `src` into it.
    pub fn from_host(device: &Device, src: &[T]) -> Result<Self> {
        let mut buf = Self::zeroed(device, src.len())?;
        buf.data.copy_from_slice(src);
        Ok(buf)
    }

    pub(crate) fn with_capacity(device: &Device, len: usize, capacity: usize) -> Result<Self> {
        let capacity = capacity.max(len);
        let allocation = device.memory().reserve_elements::<T>(capacity)?;
        let mut data = try_filled_vec::<T>(capacity)?;
        data.truncate(len);
        Ok(Self {
            device: device.id(),
            data,
            allocation,
        })
    }

    /// Copies `src` from the host into this buffer.
    pub fn copy_from_host(&mut self, src: &[T]) -> Result<()> {
        if src.len() != self.data.len() {
            return Err(Error::invalid(format!(
                "host-to-device copy of {} elements into a buffer of {}",
                src.len(),
                self.data.len()
            )));
        }
        self.data.copy_from_slice(src);
        Ok(())
    }

    /// Copies this buffer back into `dst` on the host.
    pub fn copy_to_host(&self, dst: &mut [T]) -> Result<()> {
        if dst.len() != self.data.len() {
            return Err(Error::invalid(format!(
                "device-to-host copy of {} elements into a buffer of {}",
                self.data.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(&self.data);
        Ok(())
    }

    /// Copies the buffer into a fresh host vector.
    pub fn to_host(&self) -> Vec<T> {
        self.data.clone()
    }

    /// Resizes within the reserved capacity; new elements are zeroed.
    pub(crate) fn resize_within_capacity(&mut self, len: usize) -> bool {
        if len > self.capacity() {
            return false;
        }
        self.data.resize(len, T::default());
        true
    }
}

impl<T> DeviceBuffer<T> {
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Elements covered by the memory reservation.
    pub(crate) fn capacity(&self) -> usize {
        let size = std::mem::size_of::<T>();
        if size == 0 {
            self.data.len()
        } else {
            self.allocation.bytes() / size
        }
    }

    /// Read-only view for engine calls.
    pub fn as_buffer(&self) -> Buffer<'_, T> {
        Buffer {
            ptr: self.data.as_ptr(),
            len: self.data.len(),
            residency: Residency::Device(self.device),
            _marker: PhantomData,
        }
    }

    /// Writable view for engine calls.
    pub fn as_buffer_mut(&mut self) -> BufferMut<'_, T> {
        BufferMut {
            ptr: self.data.as_mut_ptr(),
            len: self.data.len(),
            residency: Residency::Device(self.device),
            _marker: PhantomData,
        }
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> std::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device)
            .field("len", &self.data.len())
            .finish()
    }
}

// ============================================================================
// Scratch pool
// ============================================================================

/// Staging slab reserved up front by `init_degree`.
///
/// One call at a time borrows the slab; concurrent calls on the same device
/// fall back to fresh allocations.
#[derive(Debug, Default)]
pub(crate) struct ScratchPool {
    slab: Mutex<Option<DeviceBuffer<Scalar>>>,
}

pub(crate) type ScratchSlab<'a> = MutexGuard<'a, Option<DeviceBuffer<Scalar>>>;

/// Memory set aside for a larger slab, charged for the growth only.
#[derive(Debug)]
pub(crate) struct ScratchGrowth {
    device: DeviceId,
    elements: usize,
    charge: Allocation,
    data: Vec<Scalar>,
}

impl ScratchPool {
    /// Locks the slab. Holding the guard keeps leases from taking it.
    pub(crate) fn lock(&self) -> Result<ScratchSlab<'_>> {
        self.slab.lock().map_err(|_| Error::kernel("scratch pool poisoned"))
    }

    /// Grows the slab to at least `elements`. Never shrinks; on failure the
    /// current slab is kept.
    pub(crate) fn reserve(&self, device: &Device, elements: usize) -> Result<()> {
        let mut slab = self.lock()?;
        if let Some(growth) = Self::prepare(&slab, device, elements)? {
            Self::commit(&mut slab, growth);
        }
        Ok(())
    }

    /// Charges and allocates what growing `slab` to `elements` needs, leaving
    /// the slab untouched. `None` when it is already large enough.
    pub(crate) fn prepare(
        slab: &ScratchSlab<'_>,
        device: &Device,
        elements: usize,
    ) -> Result<Option<ScratchGrowth>> {
        let current = (**slab).as_ref().map(|s| s.capacity()).unwrap_or(0);
        if current >= elements {
            return Ok(None);
        }
        let charge = device.memory().reserve_elements::<Scalar>(elements - current)?;
        let mut data = try_filled_vec::<Scalar>(elements)?;
        data.clear();
        Ok(Some(ScratchGrowth {
            device: device.id(),
            elements,
            charge,
            data,
        }))
    }

    /// Swaps the grown slab in. The old slab's charge carries over.
    pub(crate) fn commit(slab: &mut ScratchSlab<'_>, growth: ScratchGrowth) {
        let ScratchGrowth {
            device,
            elements,
            mut charge,
            data,
        } = growth;
        if let Some(old) = slab.take() {
            charge.absorb(old.allocation);
        }
        debug!(
            "Device {}: scratch pool reserved {} elements ({} bytes)",
            device,
            elements,
            charge.bytes()
        );
        **slab = Some(DeviceBuffer {
            device,
            data,
            allocation: charge,
        });
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slab
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|b| b.capacity()))
            .unwrap_or(0)
    }

    fn take(&self, len: usize) -> Option<DeviceBuffer<Scalar>> {
        let mut slab = self.slab.lock().ok()?;
        if slab.as_ref().map(|s| s.capacity() >= len).unwrap_or(false) {
            slab.take()
        } else {
            None
        }
    }

    fn put_back(&self, buffer: DeviceBuffer<Scalar>) {
        if let Ok(mut slab) = self.slab.lock() {
            if slab.is_none() {
                *slab = Some(buffer);
            }
        }
    }

    /// Borrows `len` elements of device scratch, from the slab when it is free
    /// and large enough. A reused slab keeps whatever the last call left in
    /// it, so callers overwrite the whole lease.
    pub(crate) fn lease<'a>(&'a self, device: &Device, len: usize) -> Result<ScratchLease<'a>> {
        if let Some(mut buffer) = self.take(len) {
            if buffer.resize_within_capacity(len) {
                return Ok(ScratchLease {
                    pool: Some(self),
                    buffer: ManuallyDrop::new(buffer),
                });
            }
            self.put_back(buffer);
        }
        Ok(ScratchLease {
            pool: None,
            buffer: ManuallyDrop::new(DeviceBuffer::zeroed(device, len)?),
        })
    }
}

/// Scratch borrowed for the duration of one call.
pub(crate) struct ScratchLease<'a> {
    pool: Option<&'a ScratchPool>,
    buffer: ManuallyDrop<DeviceBuffer<Scalar>>,
}

impl Deref for ScratchLease<'_> {
    type Target = DeviceBuffer<Scalar>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for ScratchLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        // SAFETY: `buffer` is never touched again after this point.
        let buffer = unsafe { ManuallyDrop::take(&mut self.buffer) };
        if let Some(pool) = self.pool {
            pool.put_back(buffer);
        }
    }
}

// ============================================================================
// Residency-tagged views
// ============================================================================

/// Where the memory behind a view lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    Host,
    Device(DeviceId),
}

impl Residency {
    pub fn is_device(self) -> bool {
        matches!(self, Residency::Device(_))
    }
}

impl std::fmt::Display for Residency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Residency::Host => f.write_str("host"),
            Residency::Device(id) => write!(f, "device {}", id),
        }
    }
}

/// Read-only, non-owning view over host or device memory.
#[derive(Clone, Copy)]
pub struct Buffer<'a, T> {
    ptr: *const T,
    len: usize,
    residency: Residency,
    _marker: PhantomData<&'a [T]>,
}

// SAFETY: a `Buffer` is a shared borrow of `len` elements; it is as
// thread-safe as `&[T]`.
unsafe impl<T: Sync> Send for Buffer<'_, T> {}
// SAFETY: as above.
unsafe impl<T: Sync> Sync for Buffer<'_, T> {}

impl<'a, T> Buffer<'a, T> {
    /// View over host memory.
    pub fn host(slice: &'a [T]) -> Self {
        Self {
            ptr: slice.as_ptr(),
            len: slice.len(),
            residency: Residency::Host,
            _marker: PhantomData,
        }
    }

    /// View over caller-managed memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, aligned and valid for reads of `len` elements
    /// for `'a`, and `residency` must describe where the memory lives. The
    /// memory must not be written during `'a` except through a [`BufferMut`]
    /// passed to the same engine call, which the engine rejects when the two
    /// overlap.
    pub unsafe fn from_raw_parts(ptr: *const T, len: usize, residency: Residency) -> Self {
        Self {
            ptr,
            len,
            residency,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    fn byte_range(&self) -> Range<usize> {
        let start = self.ptr as usize;
        start..start + self.len * std::mem::size_of::<T>()
    }

    pub(crate) fn as_slice(&self) -> &'a [T] {
        // SAFETY: guaranteed by the constructor contracts.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Splits into `parts` contiguous views of equal length.
    pub(crate) fn split_chunks(self, parts: usize) -> Vec<Buffer<'a, T>> {
        let chunk = self.len / parts.max(1);
        (0..parts)
            .map(|i| Buffer {
                // SAFETY: i * chunk <= len
                ptr: unsafe { self.ptr.add(i * chunk) },
                len: chunk,
                residency: self.residency,
                _marker: PhantomData,
            })
            .collect()
    }
}

impl<'a, T> From<&'a [T]> for Buffer<'a, T> {
    fn from(slice: &'a [T]) -> Self {
        Buffer::host(slice)
    }
}

impl<'a, T> From<&'a Vec<T>> for Buffer<'a, T> {
    fn from(v: &'a Vec<T>) -> Self {
        Buffer::host(v.as_slice())
    }
}

impl<'a, T> From<&'a DeviceBuffer<T>> for Buffer<'a, T> {
    fn from(buf: &'a DeviceBuffer<T>) -> Self {
        buf.as_buffer()
    }
}

/// Writable, non-owning view over host or device memory.
pub struct BufferMut<'a, T> {
    ptr: *mut T,
    len: usize,
    residency: Residency,
    _marker: PhantomData<&'a mut [T]>,
}

// SAFETY: a `BufferMut` is an exclusive borrow of `len` elements; it is as
// thread-safe as `&mut [T]`.
unsafe impl<T: Send> Send for BufferMut<'_, T> {}
// SAFETY: as above.
unsafe impl<T: Sync> Sync for BufferMut<'_, T> {}

impl<'a, T> BufferMut<'a, T> {
    /// View over host memory.
    pub fn host(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            residency: Residency::Host,
            _marker: PhantomData,
        }
    }

    /// Writable view over caller-managed memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, aligned and valid for reads and writes of
    /// `len` elements for `'a`, and no other access to the memory may happen
    /// during `'a` except through a [`Buffer`] passed to the same engine call.
    /// `residency` must describe where the memory lives.
    pub unsafe fn from_raw_parts(ptr: *mut T, len: usize, residency: Residency) -> Self {
        Self {
            ptr,
            len,
            residency,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    fn byte_range(&self) -> Range<usize> {
        let start = self.ptr as usize;
        start..start + self.len * std::mem::size_of::<T>()
    }

    /// Whether this view shares any byte with `other`. Device memory shares
    /// the host address space in this runtime, so ranges are compared
    /// regardless of residency.
    pub fn overlaps(&self, other: &Buffer<'_, T>) -> bool {
        let a = self.byte_range();
        let b = other.byte_range();
        !a.is_empty() && !b.is_empty() && a.start < b.end && b.start < a.end
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        // SAFETY: guaranteed by the constructor contracts.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: guaranteed by the constructor contracts; `&mut self` keeps
        // the returned slice unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Splits into `parts` disjoint contiguous views of equal length.
    pub(crate) fn split_chunks_mut(self, parts: usize) -> Vec<BufferMut<'a, T>> {
        let chunk = self.len / parts.max(1);
        (0..parts)
            .map(|i| BufferMut {
                // SAFETY: i * chunk <= len; chunks are disjoint
                ptr: unsafe { self.ptr.add(i * chunk) },
                len: chunk,
                residency: self.residency,
                _marker: PhantomData,
            })
            .collect()
    }
}

impl<'a, T> From<&'a mut [T]> for BufferMut<'a, T> {
    fn from(slice: &'a mut [T]) -> Self {
        BufferMut::host(slice)
    }
}

impl<'a, T> From<&'a mut Vec<T>> for BufferMut<'a, T> {
    fn from(v: &'a mut Vec<T>) -> Self {
        BufferMut::host(v.as_mut_slice())
    }
}

impl<'a, T> From<&'a mut DeviceBuffer<T>> for BufferMut<'a, T> {
    fn from(buf: &'a mut DeviceBuffer<T>) -> Self {
        buf.as_buffer_mut()
    }
}

/// Rejects an output view that shares memory with the input view.
pub(crate) fn check_disjoint<T>(output: &BufferMut<'_, T>, input: &Buffer<'_, T>) -> Result<()> {
    if output.overlaps(input) {
        return Err(Error::aliasing(format!(
            "output ({} elements on {}) overlaps input ({} elements on {})",
            output.len(),
            output.residency(),
            input.len(),
            input.residency()
        )));
    }
    Ok(())
}

/// Checks that a view's residency matches the configuration flag. Device
/// views must live on `device`.
pub(crate) fn check_residency(
    what: &str,
    residency: Residency,
    on_device: bool,
    device: DeviceId,
) -> Result<()> {
    match (on_device, residency) {
        (false, Residency::Host) => Ok(()),
        (true, Residency::Device(id)) if id == device => Ok(()),
        (true, Residency::Device(id)) => Err(Error::invalid(format!(
            "{} lives on device {} but the call targets device {}",
            what, id, device
        ))),
        (true, Residency::Host) => Err(Error::invalid(format!(
            "{} is flagged as device-resident but is a host buffer",
            what
        ))),
        (false, Residency::Device(id)) => Err(Error::invalid(format!(
            "{} is flagged as host-resident but lives on device {}",
            what, id
        ))),
    }
}
