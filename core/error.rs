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

//! Error reporting for every fallible engine operation.
//!
//! Failures carry a [`ErrorCode`] from a closed taxonomy plus a human-readable
//! message. Numeric codes are stable and `0` is reserved for success, the same
//! convention the native library uses for its `RustError` return values.

use std::fmt;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// The accelerator runtime or driver is unavailable.
    DeviceQueryError = 1,
    /// A required twiddle or coset table has not been initialized.
    UninitializedState = 2,
    /// Input and output sizes do not describe a power-of-two domain extension.
    InvalidDomainRatio = 3,
    /// The batch cannot be split evenly across the requested devices.
    UnevenPartition = 4,
    /// Device or host memory exhaustion.
    AllocationFailure = 5,
    /// A launched kernel faulted; recoverable with `clear_errors`.
    KernelExecutionFailure = 6,
    /// The output buffer overlaps the input buffer.
    AliasingViolation = 7,
    /// Malformed parameters: domain size, configuration, residency or length.
    InvalidArgument = 8,
}

impl ErrorCode {
    /// Stable numeric code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Inverse of [`ErrorCode::code`]; `None` for `0` and unknown values.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ErrorCode::DeviceQueryError),
            2 => Some(ErrorCode::UninitializedState),
            3 => Some(ErrorCode::InvalidDomainRatio),
            4 => Some(ErrorCode::UnevenPartition),
            5 => Some(ErrorCode::AllocationFailure),
            6 => Some(ErrorCode::KernelExecutionFailure),
            7 => Some(ErrorCode::AliasingViolation),
            8 => Some(ErrorCode::InvalidArgument),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::DeviceQueryError => "device query error",
            ErrorCode::UninitializedState => "uninitialized state",
            ErrorCode::InvalidDomainRatio => "invalid domain ratio",
            ErrorCode::UnevenPartition => "uneven partition",
            ErrorCode::AllocationFailure => "allocation failure",
            ErrorCode::KernelExecutionFailure => "kernel execution failure",
            ErrorCode::AliasingViolation => "aliasing violation",
            ErrorCode::InvalidArgument => "invalid argument",
        };
        f.write_str(name)
    }
}

/// A failed engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    code: ErrorCode,
    message: String,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn device_query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DeviceQueryError, message)
    }

    pub(crate) fn uninitialized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UninitializedState, message)
    }

    pub(crate) fn domain_ratio(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidDomainRatio, message)
    }

    pub(crate) fn uneven_partition(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnevenPartition, message)
    }

    pub(crate) fn allocation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AllocationFailure, message)
    }

    pub(crate) fn kernel(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::KernelExecutionFailure, message)
    }

    pub(crate) fn aliasing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AliasingViolation, message)
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {}): {}", self.code, self.code.code(), self.message)
    }
}

impl std::error::Error for Error {}

impl From<Error> for String {
    fn from(e: Error) -> Self {
        e.to_string()
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
