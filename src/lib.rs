// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'process/builder.rs' uses mmap to map a library into memory

//! # droidemu
//!
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/droidemu/blob/main/LICENSE-APACHE)
//!
//! A cross-platform emulator for AArch64 Android shared libraries. Built in pure Rust,
//! `droidemu` loads an unmodified `.so`, links it against host-implemented bionic libc
//! and JNI functions, and executes its exports on a software A64 CPU, without an
//! Android device, a JVM or native ARM hardware.
//!
//! ## Features
//!
//! - **📦 Bit-exact ELF loading** - `PT_LOAD` mapping, `RELA`/`RELR`/`APS2` relocations, `DT_INIT_ARRAY`
//! - **⚙️ A64 interpreter** - Integer, floating-point, SIMD, atomics and system registers
//! - **☕ Synthetic JNI** - Full `JNIEnv`/`JavaVM` tables backed by signature-keyed handlers
//! - **🧵 Pooled sessions** - Copy-on-write forks for concurrent callers
//! - **🛡️ Memory safe** - Guest faults and runaway code become errors, never host crashes
//! - **🔁 Deterministic** - Fixed clocks and seeded randomness for reproducible runs
//!
//! ## Quick Start
//!
//! Add `droidemu` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! droidemu = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! For convenient access to the most commonly used types, import the prelude:
//!
//! ```rust,no_run
//! use droidemu::prelude::*;
//!
//! let generator = TokenGenerator::open("libauth.so")?;
//! println!("{}", generator.generate_token("device-id")?);
//! # Ok::<(), droidemu::Error>(())
//! ```
//!
//! ### Basic Usage
//!
//! ```rust,no_run
//! use droidemu::emulation::{Argument, EmulationConfig, SessionBuilder};
//!
//! // Load, link and initialize the library
//! let mut session = SessionBuilder::new()
//!     .library_file("libnative.so")
//!     .config(EmulationConfig::token())
//!     .build()?;
//!
//! // Call an exported C function
//! let sum = session.invoke("add", &[Argument::Int(2), Argument::Int(40)])?;
//! println!("add(2, 40) = {sum}");
//!
//! // Inspect what was loaded
//! let summary = session.summary();
//! println!("{} exports, {} imports", summary.exports, summary.imports);
//! # Ok::<(), droidemu::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `droidemu` is organized into several key modules:
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`emulation`] - Memory, loader, linker, CPU, runtime and sessions
//! - [`android`] - Application identity, framework handlers and token generation
//! - [`assembly`] - A64 assembler for synthetic guest code
//! - [`image`] - ELF64 shared-object writer
//! - [`Error`] and [`Result`] - Comprehensive error handling
//!
//! ### Emulation
//!
//! The [`emulation::Session`] is the main entry point. It owns:
//!
//! - **Memory**: A sparse, page-granular address space with copy-on-write pages
//! - **Images**: Mapped segments, exports, imports and initializers
//! - **Runtime**: libc, syscalls, `JNIEnv`/`JavaVM` and the object table
//! - **CPU**: Registers, flags and an execution controller enforcing limits
//!
//! ### JNI Bridge
//!
//! Every Java callback is reduced to an exact signature such as
//! `android/content/pm/PackageInfo->versionCode:I` and answered by a handler from an
//! [`emulation::runtime::DispatchTable`]. Unhandled callbacks are logged, recorded and
//! answered with a configurable default.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result) with detailed error information:
//!
//! ```rust,no_run
//! use droidemu::{emulation::SessionBuilder, Error};
//!
//! match SessionBuilder::new().library_file("libauth.so").build() {
//!     Ok(session) => println!("{:?}", session.summary()),
//!     Err(Error::UnresolvedSymbol { symbol, image }) => println!("{image} needs {symbol}"),
//!     Err(Error::Malformed { message, .. }) => println!("Malformed file: {}", message),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Development and Testing
//!
//! Tests build their guest libraries with [`assembly`] and [`image`], so no binary
//! fixtures are needed:
//!
//! ```bash
//! cargo test
//! cargo bench --bench interpreter
//! ```

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// This module provides a curated selection of the most frequently used types
/// from across the droidemu library, allowing for convenient glob imports.
///
/// # Example
///
/// ```rust,no_run
/// use droidemu::prelude::*;
///
/// let mut session = SessionBuilder::new().library_file("libnative.so").build()?;
/// println!("{:?}", session.invoke("version", &[])?);
/// # Ok::<(), droidemu::Error>(())
/// ```
pub mod prelude;

/// AArch64 emulation of Android shared libraries.
///
/// This module implements everything between a `.so` file and a returned value:
///
/// - **Memory**: Page-granular regions with protection and copy-on-write forking
/// - **Loading and Linking**: ELF64 parsing, relocation and symbol resolution
/// - **Execution**: A64 decoder, interpreter and limit-enforcing controller
/// - **Runtime**: bionic libc, system calls and the JNI bridge
/// - **Sessions**: Lifecycle, forking and pooling
///
/// # Examples
///
/// ```rust,no_run
/// use droidemu::emulation::{runtime::JavaValue, SessionBuilder};
///
/// let mut session = SessionBuilder::new().library_file("libnative.so").build()?;
/// let value = session.call_static_native("com/example/Native", "add", "(II)I", &[
///     JavaValue::Int(2),
///     JavaValue::Int(40),
/// ])?;
/// assert_eq!(value, JavaValue::Int(42));
/// # Ok::<(), droidemu::Error>(())
/// ```
pub mod emulation;

/// The Android application a library expects to run inside.
///
/// # Key Types
///
/// - [`android::AppProfile`] - Package identity and signing certificate
/// - [`android::TokenGenerator`] - Pooled `AuthUtils.getToken` calls
pub mod android;

/// A64 assembler for synthetic guest code.
pub mod assembly;

/// ELF64 shared-object writer for synthetic libraries.
pub mod image;

/// `droidemu` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
///
/// # Examples
///
/// ```rust,no_run
/// use droidemu::{emulation::Session, Result};
///
/// fn open(path: &str) -> Result<Session> {
///     droidemu::emulation::SessionBuilder::new().library_file(path).build()
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `droidemu` Error type
///
/// The main error type for all operations in this crate. Provides detailed error information
/// for image parsing, linking, guest faults and session misuse.
///
/// # Examples
///
/// ```rust,no_run
/// use droidemu::{emulation::{Argument, SessionBuilder}, Error};
///
/// let mut session = SessionBuilder::new().library_file("libnative.so").build()?;
/// match session.invoke("work", &[Argument::Int(1)]) {
///     Ok(value) => println!("returned {value}"),
///     Err(Error::Fault(fault)) => println!("guest crashed: {fault}"),
///     Err(Error::Timeout(limit)) => println!("gave up: {limit}"),
///     Err(e) => println!("Error: {}", e),
/// }
/// # Ok::<(), droidemu::Error>(())
/// ```
pub use error::Error;
