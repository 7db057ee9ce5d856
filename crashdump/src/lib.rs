// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A parser for the "MDMP" crash-dump container.
//!
//! The primary API for this crate is the [`Minidump`][] struct, which can be
//! instantiated by calling [`Minidump::read`][] or [`Minidump::read_path`][].
//! Individual streams are then decoded on demand with [`Minidump::get_stream`][].
//!
//! Dumps are untrusted input. Apart from the header, nothing in a dump can make
//! [`Minidump::read`][] fail: malformed directory entries are dropped, and each
//! stream decoder reports its own failure without affecting the others.
//!
//! # Example
//!
//! ```no_run
//! use crashdump::{Minidump, MinidumpException, MinidumpModuleList};
//!
//! # fn main() -> Result<(), crashdump::Error> {
//! let dump = Minidump::read_path("crash.dmp")?;
//! if let Ok(modules) = dump.get_stream::<MinidumpModuleList>() {
//!     for module in modules.iter() {
//!         println!("{:#x} {}", module.base_address(), module.code_file());
//!     }
//! }
//! if let Ok(exception) = dump.get_stream::<MinidumpException>() {
//!     println!("code {:#010x}", exception.exception_code);
//! }
//! # Ok(())
//! # }
//! ```

pub use crashdump_common::format;

mod minidump;
pub mod system_info;

pub use crate::minidump::*;
