// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! This crate defines [structs for the on-disk crash-dump format](format/index.html).
//!
//! You probably don't want to use this crate directly, the `crashdump` crate provides
//! the actual functionality of reading dumps using the structs defined in this crate.

pub mod format;
