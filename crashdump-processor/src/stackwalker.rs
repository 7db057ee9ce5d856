// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A best-effort call stack for the crashing thread.
//!
//! There is no unwinding here: the first frame is the fault address and the
//! rest are pointer-sized words read off the top of the crashing thread's
//! stack, each resolved to whichever module contains it. Return addresses
//! tend to show up in that window, which is enough to point a human at the
//! modules involved.

use std::io;
use std::io::prelude::*;

use crashdump::system_info::PointerWidth;
use crashdump::{MinidumpException, MinidumpModuleList, MinidumpThreadList};
use serde_json::json;

/// The most frames a `CallStack` will hold, the fault address included.
pub const MAX_FRAMES: usize = 10;

/// Why a `CallStack` may be shorter than expected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallStackInfo {
    /// Everything needed was present.
    Ok,
    /// The dump has no exception stream, so there is no crashing thread.
    MissingException,
    /// Missing thread list stream.
    MissingThreadList,
    /// The crashing thread is not in the thread list.
    MissingThread,
    /// The crashing thread's stack lies outside the dump.
    MissingStackMemory,
}

impl CallStackInfo {
    /// A short explanation for reports, `None` when nothing went wrong.
    pub fn description(&self) -> Option<&'static str> {
        match self {
            CallStackInfo::Ok => None,
            CallStackInfo::MissingException => Some("no exception stream"),
            CallStackInfo::MissingThreadList => Some("no thread list stream"),
            CallStackInfo::MissingThread => Some("crashing thread not found in thread list"),
            CallStackInfo::MissingStackMemory => Some("crashing thread's stack is not in the dump"),
        }
    }
}

/// A single candidate frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    /// The address this frame was built from.
    pub instruction: u64,
    /// The code file of the module containing `instruction`, if any.
    pub module: Option<String>,
}

impl StackFrame {
    /// The module name for display, "Unknown" when no module matched.
    pub fn module_name(&self) -> &str {
        self.module.as_deref().unwrap_or("Unknown")
    }
}

/// A bounded list of frames for the crashing thread.
#[derive(Clone, Debug)]
pub struct CallStack {
    /// The frames, fault address first.
    pub frames: Vec<StackFrame>,
    /// Whether the stack memory was available.
    pub info: CallStackInfo,
    /// How addresses are formatted.
    pub pointer_width: PointerWidth,
}

impl CallStack {
    /// Create a `CallStack` with `CallStackInfo::Ok` and no frames.
    pub fn with_info(info: CallStackInfo, pointer_width: PointerWidth) -> CallStack {
        CallStack {
            frames: vec![],
            info,
            pointer_width,
        }
    }

    /// Write a human-readable description of the call stack to `f`.
    ///
    /// This is very verbose, it implements the output format used by
    /// crashdump-triage.
    pub fn print<T: Write>(&self, f: &mut T) -> io::Result<()> {
        if self.frames.is_empty() {
            writeln!(f, "<no frames>")?;
        }
        for (i, frame) in self.frames.iter().enumerate() {
            writeln!(
                f,
                "{:2}  {}  {}",
                i,
                self.pointer_width.format_address(frame.instruction),
                basename(frame.module_name())
            )?;
        }
        if let Some(why) = self.info.description() {
            writeln!(f, "    (stack incomplete: {why})")?;
        }
        Ok(())
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        json!({
            "status": format!("{:?}", self.info),
            "frames": self.frames.iter().enumerate().map(|(idx, frame)| json!({
                "frame": idx,
                "offset": self.pointer_width.format_address(frame.instruction),
                "module": frame.module_name(),
            })).collect::<Vec<_>>(),
        })
    }
}

/// Strip everything up to the last path separator of either flavor.
pub(crate) fn basename(f: &str) -> &str {
    match f.rfind(['/', '\\']) {
        None => f,
        Some(index) => &f[(index + 1)..],
    }
}

fn frame_at(address: u64, modules: &MinidumpModuleList) -> StackFrame {
    StackFrame {
        instruction: address,
        module: modules
            .module_at_address(address)
            .map(|module| module.code_file().to_owned()),
    }
}

fn read_word(bytes: &[u8], pointer_width: PointerWidth) -> u64 {
    match pointer_width {
        PointerWidth::Bits32 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[..4]);
            u32::from_le_bytes(buf) as u64
        }
        PointerWidth::Bits64 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            u64::from_le_bytes(buf)
        }
    }
}

/// Build the call stack of the thread named by `exception`.
///
/// The fault address comes first, followed by up to `MAX_FRAMES - 1` words
/// from the start of the thread's stack memory. A trailing partial word is
/// ignored.
pub fn walk_stack(
    exception: Option<&MinidumpException>,
    threads: Option<&MinidumpThreadList>,
    modules: &MinidumpModuleList,
    pointer_width: PointerWidth,
) -> CallStack {
    let exception = match exception {
        Some(exception) => exception,
        None => return CallStack::with_info(CallStackInfo::MissingException, pointer_width),
    };
    let mut stack = CallStack::with_info(CallStackInfo::Ok, pointer_width);
    stack
        .frames
        .push(frame_at(exception.get_crash_address(), modules));

    let threads = match threads {
        Some(threads) => threads,
        None => {
            stack.info = CallStackInfo::MissingThreadList;
            return stack;
        }
    };
    let thread = match threads.get_thread(exception.thread_id) {
        Some(thread) => thread,
        None => {
            stack.info = CallStackInfo::MissingThread;
            return stack;
        }
    };
    let memory = match thread.stack_memory() {
        Some(memory) => memory,
        None => {
            stack.info = CallStackInfo::MissingStackMemory;
            return stack;
        }
    };

    let words = memory
        .chunks_exact(pointer_width.size_in_bytes())
        .take(MAX_FRAMES - 1)
        .map(|word| read_word(word, pointer_width));
    stack
        .frames
        .extend(words.map(|address| frame_at(address, modules)));
    stack
}

#[cfg(test)]
mod test {
    use super::*;
    use crashdump::MinidumpModule;

    fn modules() -> MinidumpModuleList {
        MinidumpModuleList::from_modules(vec![
            MinidumpModule::new(0x40_0000, 0x1000, "C:\\app\\app.exe"),
            MinidumpModule::new(0x7700_0000, 0x10_0000, "C:\\Windows\\ntdll.dll"),
        ])
    }

    #[test]
    fn test_no_exception() {
        let stack = walk_stack(None, None, &modules(), PointerWidth::Bits64);
        assert!(stack.frames.is_empty());
        assert_eq!(stack.info, CallStackInfo::MissingException);
    }

    #[test]
    fn test_exception_without_threads() {
        let exception = MinidumpException {
            thread_id: 1,
            exception_code: 0xc0000005,
            exception_flags: 0,
            exception_address: 0x40_0010,
        };
        let stack = walk_stack(Some(&exception), None, &modules(), PointerWidth::Bits32);
        assert_eq!(stack.info, CallStackInfo::MissingThreadList);
        assert_eq!(stack.frames.len(), 1);
        assert_eq!(stack.frames[0].module_name(), "C:\\app\\app.exe");
    }

    #[test]
    fn test_read_word() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 0xef, 0xbe, 0xad, 0xde];
        assert_eq!(read_word(&bytes, PointerWidth::Bits32), 0x1234_5678);
        assert_eq!(read_word(&bytes, PointerWidth::Bits64), 0xdead_beef_1234_5678);
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("C:\\Windows\\ntdll.dll"), "ntdll.dll");
        assert_eq!(basename("/usr/lib/libc.so"), "libc.so");
        assert_eq!(basename("app.exe"), "app.exe");
        assert_eq!(basename("dir\\"), "");
    }

    #[test]
    fn test_print() {
        let stack = CallStack {
            frames: vec![
                frame_at(0x40_0010, &modules()),
                frame_at(0x1234, &modules()),
            ],
            info: CallStackInfo::MissingStackMemory,
            pointer_width: PointerWidth::Bits32,
        };
        let mut out = Vec::new();
        stack.print(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            " 0  0x00400010  app.exe\n 1  0x00001234  Unknown\n    (stack incomplete: crashing thread's stack is not in the dump)\n"
        );
    }
}
