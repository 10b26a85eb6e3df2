//! Walking the calling thread's own live frame-pointer chain.
//!
//! This is the "no starting frame supplied" entry point: instead of a
//! collaborator-built [`crate::StackFrame`] chain, the walk reads the frame
//! records the compiler itself maintains on the stack. Raw records carry no
//! provenance tag, so every frame is treated as an ordinary call site.

use std::io;

use crate::backtrace::{emit_frame, BacktraceOptions, BacktraceReport};
use crate::error::BacktraceError;
use crate::index::SymbolIndex;

/// In-memory frame record maintained when frame pointers are enabled: the
/// saved caller frame pointer, then the return address.
#[repr(C)]
struct RawFrame {
    next: *const RawFrame,
    return_address: u64,
}

#[cfg(target_arch = "x86_64")]
fn current_frame_pointer() -> *const RawFrame {
    let fp: u64;
    // SAFETY: Reads a register; touches no memory.
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) fp, options(nomem, nostack, preserves_flags));
    }
    fp as *const RawFrame
}

#[cfg(target_arch = "aarch64")]
fn current_frame_pointer() -> *const RawFrame {
    let fp: u64;
    // SAFETY: Reads a register; touches no memory.
    unsafe {
        core::arch::asm!("mov {}, x29", out(reg) fp, options(nomem, nostack, preserves_flags));
    }
    fp as *const RawFrame
}

/// Prints the backtrace of the calling thread, innermost frame first,
/// resolving each return address against `index`. Same line format and sink
/// semantics as [`crate::print_backtrace`]; allocates nothing, so it is
/// usable from a fault handler once the index exists.
///
/// The walk stops at the first implausible link: a null or misaligned frame
/// pointer, a link that does not move toward older (higher) stack addresses,
/// or a zero return address.
///
/// # Safety
///
/// The executable must have been compiled with frame pointers, and the chain
/// rooted at the current frame must consist of readable frame records. A
/// chain corrupted into a still-plausible shape is read as-is; the frame cap
/// in `options` bounds how far that can go.
pub unsafe fn print_backtrace_here<W: io::Write>(
    sink: &mut W,
    index: &SymbolIndex,
    options: &BacktraceOptions,
) -> Result<BacktraceReport, BacktraceError> {
    let mut frames = 0usize;
    let mut frame_ptr = current_frame_pointer();
    let mut floor = frame_ptr as usize;
    loop {
        let location = frame_ptr as usize;
        if frame_ptr.is_null()
            || location < floor
            || location % std::mem::align_of::<RawFrame>() != 0
        {
            break;
        }
        if frames == options.max_frames {
            return Ok(BacktraceReport {
                frames,
                truncated: true,
            });
        }
        // SAFETY: Alignment and monotonicity were checked above; readability
        // of the record is the caller's contract.
        let record = unsafe { std::ptr::read(frame_ptr) };
        if record.return_address == 0 {
            break;
        }
        emit_frame(sink, location as u64, record.return_address, index)
            .map_err(BacktraceError::SinkFailure)?;
        frames += 1;
        floor = location + 1;
        frame_ptr = record.next;
    }
    Ok(BacktraceReport {
        frames,
        truncated: false,
    })
}
