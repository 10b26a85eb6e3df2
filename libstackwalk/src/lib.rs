//! In-process symbol indexing and stack walking for crash diagnostics.
//!
//! [`SymbolIndex`] turns the symbol table of an ELF executable into a
//! compact, address-sorted lookup structure; [`print_backtrace`] renders a
//! frame chain against it, one line per frame. Built for the moment a
//! process needs to describe its own stack: construction happens once, up
//! front, and everything on the fault path is read-only and allocation-free.

pub mod backtrace;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub mod capture;
pub mod elf;
pub mod error;
pub mod index;

pub use backtrace::{
    print_backtrace, BacktraceOptions, BacktraceReport, DisplacedReturn, DisplacedReturns,
    FrameKind, NoSyntheticFrames, StackFrame, SyntheticFrameResolver, DEFAULT_FRAME_CAP,
    UNRESOLVED_SYMBOL,
};
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub use capture::print_backtrace_here;
pub use error::{BacktraceError, IndexError};
pub use index::{Resolution, SymbolIndex, SymbolRange};
