use std::io;

use crate::error::BacktraceError;
use crate::index::SymbolIndex;

/// Printed in place of a symbol name when no retained range covers a frame's
/// return address. Never blank, never a guess.
pub const UNRESOLVED_SYMBOL: &str = "??";

/// Frames a walk may not exceed by default, so a cyclic or corrupted chain
/// terminates instead of looping.
pub const DEFAULT_FRAME_CAP: usize = 256;

/// How a frame record came to be on the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// An ordinary call site; the saved return address is the caller's.
    Call,
    /// Injected by deferred-cleanup machinery. The saved return address
    /// points at a trampoline, not a call site; the real caller must be
    /// recovered through a [`SyntheticFrameResolver`].
    Synthetic,
}

/// One frame of a call chain, linked toward older frames. Built by whatever
/// collaborator captured the stack (a crash handler, a test harness); the
/// walk only ever reads it.
#[derive(Debug)]
pub struct StackFrame<'a> {
    /// Location of the frame record in the captured context; first column of
    /// the emitted line.
    pub frame_pointer: u64,
    pub return_address: u64,
    pub kind: FrameKind,
    /// The next older frame, or `None` at the outermost frame.
    pub next: Option<&'a StackFrame<'a>>,
}

/// Capability for recovering the return addresses that deferred-cleanup
/// machinery displaced when it rewired frames onto its trampoline.
///
/// Consulted once per [`FrameKind::Synthetic`] frame, newest displacement
/// first. Implementations should treat their record source as a snapshot
/// taken at walk start; nested fault handlers may be walking concurrently.
pub trait SyntheticFrameResolver {
    fn displaced_return_address(&mut self) -> Option<u64>;
}

/// Default resolver for processes with no cleanup machinery registered:
/// every synthetic frame stays unresolved.
#[derive(Debug, Default)]
pub struct NoSyntheticFrames;

impl SyntheticFrameResolver for NoSyntheticFrames {
    fn displaced_return_address(&mut self) -> Option<u64> {
        None
    }
}

/// One return address displaced by the cleanup subsystem.
#[derive(Debug, Clone, Copy)]
pub struct DisplacedReturn {
    pub return_address: u64,
    /// Records whose displaced address was itself a trampoline are skipped
    /// during replay.
    pub kind: FrameKind,
}

/// Replays displaced return addresses newest-first from a snapshot of the
/// cleanup subsystem's records.
#[derive(Debug)]
pub struct DisplacedReturns<'a> {
    records: &'a [DisplacedReturn],
    cursor: usize,
}

impl<'a> DisplacedReturns<'a> {
    pub fn new(records: &'a [DisplacedReturn]) -> Self {
        Self {
            records,
            cursor: records.len(),
        }
    }
}

impl SyntheticFrameResolver for DisplacedReturns<'_> {
    fn displaced_return_address(&mut self) -> Option<u64> {
        while self.cursor > 0 {
            self.cursor -= 1;
            let record = self.records[self.cursor];
            if record.kind == FrameKind::Call {
                return Some(record.return_address);
            }
        }
        None
    }
}

/// Walk limits.
#[derive(Debug, Clone, Copy)]
pub struct BacktraceOptions {
    pub max_frames: usize,
}

impl Default for BacktraceOptions {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_FRAME_CAP,
        }
    }
}

/// What a completed walk covered. Truncation is an ordinary outcome, not an
/// error: the frames that fit were already emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacktraceReport {
    pub frames: usize,
    pub truncated: bool,
}

/// Prints one line per frame of the chain starting at `start_frame`,
/// innermost first, resolving each return address against `index`:
///
/// ```text
/// <frame-pointer> <return-address> <symbol-name><+/-offset>
/// ```
///
/// The walk allocates nothing and writes straight into `sink`; a write
/// failure abandons the remaining frames immediately. Unresolvable frames
/// print [`UNRESOLVED_SYMBOL`] and the walk continues.
pub fn print_backtrace<W: io::Write>(
    sink: &mut W,
    start_frame: &StackFrame<'_>,
    index: &SymbolIndex,
    resolver: &mut dyn SyntheticFrameResolver,
    options: &BacktraceOptions,
) -> Result<BacktraceReport, BacktraceError> {
    let mut frames = 0usize;
    let mut current = Some(start_frame);
    while let Some(frame) = current {
        if frames == options.max_frames {
            return Ok(BacktraceReport {
                frames,
                truncated: true,
            });
        }
        let return_address = match frame.kind {
            FrameKind::Call => frame.return_address,
            // The cleanup machinery displaced the real return address when
            // it injected this frame. An exhausted resolver leaves the
            // trampoline address in place, which misses resolution and
            // prints as unresolved rather than as a wrong name.
            FrameKind::Synthetic => resolver
                .displaced_return_address()
                .unwrap_or(frame.return_address),
        };
        emit_frame(sink, frame.frame_pointer, return_address, index)
            .map_err(BacktraceError::SinkFailure)?;
        frames += 1;
        current = frame.next;
    }
    Ok(BacktraceReport {
        frames,
        truncated: false,
    })
}

/// Resolves and renders a single frame line.
///
/// The address is probed minus one first: a return address points to the
/// byte after its call instruction, so when a noreturn call is the last
/// instruction of its function the saved address lands at the start of the
/// next one. Kernel-built signal restart frames are the exception and point
/// at a function's first byte, hence the second probe.
pub(crate) fn emit_frame<W: io::Write + ?Sized>(
    sink: &mut W,
    frame_pointer: u64,
    return_address: u64,
    index: &SymbolIndex,
) -> io::Result<()> {
    let hit = index
        .resolve(return_address.wrapping_sub(1))
        .or_else(|| index.resolve(return_address));
    match hit {
        Some(resolution) => {
            let addend = return_address as i64
                - index.addr_base() as i64
                - index.symbols()[resolution.symbol].start as i64;
            write!(sink, "{frame_pointer:#014x} {return_address:#014x} ")?;
            sink.write_all(index.name(resolution.symbol))?;
            writeln!(sink, "{addend:+}")
        }
        None => writeln!(
            sink,
            "{frame_pointer:#014x} {return_address:#014x} {UNRESOLVED_SYMBOL}+0"
        ),
    }
}
