/////////////////////////////////
use clap::Parser;
use std::path::PathBuf;
/////////////////////////////////

#[derive(Parser, Debug)]
pub struct Options {
    /// The path to the executable whose symbol table should be indexed.
    #[arg(required_unless_present = "trace_self")]
    pub executable: Option<PathBuf>,

    /// Addresses to resolve against the index, in hex (0x prefix optional).
    /// May be given multiple times.
    #[arg(short = 'a', long = "addr", value_parser = parse_address)]
    pub addresses: Vec<u64>,

    /// Dump every retained symbol with its address range. This is the
    /// default when no addresses are given.
    #[arg(long)]
    pub dump: bool,

    /// Index this tool's own binary and print a backtrace of the current
    /// call stack. Only useful when the tool was built with frame pointers
    /// and without address-space randomization of the text segment.
    #[arg(long)]
    pub trace_self: bool,
}

fn parse_address(raw: &str) -> Result<u64, String> {
    let digits = raw.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|err| format!("invalid hex address '{raw}': {err}"))
}
