///////////////////////////
mod options;
///////////////////////////
use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
///////////////////////////
use libstackwalk::{SymbolIndex, UNRESOLVED_SYMBOL};
use options::Options;
///////////////////////////

fn main() -> Result<()> {
    env_logger::init();
    let options = Options::parse();

    if options.trace_self {
        return trace_self();
    }

    let Some(executable) = options.executable.as_deref() else {
        unreachable!("This should never happen because of the required_unless_present attribute")
    };
    let index = SymbolIndex::build(executable)
        .with_context(|| format!("failed to index {}", executable.display()))?;
    log::info!(
        "indexed {} symbols from {}",
        index.count(),
        executable.display()
    );

    if options.dump || options.addresses.is_empty() {
        dump(&index);
    }
    for address in &options.addresses {
        resolve_one(&index, *address);
    }
    Ok(())
}

fn dump(index: &SymbolIndex) {
    println!(
        "{} symbols, image {:#x}..={:#x}",
        index.count().to_string().bold(),
        index.addr_base(),
        index.addr_end()
    );
    for (i, range) in index.symbols().iter().enumerate() {
        println!(
            "{:#014x} {:#014x} {}",
            index.addr_base() + range.start as u64,
            index.addr_base() + range.end as u64,
            String::from_utf8_lossy(index.name(i))
        );
    }
}

fn resolve_one(index: &SymbolIndex, address: u64) {
    match index.resolve(address) {
        Some(resolution) => {
            let name = String::from_utf8_lossy(index.name(resolution.symbol));
            println!(
                "{address:#x} -> {}+{:#x}",
                name.green(),
                resolution.offset
            );
        }
        None => println!("{address:#x} -> {}", UNRESOLVED_SYMBOL.red()),
    }
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
fn trace_self() -> Result<()> {
    use libstackwalk::BacktraceOptions;

    let own_path = std::env::current_exe().context("failed to locate this executable")?;
    let index = SymbolIndex::build(&own_path)
        .with_context(|| format!("failed to index {}", own_path.display()))?;
    let stdout = std::io::stdout();
    let mut sink = stdout.lock();
    // SAFETY: We walk our own live frame chain; the plausibility checks stop
    // at the first broken link and the default frame cap bounds the walk.
    let report = unsafe {
        libstackwalk::print_backtrace_here(&mut sink, &index, &BacktraceOptions::default())?
    };
    if report.truncated {
        eprintln!("note: backtrace truncated after {} frames", report.frames);
    }
    Ok(())
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn trace_self() -> Result<()> {
    anyhow::bail!("self-tracing is not supported on this architecture")
}
