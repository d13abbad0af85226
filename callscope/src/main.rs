use std::io::Write as _;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::info;

use callscope::analysis::{apply_adjustment, Dataset};
use callscope::cli::Args;
use callscope::domain::{AnalyzeError, SortMode};
use callscope::report::{call_tree, function_report, summary, thread_report};
use callscope::symbolization::symbolize;
use callscope::trace_data::TraceFile;

fn main() {
    env_logger::init();

    let args = Args::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        let code = match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
            _ => 1,
        };
        std::process::exit(code);
    });

    if !args.any_operation() {
        let _ = Args::command().print_help();
        std::process::exit(1);
    }

    if let Err(err) = run(&args) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let tf = TraceFile::load(&args.input, args.prefix.as_deref())
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    if !tf.errors.is_empty() {
        // Echo what the runtime reported; the data cannot be trusted.
        for error in &tf.errors {
            println!("ERROR: {error}");
        }
        return Err(AnalyzeError::InstrumentationFailed.into());
    }

    let addrs = symbolize(&tf, args.brief)?;
    info!("resolved {} addresses across {} maps", addrs.len(), tf.maps.len());

    let mut ds = Dataset::build(tf, addrs)?;
    apply_adjustment(&mut ds, args.adjust);

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());

    if args.func_calls {
        function_report(&ds, SortMode::Calls, args.brief, &mut out)?;
    }
    if args.func_cpu {
        function_report(&ds, SortMode::TotalCpu, args.brief, &mut out)?;
    }
    if args.func_calls_avg {
        function_report(&ds, SortMode::CallsAvgCpu, args.brief, &mut out)?;
    }
    if args.func_avg {
        function_report(&ds, SortMode::AvgCpu, args.brief, &mut out)?;
    }
    if args.thread_calls {
        thread_report(&ds, SortMode::Calls, args.brief, &mut out)?;
    }
    if args.thread_cpu {
        thread_report(&ds, SortMode::TotalCpu, args.brief, &mut out)?;
    }
    if args.thread_calls_avg {
        thread_report(&ds, SortMode::CallsAvgCpu, args.brief, &mut out)?;
    }
    if args.thread_avg {
        thread_report(&ds, SortMode::AvgCpu, args.brief, &mut out)?;
    }
    if args.tree {
        call_tree(&ds, None, args.brief, &mut out)?;
    }
    if let Some(name) = &args.tree_func {
        call_tree(&ds, Some(name), args.brief, &mut out)?;
    }
    if args.summary {
        summary(&ds, args.brief, &mut out)?;
    }

    out.flush()?;
    Ok(())
}
