//! `axe check`/`axe test` command line surface (spec section 6;
//! `clap` derive, in the style of `miden-vm`'s CLI binary).

use std::fs;
use std::io::Read;

use clap::{Args, Parser, Subcommand};

use crate::error::{AxeError, Result};
use crate::instr::Instr;
use crate::model::{self, ModelTag, Options};
use crate::parser::Parser as TraceParser;
use crate::trace::Trace;

#[derive(Debug, Parser)]
#[command(name = "axe", about = "Checks whether a trace is admitted by a shared-memory consistency model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Checks one or more traces in FILE against MODEL, printing OK/NO per trace.
    Check(CheckArgs),
    /// Checks traces in TRACE_FILE against MODEL and compares against expected verdicts in ANSWER_FILE.
    Test(TestArgs),
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// SC, TSO, PSO, WMO, or POW (case-insensitive).
    pub model: String,
    /// Trace file, or "-" for standard input.
    pub file: String,
    #[command(flatten)]
    pub flags: Flags,
}

#[derive(Debug, Args)]
pub struct TestArgs {
    pub model: String,
    pub trace_file: String,
    pub answer_file: String,
    #[command(flatten)]
    pub flags: Flags,
}

#[derive(Debug, Args)]
pub struct Flags {
    /// Assume a global clock domain (enables sync-time edges under POW).
    #[arg(short = 'g', long = "global-clock")]
    pub global_clock: bool,
    /// Drop begin/end timestamps before analysis.
    #[arg(short = 'i', long = "ignore-timestamps")]
    pub ignore_timestamps: bool,
}

impl Flags {
    fn options(&self) -> Options {
        Options {
            global_clock: self.global_clock,
            ignore_times: self.ignore_timestamps,
        }
    }
}

fn read_source(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| AxeError::io("<stdin>", e))?;
        Ok(buf)
    } else {
        fs::read_to_string(path).map_err(|e| AxeError::io(path, e))
    }
}

fn apply_ignore_times(batch: &mut [Instr], ignore: bool) {
    if !ignore {
        return;
    }
    for ins in batch {
        ins.begin_time = None;
        ins.end_time = None;
    }
}

/// Runs `axe check`, printing one `OK`/`NO` line per batch. Returns
/// `Ok(true)` iff every batch was admitted.
pub fn run_check(args: &CheckArgs) -> Result<bool> {
    let model = model::parse_model(&args.model)?;
    let source = read_source(&args.file)?;
    let mut parser = TraceParser::new(&source);
    let batches = parser.parse_all()?;
    if batches.is_empty() {
        return Err(AxeError::usage("input contains no instructions"));
    }

    let opts = args.flags.options();
    let mut all_ok = true;
    for mut batch in batches {
        apply_ignore_times(&mut batch, opts.ignore_times);
        let verdict = check_one(&batch, model, opts)?;
        println!("{}", if verdict { "OK" } else { "NO" });
        all_ok &= verdict;
    }
    Ok(all_ok)
}

/// Runs `axe test`, printing a pass/fail line per batch. Returns `Ok(true)`
/// iff every batch's verdict matched its expected answer.
pub fn run_test(args: &TestArgs) -> Result<bool> {
    if args.trace_file == "-" && args.answer_file == "-" {
        return Err(AxeError::usage("trace file and answer file cannot both read standard input"));
    }
    let model = model::parse_model(&args.model)?;
    let source = read_source(&args.trace_file)?;
    let answers_raw = read_source(&args.answer_file)?;

    let mut parser = TraceParser::new(&source);
    let batches = parser.parse_all()?;
    let answers: Vec<(bool, &str)> = answers_raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let trimmed = l.trim_start();
            let expected = trimmed.starts_with('O');
            (expected, trimmed.get(1..).unwrap_or("").trim())
        })
        .collect();

    if answers.len() != batches.len() {
        return Err(AxeError::usage(format!(
            "answer file has {} entries but trace file has {} traces",
            answers.len(),
            batches.len()
        )));
    }

    let opts = args.flags.options();
    let mut all_passed = true;
    for (mut batch, (expected, name)) in batches.into_iter().zip(answers) {
        apply_ignore_times(&mut batch, opts.ignore_times);
        let actual = check_one(&batch, model, opts)?;
        let passed = actual == expected;
        all_passed &= passed;
        let label = if name.is_empty() { "<unnamed>" } else { name };
        println!(
            "{} {} (expected {}, got {})",
            if passed { "PASS" } else { "FAIL" },
            label,
            if expected { "OK" } else { "NO" },
            if actual { "OK" } else { "NO" }
        );
    }
    Ok(all_passed)
}

fn check_one(batch: &[Instr], model: ModelTag, opts: Options) -> Result<bool> {
    let trace = Trace::new(batch.to_vec())?;
    Ok(model::check(&trace, model, opts))
}
