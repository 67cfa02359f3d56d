//! melc-drv - Compiler Driver
//!
//! Orchestrates the pipeline: parse the program from standard input, run
//! semantic analysis and the liveness pass, solve the inference work-list,
//! lower through LLVM, and emit whatever the flags ask for. Any
//! user-visible failure is printed to stderr by `main` and exits with
//! status 1.
//!
//! The command line uses single-dash long options (`-ast`, `-idtypes`,
//! `-frontend sem`, ..); [`normalize_args`] rewrites those to the
//! double-dash spelling before clap parses them.

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use inkwell::context::Context;
use melc_gen::CodeGen;
use melc_sem::Compilation;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// How far to drive the pipeline (the `-frontend` flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Stage {
    Syntax,
    Sem,
    Inf,
    Compile,
}

#[derive(Debug, Parser)]
#[command(
    name = "melc",
    about = "Whole-program compiler for the Mel language; reads source from stdin",
    after_help = "Without -o, object output goes to a.o and text output to stdout."
)]
pub struct Options {
    /// Run the optimization pipeline over the produced module
    #[arg(short = 'O')]
    pub optimize: bool,

    /// Print the LLVM IR
    #[arg(short = 'i')]
    pub print_ir: bool,

    /// Emit an object file
    #[arg(short = 'f')]
    pub object: bool,

    /// Emit assembly
    #[arg(short = 'S')]
    pub assembly: bool,

    /// Redirect text output / object output to FILE
    #[arg(short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print the parsed program
    #[arg(long)]
    pub ast: bool,

    /// Print user identifiers with their inferred types
    #[arg(long)]
    pub idtypes: bool,

    /// Verbose inferencer logs
    #[arg(long)]
    pub inflogs: bool,

    /// Verbose table logs
    #[arg(long)]
    pub tlogs: bool,

    /// Stop after the given stage
    #[arg(long, value_name = "STAGE", value_enum)]
    pub frontend: Option<Stage>,
}

/// The long flags that are spelled with a single dash on the command line.
const LONG_FLAGS: &[&str] = &["ast", "idtypes", "inflogs", "tlogs", "frontend", "help"];

/// Rewrite `-name` to `--name` for the known long options, leaving short
/// flags and everything else untouched.
pub fn normalize_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .map(|a| {
            let Some(name) = a.strip_prefix('-') else {
                return a;
            };
            if !name.starts_with('-') && LONG_FLAGS.contains(&name) {
                format!("--{}", name)
            } else {
                a
            }
        })
        .collect()
}

/// Install the tracing subscriber behind `-inflogs` / `-tlogs`.
pub fn init_logging(opts: &Options) {
    let mut targets = Vec::new();
    if opts.inflogs {
        targets.push("melc::infer=debug");
    }
    if opts.tlogs {
        targets.push("melc::tables=debug");
    }
    if targets.is_empty() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::new(targets.join(","));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

enum Sink {
    Stdout,
    File(File),
}

impl Sink {
    fn new(output: &Option<PathBuf>) -> Result<Self> {
        match output {
            Some(path) => {
                let f = File::create(path)
                    .with_context(|| format!("could not open {}", path.display()))?;
                Ok(Sink::File(f))
            }
            None => Ok(Sink::Stdout),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Sink::Stdout => std::io::stdout()
                .write_all(bytes)
                .context("could not write to stdout"),
            Sink::File(f) => f.write_all(bytes).context("could not write output file"),
        }
    }
}

/// Run the pipeline over one source text. Errors carry the user-facing
/// message; the caller prints and exits 1.
pub fn run(opts: &Options, source: &str) -> Result<()> {
    let stage = opts.frontend.unwrap_or(Stage::Compile);
    let mut sink = Sink::new(&opts.output)?;

    let program = melc_par::parse(source)?;
    if opts.ast {
        sink.write_all(melc_ast::print_program(&program).as_bytes())?;
    }
    if stage == Stage::Syntax {
        return Ok(());
    }

    let mut ctx = Compilation::new();
    melc_sem::analyze(&mut ctx, &program)?;
    melc_sem::analyze_liveness(&mut ctx, &program)?;
    if stage == Stage::Sem {
        return Ok(());
    }

    {
        let Compilation { types, inf, .. } = &mut ctx;
        inf.solve_all(types, stage == Stage::Compile)?;
    }
    if opts.idtypes {
        sink.write_all(ctx.idtypes_table().as_bytes())?;
    }
    if stage == Stage::Inf {
        return Ok(());
    }

    let llvm = Context::create();
    let mut gen = CodeGen::new(&llvm, "a", &mut ctx, opts.optimize)?;
    gen.compile_program(&program)?;

    if opts.print_ir {
        sink.write_all(gen.emit_ir().as_bytes())?;
    }
    if opts.assembly {
        let asm = gen.emit_assembly()?;
        sink.write_all(&asm)?;
    }
    if opts.object {
        let path = opts
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from("a.o"));
        gen.write_object_file(&path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(args: &[&str]) -> Vec<String> {
        normalize_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn single_dash_long_options_are_rewritten() {
        assert_eq!(
            norm(&["melc", "-ast", "-idtypes", "-frontend", "sem"]),
            vec!["melc", "--ast", "--idtypes", "--frontend", "sem"]
        );
    }

    #[test]
    fn short_flags_and_values_pass_through() {
        assert_eq!(
            norm(&["melc", "-O", "-i", "-o", "out.o", "sem"]),
            vec!["melc", "-O", "-i", "-o", "out.o", "sem"]
        );
        // already double-dashed spellings are untouched
        assert_eq!(norm(&["melc", "--ast"]), vec!["melc", "--ast"]);
    }

    #[test]
    fn unknown_single_dash_words_are_left_for_clap_to_reject() {
        assert_eq!(norm(&["melc", "-astx"]), vec!["melc", "-astx"]);
    }

    #[test]
    fn options_parse_the_full_surface() {
        let opts = Options::parse_from(norm(&[
            "melc", "-O", "-i", "-f", "-S", "-o", "out", "-ast", "-idtypes", "-inflogs",
            "-tlogs", "-frontend", "compile",
        ]));
        assert!(opts.optimize && opts.print_ir && opts.object && opts.assembly);
        assert!(opts.ast && opts.idtypes && opts.inflogs && opts.tlogs);
        assert_eq!(opts.frontend, Some(Stage::Compile));
        assert_eq!(opts.output.as_deref(), Some(std::path::Path::new("out")));
    }
}
