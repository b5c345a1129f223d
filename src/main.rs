//! implc driver
//!
//! Reads a program tree as JSON, checks it and writes Jasmin assembly.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

use implc::backend::{CodeGen, JasminCodeGen};
use implc::frontend::ast::Program;
use implc::frontend::semantic::{AnalyzerOptions, SemanticAnalyzer};
use implc::middle::ir_gen::CodegenOptions;
use implc::middle::ir_printer::print_ir;
use implc::utils::{Diagnostic, Error};
use implc::{compile, CompileOptions};

/// Semantic analyzer and JVM code generator
#[derive(Parser, Debug)]
#[command(name = "implc")]
#[command(version = "0.1.0")]
#[command(about = "Semantic analyzer and stack-machine code generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a program for semantic errors
    Check {
        /// Program tree (JSON)
        input: PathBuf,

        /// Print diagnostics as a JSON report
        #[arg(long)]
        json: bool,
    },
    /// Compile a program to Jasmin assembly
    Build {
        /// Program tree (JSON)
        input: PathBuf,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Name of the generated program class
        #[arg(long, default_value = "Main")]
        class: String,

        /// Print the stack-machine IR instead of writing assembly
        #[arg(long)]
        emit_ir: bool,

        /// Do not fold constant expressions
        #[arg(long)]
        no_fold: bool,

        /// Keep declarations that are never read
        #[arg(long)]
        keep_unused: bool,

        /// Do not align two-slot locals on even slots
        #[arg(long)]
        no_align: bool,
    },
}

#[derive(Serialize)]
struct Report<'a> {
    file: String,
    ok: bool,
    diagnostics: &'a [Diagnostic],
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Check { input, json } => check_file(&input, json),
        Commands::Build {
            input,
            output,
            class,
            emit_ir,
            no_fold,
            keep_unused,
            no_align,
        } => {
            let options = CompileOptions {
                analyzer: AnalyzerOptions {
                    fold_constants: !no_fold,
                    remove_unused: !keep_unused,
                },
                codegen: CodegenOptions {
                    class_name: class,
                    align_wide_slots: !no_align,
                },
            };
            build_file(&input, output.as_deref(), &options, emit_ir)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            match e.downcast_ref::<Error>() {
                Some(inner) if inner.is_internal() => {
                    eprintln!("internal compiler error: {}", inner)
                }
                _ => eprintln!("Error: {:#}", e),
            }
            process::exit(1);
        }
    }
}

fn read_program(input: &Path) -> Result<Program> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", input.display()))
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        eprintln!("{}", diag);
    }
    eprintln!("{} error(s) found", diagnostics.len());
}

/// Check a program without generating code. Returns whether it is valid.
fn check_file(input: &Path, json: bool) -> Result<bool> {
    let mut program = read_program(input)?;
    let mut analyzer = SemanticAnalyzer::new();
    let diagnostics = analyzer.analyze(&mut program);

    if json {
        let report = Report {
            file: input.display().to_string(),
            ok: diagnostics.is_empty(),
            diagnostics: &diagnostics,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if diagnostics.is_empty() {
        println!("No errors found in {}", input.display());
    } else {
        print_diagnostics(&diagnostics);
    }
    Ok(diagnostics.is_empty())
}

/// Compile a program and write one `.j` file per class
fn build_file(input: &Path, output: Option<&Path>, options: &CompileOptions, emit_ir: bool) -> Result<bool> {
    let mut program = read_program(input)?;
    let module = match compile(&mut program, options) {
        Ok(module) => module,
        Err(Error::Semantic(diagnostics)) => {
            print_diagnostics(&diagnostics);
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    if emit_ir {
        print!("{}", print_ir(&module));
        return Ok(true);
    }

    let out_dir = match output {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let mut backend = JasminCodeGen::new();
    for artifact in backend.generate(&module)? {
        let path = out_dir.join(&artifact.file_name);
        fs::write(&path, &artifact.contents).with_context(|| format!("writing {}", path.display()))?;
        info!("wrote {}", path.display());
        println!("Generated {}", path.display());
    }
    Ok(true)
}
