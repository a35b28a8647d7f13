//! `cyan`: the driver binary tying the pipeline together behind the CLI
//! surface in spec §6.2. The teacher analogue is `wasmtime-cli`'s
//! `src/bin/wasmtime.rs` — a thin `clap`-derive front end over library
//! crates that do the actual work (here: `cyan-reader` in place of a real
//! source-language front end, `cyan-codegen` for the pipeline and the x64
//! backend, `cyan-vm` for `-r`).
//!
//! Input "files" are this project's textual IR format (spec §0's
//! `cyan-reader`), standing in for the out-of-scope source-language
//! parser. Multiple input files are concatenated before parsing — there is
//! no separate-compilation / linking model here, only one `Module` per
//! invocation, mirroring how a single `.clif` file feeds `clif-util`.

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use cyan_codegen::ir::dump::module_to_string;
use cyan_codegen::x64;
use cyan_codegen::Pipeline;
use cyan_reader::parse_module;

/// `-e {GCC|IR|X64}` (spec §6.2): what the compiler should produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPERCASE")]
enum EmitMode {
    /// Assemble and link through an external system compiler.
    Gcc,
    /// Dump the finalized IR in `cyan-reader`'s textual format.
    Ir,
    /// Emit Intel-syntax x86-64 assembly.
    X64,
}

#[derive(Parser, Debug)]
#[command(name = "cyan", version, about = "The cyan compiler middle/back-end driver")]
struct Cli {
    /// Input files, concatenated and parsed as one textual-IR module.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output path. Defaults to `a.out` (GCC), `a.s` (X64), `a.ir` (IR).
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Emit mode.
    #[arg(short = 'e', value_enum, default_value = "GCC")]
    emit: EmitMode,

    /// Optimization pipeline (spec §4.8).
    #[arg(short = 'O', value_name = "LEVEL", default_value = "0")]
    opt_level: String,

    /// Run the module through the register VM instead of emitting, and
    /// exit with `main`'s return value.
    #[arg(short = 'r')]
    run: bool,

    /// Write per-pass IR snapshots to stderr.
    #[arg(short = 'd')]
    dump_passes: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut source = String::new();
    for path in &cli.files {
        let contents = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        source.push_str(&contents);
        source.push('\n');
    }

    let mut module = match parse_module(&source) {
        Ok(module) => module,
        Err(cyan_reader::ParseError::Malformed(diagnostics)) => {
            for diag in diagnostics.entries() {
                eprintln!("{}", diag);
            }
            bail!("{} error(s) parsing textual IR", diagnostics.error_count());
        }
        Err(err @ cyan_reader::ParseError::Lex { .. }) => bail!(err),
    };

    let mut diagnostics = cyan_codegen::Diagnostics::default();
    cyan_codegen::init_order::check(&module, &mut diagnostics);
    for diag in diagnostics.entries() {
        eprintln!("{}", diag);
    }

    let pipeline: Pipeline = cli.opt_level.parse().map_err(anyhow::Error::new)?;
    if cli.dump_passes {
        cyan_codegen::run_traced(pipeline, &mut module, &mut |name, m| {
            eprintln!("=== after {} ===\n{}", name, module_to_string(m));
        });
    } else {
        pipeline.run(&mut module);
    }

    if cli.run {
        return run_vm(&module);
    }

    match cli.emit {
        EmitMode::Ir => {
            let text = module_to_string(&module);
            write_output(cli.output.unwrap_or_else(|| PathBuf::from("a.ir")), &text)?;
        }
        EmitMode::X64 => {
            let asm = x64::emit_module(&module).context("x64 code generation")?;
            write_output(cli.output.unwrap_or_else(|| PathBuf::from("a.s")), &asm)?;
        }
        EmitMode::Gcc => {
            let asm = x64::emit_module(&module).context("x64 code generation")?;
            assemble_and_link(&asm, cli.output.unwrap_or_else(|| PathBuf::from("a.out")))?;
        }
    }

    Ok(())
}

fn write_output(path: PathBuf, contents: &str) -> Result<()> {
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
}

/// GCC mode (spec §6.2): write assembly to a temp file, invoke the external
/// system C compiler against it plus `$CYAN_RUNTIME_DIR`'s runtime object,
/// then remove the temp file. `$CC` overrides the compiler name, defaulting
/// to `cc` the way the original `main.cpp` shells out.
fn assemble_and_link(asm: &str, output: PathBuf) -> Result<()> {
    let tmp_path = std::env::temp_dir().join(format!("cyan-{}.s", std::process::id()));
    fs::write(&tmp_path, asm).with_context(|| format!("writing {}", tmp_path.display()))?;

    let cleanup = |path: &PathBuf| {
        let _ = fs::remove_file(path);
    };

    let cc = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let mut command = Command::new(&cc);
    command.arg(&tmp_path).arg("-o").arg(&output);
    if let Ok(runtime_dir) = std::env::var("CYAN_RUNTIME_DIR") {
        command.arg(format!("{}/runtime.o", runtime_dir));
    }

    let status = command.status();
    cleanup(&tmp_path);

    let status = status.with_context(|| format!("invoking `{}`", cc))?;
    if !status.success() {
        bail!("`{}` exited with {}", cc, status);
    }
    Ok(())
}

/// `-r`: run the module through the register VM and exit with `main`'s
/// return value (seed scenario 6: "running `-r` prints exit code `7`").
fn run_vm(module: &cyan_codegen::ir::Module) -> Result<()> {
    let program = cyan_vm::Program::compile(module).context("lowering to VM bytecode")?;
    let mut interpreter = cyan_vm::Interpreter::new(&program);
    let exit_code = interpreter.run_program().context("running VM program")?;

    println!("{}", exit_code);
    std::io::stdout().flush().ok();
    std::process::exit((exit_code & 0xff) as i32);
}
