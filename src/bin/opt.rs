use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use colored::Colorize;

use minicc::ir::parser::parse_module;
use minicc::ir::pretty_print::{pretty_print_module, write_module};
use minicc::optimization::optimize_module;

#[derive(Debug, ClapParser)]
#[command(version, about = "Optimizes a MiniC IR module", long_about = None)]
struct Args {
    /// Input IR file
    input: PathBuf,

    /// Output path; defaults to `<basename>_opt.ll` next to the input
    #[arg(short = 'o')]
    output_path: Option<PathBuf>,

    #[arg(short = 'e', value_enum)]
    emit: Option<EmitFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitFormat {
    /// Dump the optimized IR to stdout with colors instead of writing a file
    #[value(name = "ir")]
    Ir,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::from(1)
            } else {
                // --help and --version land here
                ExitCode::SUCCESS
            };
        }
    };

    let source = match std::fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(error) => {
            eprintln!(
                "{}: cannot read '{}': {error}",
                "error".red(),
                args.input.display()
            );
            return ExitCode::from(1);
        }
    };

    let file_name = args.input.file_name().unwrap_or_default().to_string_lossy();

    let mut module = match parse_module(&source, &file_name) {
        Ok(module) => module,
        Err(error) => {
            eprintln!("{}: {}: {error}", "error".red(), args.input.display());
            return ExitCode::from(2);
        }
    };

    optimize_module(&mut module);

    if args.emit == Some(EmitFormat::Ir) {
        pretty_print_module(&module);
        return ExitCode::SUCCESS;
    }

    let output_path = args.output_path.unwrap_or_else(|| {
        let stem = args.input.file_stem().unwrap_or_default().to_string_lossy();
        args.input.with_file_name(format!("{stem}_opt.ll"))
    });

    if let Err(error) = std::fs::write(&output_path, write_module(&module)) {
        eprintln!(
            "{}: cannot write '{}': {error}",
            "error".red(),
            output_path.display()
        );
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
