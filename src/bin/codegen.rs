use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use colored::Colorize;

use minicc::backend::codegen_module;
use minicc::ir::parser::parse_module;

#[derive(Debug, ClapParser)]
#[command(version, about = "Compiles a MiniC IR module to x86 assembly", long_about = None)]
struct Args {
    /// Input IR file
    input: PathBuf,

    /// Output path; defaults to `<basename>.s` next to the input
    #[arg(short = 'o')]
    output_path: Option<PathBuf>,
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

    let module = match parse_module(&source, &file_name) {
        Ok(module) => module,
        Err(error) => {
            eprintln!("{}: {}: {error}", "error".red(), args.input.display());
            return ExitCode::from(2);
        }
    };

    let assembly = codegen_module(&module);
    let output_path = args
        .output_path
        .unwrap_or_else(|| args.input.with_extension("s"));

    if let Err(error) = std::fs::write(&output_path, assembly) {
        eprintln!(
            "{}: cannot write '{}': {error}",
            "error".red(),
            output_path.display()
        );
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
