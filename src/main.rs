//! Stack machine command-line driver.
//!
//! Assembles, disassembles or runs stack-machine programs.
//!
//! # Usage
//! ```text
//! stack-machine --asm <file.txt> [-o <file.asm>]
//! stack-machine --disasm <file.asm> [-o <file.txt>]
//! stack-machine --run <file.asm>
//! ```
//!
//! Exactly one mode per invocation. Assemble and disassemble default their
//! output path to the input path with its extension replaced (`.asm` /
//! `.txt` respectively).
//!
//! # Exit codes
//! `0` on success; otherwise the stable code of the error category:
//! invalid operation 1, invalid register 2, stack underflow 3, invalid
//! label 4, invalid file 5, invalid RAM address 6.

use stack_machine::machine::assembler::assemble_file;
use stack_machine::machine::disassembler::disassemble_file;
use stack_machine::machine::errors::MachineError;
use stack_machine::machine::vm::{MachineConfig, StackMachine};
use stack_machine::utils::log::Log;
use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Assemble,
    Disassemble,
    Run,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let mut mode: Option<(Mode, PathBuf)> = None;
    let mut output: Option<PathBuf> = None;
    let mut config = MachineConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            m @ ("--asm" | "-a" | "--disasm" | "-d" | "--run" | "-r") => {
                i += 1;
                if i >= args.len() {
                    eprintln!("{m} requires a file argument");
                    process::exit(1);
                }
                if mode.is_some() {
                    eprintln!("Too many --asm, --disasm or --run options. Only one is possible");
                    process::exit(1);
                }
                let selected = match m {
                    "--asm" | "-a" => Mode::Assemble,
                    "--disasm" | "-d" => Mode::Disassemble,
                    _ => Mode::Run,
                };
                mode = Some((selected, PathBuf::from(&args[i])));
                i += 1;
            }
            k @ ("--output" | "-o") => {
                i += 1;
                if i >= args.len() {
                    eprintln!("{k} requires an argument");
                    process::exit(1);
                }
                if output.is_some() {
                    eprintln!("Too many --output options. Only one is possible");
                    process::exit(1);
                }
                output = Some(PathBuf::from(&args[i]));
                i += 1;
            }
            "--ram-delay" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--ram-delay requires an argument in milliseconds");
                    process::exit(1);
                }
                let millis: u64 = match args[i].parse() {
                    Ok(v) => v,
                    Err(_) => {
                        eprintln!("Invalid --ram-delay value: {}", args[i]);
                        process::exit(1);
                    }
                };
                config.ram_access_delay = Duration::from_millis(millis);
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let Some((mode, input)) = mode else {
        print_usage(&args[0]);
        process::exit(1);
    };

    let log = Log::new("stack-machine");

    let result = match mode {
        Mode::Assemble => {
            let output = output.unwrap_or_else(|| input.with_extension("asm"));
            assemble_file(&input, &output).map(|bytes| {
                log.info(&format!(
                    "assembled {} -> {} ({} bytes)",
                    input.display(),
                    output.display(),
                    bytes
                ));
            })
        }
        Mode::Disassemble => {
            let output = output.unwrap_or_else(|| input.with_extension("txt"));
            disassemble_file(&input, &output).map(|bytes| {
                log.info(&format!(
                    "disassembled {} -> {} ({} bytes)",
                    input.display(),
                    output.display(),
                    bytes
                ));
            })
        }
        Mode::Run => {
            if let Some(path) = output {
                log.warn(&format!(
                    "--run takes no output file, ignoring {}",
                    path.display()
                ));
            }
            run_image(&input, config)
        }
    };

    if let Err(err) = result {
        log.error(&err.to_string());
        process::exit(err.kind().exit_code());
    }
}

fn run_image(input: &Path, config: MachineConfig) -> Result<(), MachineError> {
    let mut vm = StackMachine::from_file(input, config)?;
    vm.run()
}

const USAGE: &str = "\
Stack machine with possibility to assemble, disassemble and run programs

USAGE:
    {program} --asm <file.txt> [-o <file.asm>]
    {program} --disasm <file.asm> [-o <file.txt>]
    {program} --run <file.asm>

OPTIONS:
    -a, --asm <file>       Assemble the source file into a runnable image
    -d, --disasm <file>    Disassemble the runnable image into source text
    -r, --run <file>       Run the runnable image
    -o, --output <file>    Output path (defaults to the input with its
                           extension replaced by .asm / .txt)
        --ram-delay <ms>   RAM access latency in milliseconds (default 10)
    -h, --help             Print this help message
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
