use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ferrite::asm::Disassembler;
use ferrite::CodeBuffer;

#[derive(Parser)]
#[command(name = "ferrite")]
#[command(about = "IA-32 machine-code inspection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Disassemble a file of raw IA-32 machine code
    Disasm {
        /// The file containing the code bytes
        file: PathBuf,

        /// Address the first byte executes at
        #[arg(long, default_value = "1024")]
        address: i32,
    },
    /// Print a hex dump of a file of raw code bytes
    Dump {
        /// The file containing the code bytes
        file: PathBuf,

        /// Address the first byte executes at
        #[arg(long, default_value = "1024")]
        address: i32,
    },
}

fn load_code(path: &Path, address: i32) -> Result<CodeBuffer, String> {
    if address <= 0 {
        return Err("error: address must be positive".to_string());
    }
    let bytes =
        std::fs::read(path).map_err(|e| format!("error: cannot read {}: {}", path.display(), e))?;
    if bytes.is_empty() {
        return Err(format!("error: {} is empty", path.display()));
    }
    let mut buf = CodeBuffer::new(address, bytes.len());
    for b in bytes {
        buf.append(b);
    }
    Ok(buf)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Disasm { file, address } => {
            let buf = match load_code(&file, address) {
                Ok(buf) => buf,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            let mut disasm = Disassembler::new(&buf);
            let mut out = String::new();
            if let Err(e) = disasm.disassemble(buf.code_begin(), buf.code_end(), &mut out) {
                print!("{}", out);
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
            print!("{}", out);
        }
        Commands::Dump { file, address } => {
            let buf = match load_code(&file, address) {
                Ok(buf) => buf,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            let disasm = Disassembler::new(&buf);
            let mut out = String::new();
            if disasm
                .hex_dump(buf.code_begin(), buf.code_end(), &mut out)
                .is_err()
            {
                eprintln!("error: formatting failed");
                return ExitCode::FAILURE;
            }
            print!("{}", out);
        }
    }

    ExitCode::SUCCESS
}
