//! `eka`: inspect, load and convert EKA2 E32 images
//!
//! Front end for the `eka-loader` crate: header and relocation dumps, trial
//! loads at a chosen base, and conversion between compressed and
//! uncompressed containers.

mod commands;
mod logger;
mod output;

use clap::{ArgAction, Parser, Subcommand};
use commands::{convert, info, load, relocs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eka")]
#[command(about = "EKA2 E32 image tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Loader config file (default: ./eka.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Colored output: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    color: String,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the image header
    Info {
        /// Image file
        file: PathBuf,
    },

    /// List code and data relocations
    Relocs {
        /// Image file
        file: PathBuf,
    },

    /// Load and relocate an image
    Load {
        /// Image file
        file: PathBuf,
        /// Load base (hex with 0x, or decimal)
        #[arg(short, long, value_parser = commands::parse_address)]
        base: Option<u32>,
        /// Write the relocated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert an uncompressed image to a deflate-compressed one
    Compress {
        /// Uncompressed image
        input: PathBuf,
        /// Compressed output
        output: PathBuf,
    },

    /// Convert a compressed image to an uncompressed one
    Decompress {
        /// Compressed image
        input: PathBuf,
        /// Uncompressed output
        output: PathBuf,
    },
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut out = output::StyledOutput::new(output::resolve_color_choice(Some(&cli.color)));
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info { file } => info::execute(&file, &mut out),
        Commands::Relocs { file } => relocs::execute(&file, &config, &mut out),
        Commands::Load { file, base, output } => {
            load::execute(&file, base, output.as_deref(), &config, &mut out)
        }
        Commands::Compress { input, output } => convert::compress(&input, &output, &mut out),
        Commands::Decompress { input, output } => {
            convert::decompress(&input, &output, &config, &mut out)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose, output::resolve_color_choice(Some(&cli.color)));

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
