use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
use tracing_subscriber::prelude::*;

use retrodis::{
    apivec::ApiTable,
    disassembler::Disassembler,
    lang::registry::{DirSource, Registry},
    lang::Language,
};

#[derive(Parser)]
#[command(version)]
#[command(about = "Disassemble a memory image with data-driven language descriptions")]
struct Cli {
    #[clap(help = "Binary memory image to disassemble")]
    image: PathBuf,
    #[clap(long, value_parser = parse_hex)]
    #[clap(help = "Address of the first image byte (hex)")]
    origin: u32,
    #[clap(long = "entry", value_parser = parse_entry, required = true)]
    #[clap(help = "Entry point as <hex-address>:<language>, repeatable")]
    entries: Vec<(u32, String)>,
    #[clap(long, default_value = "languages")]
    #[clap(help = "Directory with <name>.lang description files")]
    langs: PathBuf,
    #[clap(long)]
    #[clap(help = "API vector table file")]
    api: Option<PathBuf>,
    #[clap(long)]
    #[clap(help = "Enable chrome tracing")]
    #[clap(long_help = "Enable chrome tracing which on program exit will generate
a json file to be opened with a chrome tracing compatible
viewer.")]
    trace: bool,
}

fn parse_hex(text: &str) -> Result<u32, String> {
    u32::from_str_radix(text.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn parse_entry(text: &str) -> Result<(u32, String), String> {
    let (address, lang) = text
        .split_once(':')
        .ok_or_else(|| "expected <hex-address>:<language>".to_string())?;
    Ok((parse_hex(address)?, lang.to_string()))
}

pub fn trace() -> FlushGuard {
    let (chrome_layer, guard) = ChromeLayerBuilder::new().build();
    tracing_subscriber::registry().with(chrome_layer).init();

    guard
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _trace_guard = if cli.trace { Some(trace()) } else { None };

    let image = std::fs::read(&cli.image).with_context(|| "Unable to read image")?;
    let registry = Registry::new(Box::new(DirSource::new(&cli.langs)));

    let api = match &cli.api {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| "Unable to read API table")?;
            ApiTable::parse(&text, &registry)?
        }
        None => ApiTable::empty(),
    };

    let entries: Vec<(u32, Arc<Language>)> = cli
        .entries
        .iter()
        .map(|(address, name)| Ok((*address, registry.lookup(name)?)))
        .collect::<Result<_>>()?;

    let mut disassembler = Disassembler::new(&image, cli.origin, &entries, api);
    disassembler.run();
    println!("{}", disassembler.render());

    Ok(())
}
