use std::error::Error;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use rtar::{ExcludeFilter, Key, SecureTar};

mod cli;
use crate::cli::{Cli, Commands};

fn parse_key(hex_key: Option<&str>) -> Result<Option<Key>, Box<dyn Error>> {
    match hex_key {
        Some(hex_key) => {
            let bytes = hex::decode(hex_key)?;
            Ok(Some(Key::new(&bytes)?))
        }
        None => Ok(None),
    }
}

fn configure(path: &Path, key: Option<Key>, plain: bool) -> SecureTar {
    let mut opts = SecureTar::new(path).gzip(!plain);
    if let Some(key) = key {
        opts = opts.key(key);
    }
    opts
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Create {
            archive,
            source,
            excludes,
            key,
            plain,
        } => {
            let key = parse_key(key.as_deref())?;
            let excludes = ExcludeFilter::new(&excludes)?;

            let opts = configure(&archive, key, plain);
            let mut writer = opts.create()?;
            writer.add_dir_contents(&source, Path::new("."), &excludes)?;
            writer.close()?;

            info!("wrote {:?} ({} MiB)", opts.path(), opts.size_mb());
        }
        Commands::Extract {
            archive,
            dest,
            key,
            plain,
        } => {
            let key = parse_key(key.as_deref())?;

            let mut reader = configure(&archive, key, plain).open()?;
            reader.extract_to(&dest)?;

            info!("extracted {:?} into {:?}", archive, dest);
        }
        Commands::Info { archive } => {
            println!("{} MiB", SecureTar::new(archive).size_mb());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
