use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use subview::app::Args;
use subview::reddit::SortOption;

const HELP: &str = "subview - Browse a subreddit from the terminal.

Usage: subview [OPTIONS] <SUBREDDIT>

Options:
  --sort <SORT>      Feed order: hot, new, top, rising, controversial
  --config <PATH>    Read configuration from PATH
  --offline          Use generated sample content instead of reddit
  --version, -V      Show version and exit
  --help,    -h      Show this help message";

enum Command {
    Run(Args),
    Exit,
}

fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Exit) => return,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!("Try 'subview --help' for more information.");
            std::process::exit(1);
        }
    };

    if let Err(err) = subview::run(args) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args<I>(mut raw: I) -> Result<Command>
where
    I: Iterator<Item = String>,
{
    let mut args = Args::default();
    let mut subreddit = None;
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("subview {}", subview::VERSION);
                return Ok(Command::Exit);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(Command::Exit);
            }
            "--offline" => args.offline = true,
            "--sort" => {
                let value = raw.next().ok_or_else(|| anyhow!("--sort needs a value"))?;
                let sort = SortOption::from_key(&value)
                    .ok_or_else(|| anyhow!("unknown sort {value:?}"))?;
                args.sort = Some(sort);
            }
            "--config" => {
                let value = raw.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                args.config_file = Some(PathBuf::from(value));
            }
            flag if flag.starts_with('-') => bail!("unknown option {flag}"),
            name => {
                if subreddit.is_some() {
                    bail!("unexpected argument {name}");
                }
                subreddit = Some(name.to_string());
            }
        }
    }
    args.subreddit = subreddit
        .filter(|name| !subview::reddit::normalize_subreddit(name).is_empty())
        .ok_or_else(|| anyhow!("missing <SUBREDDIT>"))?;
    Ok(Command::Run(args))
}
