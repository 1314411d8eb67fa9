//! tierdb command shell.
//!
//! Reads one command per line from stdin and answers on stdout:
//!
//! ```text
//! p <key> <value>    insert or update
//! g <key>            print the value, or a bare newline if absent
//! r <start> <end>    print space-separated key:value pairs in [start, end)
//! d <key>            delete
//! l "<path>"         bulk-load fixed-width records from a file
//! ```
//!
//! Malformed commands are reported on stderr and skipped; storage errors are
//! terminal.

use std::io::{self, BufRead, Write};
use std::process;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use tierdb::{Error, Key, LsmTree, Result, TreeConfig, Value, TOMBSTONE};

/// Tiered LSM-tree storage engine
#[derive(Parser, Debug)]
#[command(name = "tierdb")]
#[command(about = "Tiered LSM-tree storage engine")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./tierdb")]
    dir: String,

    /// Write buffer capacity in entries
    #[arg(long, default_value_t = 1024)]
    buffer_capacity: usize,

    /// Number of on-disk levels
    #[arg(long, default_value_t = 5)]
    depth: usize,

    /// Runs per level and level-to-level size multiplier
    #[arg(long, default_value_t = 10)]
    fanout: usize,

    /// Worker threads for the read path
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Fraction of a level's run slots merged in one compaction step
    #[arg(long, default_value_t = 1.0)]
    merge_ratio: f64,
}

fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = TreeConfig::new(&args.dir)
        .buffer_capacity(args.buffer_capacity)
        .depth(args.depth)
        .fanout(args.fanout)
        .num_threads(args.threads)
        .merge_ratio(args.merge_ratio);

    let mut tree = match LsmTree::open_with_config(config) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        };
        match dispatch(&mut tree, &line, &mut stdout) {
            Ok(()) => {}
            // A malformed command is skipped; the tree is untouched.
            Err(Error::InvalidInput(msg)) => eprintln!("invalid input: {msg}"),
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        }
    }
}

fn dispatch(tree: &mut LsmTree, line: &str, out: &mut impl Write) -> Result<()> {
    let line = line.trim_start();
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(());
    };

    match command {
        "p" => {
            let key = parse_int::<Key>(parts.next(), "key")?;
            let value = parse_int::<Value>(parts.next(), "value")?;
            if value == TOMBSTONE {
                return Err(Error::InvalidInput(format!(
                    "value {value} is reserved"
                )));
            }
            tree.put(key, value)?;
        }
        "g" => {
            let key = parse_int::<Key>(parts.next(), "key")?;
            match tree.get(key)? {
                Some(value) => writeln!(out, "{value}")?,
                None => writeln!(out)?,
            }
            out.flush()?;
        }
        "r" => {
            let start = parse_int::<Key>(parts.next(), "start key")?;
            let end = parse_int::<Key>(parts.next(), "end key")?;
            let entries = tree.range(start, end)?;
            let pairs: Vec<String> = entries
                .iter()
                .map(|entry| format!("{}:{}", entry.key, entry.value))
                .collect();
            writeln!(out, "{}", pairs.join(" "))?;
            out.flush()?;
        }
        "d" => {
            let key = parse_int::<Key>(parts.next(), "key")?;
            tree.del(key)?;
        }
        "l" => {
            let raw = line[1..].trim();
            if raw.is_empty() {
                return Err(Error::InvalidInput("missing path".to_string()));
            }
            tree.load(raw.trim_matches('"'))?;
        }
        other => {
            return Err(Error::InvalidInput(format!(
                "unrecognized command '{other}'"
            )));
        }
    }
    Ok(())
}

fn parse_int<T: std::str::FromStr>(token: Option<&str>, what: &str) -> Result<T> {
    token
        .ok_or_else(|| Error::InvalidInput(format!("missing {what}")))?
        .parse()
        .map_err(|_| Error::InvalidInput(format!("malformed {what}")))
}
