//! Interactive driver for shaledb.
//!
//! A small shell over the store plus a binary workload replayer. Workload
//! files are packed little-endian records: `op: u8` (0 = insert, 1 = delete),
//! `key: i64`, `value: i64` (ignored for deletes).

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Write};
use std::process::ExitCode;
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt};

use shaledb::{Config, Key, LsmTree, Result, Value};

const OP_INSERT: u8 = 0;
const OP_DELETE: u8 = 1;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let dir = std::env::args().nth(1).unwrap_or_else(|| "./shaledb".into());
    match repl(&dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("shale: {err}");
            ExitCode::FAILURE
        }
    }
}

fn repl(dir: &str) -> Result<()> {
    let mut store = LsmTree::open(Config::new(dir))?;
    println!("shaledb at {dir}, type 'help' for commands");

    let mut input = String::new();
    loop {
        print!("shale> ");
        io::stdout().flush()?;

        input.clear();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(()); // EOF
        }
        let parts: Vec<&str> = input.trim().split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "help" | "?" => print_help(),
            "quit" | "q" => return Ok(()),

            "put" | "p" => match parse_kv(&parts[1..]) {
                Some((key, value)) => store.insert(key, value)?,
                None => println!("usage: put <key> <value>"),
            },

            "get" | "g" => match parse_key(&parts[1..]) {
                Some(key) => match store.get(key)? {
                    Some(value) => println!("{value}"),
                    None => println!("(not found)"),
                },
                None => println!("usage: get <key>"),
            },

            "del" | "d" => match parse_key(&parts[1..]) {
                Some(key) => store.delete(key)?,
                None => println!("usage: del <key>"),
            },

            "range" | "r" => match parse_kv(&parts[1..]) {
                Some((lo, hi)) => {
                    let pairs = store.range(lo, hi)?;
                    for pair in &pairs {
                        print!("{pair} ");
                    }
                    println!("({} keys)", pairs.len());
                }
                None => println!("usage: range <lo> <hi>"),
            },

            "size" => println!("{}", store.size()?),
            "buffer" => println!("{}", store.buffer_len()?),
            "stats" => store.print_stats()?,
            "dump" => store.print_elts()?,

            "load" => match parts.get(1) {
                Some(path) => {
                    let start = Instant::now();
                    let applied = load_workload(&mut store, path)?;
                    println!("applied {applied} ops in {:?}", start.elapsed());
                }
                None => println!("usage: load <file>"),
            },

            other => println!("unknown command '{other}', try 'help'"),
        }
    }
}

/// Replay a packed binary workload file against the store.
fn load_workload(store: &mut LsmTree, path: &str) -> Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut applied = 0u64;
    loop {
        let op = match reader.read_u8() {
            Ok(op) => op,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        };
        let key = reader.read_i64::<LittleEndian>()?;
        let value = reader.read_i64::<LittleEndian>()?;
        match op {
            OP_INSERT => store.insert(key, value)?,
            OP_DELETE => store.delete(key)?,
            other => {
                eprintln!("skipping unknown op {other} at record {applied}");
                continue;
            }
        }
        applied += 1;
    }
    Ok(applied)
}

fn parse_key(parts: &[&str]) -> Option<Key> {
    parts.first()?.parse().ok()
}

fn parse_kv(parts: &[&str]) -> Option<(Key, Value)> {
    Some((parts.first()?.parse().ok()?, parts.get(1)?.parse().ok()?))
}

fn print_help() {
    println!("commands:");
    println!("  put <key> <value>   insert or overwrite a pair");
    println!("  get <key>           point lookup");
    println!("  del <key>           delete a key");
    println!("  range <lo> <hi>     all live pairs with lo <= key < hi");
    println!("  size                number of live keys");
    println!("  buffer              records buffered in memory");
    println!("  stats               summary statistics and full dump");
    println!("  dump                dump every run, tier by tier");
    println!("  load <file>         replay a packed binary workload");
    println!("  quit                exit");
}
