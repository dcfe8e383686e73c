//! Simple CLI for the B+ tree storage engine.
//!
//! Usage:
//!   bpt_cli [--config <file.json>] <db_path> insert <key> <value>
//!   bpt_cli [--config <file.json>] <db_path> find <key>
//!   bpt_cli [--config <file.json>] <db_path> update <key> <value>
//!   bpt_cli [--config <file.json>] <db_path> delete <key>
//!   bpt_cli [--config <file.json>] <db_path> scan <begin> <end>
//!   bpt_cli [--config <file.json>] <db_path> bulk_insert <count>
//!   bpt_cli [--config <file.json>] <db_path> tree
//!   bpt_cli [--config <file.json>] <db_path> stats
//!
//! Set `RUST_LOG` (e.g. `RUST_LOG=bptree_storage=debug`) for engine logs on
//! stderr.

use bptree_storage::{status, Config, Db, StorageError, TableId, NON_TRANSACTIONAL};
use std::env;
use std::process::exit;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Usage: bpt_cli [--config <file.json>] <db_path> <command> [args...]");
    eprintln!("Commands:");
    eprintln!("  insert <key> <value>  - Insert a new record");
    eprintln!("  find <key>            - Print the value stored under a key");
    eprintln!("  update <key> <value>  - Overwrite a value in place (not longer than the old one)");
    eprintln!("  delete <key>          - Delete a record");
    eprintln!("  scan <begin> <end>    - Print records with begin <= key <= end");
    eprintln!("  bulk_insert <count>   - Insert keys 0..count with generated values");
    eprintln!("  tree                  - Print the tree as JSON");
    eprintln!("  stats                 - Show database and tree statistics");
    exit(1);
}

fn fail(e: StorageError) -> ! {
    eprintln!("ERROR: {}", e);
    exit(1);
}

fn parse_key(arg: Option<&String>) -> i64 {
    match arg.map(|s| s.parse::<i64>()) {
        Some(Ok(key)) => key,
        Some(Err(_)) => {
            eprintln!("ERROR: Invalid key");
            exit(1);
        }
        None => usage(),
    }
}

fn load_config(path: &str) -> Config {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("ERROR: Failed to read config {}: {}", path, e);
            exit(1);
        }
    };
    match serde_json::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: Invalid config {}: {}", path, e);
            exit(1);
        }
    }
}

fn run(db: &Db, table: TableId, command: &str, args: &[String]) -> i32 {
    match command {
        "insert" => {
            let key = parse_key(args.first());
            let value = args.get(1).unwrap_or_else(|| usage());
            let result = db.insert(table, key, value.as_bytes());
            match &result {
                Ok(()) => println!("OK"),
                Err(StorageError::DuplicateKey(_)) => println!("DUPLICATE"),
                Err(e) => eprintln!("ERROR: {}", e),
            }
            status(&result)
        }

        "find" => {
            let key = parse_key(args.first());
            match db.find(table, key, NON_TRANSACTIONAL) {
                Ok(Some(value)) => {
                    match String::from_utf8(value) {
                        Ok(s) => println!("{}", s),
                        Err(_) => println!("<binary data>"),
                    }
                    0
                }
                Ok(None) => {
                    println!("NOT_FOUND");
                    -1
                }
                Err(e) => fail(e),
            }
        }

        "update" => {
            let key = parse_key(args.first());
            let value = args.get(1).unwrap_or_else(|| usage());

            // Run as a one-statement transaction so the update is logged and locked.
            let trx = db.begin_transaction();
            let result = db
                .update(table, key, value.as_bytes(), trx)
                .and_then(|size| db.commit(trx).map(|_| size));
            match &result {
                Ok(size) => println!("OK (stored size {})", size),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    // Faults have already rolled the transaction back.
                    if e.is_logical() {
                        if let Err(abort) = db.abort(trx) {
                            tracing::error!(trx, error = %abort, "abort failed");
                        }
                    }
                }
            }
            status(&result)
        }

        "delete" => {
            let key = parse_key(args.first());
            let result = db.delete(table, key);
            match &result {
                Ok(()) => println!("DELETED"),
                Err(StorageError::KeyNotFound(_)) => println!("NOT_FOUND"),
                Err(e) => eprintln!("ERROR: {}", e),
            }
            status(&result)
        }

        "scan" => {
            let begin = parse_key(args.first());
            let end = parse_key(args.get(1));
            match db.scan(table, begin, end) {
                Ok(records) => {
                    println!("COUNT: {}", records.len());
                    for record in records {
                        println!(
                            "{} -> {} ({} bytes)",
                            record.key,
                            String::from_utf8_lossy(&record.value),
                            record.size()
                        );
                    }
                    0
                }
                Err(e) => fail(e),
            }
        }

        "bulk_insert" => {
            let count: i64 = match args.first().map(|s| s.parse()) {
                Some(Ok(n)) => n,
                Some(Err(_)) => {
                    eprintln!("ERROR: Invalid count");
                    exit(1);
                }
                None => usage(),
            };

            let start = std::time::Instant::now();
            for key in 0..count {
                let value = format!("value_{}", key);
                if let Err(e) = db.insert(table, key, value.as_bytes()) {
                    eprintln!("ERROR at {}: {}", key, e);
                    return -1;
                }
            }
            let elapsed = start.elapsed();

            if let Err(e) = db.flush() {
                fail(e);
            }

            let ops_per_sec = count as f64 / elapsed.as_secs_f64();
            println!("INSERTED: {}", count);
            println!("TIME_MS: {}", elapsed.as_millis());
            println!("OPS_PER_SEC: {:.0}", ops_per_sec);
            0
        }

        "tree" => match db.export_tree(table) {
            Ok(Some(root)) => match serde_json::to_string_pretty(&root) {
                Ok(json) => {
                    println!("{}", json);
                    0
                }
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    -1
                }
            },
            Ok(None) => {
                println!("EMPTY");
                0
            }
            Err(e) => fail(e),
        },

        "stats" => {
            let summary = match db.verify(table) {
                Ok(summary) => summary,
                Err(e) => fail(e),
            };
            let stats = db.stats();
            println!("tree_height: {}", summary.height);
            println!("records: {}", summary.records);
            println!("leaf_pages: {}", summary.leaves);
            println!("internal_pages: {}", summary.internals);
            println!("buffer_pool_size: {}", stats.buffer_pool_size);
            println!("resident_pages: {}", stats.resident_pages);
            println!("dirty_pages: {}", stats.dirty_pages);
            0
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            usage();
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut config = Config::new();
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            usage();
        }
        config = load_config(&args[1]);
        args.drain(..2);
    }
    if args.len() < 2 {
        usage();
    }

    let db = match Db::open(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: Failed to open database: {}", e);
            exit(1);
        }
    };
    let table = match db.open_table(&args[0]) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("ERROR: Failed to open table: {}", e);
            exit(1);
        }
    };

    let code = run(&db, table, &args[1], &args[2..]);

    // Ensure data is persisted
    if let Err(e) = db.close() {
        eprintln!("Warning: Failed to close: {}", e);
    }
    if code != 0 {
        exit(1);
    }
}
