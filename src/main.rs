// Hour Bank - Admin CLI
// Schema initialization and record counts; the API server lives in
// bin/server.rs.

use anyhow::Result;
use rusqlite::Connection;
use std::env;
use std::path::PathBuf;

use hour_bank::{collection_counts, setup_database};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(),
        Some("status") => run_status(),
        _ => {
            eprintln!("Usage: hour-bank <init|status>");
            eprintln!("  init    create the database schema at DATABASE_PATH");
            eprintln!("  status  print record counts per collection");
            std::process::exit(2);
        }
    }
}

// The CLI never signs tokens, so it reads DATABASE_PATH directly instead
// of loading the full config.
fn database_path() -> PathBuf {
    env::var("DATABASE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("hour_bank.db"))
}

fn run_init() -> Result<()> {
    let db_path = database_path();

    println!("Initializing database at {:?}...", db_path);
    let conn = Connection::open(&db_path)?;
    setup_database(&conn)?;
    println!("✓ Schema ready (WAL mode enabled)");

    Ok(())
}

fn run_status() -> Result<()> {
    let db_path = database_path();

    if !db_path.exists() {
        eprintln!("Database not found at {:?}", db_path);
        eprintln!("Run: hour-bank init");
        std::process::exit(1);
    }

    let conn = Connection::open(&db_path)?;
    let counts = collection_counts(&conn)?;

    println!("Hour Bank status for {:?}", db_path);
    println!("  students:     {}", counts.students);
    println!("  faculty:      {}", counts.faculty);
    println!("  programs:     {}", counts.programs);
    println!("  transactions: {}", counts.transactions);

    Ok(())
}
