//! lectern - e-book ingestion tool

use std::process::ExitCode;

use clap::Parser;

use lectern::{Book, Ingestor, MemoryStore, extract_text};

#[derive(Parser)]
#[command(name = "lectern")]
#[command(version, about = "Ingest a packaged e-book and print its processed bundle", long_about = None)]
#[command(after_help = "EXAMPLES:
    lectern book.epub               Print the processed bundle as JSON
    lectern -i book.epub            Show archive metadata only")]
struct Cli {
    /// Input archive
    #[arg(value_name = "INPUT")]
    input: String,

    /// Book id to record in the bundle
    #[arg(long, default_value = "local")]
    book_id: String,

    /// Show archive metadata without processing
    #[arg(short, long)]
    info: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = if cli.info {
        show_info(&cli.input)
    } else {
        ingest(&cli.input, &cli.book_id)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn show_info(path: &str) -> Result<(), String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let extraction = extract_text(&bytes).map_err(|e| e.to_string())?;

    println!("File: {path}");
    if let Some(title) = &extraction.title {
        println!("Title: {title}");
    }
    if let Some(author) = &extraction.author {
        println!("Author: {author}");
    }
    println!("Documents: {}", extraction.document_count);
    println!("Characters: {}", extraction.text.chars().count());

    Ok(())
}

fn ingest(path: &str, book_id: &str) -> Result<(), String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;

    let ingestor = Ingestor::new(MemoryStore::new());
    let mut book = Book::new(book_id, path);
    let outcome = ingestor
        .ingest_archive(&mut book, &bytes)
        .map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(&outcome.bundle).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
