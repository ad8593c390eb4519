use anyhow::{Context, Result};
use itertools::Itertools;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

/// Convert an io::error to a string and strip "(os error 4)" from the end.
fn io_error_to_string(err: &io::Error) -> String {
    let s = err.to_string();
    s.strip_suffix(&format!(" (os error {})", err.raw_os_error().unwrap_or(0)))
        .unwrap_or(&s)
        .to_string()
}

/// Print an error chain.
pub fn print_error_chain(err: &anyhow::Error) {
    let error_chain = err.chain().join("\n\tCaused by: ");
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        let io_err_str = io_error_to_string(io_err);
        match err.chain().len() {
            1 => eprintln!("ERROR: {io_err_str}"),
            2 => eprintln!("ERROR: {io_err_str}: {err}"),
            _ => eprintln!("ERROR: {error_chain}"),
        };
    } else {
        eprintln!("ERROR: {error_chain}");
    };
}

/// Open a CSV typed in at the bench.
pub fn open_csv(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    Ok(BufReader::new(file))
}

/// Write to `path`, or to stdout when no path is given.
pub fn output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| path.display().to_string())?,
        )),
        None => Box::new(io::stdout().lock()),
    })
}

/// Operator recorded on processes when none is given.
pub fn default_operator() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}
