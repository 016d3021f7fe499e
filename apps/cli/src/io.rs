//! JSON Lines document source and record sink.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use color_eyre::eyre::{Result, WrapErr, eyre};
use serde::Serialize;

use enrichflow_core::SourceDocument;

/// Read one document per line.
///
/// A line is either `{"id": .., "body": {..}}` or a bare document object.
/// Blank lines are skipped.
pub(crate) fn read_documents(path: &Path) -> Result<Vec<SourceDocument>> {
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("cannot open input '{}'", path.display()))?;
    parse_documents(BufReader::new(file))
        .wrap_err_with(|| format!("cannot read documents from '{}'", path.display()))
}

fn parse_documents(reader: impl BufRead) -> Result<Vec<SourceDocument>> {
    let mut documents = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(&line).map_err(|e| eyre!("line {}: {e}", n + 1))?;
        documents.push(into_source(value));
    }
    Ok(documents)
}

fn into_source(value: serde_json::Value) -> SourceDocument {
    match value {
        serde_json::Value::Object(mut map) if map.contains_key("body") => {
            let id = match map.remove("id") {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            };
            let body = map.remove("body").unwrap_or_default();
            SourceDocument { id, body }
        }
        other => SourceDocument::new(other),
    }
}

/// Write one JSON value per line to `path`, or to stdout when `None`.
pub(crate) fn write_lines<T: Serialize>(path: Option<&Path>, items: &[T]) -> Result<()> {
    match path {
        Some(path) => {
            let file = std::fs::File::create(path)
                .wrap_err_with(|| format!("cannot create output '{}'", path.display()))?;
            let mut out = BufWriter::new(file);
            write_to(&mut out, items)?;
            out.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            write_to(&mut out, items)?;
            out.flush()?;
        }
    }
    Ok(())
}

fn write_to<T: Serialize>(out: &mut impl Write, items: &[T]) -> Result<()> {
    for item in items {
        serde_json::to_writer(&mut *out, item)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}
