//! Output formatting for ranked search results

use serde::Serialize;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// One ranked hit with its document resolved to a path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedHit {
    pub rank: usize,
    pub doc_id: u64,
    pub score: f64,
    /// None when the document has no recorded path
    pub path: Option<String>,
}

#[derive(Serialize)]
struct JsonResults<'a> {
    query: &'a str,
    total: usize,
    hits: &'a [ResolvedHit],
}

/// Print hits one per line: rank, score, then path
pub fn print_hits(hits: &[ResolvedHit], color: bool) -> io::Result<()> {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    let mut stdout = StandardStream::stdout(choice);
    write_hits(&mut stdout, hits)
}

/// Write hits to any color-aware writer
pub fn write_hits<W: WriteColor>(out: &mut W, hits: &[ResolvedHit]) -> io::Result<()> {
    for hit in hits {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(out, "{:>4}", hit.rank)?;
        out.reset()?;
        write!(out, "  ")?;

        out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        write!(out, "{:>8.4}", hit.score)?;
        out.reset()?;
        write!(out, "  ")?;

        match &hit.path {
            Some(path) => {
                out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
                writeln!(out, "{}", path)?;
                out.reset()?;
            }
            None => writeln!(out, "doc #{}", hit.doc_id)?,
        }
    }
    Ok(())
}

/// Print hits as a single JSON document
pub fn print_json(query: &str, hits: &[ResolvedHit]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    write_json(&mut lock, query, hits)
}

pub fn write_json<W: Write>(out: &mut W, query: &str, hits: &[ResolvedHit]) -> io::Result<()> {
    let results = JsonResults {
        query,
        total: hits.len(),
        hits,
    };
    serde_json::to_writer_pretty(&mut *out, &results)?;
    writeln!(out)
}
