use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use polars::prelude::*;
use tempfile::NamedTempFile;
use tracing::info;

/// How a delimited text table is laid out on disk.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// `None` detects tab, comma or whitespace from the header line.
    pub separator: Option<u8>,
    /// Lines to drop before the header.
    pub skip_rows: usize,
}

fn compression(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Opens a plain, gzip or bzip2 text file for line reading.
pub fn open_text_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader: Box<dyn Read> = match compression(path).as_str() {
        "gz" => Box::new(MultiGzDecoder::new(file)),
        "bz2" => Box::new(BzDecoder::new(file)),
        _ => Box::new(file),
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Reads a header-carrying table with every column kept as text.
///
/// Missing tokens (`NA`, `NaN`, `.` and empty fields) come back as nulls so
/// that callers decide how each column is parsed.
pub fn read_table(path: &Path, options: &TableOptions) -> Result<DataFrame> {
    let separator = match options.separator {
        Some(sep) => sep,
        None => detect_delimiter(path, options.skip_rows)?,
    };

    let decompressed = match compression(path).as_str() {
        "gz" | "bz2" => Some(decompress_to_temp(path)?),
        _ => None,
    };
    let source = decompressed.as_ref().map_or(path, |tmp| tmp.path());
    if separator == b' ' {
        let tmp = whitespace_to_tabs(source, options.skip_rows)?;
        return read_table_plain(tmp.path(), b'\t', 0);
    }
    read_table_plain(source, separator, options.skip_rows)
}

fn read_table_plain(path: &Path, separator: u8, skip_rows: usize) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_skip_rows(skip_rows)
        .with_infer_schema_length(Some(0))
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(separator)
                .with_null_values(Some(NullValues::AllColumns(vec![
                    "".into(),
                    "NA".into(),
                    "NaN".into(),
                    ".".into(),
                ])))
                .with_missing_is_null(true),
        )
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("read {}", path.display()))?;
    Ok(df)
}

fn detect_delimiter(path: &Path, skip_rows: usize) -> Result<u8> {
    let mut reader = open_text_reader(path)?;
    let mut first = String::new();
    for _ in 0..=skip_rows {
        first.clear();
        reader.read_line(&mut first)?;
    }
    if first.contains('\t') {
        return Ok(b'\t');
    }
    if first.contains(',') {
        return Ok(b',');
    }
    Ok(b' ')
}

fn decompress_to_temp(path: &Path) -> Result<NamedTempFile> {
    let mut reader = open_text_reader(path)?;
    let mut tmp = NamedTempFile::new()?;
    std::io::copy(&mut reader, &mut tmp)
        .with_context(|| format!("decompress {}", path.display()))?;
    tmp.flush()?;
    Ok(tmp)
}

/// Rewrites a whitespace-delimited table as tab-separated, dropping blank lines.
fn whitespace_to_tabs(path: &Path, skip_rows: usize) -> Result<NamedTempFile> {
    let reader = open_text_reader(path)?;
    let tmp = NamedTempFile::new()?;
    let mut writer = BufWriter::new(tmp.as_file());
    for line in reader.lines().skip(skip_rows) {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        let fields = split_whitespace_fields(&line);
        if fields.is_empty() {
            continue;
        }
        writeln!(writer, "{}", fields.join("\t"))?;
    }
    writer.flush()?;
    drop(writer);
    Ok(tmp)
}

/// Splits on whitespace runs outside double quotes; `\"` is a literal quote.
fn split_whitespace_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.next_if_eq(&'"').is_some() => field.push('"'),
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !field.is_empty() {
                    fields.push(std::mem::take(&mut field));
                }
            }
            c => field.push(c),
        }
    }
    if !field.is_empty() {
        fields.push(field);
    }
    fields
}

pub fn is_missing_token(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed == "."
        || trimmed.eq_ignore_ascii_case("NA")
        || trimmed.eq_ignore_ascii_case("NAN")
}

/// Parses a numeric field, accepting decimal commas; missing tokens give `None`.
pub fn parse_number(value: &str) -> Option<f64> {
    if is_missing_token(value) {
        return None;
    }
    let trimmed = value.trim();
    if trimmed.contains(',') {
        trimmed.replace(',', ".").parse::<f64>().ok()
    } else {
        trimmed.parse::<f64>().ok()
    }
}

/// Text values of a column, one entry per row.
pub fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df
        .column(name)
        .with_context(|| format!("column {name}"))?
        .as_series()
        .with_context(|| format!("column {name}"))?
        .cast(&DataType::String)?;
    let values = series.str()?;
    Ok(values
        .into_iter()
        .map(|v| v.map(|s| s.trim().to_string()))
        .collect())
}

pub fn number_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    Ok(string_column(df, name)?
        .into_iter()
        .map(|v| v.as_deref().and_then(parse_number))
        .collect())
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Returns `false` when the target exists and must not be replaced.
pub fn should_write(path: &Path, overwrite: bool) -> bool {
    if path.exists() && !overwrite {
        info!(
            "{} already exists and overwrite is not set; skipping",
            path.display()
        );
        return false;
    }
    true
}

/// Writes a table next to its target and renames it into place.
pub fn write_dataframe(df: &mut DataFrame, path: &Path, separator: u8) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        CsvWriter::new(&mut writer)
            .include_header(true)
            .with_separator(separator)
            .with_null_value("NA".to_string())
            .finish(df)?;
        writer.flush()?;
    }
    tmp.persist(path)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
