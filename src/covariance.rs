//! Reference covariance blocks keyed by gene.
//!
//! Input is a whitespace-delimited, optionally gzipped table with header
//! `GENE RSID1 RSID2 VALUE` and one row per variant pair. Rows of one gene
//! must be contiguous. The same layout, with model labels in place of
//! variant ids, carries precomputed model-by-model products.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::Array2;
use tracing::{debug, info};

use crate::error::MetaxcanError;
use crate::io::{is_missing_token, open_text_reader, parse_number};
use crate::qc::check_file_exists;
use crate::types::{CovCell, CovarianceRow};

/// Sequential reader of covariance rows with line tracking.
pub struct CovarianceRowReader<R: BufRead> {
    reader: R,
    path: PathBuf,
    line: usize,
    buf: String,
}

impl<R: BufRead> CovarianceRowReader<R> {
    pub fn new(mut reader: R, path: &Path) -> Result<Self> {
        let mut header = String::new();
        reader
            .read_line(&mut header)
            .with_context(|| format!("read {}", path.display()))?;
        let fields: Vec<&str> = header.split_whitespace().collect();
        let valid = fields.len() == 4
            && fields[0].eq_ignore_ascii_case("GENE")
            && fields[3].eq_ignore_ascii_case("VALUE");
        if !valid {
            return Err(MetaxcanError::InputFormat {
                file: path.to_path_buf(),
                line: 1,
                message: format!(
                    "malformed header {:?}; expected GENE RSID1 RSID2 VALUE",
                    header.trim()
                ),
            }
            .into());
        }
        Ok(Self {
            reader,
            path: path.to_path_buf(),
            line: 1,
            buf: String::new(),
        })
    }

    pub fn next_row(&mut self) -> Result<Option<CovarianceRow>> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_line(&mut self.buf)
                .with_context(|| format!("read {}", self.path.display()))?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;
            let fields: Vec<&str> = self.buf.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() != 4 {
                return Err(self.format_error(format!(
                    "expected 4 fields, found {}",
                    fields.len()
                )));
            }
            let value = match parse_number(fields[3]) {
                Some(v) if v.is_finite() => CovCell::Real(v),
                Some(_) => CovCell::Missing,
                None if is_missing_token(fields[3]) => CovCell::Missing,
                None => {
                    return Err(
                        self.format_error(format!("value {:?} is not a number", fields[3]))
                    );
                }
            };
            return Ok(Some(CovarianceRow {
                gene: fields[0].to_string(),
                variant1: fields[1].to_string(),
                variant2: fields[2].to_string(),
                value,
            }));
        }
    }

    fn format_error(&self, message: String) -> anyhow::Error {
        MetaxcanError::InputFormat {
            file: self.path.clone(),
            line: self.line,
            message,
        }
        .into()
    }
}

/// Accumulates the rows of one gene in order of first appearance.
struct BlockBuilder {
    gene: String,
    variants: Vec<String>,
    index: HashMap<String, usize>,
    cells: HashMap<(usize, usize), CovCell>,
}

impl BlockBuilder {
    fn new(gene: &str) -> Self {
        Self {
            gene: gene.to_string(),
            variants: Vec::new(),
            index: HashMap::new(),
            cells: HashMap::new(),
        }
    }

    fn position(&mut self, variant: &str) -> usize {
        if let Some(&i) = self.index.get(variant) {
            return i;
        }
        let i = self.variants.len();
        self.variants.push(variant.to_string());
        self.index.insert(variant.to_string(), i);
        i
    }

    fn push(&mut self, row: CovarianceRow, path: &Path) -> Result<()> {
        let i = self.position(&row.variant1);
        let j = self.position(&row.variant2);
        if self.cells.insert((i, j), row.value).is_some() {
            return Err(MetaxcanError::DuplicateEntry {
                entry: format!("{} {} {}", row.gene, row.variant1, row.variant2),
                file: path.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }

    fn finish(self) -> CovarianceBlock {
        let n = self.variants.len();
        let cell = |i: usize, j: usize| -> Option<f64> {
            self.cells
                .get(&(i, j))
                .or_else(|| self.cells.get(&(j, i)))
                .and_then(|c| c.value())
        };

        let mut keep: Vec<bool> = (0..n)
            .map(|i| cell(i, i).is_some_and(|v| v >= 0.0))
            .collect();
        loop {
            let mut worst: Option<(usize, usize)> = None;
            for i in (0..n).filter(|&i| keep[i]) {
                let missing = (0..n)
                    .filter(|&j| keep[j] && cell(i, j).is_none())
                    .count();
                if missing > 0 && worst.is_none_or(|(_, m)| missing >= m) {
                    worst = Some((i, missing));
                }
            }
            match worst {
                Some((i, _)) => keep[i] = false,
                None => break,
            }
        }

        let kept: Vec<usize> = (0..n).filter(|&i| keep[i]).collect();
        if kept.len() < n {
            debug!(
                "{}: dropped {} variant(s) with missing covariance",
                self.gene,
                n - kept.len()
            );
        }
        let k = kept.len();
        let matrix = Array2::from_shape_fn((k, k), |(a, b)| {
            cell(kept[a], kept[b]).unwrap_or(f64::NAN)
        });
        let variants: Vec<String> = kept.iter().map(|&i| self.variants[i].clone()).collect();
        CovarianceBlock::new(self.gene.clone(), variants, matrix)
    }
}

/// A gene's covariance over the variants with complete, finite entries.
#[derive(Debug, Clone)]
pub struct CovarianceBlock {
    gene: String,
    variants: Vec<String>,
    index: HashMap<String, usize>,
    matrix: Array2<f64>,
}

/// Variant ids and the matching square submatrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceSelection {
    pub variants: Vec<String>,
    pub matrix: Array2<f64>,
}

/// Row and column variant ids with the rectangular cross-covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct PairSelection {
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    pub matrix: Array2<f64>,
}

impl CovarianceBlock {
    pub fn new(gene: String, variants: Vec<String>, matrix: Array2<f64>) -> Self {
        let index = variants
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i))
            .collect();
        Self {
            gene,
            variants,
            index,
            matrix,
        }
    }

    pub fn gene(&self) -> &str {
        &self.gene
    }

    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    fn positions(&self, wanted: &[String]) -> Vec<usize> {
        let wanted: HashSet<&str> = wanted.iter().map(|s| s.as_str()).collect();
        (0..self.variants.len())
            .filter(|&i| wanted.contains(self.variants[i].as_str()))
            .collect()
    }

    /// Submatrix over `whitelist` in block order; with `strict`, every
    /// whitelisted id must be present.
    pub fn select(&self, whitelist: Option<&[String]>, strict: bool) -> Result<CovarianceSelection> {
        let Some(whitelist) = whitelist else {
            return Ok(CovarianceSelection {
                variants: self.variants.clone(),
                matrix: self.matrix.clone(),
            });
        };
        if strict
            && let Some(missing) = whitelist.iter().find(|v| !self.index.contains_key(*v))
        {
            return Err(MetaxcanError::VariantNotInBlock {
                gene: self.gene.clone(),
                variant: missing.clone(),
            }
            .into());
        }
        let pos = self.positions(whitelist);
        let matrix = Array2::from_shape_fn((pos.len(), pos.len()), |(a, b)| {
            self.matrix[[pos[a], pos[b]]]
        });
        Ok(CovarianceSelection {
            variants: pos.iter().map(|&i| self.variants[i].clone()).collect(),
            matrix,
        })
    }

    pub fn select_pair(&self, rows: &[String], columns: &[String]) -> PairSelection {
        let rpos = self.positions(rows);
        let cpos = self.positions(columns);
        let matrix = Array2::from_shape_fn((rpos.len(), cpos.len()), |(a, b)| {
            self.matrix[[rpos[a], cpos[b]]]
        });
        PairSelection {
            rows: rpos.iter().map(|&i| self.variants[i].clone()).collect(),
            columns: cpos.iter().map(|&i| self.variants[i].clone()).collect(),
            matrix,
        }
    }
}

/// Per-gene covariance lookup shared by both backends.
pub trait CovarianceStore {
    /// `None` when the store holds no block for `gene`.
    fn get(
        &mut self,
        gene: &str,
        whitelist: Option<&[String]>,
        strict: bool,
    ) -> Result<Option<CovarianceSelection>>;

    fn get_pair(
        &mut self,
        gene: &str,
        rows: &[String],
        columns: &[String],
    ) -> Result<Option<PairSelection>>;
}

/// Every block of a covariance file, indexed by gene.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCovariance {
    genes: Vec<String>,
    blocks: HashMap<String, CovarianceBlock>,
}

impl InMemoryCovariance {
    pub fn load(path: &Path) -> Result<Self> {
        check_file_exists(path, "covariance")?;
        let reader = open_text_reader(path)?;
        let mut stream = BlockStream::new(CovarianceRowReader::new(reader, path)?, path);
        let mut store = Self::default();
        while let Some(block) = stream.next_block()? {
            store.genes.push(block.gene.clone());
            store.blocks.insert(block.gene.clone(), block);
        }
        info!(
            "Loaded covariance for {} genes from {}",
            store.genes.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn from_blocks(blocks: Vec<CovarianceBlock>) -> Self {
        let mut store = Self::default();
        for block in blocks {
            store.genes.push(block.gene.clone());
            store.blocks.insert(block.gene.clone(), block);
        }
        store
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn block(&self, gene: &str) -> Option<&CovarianceBlock> {
        self.blocks.get(gene)
    }
}

impl CovarianceStore for InMemoryCovariance {
    fn get(
        &mut self,
        gene: &str,
        whitelist: Option<&[String]>,
        strict: bool,
    ) -> Result<Option<CovarianceSelection>> {
        self.blocks
            .get(gene)
            .map(|b| b.select(whitelist, strict))
            .transpose()
    }

    fn get_pair(
        &mut self,
        gene: &str,
        rows: &[String],
        columns: &[String],
    ) -> Result<Option<PairSelection>> {
        Ok(self.blocks.get(gene).map(|b| b.select_pair(rows, columns)))
    }
}

/// Groups contiguous rows into blocks, rejecting a gene that reappears.
struct BlockStream<R: BufRead> {
    rows: CovarianceRowReader<R>,
    path: PathBuf,
    pending: Option<CovarianceRow>,
    finished: HashSet<String>,
}

impl<R: BufRead> BlockStream<R> {
    fn new(rows: CovarianceRowReader<R>, path: &Path) -> Self {
        Self {
            rows,
            path: path.to_path_buf(),
            pending: None,
            finished: HashSet::new(),
        }
    }

    fn next_block(&mut self) -> Result<Option<CovarianceBlock>> {
        let first = match self.pending.take() {
            Some(row) => row,
            None => match self.rows.next_row()? {
                Some(row) => row,
                None => return Ok(None),
            },
        };
        if self.finished.contains(&first.gene) {
            return Err(MetaxcanError::UncontiguousCovariance {
                gene: first.gene,
                file: self.path.clone(),
            }
            .into());
        }
        let mut builder = BlockBuilder::new(&first.gene);
        builder.push(first, &self.path)?;
        while let Some(row) = self.rows.next_row()? {
            if row.gene != builder.gene {
                self.pending = Some(row);
                break;
            }
            builder.push(row, &self.path)?;
        }
        self.finished.insert(builder.gene.clone());
        Ok(Some(builder.finish()))
    }

    fn has_finished(&self, gene: &str) -> bool {
        self.finished.contains(gene)
    }
}

/// Forward-only cursor holding one gene's block at a time.
pub struct StreamedCovariance {
    stream: BlockStream<Box<dyn BufRead>>,
    current: Option<CovarianceBlock>,
}

impl StreamedCovariance {
    pub fn open(path: &Path) -> Result<Self> {
        check_file_exists(path, "covariance")?;
        let reader = open_text_reader(path)?;
        let rows = CovarianceRowReader::new(reader, path)?;
        Ok(Self {
            stream: BlockStream::new(rows, path),
            current: None,
        })
    }

    /// Moves to the next block in the stream and returns its gene.
    pub fn next_gene(&mut self) -> Result<Option<String>> {
        self.current = self.stream.next_block()?;
        Ok(self.current.as_ref().map(|b| b.gene.clone()))
    }

    /// Moves forward to `gene`'s block; `None` if the stream ends first.
    pub fn advance_to(&mut self, gene: &str) -> Result<Option<&CovarianceBlock>> {
        if self.current.as_ref().is_some_and(|b| b.gene == gene) {
            return Ok(self.current.as_ref());
        }
        if self.stream.has_finished(gene) {
            return Err(MetaxcanError::GeneNotInStream(gene.to_string()).into());
        }
        loop {
            match self.stream.next_block()? {
                Some(block) if block.gene == gene => {
                    self.current = Some(block);
                    return Ok(self.current.as_ref());
                }
                Some(_) => continue,
                None => {
                    self.current = None;
                    return Ok(None);
                }
            }
        }
    }
}

impl CovarianceStore for StreamedCovariance {
    fn get(
        &mut self,
        gene: &str,
        whitelist: Option<&[String]>,
        strict: bool,
    ) -> Result<Option<CovarianceSelection>> {
        self.advance_to(gene)?
            .map(|b| b.select(whitelist, strict))
            .transpose()
    }

    fn get_pair(
        &mut self,
        gene: &str,
        rows: &[String],
        columns: &[String],
    ) -> Result<Option<PairSelection>> {
        Ok(self.advance_to(gene)?.map(|b| b.select_pair(rows, columns)))
    }
}

/// Covariance backend chosen at startup.
pub enum CovarianceBackend {
    InMemory(InMemoryCovariance),
    Streamed(StreamedCovariance),
}

impl CovarianceBackend {
    pub fn open(path: &Path, streamed: bool) -> Result<Self> {
        if streamed {
            Ok(CovarianceBackend::Streamed(StreamedCovariance::open(path)?))
        } else {
            Ok(CovarianceBackend::InMemory(InMemoryCovariance::load(path)?))
        }
    }

    /// Calls `visit` once per gene of `genes`.
    ///
    /// In memory the order is that of `genes`. A stream is walked forward and
    /// wanted genes are visited as their blocks appear; genes the stream never
    /// carried follow in `genes` order.
    pub fn for_each_gene<F>(&mut self, genes: &[String], mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &mut dyn CovarianceStore) -> Result<()>,
    {
        match self {
            CovarianceBackend::InMemory(store) => {
                for gene in genes {
                    visit(gene, store)?;
                }
            }
            CovarianceBackend::Streamed(store) => {
                let wanted: HashSet<&str> = genes.iter().map(|g| g.as_str()).collect();
                let mut done: HashSet<String> = HashSet::new();
                while let Some(gene) = store.next_gene()? {
                    if wanted.contains(gene.as_str()) && done.insert(gene.clone()) {
                        visit(&gene, store)?;
                    }
                }
                for gene in genes {
                    if !done.contains(gene) {
                        visit(gene, store)?;
                    }
                }
            }
        }
        Ok(())
    }
}
