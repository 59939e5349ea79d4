use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use log::{debug, info};

///////////////////////////////
/// A whitelist of expected barcodes. The label of an entry is what ends up in
/// the read name annotation; the sequence is what reads are matched against.
/// With the reverse-complement toggle the two differ in orientation.
#[derive(Debug, Clone)]
pub struct Whitelist {
    pub labels: Vec<String>,
    pub sequences: Vec<Vec<u8>>,
}

impl Whitelist {
    ///////////////////////////////
    /// Read a whitelist from file, optionally reverse-complementing the
    /// sequences to be matched. Plain text with one barcode per line, or a
    /// TSV with a header and a "sequence" column (optional "label" column).
    /// Compression is detected from the file content, not the extension
    pub fn read_file(path: &PathBuf, revcomp: bool) -> anyhow::Result<Whitelist> {
        let file = File::open(path)
            .with_context(|| format!("Could not open whitelist file {}", path.display()))?;
        let (reader, compression) = niffler::get_reader(Box::new(file))
            .with_context(|| format!("Could not read whitelist file {}", path.display()))?;
        debug!(
            "Opened whitelist {} with compression {:?}",
            path.display(),
            compression
        );

        let mut wl = if is_tsv(path) {
            Whitelist::from_tsv(reader)?
        } else {
            Whitelist::from_lines(reader)?
        };

        if wl.labels.is_empty() {
            bail!("Whitelist file {} contains no barcodes", path.display());
        }

        if revcomp {
            for seq in wl.sequences.iter_mut() {
                *seq = reverse_complement(seq);
            }
        }

        info!(
            "Read {} barcodes from {} (revcomp: {})",
            wl.labels.len(),
            path.display(),
            revcomp
        );
        Ok(wl)
    }

    ///////////////////////////////
    /// Parse a plain whitelist, one barcode sequence per line.
    /// The sequence doubles as the label
    pub fn from_lines(src: impl Read) -> anyhow::Result<Whitelist> {
        let mut labels: Vec<String> = Vec::new();
        let mut sequences: Vec<Vec<u8>> = Vec::new();

        let reader = BufReader::new(src);
        for line in reader.lines() {
            let line = line.context("Could not read whitelist line")?;
            let bc = line.trim();
            if bc.is_empty() {
                continue;
            }
            labels.push(bc.to_string());
            sequences.push(bc.as_bytes().to_vec());
        }
        Ok(Whitelist { labels, sequences })
    }

    ///////////////////////////////
    /// Parse a TSV whitelist with a header row
    pub fn from_tsv(src: impl Read) -> anyhow::Result<Whitelist> {
        let mut labels: Vec<String> = Vec::new();
        let mut sequences: Vec<Vec<u8>> = Vec::new();

        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(src);
        for result in reader.deserialize() {
            let row: WhitelistTsvRow = result.context("Malformed whitelist TSV row")?;
            let label = row.label.unwrap_or_else(|| row.sequence.clone());
            labels.push(label);
            sequences.push(row.sequence.into_bytes());
        }
        Ok(Whitelist { labels, sequences })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn is_tsv(path: &Path) -> bool {
    match path.extension() {
        Some(ext) => ext == "tsv",
        None => false,
    }
}

///////////////////////////////
/// One row in a TSV whitelist file
#[derive(Debug, serde::Deserialize, Eq, PartialEq)]
struct WhitelistTsvRow {
    label: Option<String>,
    sequence: String,
}

///////////////////////////////
/// Reverse complement of a nucleotide sequence.
/// Bases other than ACGT (upper or lower case) pass through unchanged
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'T' => b'A',
            b'G' => b'C',
            b'C' => b'G',
            b'a' => b't',
            b't' => b'a',
            b'g' => b'c',
            b'c' => b'g',
            other => other,
        })
        .collect()
}
