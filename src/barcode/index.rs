use std::collections::HashMap;

use anyhow::bail;
use itertools::Itertools;
use log::debug;

use crate::barcode::Whitelist;

///////////////////////////////
/// Outcome of matching one query against the whitelist. Distances are Hamming
/// mismatch counts, capped at max_mismatches+2 which doubles as the "nothing
/// nearby" sentinel. second_dist >= best_dist always holds; an ambiguous
/// match shows up as second_dist == best_dist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub best: Option<u32>,
    pub best_dist: u32,
    pub second_dist: u32,
}

impl Default for MatchResult {
    fn default() -> MatchResult {
        MatchResult {
            best: None,
            best_dist: u32::MAX,
            second_dist: u32::MAX,
        }
    }
}

///////////////////////////////
/// Mismatch-tolerant index over a whitelist of fixed-length barcodes.
///
/// Classic pigeonhole seeding: each barcode is cut into a number of
/// subsequence partitions and hashed per partition. A query within the
/// mismatch tolerance must match at least one partition exactly, so the
/// candidate set from the partition buckets is guaranteed complete for any
/// distance below the partition count. Exact Hamming distance is then
/// computed per candidate only, keeping queries sublinear in whitelist size.
///
/// Immutable after construction, safe to share across worker threads
#[derive(Debug, Clone)]
pub struct BarcodeIndex {
    labels: Vec<String>,
    sequences: Vec<Vec<u8>>,
    seq_len: usize,
    max_mismatches: u32,

    // partition boundaries, and one subsequence->entries map per partition
    parts: Vec<(usize, usize)>,
    buckets: Vec<HashMap<Vec<u8>, Vec<u32>>>,
}

impl BarcodeIndex {
    ///////////////////////////////
    /// Build the index. subsequence_count tunes the seeding granularity; it
    /// is raised to max_mismatches+1 if needed so that every whitelist entry
    /// within tolerance is always found (pigeonhole guarantee)
    pub fn build(
        whitelist: &Whitelist,
        max_mismatches: u32,
        subsequence_count: usize,
    ) -> anyhow::Result<BarcodeIndex> {
        if whitelist.is_empty() {
            bail!("Cannot build a barcode index from an empty whitelist");
        }

        let seq_len = whitelist.sequences[0].len();
        for (label, seq) in whitelist.labels.iter().zip(whitelist.sequences.iter()) {
            if seq.len() != seq_len {
                bail!(
                    "Whitelist sequences have mixed lengths: barcode {} has length {}, expected {}",
                    label,
                    seq.len(),
                    seq_len
                );
            }
        }
        if seq_len == 0 {
            bail!("Whitelist contains an empty barcode sequence");
        }

        let n_parts = subsequence_count
            .max(max_mismatches as usize + 1)
            .min(seq_len)
            .max(1);
        let parts: Vec<(usize, usize)> = (0..n_parts)
            .map(|i| (i * seq_len / n_parts, (i + 1) * seq_len / n_parts))
            .collect();

        let mut buckets: Vec<HashMap<Vec<u8>, Vec<u32>>> = vec![HashMap::new(); n_parts];
        for (entry, seq) in whitelist.sequences.iter().enumerate() {
            for (p, &(from, to)) in parts.iter().enumerate() {
                buckets[p]
                    .entry(seq[from..to].to_vec())
                    .or_default()
                    .push(entry as u32);
            }
        }

        debug!(
            "Built barcode index: {} entries of length {}, {} partitions, tolerance {}",
            whitelist.len(),
            seq_len,
            n_parts,
            max_mismatches
        );

        Ok(BarcodeIndex {
            labels: whitelist.labels.clone(),
            sequences: whitelist.sequences.clone(),
            seq_len,
            max_mismatches,
            parts,
            buckets,
        })
    }

    ///////////////////////////////
    /// Nearest and second-nearest whitelist entry for one query. Ties are
    /// broken deterministically towards the first entry in whitelist order.
    /// Distances at or beyond max_mismatches+2 all collapse into that value
    pub fn query(&self, query: &[u8]) -> MatchResult {
        assert_eq!(
            query.len(),
            self.seq_len,
            "query length does not match indexed barcode length"
        );
        let sentinel = self.max_mismatches + 2;

        let mut candidates: Vec<u32> = Vec::new();
        for (p, &(from, to)) in self.parts.iter().enumerate() {
            if let Some(hits) = self.buckets[p].get(&query[from..to]) {
                candidates.extend_from_slice(hits);
            }
        }

        let mut best: Option<u32> = None;
        let mut best_dist = sentinel;
        let mut second_dist = sentinel;
        for entry in candidates.into_iter().sorted_unstable().dedup() {
            let d = hamming_capped(query, &self.sequences[entry as usize], sentinel);
            if d < best_dist {
                second_dist = best_dist;
                best_dist = d;
                best = Some(entry);
            } else if d < second_dist {
                second_dist = d;
            }
        }

        MatchResult {
            best,
            best_dist,
            second_dist,
        }
    }

    pub fn label(&self, entry: u32) -> &str {
        &self.labels[entry as usize]
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn max_mismatches(&self) -> u32 {
        self.max_mismatches
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

///////////////////////////////
/// Hamming distance, stopping early once the cap is reached
fn hamming_capped(a: &[u8], b: &[u8], cap: u32) -> u32 {
    let mut d = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            d += 1;
            if d >= cap {
                return cap;
            }
        }
    }
    d
}
