use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};

use crate::barcode::MatchResult;

///////////////////////////////
/// Running QC tallies for one matching job: total and passing read counts
/// plus a histogram of best-match distances for the primary barcode slot.
/// Bucket max_mismatches+1 collects everything beyond tolerance.
/// Purely additive; updated once per chunk by the controlling thread
#[derive(Debug, Clone)]
pub struct MatchQc {
    max_mismatches: u32,
    total_reads: u64,
    total_pass: u64,
    histogram: Vec<u64>,
}

impl MatchQc {
    pub fn new(max_mismatches: u32) -> MatchQc {
        MatchQc {
            max_mismatches,
            total_reads: 0,
            total_pass: 0,
            histogram: vec![0; max_mismatches as usize + 2],
        }
    }

    pub fn add_chunk(&mut self, results: &[MatchResult], mask: &[bool]) {
        assert_eq!(results.len(), mask.len());
        for (result, pass) in results.iter().zip(mask.iter()) {
            self.total_reads += 1;
            if *pass {
                self.total_pass += 1;
            }
            let bucket = result.best_dist.min(self.max_mismatches + 1) as usize;
            self.histogram[bucket] += 1;
        }
    }

    pub fn total_reads(&self) -> u64 {
        self.total_reads
    }

    pub fn total_pass(&self) -> u64 {
        self.total_pass
    }

    pub fn histogram(&self) -> &[u64] {
        &self.histogram
    }

    ///////////////////////////////
    /// Write the QC summary. The format is fixed and reproduced byte for
    /// byte between runs:
    ///
    ///   {pass}/{total} reads passing, ({pct}%)
    ///   <blank>
    ///   mismatches\treads
    ///   one line per distance bucket, then the >max overflow bucket
    pub fn write_report(&self, writer: &mut impl Write) -> anyhow::Result<()> {
        if self.total_reads == 0 {
            bail!("No reads were processed; refusing to write a QC report");
        }
        let pct = self.total_pass as f64 / self.total_reads as f64 * 100.0;

        writeln!(
            writer,
            "{}/{} reads passing, ({:.2}%)",
            self.total_pass, self.total_reads, pct
        )?;
        writeln!(writer)?;
        writeln!(writer, "mismatches\treads")?;
        for dist in 0..=self.max_mismatches {
            writeln!(writer, "{}\t{}", dist, self.histogram[dist as usize])?;
        }
        writeln!(
            writer,
            ">{}\t{}",
            self.max_mismatches,
            self.histogram[self.max_mismatches as usize + 1]
        )?;
        Ok(())
    }

    pub fn write_report_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Could not create QC report file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.write_report(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
