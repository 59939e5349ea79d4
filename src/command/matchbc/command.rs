use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Args;

use crate::barcode::{BarcodeIndex, Whitelist};
use crate::command::matchbc::core::{BarcodeSlot, MatchParams, MatchPipeline};
use crate::fileformat::FastqStreamSet;

pub const DEFAULT_NAME_TEMPLATE: &str = "{read_name} CB:Z:{cell}";

///////////////////////////////
/// Match the cell barcode read of a FASTQ triple against a whitelist,
/// keeping only read pairs with an unambiguous match within tolerance
#[derive(Args)]
pub struct MatchBarcodes {
    #[arg(long = "r1", value_parser)]
    pub path_r1: PathBuf,
    /// The read carrying the cell barcode (often R2 of a triple)
    #[arg(long = "bc", value_parser)]
    pub path_bc: PathBuf,
    #[arg(long = "r2", value_parser)]
    pub path_r2: PathBuf,

    /// Barcode whitelist: one sequence per line, or a TSV with a
    /// label/sequence header. May be gzipped
    #[arg(long = "whitelist", value_parser)]
    pub path_whitelist: PathBuf,
    /// Match against the reverse complement of the whitelist
    #[arg(long = "revcomp")]
    pub revcomp: bool,
    /// File containing 0 or 1; overrides --revcomp (workflow managers
    /// prefer writing this to a file)
    #[arg(long = "revcomp-file", value_parser)]
    pub revcomp_file: Option<PathBuf>,

    /// Maximum allowed mismatches for a barcode to count as a hit
    #[arg(long = "max-dist", default_value_t = 1)]
    pub max_dist: u32,
    /// 0-based position of the barcode on the barcode read
    #[arg(long = "offset", default_value_t = 0)]
    pub offset: usize,
    /// Number of index subsequence partitions used for candidate pruning
    #[arg(long = "subsequences", default_value_t = 2)]
    pub subsequence_count: usize,
    #[arg(long = "chunk-size", default_value_t = 10000)]
    pub chunk_size: usize,

    #[arg(long = "out-r1", value_parser)]
    pub path_out_r1: PathBuf,
    #[arg(long = "out-r2", value_parser)]
    pub path_out_r2: PathBuf,
    /// QC summary with pass counts and the mismatch histogram
    #[arg(long = "qc", value_parser)]
    pub path_qc: PathBuf,

    #[arg(long = "name-template", default_value = DEFAULT_NAME_TEMPLATE)]
    pub name_template: String,
    #[arg(short = 't', long = "threads", value_parser = clap::value_parser!(usize))]
    threads_work: Option<usize>,
}

impl MatchBarcodes {
    pub fn try_execute(&mut self) -> Result<()> {
        verify_input_fq_file(&self.path_r1)?;
        verify_input_fq_file(&self.path_bc)?;
        verify_input_fq_file(&self.path_r2)?;

        let revcomp = self.resolve_revcomp()?;
        let threads_work = self.resolve_thread_config()?;

        let whitelist = Whitelist::read_file(&self.path_whitelist, revcomp)?;
        let index = Arc::new(BarcodeIndex::build(
            &whitelist,
            self.max_dist,
            self.subsequence_count,
        )?);

        let mut streams = FastqStreamSet::new();
        streams.add_stream("R1", &self.path_r1, Some(&self.path_out_r1))?;
        streams.add_stream("BC", &self.path_bc, None)?;
        streams.add_stream("R2", &self.path_r2, Some(&self.path_out_r2))?;

        let slots = vec![BarcodeSlot {
            name: "cell".to_string(),
            stream: "BC".to_string(),
            offset: self.offset,
            index,
        }];

        let params = MatchParams {
            chunk_size: self.chunk_size,
            threads_work,
            name_template: self.name_template.clone(),
        };

        let qc = MatchPipeline::run(&params, &mut streams, slots)?;
        qc.write_report_file(&self.path_qc)?;

        println!(
            "{}/{} reads passing; QC written to {}",
            qc.total_pass(),
            qc.total_reads(),
            self.path_qc.display()
        );
        Ok(())
    }

    // the orchestrator encodes the flag as a file holding 0 or 1
    fn resolve_revcomp(&self) -> Result<bool> {
        let Some(path) = &self.revcomp_file else {
            return Ok(self.revcomp);
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read revcomp file {}", path.display()))?;
        match content.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => anyhow::bail!(
                "Revcomp file {} must contain 0 or 1, found {:?}",
                path.display(),
                other
            ),
        }
    }

    fn resolve_thread_config(&self) -> Result<usize> {
        if let Some(threads) = self.threads_work {
            if threads == 0 {
                anyhow::bail!("Thread count must be at least 1");
            }
            return Ok(threads);
        }

        let available_threads = thread::available_parallelism()
            .map_err(|e| anyhow::anyhow!("Failed to get available threads: {}", e))?
            .get();

        if available_threads < 2 {
            println!("Warning: less than two threads reported to be available");
        }

        Ok(available_threads.saturating_sub(1).max(1))
    }
}

fn verify_input_fq_file(path_in: &PathBuf) -> anyhow::Result<()> {
    if let Ok(file) = File::open(path_in) {
        if file.metadata()?.len() == 0 {
            print!("Warning: input file is empty");
        }
    }

    let filename = path_in
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| anyhow::anyhow!("Bad input file name: {}", path_in.display()))?;

    if filename.ends_with("fq")
        | filename.ends_with("fastq")
        | filename.ends_with("fq.gz")
        | filename.ends_with("fastq.gz")
    {
        //ok
    } else {
        anyhow::bail!("Input file must be a fastq file")
    }

    Ok(())
}
