use std::sync::Arc;

use anyhow::{bail, Context};
use crossbeam::channel::{Receiver, Sender};
use log::{debug, info};

use seq_io::fastq::OwnedRecord;

use crate::barcode::{BarcodeIndex, MatchResult};
use crate::fileformat::{FastqStreamSet, NameTemplate};
use crate::command::matchbc::qc::MatchQc;

///////////////////////////////
/// One barcode to be matched: which stream it sits on, where it starts, and
/// the index it is matched against. Slots are independent; the first slot is
/// the primary one reported in the QC histogram
pub struct BarcodeSlot {
    pub name: String,
    pub stream: String,
    pub offset: usize,
    pub index: Arc<BarcodeIndex>,
}

pub struct MatchParams {
    pub chunk_size: usize,
    pub threads_work: usize,
    pub name_template: String,
}

// work unit for one slot over a sub-range of the chunk
struct MatchJob {
    slot: usize,
    from: usize,
    queries: Arc<Vec<Vec<u8>>>,
    to: usize,
}

struct MatchJobResult {
    slot: usize,
    from: usize,
    results: Vec<MatchResult>,
}

pub struct MatchPipeline {}

impl MatchPipeline {
    ///////////////////////////////
    /// Run a matching job to stream exhaustion: read a chunk, match every
    /// slot on the worker pool, filter, tally QC, write the survivors.
    /// Chunk boundaries are barriers; the QC accumulator and the stream
    /// cursor are only ever touched by this thread
    pub fn run(
        params: &MatchParams,
        streams: &mut FastqStreamSet,
        slots: Vec<BarcodeSlot>,
    ) -> anyhow::Result<MatchQc> {
        info!("Running command: match");

        if slots.is_empty() {
            bail!("At least one barcode slot must be configured");
        }
        if params.chunk_size == 0 {
            bail!("Chunk size must be at least 1");
        }
        if params.threads_work == 0 {
            bail!("Thread count must be at least 1");
        }

        let slot_streams: Vec<usize> = slots
            .iter()
            .map(|slot| {
                streams.stream_index(&slot.stream).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Barcode slot {} refers to unknown stream {}",
                        slot.name,
                        slot.stream
                    )
                })
            })
            .collect::<anyhow::Result<Vec<usize>>>()?;

        let slot_names: Vec<&str> = slots.iter().map(|s| s.name.as_str()).collect();
        let template = NameTemplate::compile(&params.name_template, &slot_names)?;

        let max_per_slot: Vec<u32> = slots.iter().map(|s| s.index.max_mismatches()).collect();
        let mut qc = MatchQc::new(max_per_slot[0]);

        // Worker pool for the per-read matching. The index is immutable and
        // shared; results come back tagged with their sub-range
        let slots = Arc::new(slots);
        let thread_pool = threadpool::ThreadPool::new(params.threads_work);
        let (tx_job, rx_job) = crossbeam::channel::bounded::<Option<MatchJob>>(100);
        let (tx_result, rx_result) = crossbeam::channel::bounded::<MatchJobResult>(100);
        for tidx in 0..params.threads_work {
            let rx_job = rx_job.clone();
            let tx_result = tx_result.clone();
            let slots = Arc::clone(&slots);
            debug!("Starting matcher thread {}", tidx);
            thread_pool.execute(move || {
                worker_loop(&rx_job, &tx_result, &slots);
            });
        }

        let mut next_progress = 100_000;
        while streams.read_chunk(params.chunk_size)? {
            let n = streams.chunk_len();

            let mut chunk_results: Vec<Vec<MatchResult>> = slots
                .iter()
                .map(|_| vec![MatchResult::default(); n])
                .collect();

            // fan out one job per worker per slot
            let mut n_jobs = 0;
            for (slot_idx, slot) in slots.iter().enumerate() {
                let queries = extract_queries(
                    streams.chunk_records(slot_streams[slot_idx]),
                    slot.offset,
                    slot.index.seq_len(),
                    &slot.name,
                )?;
                let queries = Arc::new(queries);

                let batch = n.div_ceil(params.threads_work).max(1);
                let mut from = 0;
                while from < n {
                    let to = (from + batch).min(n);
                    tx_job
                        .send(Some(MatchJob {
                            slot: slot_idx,
                            from,
                            to,
                            queries: Arc::clone(&queries),
                        }))
                        .map_err(|_| anyhow::anyhow!("Matcher threads stopped unexpectedly"))?;
                    n_jobs += 1;
                    from = to;
                }
            }

            // chunk barrier: collect all sub-ranges before filtering
            for _ in 0..n_jobs {
                let result = rx_result
                    .recv()
                    .context("Matcher threads stopped unexpectedly")?;
                let to = result.from + result.results.len();
                chunk_results[result.slot][result.from..to].copy_from_slice(&result.results);
            }

            let mask = compute_pass_mask(&chunk_results, &max_per_slot);
            qc.add_chunk(&chunk_results[0], &mask);

            // resolved label per read and slot, "" where nothing matched
            // (failed reads are never written so the empty label stays internal)
            let labels: Vec<Vec<&str>> = (0..n)
                .map(|i| {
                    slots
                        .iter()
                        .enumerate()
                        .map(|(s, slot)| match chunk_results[s][i].best {
                            Some(entry) => slot.index.label(entry),
                            None => "",
                        })
                        .collect()
                })
                .collect();

            streams.write_chunk(&mask, &template, &labels)?;

            if qc.total_reads() >= next_progress {
                println!("#reads processed: {:?}", qc.total_reads());
                next_progress += 100_000;
            }
        }

        for _ in 0..params.threads_work {
            let _ = tx_job.send(None);
        }
        thread_pool.join();

        streams.finish()?;

        info!(
            "Matching done: {}/{} reads passing",
            qc.total_pass(),
            qc.total_reads()
        );
        Ok(qc)
    }
}

fn worker_loop(
    rx_job: &Receiver<Option<MatchJob>>,
    tx_result: &Sender<MatchJobResult>,
    slots: &[BarcodeSlot],
) {
    while let Ok(Some(job)) = rx_job.recv() {
        let index = &slots[job.slot].index;
        let results: Vec<MatchResult> = job.queries[job.from..job.to]
            .iter()
            .map(|query| index.query(query))
            .collect();
        let _ = tx_result.send(MatchJobResult {
            slot: job.slot,
            from: job.from,
            results,
        });
    }
}

///////////////////////////////
/// Cut the barcode window out of every record. A read too short for the
/// window is a configuration problem, not a data-quality outcome
fn extract_queries(
    records: &[OwnedRecord],
    offset: usize,
    len: usize,
    slot_name: &str,
) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut queries: Vec<Vec<u8>> = Vec::with_capacity(records.len());
    for record in records {
        if record.seq.len() < offset + len {
            bail!(
                "Read {} is too short for barcode slot {}: length {}, expected window {}..{}",
                String::from_utf8_lossy(&record.head),
                slot_name,
                record.seq.len(),
                offset,
                offset + len
            );
        }
        queries.push(record.seq[offset..offset + len].to_vec());
    }
    Ok(queries)
}

///////////////////////////////
/// Pass/fail per read, generic over the number of slots: every slot within
/// its distance bound, and the summed best distances strictly below the
/// summed second-best distances (joint unambiguity). With one slot this is
/// the classic best <= max && second > best; an exact best/second tie fails
pub fn compute_pass_mask(
    results_per_slot: &[Vec<MatchResult>],
    max_mismatches: &[u32],
) -> Vec<bool> {
    let n = results_per_slot[0].len();
    (0..n)
        .map(|i| {
            let mut sum_best: u32 = 0;
            let mut sum_second: u32 = 0;
            let mut within_bounds = true;
            for (slot_results, max) in results_per_slot.iter().zip(max_mismatches.iter()) {
                let result = &slot_results[i];
                if result.best_dist > *max {
                    within_bounds = false;
                }
                sum_best += result.best_dist;
                sum_second += result.second_dist;
            }
            within_bounds && sum_best < sum_second
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(best_dist: u32, second_dist: u32) -> MatchResult {
        MatchResult {
            best: Some(0),
            best_dist,
            second_dist,
        }
    }

    #[test]
    fn test_single_slot_policy() {
        let results = vec![vec![
            result(0, 3),  // unambiguous, in tolerance
            result(1, 1),  // tie: always fails
            result(2, 3),  // over tolerance
        ]];
        assert_eq!(compute_pass_mask(&results, &[1]), vec![true, false, false]);
    }

    #[test]
    fn test_joint_policy_across_slots() {
        // slot 0 is ambiguous on its own (1 vs 1) but slot 1 breaks the tie
        let slot0 = vec![result(1, 1), result(1, 1)];
        let slot1 = vec![result(0, 3), result(2, 2)];
        let mask = compute_pass_mask(&[slot0, slot1], &[2, 2]);
        // read 0: sums 1 < 4 -> pass; read 1: sums 3 == 3 -> fail
        assert_eq!(mask, vec![true, false]);
    }

    #[test]
    fn test_joint_policy_respects_per_slot_bound() {
        // joint margin is fine but slot 1 is over its own tolerance
        let slot0 = vec![result(0, 3)];
        let slot1 = vec![result(3, 4)];
        assert_eq!(compute_pass_mask(&[slot0, slot1], &[2, 2]), vec![false]);
    }

    #[test]
    fn test_extract_queries_window() {
        let record = OwnedRecord {
            head: b"r1".to_vec(),
            seq: b"ACGTACGT".to_vec(),
            qual: b"IIIIIIII".to_vec(),
        };

        // window ending exactly at the end of the read is fine
        let q = extract_queries(std::slice::from_ref(&record), 4, 4, "cell").unwrap();
        assert_eq!(q[0], b"ACGT".to_vec());
        let q = extract_queries(std::slice::from_ref(&record), 0, 8, "cell").unwrap();
        assert_eq!(q[0], b"ACGTACGT".to_vec());

        // one past the end is a configuration error
        assert!(extract_queries(std::slice::from_ref(&record), 5, 4, "cell").is_err());
    }
}
