use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;
use log::debug;

use seq_io::fastq::OwnedRecord;
use seq_io::fastq::Reader as FastqReader;

use crate::fileformat::NameTemplate;

///////////////////////////////
/// A set of named FASTQ streams advancing in lockstep, chunk by chunk.
///
/// Inputs may be plain or gzip-compressed; compression is detected from the
/// first bytes of the file, never from the extension. Streams with an output
/// path get their selected records written back out, gzip-compressed iff the
/// output path ends in .gz. Writes are strictly sequential appends
pub struct FastqStreamSet {
    streams: Vec<FastqStream>,
    chunk_len: usize,
    total_records: u64,
}

struct FastqStream {
    name: String,
    reader: FastqReader<Box<dyn std::io::Read>>,
    writer: Option<OutputWriter>,
    chunk: Vec<OwnedRecord>,
}

enum OutputWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            OutputWriter::Plain(w) => w.write(buf),
            OutputWriter::Gzip(w) => w.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            OutputWriter::Plain(w) => w.flush(),
            OutputWriter::Gzip(w) => w.flush(),
        }
    }
}

impl OutputWriter {
    fn create(path: &PathBuf) -> anyhow::Result<OutputWriter> {
        let file = File::create(path)
            .with_context(|| format!("Could not create output file {}", path.display()))?;
        let buffer = BufWriter::new(file);

        let gz = path
            .extension()
            .map(|ext| ext == "gz")
            .unwrap_or(false);
        if gz {
            Ok(OutputWriter::Gzip(GzEncoder::new(
                buffer,
                Compression::default(),
            )))
        } else {
            Ok(OutputWriter::Plain(buffer))
        }
    }

    // gzip needs an explicit finish to get the trailer written; relying on
    // Drop would swallow any error
    fn finish(self) -> std::io::Result<()> {
        match self {
            OutputWriter::Plain(mut w) => w.flush(),
            OutputWriter::Gzip(w) => w.finish()?.flush(),
        }
    }
}

///////////////////////////////
/// Open a FASTQ file, decompressing on the fly if the content is gzipped
pub fn open_fastq(path: &PathBuf) -> anyhow::Result<FastqReader<Box<dyn std::io::Read>>> {
    let file = File::open(path)
        .with_context(|| format!("Could not open FASTQ file {}", path.display()))?;
    let (reader, compression) = niffler::get_reader(Box::new(file))
        .with_context(|| format!("Could not read FASTQ file {}", path.display()))?;
    debug!(
        "Opened {} with compression {:?}",
        path.display(),
        compression
    );
    Ok(FastqReader::new(reader))
}

impl FastqStreamSet {
    pub fn new() -> FastqStreamSet {
        FastqStreamSet {
            streams: Vec::new(),
            chunk_len: 0,
            total_records: 0,
        }
    }

    ///////////////////////////////
    /// Register a named stream. Streams are read in the order they are added
    pub fn add_stream(
        &mut self,
        name: &str,
        input: &PathBuf,
        output: Option<&PathBuf>,
    ) -> anyhow::Result<()> {
        if self.streams.iter().any(|s| s.name == name) {
            bail!("Duplicate stream name: {}", name);
        }
        let reader = open_fastq(input)?;
        let writer = match output {
            Some(path) => Some(OutputWriter::create(path)?),
            None => None,
        };
        self.streams.push(FastqStream {
            name: name.to_string(),
            reader,
            writer,
            chunk: Vec::new(),
        });
        Ok(())
    }

    pub fn stream_index(&self, name: &str) -> Option<usize> {
        self.streams.iter().position(|s| s.name == name)
    }

    ///////////////////////////////
    /// Pull the next chunk of up to n records from every stream. Returns
    /// false once the streams are exhausted. All streams must run out at the
    /// same record count; anything else means the inputs are not paired
    pub fn read_chunk(&mut self, n: usize) -> anyhow::Result<bool> {
        if self.streams.is_empty() {
            bail!("No FASTQ streams configured");
        }

        for stream in self.streams.iter_mut() {
            stream.chunk.clear();
            while stream.chunk.len() < n {
                match stream.reader.next() {
                    Some(record) => {
                        let record = record.map_err(|e| {
                            anyhow::anyhow!("Error reading FASTQ record from {}: {}", stream.name, e)
                        })?;
                        stream.chunk.push(record.to_owned_record());
                    }
                    None => break,
                }
            }
        }

        if !self.streams.iter().map(|s| s.chunk.len()).all_equal() {
            let counts = self
                .streams
                .iter()
                .map(|s| format!("{}: {}", s.name, s.chunk.len()))
                .join(", ");
            bail!(
                "FASTQ streams are out of sync after {} records ({}); input files differ in length",
                self.total_records,
                counts
            );
        }

        self.chunk_len = self.streams[0].chunk.len();
        self.total_records += self.chunk_len as u64;
        Ok(self.chunk_len > 0)
    }

    /// Number of records in the current chunk, identical across streams
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn chunk_records(&self, stream: usize) -> &[OwnedRecord] {
        &self.streams[stream].chunk
    }

    ///////////////////////////////
    /// Write the records selected by the mask to every stream that has an
    /// output path. Headers are rendered through the name template;
    /// slot_labels is indexed [read][slot]
    pub fn write_chunk(
        &mut self,
        mask: &[bool],
        template: &NameTemplate,
        slot_labels: &[Vec<&str>],
    ) -> anyhow::Result<()> {
        if mask.len() != self.chunk_len {
            bail!(
                "Filter mask has {} entries but the chunk has {} records",
                mask.len(),
                self.chunk_len
            );
        }

        for stream in self.streams.iter_mut() {
            let Some(writer) = stream.writer.as_mut() else {
                continue;
            };
            for (i, record) in stream.chunk.iter().enumerate() {
                if !mask[i] {
                    continue;
                }
                let read_name = std::str::from_utf8(&record.head).with_context(|| {
                    format!("Read name in stream {} is not valid UTF-8", stream.name)
                })?;
                let head = template.render(read_name, &slot_labels[i]);
                seq_io::fastq::write_to(&mut *writer, head.as_bytes(), &record.seq, &record.qual)
                    .with_context(|| format!("Could not write to output for stream {}", stream.name))?;
            }
        }
        Ok(())
    }

    ///////////////////////////////
    /// Flush and close all output writers. Must be called before the outputs
    /// are used
    pub fn finish(&mut self) -> anyhow::Result<()> {
        for stream in self.streams.iter_mut() {
            if let Some(writer) = stream.writer.take() {
                writer
                    .finish()
                    .with_context(|| format!("Could not finish output for stream {}", stream.name))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bcmatch_stream_{}_{}", std::process::id(), name))
    }

    fn write_fastq(path: &PathBuf, reads: &[(&str, &str)]) {
        let mut out = String::new();
        for (head, seq) in reads {
            out.push_str(&format!("@{}\n{}\n+\n{}\n", head, seq, "I".repeat(seq.len())));
        }
        std::fs::write(path, out).unwrap();
    }

    #[test]
    fn test_read_chunk_lockstep_and_exhaustion() {
        let p1 = tmp("lock_r1.fastq");
        let p2 = tmp("lock_r2.fastq");
        write_fastq(&p1, &[("a", "AAAA"), ("b", "CCCC"), ("c", "GGGG")]);
        write_fastq(&p2, &[("a", "TTTT"), ("b", "ACGT"), ("c", "TGCA")]);

        let mut streams = FastqStreamSet::new();
        streams.add_stream("R1", &p1, None).unwrap();
        streams.add_stream("R2", &p2, None).unwrap();

        assert!(streams.read_chunk(2).unwrap());
        assert_eq!(streams.chunk_len(), 2);
        assert_eq!(streams.chunk_records(0)[0].head, b"a".to_vec());
        assert!(streams.read_chunk(2).unwrap());
        assert_eq!(streams.chunk_len(), 1);
        assert!(!streams.read_chunk(2).unwrap());
        assert_eq!(streams.total_records(), 3);

        std::fs::remove_file(&p1).unwrap();
        std::fs::remove_file(&p2).unwrap();
    }

    #[test]
    fn test_unequal_stream_lengths_are_fatal() {
        let p1 = tmp("uneq_r1.fastq");
        let p2 = tmp("uneq_r2.fastq");
        write_fastq(&p1, &[("a", "AAAA"), ("b", "CCCC")]);
        write_fastq(&p2, &[("a", "TTTT")]);

        let mut streams = FastqStreamSet::new();
        streams.add_stream("R1", &p1, None).unwrap();
        streams.add_stream("R2", &p2, None).unwrap();

        assert!(streams.read_chunk(10).is_err());

        std::fs::remove_file(&p1).unwrap();
        std::fs::remove_file(&p2).unwrap();
    }

    #[test]
    fn test_gzip_detected_by_content_not_extension() {
        // gzipped data behind a name that does not say so
        let path = tmp("magic.fastq");
        {
            let file = File::create(&path).unwrap();
            let mut gz = GzEncoder::new(file, Compression::default());
            gz.write_all(b"@a\nACGT\n+\nIIII\n").unwrap();
            gz.finish().unwrap();
        }

        let mut streams = FastqStreamSet::new();
        streams.add_stream("R1", &path, None).unwrap();
        assert!(streams.read_chunk(10).unwrap());
        assert_eq!(streams.chunk_records(0)[0].seq, b"ACGT".to_vec());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_chunk_mask_and_template() {
        let p_in = tmp("write_in.fastq");
        let p_out = tmp("write_out.fastq");
        write_fastq(&p_in, &[("a", "AAAA"), ("b", "CCCC")]);

        let mut streams = FastqStreamSet::new();
        streams.add_stream("R1", &p_in, Some(&p_out)).unwrap();
        assert!(streams.read_chunk(10).unwrap());

        let template = NameTemplate::compile("{read_name} CB:Z:{cell}", &["cell"]).unwrap();
        let labels = vec![vec!["BC1"], vec!["BC2"]];
        streams
            .write_chunk(&[true, false], &template, &labels)
            .unwrap();
        streams.finish().unwrap();

        let written = std::fs::read_to_string(&p_out).unwrap();
        assert_eq!(written, "@a CB:Z:BC1\nAAAA\n+\nIIII\n");

        std::fs::remove_file(&p_in).unwrap();
        std::fs::remove_file(&p_out).unwrap();
    }
}
