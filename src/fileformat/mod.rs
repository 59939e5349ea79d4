pub mod fastq_stream;
pub mod name_template;

pub use fastq_stream::FastqStreamSet;
pub use name_template::NameTemplate;
