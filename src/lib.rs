pub mod barcode;
pub mod command;
pub mod fileformat;

pub use barcode::BarcodeIndex;
pub use barcode::MatchResult;
pub use barcode::Whitelist;

pub use fileformat::FastqStreamSet;
pub use fileformat::NameTemplate;
