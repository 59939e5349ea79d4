pub mod index;
pub mod whitelist;

pub use index::BarcodeIndex;
pub use index::MatchResult;

pub use whitelist::reverse_complement;
pub use whitelist::Whitelist;
