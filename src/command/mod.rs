pub mod matchbc;

pub use matchbc::command::MatchBarcodes;
pub use matchbc::core::BarcodeSlot;
pub use matchbc::core::MatchParams;
pub use matchbc::core::MatchPipeline;
pub use matchbc::qc::MatchQc;
