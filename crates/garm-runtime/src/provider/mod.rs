//! Provider Adapter implementations (§4, §6, §9 "Provider plugins as
//! external processes").

mod process;

pub use process::ProcessProvider;
