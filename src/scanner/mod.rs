//! Scanning and acting: tree walker, eligibility evaluation, bandwidth-capped
//! copying, and the two-speed pipeline engine.

pub mod copier;
pub mod eligibility;
pub mod pipeline;
pub mod walker;
