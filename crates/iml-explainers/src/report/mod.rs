//! Present stage outputs: shared plot helpers and the HTML report.
pub mod html;
pub mod plots;

pub use html::{Report, ReportSection};
