//! Report aggregation and the self-contained leaderboard page.

pub mod page;
pub mod report;

pub use page::render_page;
pub use report::{build_report, write_report, ReportData, ReviewerRow};
