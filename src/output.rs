//! Output formatting module.

pub mod progress;
pub mod report;
pub mod table;

pub use report::{RunContext, RunReport, save_report_or_warn};
pub use table::{print_drain_blockers, print_group_table, print_outcome};
