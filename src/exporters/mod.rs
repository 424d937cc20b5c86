pub mod csv;
pub mod table;

pub use csv::CsvExporter;
pub use table::{SortField, UsageRow, UsageTable};
