//! Request and response types for the query engine.

mod aggregate;
mod filter;
mod request;
mod result;
mod table;

pub use aggregate::{AggregateFunction, AggregationSpec};
pub use filter::{FilterClause, FilterOperator};
pub use request::{QueryRequest, SortOrder};
pub use result::QueryResult;
pub use table::{ColumnStats, TableDescriptor};
