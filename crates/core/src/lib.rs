pub mod error;
pub mod field_value;
pub mod ids;
pub mod snapshot;
pub mod table;

pub use error::CoreError;
pub use field_value::{FieldValue, Record};
pub use ids::*;
pub use snapshot::Snapshot;
pub use table::{ColumnDef, ColumnKind, Table, TableSchema};
