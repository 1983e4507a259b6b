pub mod schema;
pub mod types;

pub use schema::{
    Column, ColumnOrder, ColumnSpec, IndexDef, IndexSpec, PRIMARY_INDEX_ID, Schema, generate_tag,
};
pub use types::{ColumnType, Row, Value};
