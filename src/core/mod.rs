pub mod inference;
pub mod integration;
pub mod query;
pub mod resolver;
pub mod transfer;
pub mod typemap;

pub use crate::domain::model::{ColumnMetadata, Row, TransferReport, TransferRequest, Value};
pub use crate::domain::ports::{RowHandler, RowSource};
pub use crate::utils::error::Result;
