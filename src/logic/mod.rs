pub mod coerce;
pub mod dispatch;
pub mod filter;
pub mod foreign_key;

pub use coerce::{copy_fields, copy_value, get_value_from_schema, CoerceError};
pub use dispatch::{DispatchError, DispatchRequest, Dispatcher};
pub use foreign_key::{
    foreign_key_description, primary_key_foreign, ForeignKeyDescription, PrimaryKeyForeign,
};
