mod versioned_schema;

pub use versioned_schema::{
    Column, ForeignKey, SqlType, Table, VersionedSchema, BASE_DB_VERSION,
};

pub(crate) use versioned_schema::open_versioned;
