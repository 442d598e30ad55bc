//! Model persistence.

mod native;

pub use native::{
    deserialize_forest, read_forest, serialize_forest, write_forest, DeserializeError,
    FormatHeader, SerializeError, HEADER_SIZE, MAGIC,
};
