pub mod engine;
pub mod errors;
pub mod facade;
pub mod keyval;
pub mod options;
pub mod parser;
pub mod tuple;

pub use engine::Engine;
pub use errors::{KvqError, Result};
pub use keyval::{Directory, Key, KeyValue, Query, Value};
pub use options::{ByteOrder, RangeOpts, SingleOpts};
