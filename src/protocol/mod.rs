//! RESP encoding for requests and incremental decoding of node replies

pub mod parser;
pub mod types;

pub use parser::RespParser;
pub use types::RespValue;
