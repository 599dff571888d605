pub mod assembler;
pub mod decoder;
pub mod parser;
pub mod reader;

pub use assembler::{AssemblyMode, TripletAssembler};
pub use decoder::{DecodeError, decode_triplet, make_timestamp, parse_timestamp};
pub use parser::{SbsHeader, SbsMessageType, parse_header};
pub use reader::{ReaderConfig, StreamBatch, StreamError, read_batch};
