//! Section persistence: meta files, LZ4 framing and the file provider

pub mod lz4_stream;
pub mod meta_file;
pub mod loader_registry;
pub mod file_provider;

pub use lz4_stream::{Lz4FrameReader, Lz4FrameWriter};
pub use meta_file::{
    decode_file, encode_file, path_for, write_atomic,
    MetaFile, MetaHeader, DATA_MAGIC, RENDER_MAGIC, HEADER_LEN,
};
pub use loader_registry::LoaderRegistry;
pub use file_provider::{FileProvider, FileStamp, SourceHandle};
