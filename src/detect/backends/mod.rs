pub mod chroma;
pub mod stub;

pub use chroma::ChromaBackend;
pub use stub::StubBackend;
