pub mod file;
pub mod pcm;

pub use file::{decode_file, SymphoniaOpener};
pub use pcm::PcmSource;
