pub mod engine;

pub use engine::{guess_version, Archive, Directory, Entry, ImgError, OpenMode, Result, Version};
