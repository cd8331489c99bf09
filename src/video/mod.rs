mod concat;

pub use concat::{Concatenator, FfmpegConcatenator};
