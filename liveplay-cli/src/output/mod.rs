mod file_sink;
mod headless;

pub use file_sink::{BufferedView, FileSink};
pub use headless::HeadlessSurface;
