//! 具体渠道实现

pub mod local_file;
pub mod stdout;

pub use local_file::LocalFileChannel;
pub use stdout::StdoutChannel;
