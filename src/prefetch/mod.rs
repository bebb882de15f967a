pub mod double_buffer;
pub mod future;
pub mod reader;
pub mod worker;
