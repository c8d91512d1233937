mod fs;
mod shell;

pub use fs::{ReadFileTool, WriteFileTool};
pub use shell::ShellTool;
