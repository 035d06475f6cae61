pub mod init;
pub mod maintenance;
pub mod misc;
pub mod serve;

pub use init::handle_init;
pub use maintenance::handle_check;
pub use misc::handle_completions;
pub use serve::handle_serve;
