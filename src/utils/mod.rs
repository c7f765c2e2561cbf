pub mod fs;
pub mod logging;
pub mod retry;
pub mod shell;
