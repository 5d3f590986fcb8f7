pub mod barrier;
pub mod upload_command;
