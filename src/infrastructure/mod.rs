pub mod bluetooth;
pub mod logging;
pub mod publisher;
pub mod replay;
