pub mod logger;
pub mod validator;

pub use logger::init_logger;
