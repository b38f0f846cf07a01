pub mod receive;
pub mod utils;
