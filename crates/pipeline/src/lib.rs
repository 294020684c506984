mod cities;
mod domains;
mod parquet_handler;
mod utils;

pub use cities::*;
pub use domains::*;
pub use parquet_handler::*;
pub use utils::*;
