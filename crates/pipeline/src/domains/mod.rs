mod clean;
mod fetch;
mod gold;
mod load;

pub use clean::*;
pub use fetch::*;
pub use gold::*;
pub use load::*;
