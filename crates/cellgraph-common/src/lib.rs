pub mod error;
pub mod position;
pub mod value;

pub use error::*;
pub use position::*;
pub use value::*;
