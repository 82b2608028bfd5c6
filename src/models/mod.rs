pub mod enums;
pub mod document;
pub mod filters;

pub use enums::*;
pub use document::*;
pub use filters::*;
