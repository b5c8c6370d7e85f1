pub mod color;
pub mod compositor;

pub use color::*;
pub use compositor::*;
