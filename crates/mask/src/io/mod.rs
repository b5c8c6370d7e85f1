pub mod png;

pub use png::{binarize, decode_mask, encode_png, from_base64, to_base64_png};
