//! # tinyq-nn
//!
//! Layers used to build tinyq fixtures.

pub mod module;
pub mod init;
pub mod linear;
pub mod conv;

pub use module::Module;
pub use init::Initializer;
pub use linear::Linear;
pub use conv::Conv2d;
