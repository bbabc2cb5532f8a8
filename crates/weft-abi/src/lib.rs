//! Weft ABI crate: stable contracts shared by the editor core and model adapters.

pub mod adapter;
pub mod batch;
pub mod sampling;
pub mod token;

pub use adapter::*;
pub use batch::*;
pub use sampling::*;
pub use token::*;
