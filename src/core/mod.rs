// Core modules: the windowed reader, its options, and error modeling.
pub mod error;
pub mod options;
pub mod window;
