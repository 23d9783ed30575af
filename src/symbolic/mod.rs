pub mod engine;
pub mod error;
pub mod opcodes;
pub mod scriptnum;
pub mod state;
pub mod value;
