pub mod error;
pub mod machine;
pub mod values;

pub use error::ParseError;
pub use machine::Machine;
pub use values::Value;

/// Hook wrapping a capture value into a host-defined object. The default
/// (no factory installed) is the identity.
pub type Factory = Box<dyn Fn(&str, Value) -> Value>;
