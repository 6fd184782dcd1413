pub mod domain;
pub mod error;
pub mod ops;
pub mod repr;
pub mod value;

pub use domain::{TypeDomain, TypeTag};
pub use error::{ErrorKind, OpError, RaisedError};
pub use ops::{BinOp, CmpOp, UnaryOp};
pub use value::Value;
