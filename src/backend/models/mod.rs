//! Runtime values and declared types shared by the module format, the VM
//! and the dispatch runtime.

mod types;
mod value;

pub use types::TypeRef;
pub use value::{ArrayRef, Value};
