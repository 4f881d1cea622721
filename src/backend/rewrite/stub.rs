//! Dispatch stub generation.
//!
//! A stub keeps its function's parameter list, packs the arguments into an
//! object array and hands them to the runtime:
//!
//! ```text
//! push n; new_array
//! per param i:  dup; push i; load_arg i; [box tag]; store_elem
//! non-void:     dup; submit #clone; defer #clone; return
//! void:         submit #clone; push_nil; return
//! ```

use crate::backend::bytecode::{BodyBuilder, BodyError, FunctionBody, Opcode, Param};
use crate::backend::models::TypeRef;

/// Build the stub body forwarding to the symbol table entry `clone_symbol`
///
/// Callers guarantee `params.len() <= 255`.
pub(super) fn build_stub(
    params: &[Param],
    return_type: &TypeRef,
    clone_symbol: u16,
) -> Result<FunctionBody, BodyError> {
    let mut b = BodyBuilder::new();

    b.emit_int(params.len() as i64);
    b.emit(Opcode::NewArray);

    for (i, param) in params.iter().enumerate() {
        b.emit(Opcode::Dup);
        b.emit_int(i as i64);
        b.emit_byte(Opcode::LoadArg, i as u8);
        if param.ty.is_value_type() {
            b.emit_byte(Opcode::Box, param.ty.tag());
        }
        b.emit(Opcode::StoreElem);
    }

    if return_type.is_void() {
        b.emit_u16(Opcode::Submit, clone_symbol);
        b.emit(Opcode::PushNil);
    } else {
        b.emit(Opcode::Dup);
        b.emit_u16(Opcode::Submit, clone_symbol);
        b.emit_u16(Opcode::Defer, clone_symbol);
    }
    b.emit(Opcode::Return);

    // No locals; max_stack comes from simulation
    b.build()
}
