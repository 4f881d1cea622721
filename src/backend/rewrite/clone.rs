//! Hidden implementation clones.

use crate::backend::bytecode::{FunctionBody, FunctionDef, Visibility};

/// Copy `original` into a public static function named `name`
///
/// The body is taken verbatim (code, constants, locals, `max_stack`) with
/// locals marked pre-initialized. Attributes are dropped so the clone is
/// never picked up by a later scan.
pub(super) fn clone_function(original: &FunctionDef, name: String) -> FunctionDef {
    let mut body: FunctionBody = original.body.clone();
    body.set_init_locals(true);

    FunctionDef {
        name,
        visibility: Visibility::Public,
        is_static: true,
        params: original.params.clone(),
        return_type: original.return_type.clone(),
        attributes: Vec::new(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::bytecode::{BodyBuilder, Opcode, Param};
    use crate::backend::models::TypeRef;

    #[test]
    fn test_clone_copies_body_verbatim() {
        let mut b = BodyBuilder::new();
        let tmp = b.add_local(TypeRef::Int);
        b.emit_byte(Opcode::LoadArg, 0);
        b.emit_byte(Opcode::StoreLocal, tmp);
        b.emit_byte(Opcode::LoadLocal, tmp);
        b.emit(Opcode::Return);
        let original = FunctionDef::new("f", vec![Param::new("x", TypeRef::Int)], TypeRef::Int, b.build().expect("body"))
            .with_visibility(Visibility::Private)
            .with_attribute("Pure");

        let clone = clone_function(&original, "f__impl".to_string());
        assert_eq!(clone.name, "f__impl");
        assert_eq!(clone.visibility, Visibility::Public);
        assert!(clone.is_static);
        assert!(clone.attributes.is_empty());
        assert_eq!(clone.params, original.params);
        assert_eq!(clone.return_type, TypeRef::Int);
        assert_eq!(clone.body.code(), original.body.code());
        assert_eq!(clone.body.locals(), original.body.locals());
        assert_eq!(clone.body.max_stack(), original.body.max_stack());
        assert!(clone.body.init_locals());
    }
}
