//! Mapping type-graph nodes to LLVM types.
//!
//! Value representation: int is i32, char is i8, bool is i1, float is f64,
//! unit is the singleton struct `{i1}` (always its null value), and every
//! aggregate (ref, array, sum, function) is an opaque pointer. The shapes
//! behind those pointers are named structs created once per module:
//! `Array.<dims>.<elem>` for array descriptors and the sum type's own name
//! for customs.

use crate::error::{CodeGenError, Result};
use crate::CodeGen;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType, StructType};
use inkwell::values::BasicValueEnum;
use inkwell::AddressSpace;
use melc_sem::{TypeNode, TypeRef};

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// The singleton `unit` struct type.
    pub(crate) fn unit_type(&self) -> StructType<'ctx> {
        match self.module.get_struct_type("unit") {
            Some(t) => t,
            None => {
                let t = self.llvm.opaque_struct_type("unit");
                t.set_body(&[self.llvm.bool_type().into()], false);
                t
            }
        }
    }

    pub(crate) fn unit_value(&self) -> BasicValueEnum<'ctx> {
        self.unit_type().const_zero().into()
    }

    pub(crate) fn ptr_type(&self) -> inkwell::types::PointerType<'ctx> {
        self.llvm.ptr_type(AddressSpace::default())
    }

    /// Deep-substitute a type and fail if anything is still open.
    pub(crate) fn resolved(&mut self, t: TypeRef) -> Result<TypeRef> {
        let melc_sem::Compilation { types, inf, .. } = &mut *self.sem;
        let t = inf.deep_substitute(types, t);
        if types.contains_unknown(t) {
            return Err(CodeGenError::UnresolvedType);
        }
        Ok(t)
    }

    /// The LLVM value type for a (resolved) type-graph node.
    pub(crate) fn llvm_type(&mut self, t: TypeRef) -> Result<BasicTypeEnum<'ctx>> {
        let t = self.resolved(t)?;
        Ok(match self.sem.types.node(t).clone() {
            TypeNode::Unit => self.unit_type().into(),
            TypeNode::Int => self.llvm.i32_type().into(),
            TypeNode::Char => self.llvm.i8_type().into(),
            TypeNode::Bool => self.llvm.bool_type().into(),
            TypeNode::Float => self.llvm.f64_type().into(),
            TypeNode::Ref { .. }
            | TypeNode::Function { .. }
            | TypeNode::Custom { .. }
            | TypeNode::Constructor { .. } => self.ptr_type().into(),
            TypeNode::Array { inner, dims, .. } => {
                if dims < 1 {
                    return Err(CodeGenError::UnresolvedType);
                }
                // materialize the descriptor struct so the module carries
                // the shape even though the value is an opaque pointer
                let elem = self.array_element(inner)?;
                self.array_struct_type(dims, elem)?;
                self.ptr_type().into()
            }
            TypeNode::Unknown { .. } => return Err(CodeGenError::UnresolvedType),
        })
    }

    /// The element value type of an array, given the array's contained
    /// (ref) type.
    pub(crate) fn array_element(&mut self, contained: TypeRef) -> Result<TypeRef> {
        let contained = self.resolved(contained)?;
        if self.sem.types.is_ref(contained) {
            Ok(self.sem.types.inner(contained))
        } else {
            Err(CodeGenError::UnresolvedType)
        }
    }

    /// The named descriptor struct for arrays of the given dimensionality
    /// and element type: `{ ptr, i32 dims, i32 size_1, .., i32 size_k }`.
    pub(crate) fn array_struct_type(&mut self, dims: i32, elem: TypeRef) -> Result<StructType<'ctx>> {
        debug_assert!(dims >= 1, "array descriptor with open dimensionality");
        let name = format!("Array.{}.{}", dims, self.sem.types.display(elem));
        if let Some(t) = self.module.get_struct_type(&name) {
            return Ok(t);
        }
        // the element type may itself demand struct creation, so resolve it
        // before creating ours
        self.llvm_type(elem)?;
        let i32_ty = self.llvm.i32_type();
        let mut members: Vec<BasicTypeEnum<'ctx>> = vec![self.ptr_type().into()];
        for _ in 0..=dims {
            members.push(i32_ty.into());
        }
        let t = self.llvm.opaque_struct_type(&name);
        t.set_body(&members, false);
        Ok(t)
    }

    /// The descriptor struct of a (resolved) array type node.
    pub(crate) fn array_struct_of(&mut self, array_tg: TypeRef) -> Result<StructType<'ctx>> {
        let array_tg = self.resolved(array_tg)?;
        let dims = self.sem.types.dims(array_tg);
        if dims < 1 {
            return Err(CodeGenError::UnresolvedType);
        }
        let contained = self.sem.types.inner(array_tg);
        let elem = self.array_element(contained)?;
        self.array_struct_type(dims, elem)
    }

    /// The named struct for a sum type: `{ i32 tag, largest-payload }`.
    pub(crate) fn custom_struct_type(&mut self, custom: TypeRef) -> Result<StructType<'ctx>> {
        let name = self.sem.types.type_name(custom).to_string();
        if let Some(t) = self.module.get_struct_type(&name) {
            return Ok(t);
        }
        // create the opaque shell first so recursive sums terminate
        let shell = self.llvm.opaque_struct_type(&name);
        let data = self.machine.get_target_data();
        let mut largest: Option<StructType<'ctx>> = None;
        let mut largest_size = 0u64;
        for constr in self.sem.types.constructors(custom).to_vec() {
            let st = self.constructor_struct_type(constr)?;
            let size = data.get_abi_size(&st);
            if largest.is_none() || size > largest_size {
                largest = Some(st);
                largest_size = size;
            }
        }
        let payload = largest.expect("sum type without constructors");
        shell.set_body(&[self.llvm.i32_type().into(), payload.into()], false);
        Ok(shell)
    }

    /// The (anonymous) struct of one constructor's fields.
    pub(crate) fn constructor_struct_type(&mut self, constr: TypeRef) -> Result<StructType<'ctx>> {
        let fields = self.sem.types.fields(constr).to_vec();
        let mut members: Vec<BasicTypeEnum<'ctx>> = Vec::with_capacity(fields.len());
        for f in fields {
            members.push(self.llvm_type(f)?);
        }
        Ok(self.llvm.struct_type(&members, false))
    }

    /// The LLVM function type of a Function node.
    pub(crate) fn fn_type_of(&mut self, func_tg: TypeRef) -> Result<FunctionType<'ctx>> {
        let func_tg = self.resolved(func_tg)?;
        let params = self.sem.types.params(func_tg).to_vec();
        let result = self.sem.types.result(func_tg);
        let mut param_tys: Vec<BasicMetadataTypeEnum<'ctx>> = Vec::with_capacity(params.len());
        for p in params {
            param_tys.push(self.llvm_type(p)?.into());
        }
        let ret = self.llvm_type(result)?;
        Ok(ret.fn_type(&param_tys, false))
    }
}
