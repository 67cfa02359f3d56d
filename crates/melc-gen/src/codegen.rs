//! Lowering of definitions, expressions, and patterns.
//!
//! Program-scope definitions live in module globals (initialized in order
//! inside `main`), so functions may refer to them; everything inside a
//! function body is plain SSA. Match clauses lower to a chain of test
//! blocks feeding one finish phi; a fall-through past the last clause calls
//! the runtime `exit(1)`.

use crate::error::{CodeGenError, Result};
use crate::{Binding, CodeGen};
use inkwell::basic_block::BasicBlock;
use inkwell::values::{
    BasicMetadataValueEnum, BasicValue, BasicValueEnum, FunctionValue, IntValue, PointerValue,
};
use inkwell::{FloatPredicate, IntPredicate};
use melc_ast::*;
use melc_sem::{Compilation, TypeNode, TypeRef};

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    pub(crate) fn c32(&self, n: i32) -> IntValue<'ctx> {
        self.llvm.i32_type().const_int(n as i64 as u64, true)
    }

    fn c1(&self, b: bool) -> IntValue<'ctx> {
        self.llvm.bool_type().const_int(b as u64, false)
    }

    fn insert_block(&self) -> BasicBlock<'ctx> {
        self.builder
            .get_insert_block()
            .expect("builder is always positioned during lowering")
    }

    fn current_function(&self) -> FunctionValue<'ctx> {
        self.insert_block()
            .get_parent()
            .expect("insert block always belongs to a function")
    }

    /// True when a definition's type survived inference fully resolved.
    /// Definitions that stay polymorphic cannot have monomorphic uses and
    /// are skipped by the lowerer.
    fn lowerable(&mut self, tg: TypeRef) -> bool {
        let Compilation { types, inf, .. } = &mut *self.sem;
        let t = inf.deep_substitute(types, tg);
        !types.contains_unknown(t)
    }

    fn gc_alloc(&mut self, bytes: IntValue<'ctx>, uncollectable: bool) -> Result<PointerValue<'ctx>> {
        let name = if uncollectable {
            "GC_malloc_atomic_uncollectable"
        } else {
            "GC_malloc_atomic"
        };
        let f = self.module.get_function(name).expect("GC is declared");
        let v = self
            .builder
            .build_call(f, &[bytes.into()], "gc.malloc")?
            .try_as_basic_value()
            .left()
            .expect("allocation returns a pointer");
        Ok(v.into_pointer_value())
    }

    fn binding(&self, name: &str) -> Result<Binding<'ctx>> {
        self.values
            .lookup(name)
            .copied()
            .ok_or_else(|| CodeGenError::UnboundName(name.to_string()))
    }

    /// The current value of a name: SSA values directly, functions as
    /// pointers, globals through a load.
    fn binding_value(&mut self, name: &str) -> Result<BasicValueEnum<'ctx>> {
        match self.binding(name)? {
            Binding::Value(v) => Ok(v),
            Binding::Func(f) => Ok(f.as_global_value().as_pointer_value().into()),
            Binding::Global(g, tg) => {
                let ty = self.llvm_type(tg)?;
                Ok(self
                    .builder
                    .build_load(ty, g.as_pointer_value(), name)?)
            }
        }
    }

    /// Bind a freshly computed definition value: a module global at program
    /// scope, a scope-local SSA value otherwise.
    fn bind(
        &mut self,
        name: &str,
        value: BasicValueEnum<'ctx>,
        tg: TypeRef,
        top: bool,
    ) -> Result<()> {
        if top {
            let ty = self.llvm_type(tg)?;
            let g = self.module.add_global(ty, None, name);
            let zero = ty.const_zero();
            g.set_initializer(&zero);
            self.builder.build_store(g.as_pointer_value(), value)?;
            self.values.insert(name, Binding::Global(g, tg));
        } else {
            self.values.insert(name, Binding::Value(value));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    pub(crate) fn lower_definition(&mut self, def: &Definition) -> Result<()> {
        match def {
            Definition::Let(l) => self.lower_letdef(l, true),
            // sum types materialize on first use
            Definition::Type(_) => Ok(()),
        }
    }

    fn lower_letdef(&mut self, l: &LetDef, top: bool) -> Result<()> {
        if l.recursive {
            // all prototypes first, then all bodies, so mutual calls
            // resolve
            let mut protos = Vec::with_capacity(l.defs.len());
            for d in &l.defs {
                let DefStmt::Function(f) = d else {
                    continue;
                };
                protos.push((f, self.declare_function(f)?));
            }
            for (f, proto) in protos {
                if let Some(proto) = proto {
                    self.define_function_body(f, proto)?;
                }
            }
            Ok(())
        } else {
            for d in &l.defs {
                self.lower_defstmt(d, top)?;
            }
            Ok(())
        }
    }

    fn lower_defstmt(&mut self, d: &DefStmt, top: bool) -> Result<()> {
        match d {
            DefStmt::Constant(c) => {
                let tg = self.sem.node_tg(c.id);
                if !self.lowerable(tg) {
                    return Ok(());
                }
                let v = self.lower_expr(&c.expr)?;
                self.bind(&c.name, v, tg, top)
            }
            DefStmt::Function(f) => {
                if let Some(proto) = self.declare_function(f)? {
                    self.define_function_body(f, proto)?;
                }
                Ok(())
            }
            DefStmt::Variable(v) => {
                let tg = self.sem.node_tg(v.id);
                if !self.lowerable(tg) {
                    return Ok(());
                }
                let tg = self.resolved(tg)?;
                let pointee = self.sem.types.inner(tg);
                let ty = self.llvm_type(pointee)?;
                let bytes = ty.size_of().expect("pointee types are sized");
                let ptr = self.gc_alloc(bytes, false)?;
                self.bind(&v.name, ptr.into(), tg, top)
            }
            DefStmt::Array(a) => self.lower_array_def(a, top),
        }
    }

    fn declare_function(&mut self, f: &FunctionDef) -> Result<Option<FunctionValue<'ctx>>> {
        let tg = self.sem.node_tg(f.id);
        if !self.lowerable(tg) {
            return Ok(None);
        }
        let fn_ty = self.fn_type_of(tg)?;
        let func = self.module.add_function(&f.name, fn_ty, None);
        self.values.insert(&f.name, Binding::Func(func));
        Ok(Some(func))
    }

    fn define_function_body(&mut self, f: &FunctionDef, func: FunctionValue<'ctx>) -> Result<()> {
        let prev = self.builder.get_insert_block();
        self.values.open_scope();
        let entry = self.llvm.append_basic_block(func, "entry");
        self.builder.position_at_end(entry);
        for (i, p) in f.params.iter().enumerate() {
            let arg = func
                .get_nth_param(i as u32)
                .expect("prototype and parameters agree");
            self.values.insert(&p.name, Binding::Value(arg));
        }
        let ret = self.lower_expr(&f.body)?;
        self.builder.build_return(Some(&ret))?;
        self.values.close_scope();
        if !func.verify(true) {
            return Err(CodeGenError::FunctionVerification(f.name.clone()));
        }
        if let Some(prev) = prev {
            self.builder.position_at_end(prev);
        }
        Ok(())
    }

    /// Allocate the descriptor and the flat payload, then fill in the
    /// payload pointer, the dimensionality, and the per-dimension sizes.
    fn lower_array_def(&mut self, a: &ArrayDef, top: bool) -> Result<()> {
        let tg = self.sem.node_tg(a.id);
        if !self.lowerable(tg) {
            return Ok(());
        }
        let tg = self.resolved(tg)?;
        let st = self.array_struct_of(tg)?;
        let contained = self.sem.types.inner(tg);
        let elem = self.array_element(contained)?;
        let elem_ty = self.llvm_type(elem)?;
        let i64t = self.llvm.i64_type();

        let desc_bytes = st.size_of().expect("descriptor structs are sized");
        let desc = self.gc_alloc(desc_bytes, false)?;

        let mut sizes = Vec::with_capacity(a.sizes.len());
        for e in &a.sizes {
            sizes.push(self.lower_expr(e)?.into_int_value());
        }
        let mut count = sizes[0];
        for s in &sizes[1..] {
            count = self.builder.build_int_mul(count, *s, "arr.def.multmp")?;
        }
        let count64 = self
            .builder
            .build_int_s_extend(count, i64t, "arr.def.count")?;
        let elem_bytes = elem_ty.size_of().expect("element types are sized");
        let bytes = self
            .builder
            .build_int_mul(count64, elem_bytes, "arr.def.bytes")?;
        let payload = self.gc_alloc(bytes, false)?;

        let ptr_loc = self
            .builder
            .build_struct_gep(st, desc, 0, "arr.def.arrayptrloc")?;
        self.builder.build_store(ptr_loc, payload)?;
        let dim_loc = self
            .builder
            .build_struct_gep(st, desc, 1, "arr.def.dimloc")?;
        self.builder
            .build_store(dim_loc, self.c32(a.sizes.len() as i32))?;
        for (i, s) in sizes.iter().enumerate() {
            let loc =
                self.builder
                    .build_struct_gep(st, desc, (2 + i) as u32, "arr.def.sizeloc")?;
            self.builder.build_store(loc, *s)?;
        }
        self.bind(&a.name, desc.into(), tg, top)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(crate) fn lower_expr(&mut self, e: &Expr) -> Result<BasicValueEnum<'ctx>> {
        match &e.kind {
            ExprKind::IntLit(n) => Ok(self.c32(*n).into()),
            ExprKind::CharLit(c) => Ok(self
                .llvm
                .i8_type()
                .const_int(*c as u64, false)
                .into()),
            ExprKind::BoolLit(b) => Ok(self.c1(*b).into()),
            ExprKind::FloatLit(v) => Ok(self.llvm.f64_type().const_float(*v).into()),
            ExprKind::UnitLit => Ok(self.unit_value()),
            ExprKind::StringLit(s) => self.lower_string_literal(s),

            ExprKind::Ident(name) => self.binding_value(name),

            ExprKind::Call { name, args } => {
                let mut argv: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(args.len());
                for a in args {
                    argv.push(self.lower_expr(a)?.into());
                }
                let unit = self.unit_value();
                match self.binding(name)? {
                    Binding::Func(f) => {
                        let call = self.builder.build_call(f, &argv, "func.calltmp")?;
                        Ok(call.try_as_basic_value().left().unwrap_or(unit))
                    }
                    Binding::Value(v) => {
                        // a function-typed parameter: rebuild the signature
                        // from the call site's types
                        let fn_ty = self.call_site_fn_type(e, args)?;
                        let call = self.builder.build_indirect_call(
                            fn_ty,
                            v.into_pointer_value(),
                            &argv,
                            "func.calltmp",
                        )?;
                        Ok(call.try_as_basic_value().left().unwrap_or(unit))
                    }
                    Binding::Global(g, tg) => {
                        let ptr = self
                            .builder
                            .build_load(self.ptr_type(), g.as_pointer_value(), name)?
                            .into_pointer_value();
                        let fn_ty = self.fn_type_of(tg)?;
                        let call =
                            self.builder
                                .build_indirect_call(fn_ty, ptr, &argv, "func.calltmp")?;
                        Ok(call.try_as_basic_value().left().unwrap_or(unit))
                    }
                }
            }

            ExprKind::ConstrCall { args, .. } => self.lower_constructor_call(e, args),

            ExprKind::ArrayAccess { .. } => {
                let (ptr, ty) = self.array_element_ptr(e)?;
                Ok(self.builder.build_load(ty, ptr, "arr.acc.elem")?)
            }

            ExprKind::Dim { index, array } => {
                let arr_tg = *self
                    .sem
                    .array_uses
                    .get(&e.id)
                    .ok_or_else(|| CodeGenError::UnboundName(array.clone()))?;
                let st = self.array_struct_of(arr_tg)?;
                let desc = self.binding_value(array)?.into_pointer_value();
                let loc = self.builder.build_struct_gep(
                    st,
                    desc,
                    (2 + index - 1) as u32,
                    "dim.sizeloc",
                )?;
                Ok(self
                    .builder
                    .build_load(self.llvm.i32_type(), loc, "dim.size")?)
            }

            ExprKind::Unop { op, expr } => self.lower_unop(e, *op, expr),
            ExprKind::Binop { lhs, op, rhs } => self.lower_binop(lhs, *op, rhs),

            ExprKind::New(_) => {
                let tg = self.sem.node_tg(e.id);
                let tg = self.resolved(tg)?;
                let pointee = self.sem.types.inner(tg);
                let ty = self.llvm_type(pointee)?;
                let bytes = ty.size_of().expect("pointee types are sized");
                let ptr = self.gc_alloc(bytes, true)?;
                Ok(ptr.into())
            }

            ExprKind::LetIn { def, body } => {
                self.values.open_scope();
                self.lower_letdef(def, false)?;
                let v = self.lower_expr(body)?;
                self.values.close_scope();
                Ok(v)
            }

            ExprKind::If {
                cond,
                then_expr,
                else_expr,
            } => {
                let func = self.current_function();
                let cond_v = self.lower_expr(cond)?.into_int_value();
                let then_bb = self.llvm.append_basic_block(func, "then");
                let else_bb = self.llvm.append_basic_block(func, "else");
                let merge_bb = self.llvm.append_basic_block(func, "ifcont");
                self.builder
                    .build_conditional_branch(cond_v, then_bb, else_bb)?;

                self.builder.position_at_end(then_bb);
                let then_v = self.lower_expr(then_expr)?;
                let then_end = self.insert_block();
                self.builder.build_unconditional_branch(merge_bb)?;

                self.builder.position_at_end(else_bb);
                let else_v = match else_expr {
                    Some(els) => self.lower_expr(els)?,
                    None => self.unit_value(),
                };
                let else_end = self.insert_block();
                self.builder.build_unconditional_branch(merge_bb)?;

                self.builder.position_at_end(merge_bb);
                let ty = {
                    let tg = self.sem.node_tg(e.id);
                    self.llvm_type(tg)?
                };
                let phi = self.builder.build_phi(ty, "ifretval")?;
                phi.add_incoming(&[
                    (&then_v as &dyn BasicValue<'ctx>, then_end),
                    (&else_v as &dyn BasicValue<'ctx>, else_end),
                ]);
                Ok(phi.as_basic_value())
            }

            ExprKind::While { cond, body } => {
                let func = self.current_function();
                let loop_bb = self.llvm.append_basic_block(func, "whileloop");
                let body_bb = self.llvm.append_basic_block(func, "whilebody");
                let end_bb = self.llvm.append_basic_block(func, "whileend");
                self.builder.build_unconditional_branch(loop_bb)?;

                self.builder.position_at_end(loop_bb);
                let cond_v = self.lower_expr(cond)?.into_int_value();
                self.builder
                    .build_conditional_branch(cond_v, body_bb, end_bb)?;

                self.builder.position_at_end(body_bb);
                self.lower_expr(body)?;
                self.builder.build_unconditional_branch(loop_bb)?;

                self.builder.position_at_end(end_bb);
                Ok(self.unit_value())
            }

            ExprKind::For {
                var,
                start,
                ascending,
                finish,
                body,
                ..
            } => {
                let func = self.current_function();
                let i32t = self.llvm.i32_type();
                let start_v = self.lower_expr(start)?.into_int_value();
                let finish_v = self.lower_expr(finish)?.into_int_value();
                let step = self.c32(if *ascending { 1 } else { -1 });
                let preheader = self.insert_block();

                let loop_bb = self.llvm.append_basic_block(func, "forloop");
                let body_bb = self.llvm.append_basic_block(func, "forbody");
                let end_bb = self.llvm.append_basic_block(func, "forend");

                self.values.open_scope();
                self.builder.build_unconditional_branch(loop_bb)?;

                self.builder.position_at_end(loop_bb);
                let phi = self.builder.build_phi(i32t, var)?;
                phi.add_incoming(&[(&start_v as &dyn BasicValue<'ctx>, preheader)]);
                let counter = phi.as_basic_value().into_int_value();
                self.values.insert(var, Binding::Value(counter.into()));
                let pred = if *ascending {
                    IntPredicate::SLE
                } else {
                    IntPredicate::SGE
                };
                let cond = self
                    .builder
                    .build_int_compare(pred, counter, finish_v, "forloopcheck")?;
                self.builder
                    .build_conditional_branch(cond, body_bb, end_bb)?;

                self.builder.position_at_end(body_bb);
                self.lower_expr(body)?;
                let next = self.builder.build_int_add(counter, step, "forstep")?;
                phi.add_incoming(&[(&next as &dyn BasicValue<'ctx>, self.insert_block())]);
                self.builder.build_unconditional_branch(loop_bb)?;

                self.builder.position_at_end(end_bb);
                self.values.close_scope();
                Ok(self.unit_value())
            }

            ExprKind::Match { scrutinee, clauses } => {
                let func = self.current_function();
                let matched = self.lower_expr(scrutinee)?;
                let finish_bb = self.llvm.append_basic_block(func, "match.finish");
                let mut check_bb = self.llvm.append_basic_block(func, "match.firstclause");
                self.builder.build_unconditional_branch(check_bb)?;

                let mut incoming: Vec<(BasicValueEnum<'ctx>, BasicBlock<'ctx>)> = Vec::new();
                for (i, c) in clauses.iter().enumerate() {
                    self.builder.position_at_end(check_bb);
                    let last = i == clauses.len() - 1;
                    check_bb = self
                        .llvm
                        .append_basic_block(func, if last { "match.fail" } else { "match.nextclause" });
                    let success_bb = self.llvm.append_basic_block(func, "match.success");

                    self.values.open_scope();
                    let ok = self.lower_pattern(&c.pattern, matched, check_bb)?;
                    self.builder
                        .build_conditional_branch(ok, success_bb, check_bb)?;

                    self.builder.position_at_end(success_bb);
                    let v = self.lower_expr(&c.body)?;
                    self.values.close_scope();
                    incoming.push((v, self.insert_block()));
                    self.builder.build_unconditional_branch(finish_bb)?;
                }

                // no clause matched: terminal runtime error
                self.builder.position_at_end(check_bb);
                let exit_fn = self.module.get_function("exit").expect("exit is declared");
                self.builder
                    .build_call(exit_fn, &[self.c32(1).into()], "")?;
                self.builder.build_unreachable()?;

                self.builder.position_at_end(finish_bb);
                let ty = {
                    let tg = self.sem.node_tg(e.id);
                    self.llvm_type(tg)?
                };
                let phi = self.builder.build_phi(ty, "match.retval")?;
                for (v, bb) in &incoming {
                    phi.add_incoming(&[(v as &dyn BasicValue<'ctx>, *bb)]);
                }
                Ok(phi.as_basic_value())
            }
        }
    }

    fn lower_string_literal(&mut self, s: &str) -> Result<BasicValueEnum<'ctx>> {
        let global = self.builder.build_global_string_ptr(s, "str.literal")?;
        let size = s.as_bytes().len() as i32 + 1;
        let st = self.array_struct_type(1, melc_sem::types::T_CHAR)?;
        let desc_bytes = st.size_of().expect("descriptor structs are sized");
        let desc = self.gc_alloc(desc_bytes, false)?;
        let payload_bytes = self.llvm.i64_type().const_int(size as u64, false);
        let payload = self.gc_alloc(payload_bytes, false)?;

        let ptr_loc = self
            .builder
            .build_struct_gep(st, desc, 0, "str.literal.ptrloc")?;
        self.builder.build_store(ptr_loc, payload)?;
        let dim_loc = self
            .builder
            .build_struct_gep(st, desc, 1, "str.literal.dimloc")?;
        self.builder.build_store(dim_loc, self.c32(1))?;
        let size_loc = self
            .builder
            .build_struct_gep(st, desc, 2, "str.literal.sizeloc")?;
        self.builder.build_store(size_loc, self.c32(size))?;

        let strcpy = self
            .module
            .get_function("strcpy")
            .expect("strcpy is declared");
        self.builder.build_call(
            strcpy,
            &[payload.into(), global.as_pointer_value().into()],
            "",
        )?;
        Ok(desc.into())
    }

    /// The function type a call site implies, for indirect calls through
    /// function-typed parameters.
    fn call_site_fn_type(
        &mut self,
        call: &Expr,
        args: &[Expr],
    ) -> Result<inkwell::types::FunctionType<'ctx>> {
        use inkwell::types::BasicType;
        let mut params: Vec<inkwell::types::BasicMetadataTypeEnum<'ctx>> =
            Vec::with_capacity(args.len());
        for a in args {
            let tg = self.sem.node_tg(a.id);
            params.push(self.llvm_type(tg)?.into());
        }
        let ret_tg = self.sem.node_tg(call.id);
        let ret = self.llvm_type(ret_tg)?;
        Ok(ret.fn_type(&params, false))
    }

    /// Heap-allocate the sum struct, store the tag, and write the fields
    /// through the payload slot viewed at the constructor's own shape.
    fn lower_constructor_call(&mut self, e: &Expr, args: &[Expr]) -> Result<BasicValueEnum<'ctx>> {
        let constr = *self
            .sem
            .constructor_uses
            .get(&e.id)
            .expect("constructor call was resolved during analysis");
        let custom = self.sem.types.parent_custom(constr);
        let index = self.sem.types.constructor_index(constr);
        let custom_st = self.custom_struct_type(custom)?;
        let constr_st = self.constructor_struct_type(constr)?;

        let bytes = custom_st.size_of().expect("sum structs are sized");
        let ptr = self.gc_alloc(bytes, false)?;

        let tag_loc = self
            .builder
            .build_struct_gep(custom_st, ptr, 0, "customenumloc")?;
        self.builder.build_store(tag_loc, self.c32(index as i32))?;

        let payload_loc = self
            .builder
            .build_struct_gep(custom_st, ptr, 1, "customconstructorloc")?;
        for (i, a) in args.iter().enumerate() {
            let v = self.lower_expr(a)?;
            let field_loc =
                self.builder
                    .build_struct_gep(constr_st, payload_loc, i as u32, "constrfieldloc")?;
            self.builder.build_store(field_loc, v)?;
        }
        Ok(ptr.into())
    }

    /// Address of `a[i1, .., ik]`: row-major offset into the flat payload
    /// in Horner form.
    fn array_element_ptr(
        &mut self,
        e: &Expr,
    ) -> Result<(PointerValue<'ctx>, inkwell::types::BasicTypeEnum<'ctx>)> {
        let ExprKind::ArrayAccess { name, indices } = &e.kind else {
            unreachable!("array_element_ptr on a non-access node");
        };
        let arr_tg = *self
            .sem
            .array_uses
            .get(&e.id)
            .ok_or_else(|| CodeGenError::UnboundName(name.clone()))?;
        let st = self.array_struct_of(arr_tg)?;
        let elem_tg = self.sem.node_tg(e.id);
        let elem_ty = self.llvm_type(elem_tg)?;
        let desc = self.binding_value(name)?.into_pointer_value();
        let i32t = self.llvm.i32_type();

        let mut idx_vals = Vec::with_capacity(indices.len());
        for ix in indices {
            idx_vals.push(self.lower_expr(ix)?.into_int_value());
        }
        let mut offset = idx_vals[0];
        for (j, ix) in idx_vals.iter().enumerate().skip(1) {
            let size_loc =
                self.builder
                    .build_struct_gep(st, desc, (2 + j) as u32, "arr.acc.sizeloc")?;
            let size = self
                .builder
                .build_load(i32t, size_loc, "arr.acc.size")?
                .into_int_value();
            offset = self
                .builder
                .build_int_mul(offset, size, "arr.acc.multmp")?;
            offset = self.builder.build_int_add(offset, *ix, "arr.acc.addtmp")?;
        }

        let ptr_loc = self
            .builder
            .build_struct_gep(st, desc, 0, "arr.acc.ptrloc")?;
        let payload = self
            .builder
            .build_load(self.ptr_type(), ptr_loc, "arr.acc.payload")?
            .into_pointer_value();
        let elem_ptr = unsafe {
            self.builder
                .build_in_bounds_gep(elem_ty, payload, &[offset], "arr.acc.elemptr")?
        };
        Ok((elem_ptr, elem_ty))
    }

    fn lower_unop(&mut self, e: &Expr, op: UnOp, operand: &Expr) -> Result<BasicValueEnum<'ctx>> {
        let v = self.lower_expr(operand)?;
        match op {
            UnOp::Plus | UnOp::FPlus => Ok(v),
            UnOp::Minus => Ok(self
                .builder
                .build_int_neg(v.into_int_value(), "int.negtmp")?
                .into()),
            UnOp::FMinus => Ok(self
                .builder
                .build_float_neg(v.into_float_value(), "float.negtmp")?
                .into()),
            UnOp::Not => Ok(self
                .builder
                .build_not(v.into_int_value(), "bool.nottmp")?
                .into()),
            UnOp::Deref => {
                let tg = self.sem.node_tg(e.id);
                let ty = self.llvm_type(tg)?;
                Ok(self
                    .builder
                    .build_load(ty, v.into_pointer_value(), "ptr.dereftmp")?)
            }
            UnOp::Delete => {
                let free = self
                    .module
                    .get_function("GC_free")
                    .expect("GC is declared");
                self.builder.build_call(free, &[v.into()], "")?;
                Ok(self.unit_value())
            }
        }
    }

    fn lower_binop(&mut self, lhs: &Expr, op: BinOp, rhs: &Expr) -> Result<BasicValueEnum<'ctx>> {
        // assignment through an array element stores into the computed
        // location instead of reading it
        if op == BinOp::Assign {
            let rv = self.lower_expr(rhs)?;
            if matches!(lhs.kind, ExprKind::ArrayAccess { .. }) {
                let (ptr, _) = self.array_element_ptr(lhs)?;
                self.builder.build_store(ptr, rv)?;
            } else {
                let lv = self.lower_expr(lhs)?;
                self.builder.build_store(lv.into_pointer_value(), rv)?;
            }
            return Ok(self.unit_value());
        }
        if op == BinOp::Seq {
            self.lower_expr(lhs)?;
            return self.lower_expr(rhs);
        }

        let lv = self.lower_expr(lhs)?;
        let rv = self.lower_expr(rhs)?;
        let v: BasicValueEnum<'ctx> = match op {
            BinOp::Add => self
                .builder
                .build_int_add(lv.into_int_value(), rv.into_int_value(), "int.addtmp")?
                .into(),
            BinOp::Sub => self
                .builder
                .build_int_sub(lv.into_int_value(), rv.into_int_value(), "int.subtmp")?
                .into(),
            BinOp::Mul => self
                .builder
                .build_int_mul(lv.into_int_value(), rv.into_int_value(), "int.multmp")?
                .into(),
            BinOp::Div => self
                .builder
                .build_int_signed_div(lv.into_int_value(), rv.into_int_value(), "int.divtmp")?
                .into(),
            BinOp::Mod => self
                .builder
                .build_int_signed_rem(lv.into_int_value(), rv.into_int_value(), "int.modtmp")?
                .into(),
            BinOp::FAdd => self
                .builder
                .build_float_add(lv.into_float_value(), rv.into_float_value(), "float.addtmp")?
                .into(),
            BinOp::FSub => self
                .builder
                .build_float_sub(lv.into_float_value(), rv.into_float_value(), "float.subtmp")?
                .into(),
            BinOp::FMul => self
                .builder
                .build_float_mul(lv.into_float_value(), rv.into_float_value(), "float.multmp")?
                .into(),
            BinOp::FDiv => self
                .builder
                .build_float_div(lv.into_float_value(), rv.into_float_value(), "float.divtmp")?
                .into(),
            BinOp::Pow => {
                let pow = self
                    .module
                    .get_function("pow.custom")
                    .expect("pow helper is generated");
                self.builder
                    .build_call(pow, &[lv.into(), rv.into()], "float.powtmp")?
                    .try_as_basic_value()
                    .left()
                    .expect("pow returns a value")
            }
            BinOp::And => self
                .builder
                .build_and(lv.into_int_value(), rv.into_int_value(), "bool.andtmp")?
                .into(),
            BinOp::Or => self
                .builder
                .build_or(lv.into_int_value(), rv.into_int_value(), "bool.ortmp")?
                .into(),
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                return self.lower_ordering(lhs, op, lv, rv);
            }
            BinOp::Eq | BinOp::Neq | BinOp::StructEq | BinOp::StructNeq => {
                return self.lower_equality(lhs, op, lv, rv);
            }
            BinOp::Assign | BinOp::Seq => unreachable!("handled above"),
        };
        Ok(v)
    }

    fn lower_ordering(
        &mut self,
        lhs: &Expr,
        op: BinOp,
        lv: BasicValueEnum<'ctx>,
        rv: BasicValueEnum<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>> {
        let tg = self.sem.node_tg(lhs.id);
        let tg = self.resolved(tg)?;
        let is_float = matches!(self.sem.types.node(tg), TypeNode::Float);
        let v = if is_float {
            let pred = match op {
                BinOp::Lt => FloatPredicate::OLT,
                BinOp::Gt => FloatPredicate::OGT,
                BinOp::Le => FloatPredicate::OLE,
                _ => FloatPredicate::OGE,
            };
            self.builder.build_float_compare(
                pred,
                lv.into_float_value(),
                rv.into_float_value(),
                "float.cmptmp",
            )?
        } else {
            let pred = match op {
                BinOp::Lt => IntPredicate::SLT,
                BinOp::Gt => IntPredicate::SGT,
                BinOp::Le => IntPredicate::SLE,
                _ => IntPredicate::SGE,
            };
            self.builder.build_int_compare(
                pred,
                lv.into_int_value(),
                rv.into_int_value(),
                "int.cmptmp",
            )?
        };
        Ok(v.into())
    }

    /// `=`/`<>` are identity on sums and refs; `==`/`!=` dispatch to the
    /// generated structural equality on sums. Floats use ordered compares.
    fn lower_equality(
        &mut self,
        lhs: &Expr,
        op: BinOp,
        lv: BasicValueEnum<'ctx>,
        rv: BasicValueEnum<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>> {
        let tg = self.sem.node_tg(lhs.id);
        let tg = self.resolved(tg)?;
        let negate = matches!(op, BinOp::Neq | BinOp::StructNeq);
        let structural = matches!(op, BinOp::StructEq | BinOp::StructNeq);

        let eq: IntValue<'ctx> = match self.sem.types.node(tg).clone() {
            TypeNode::Unit => self.c1(true),
            TypeNode::Float => self.builder.build_float_compare(
                FloatPredicate::OEQ,
                lv.into_float_value(),
                rv.into_float_value(),
                "float.cmpeqtmp",
            )?,
            TypeNode::Custom { .. } if structural => {
                let f = self.struct_eq_fn(tg)?;
                self.builder
                    .build_call(f, &[lv.into(), rv.into()], "strcteq.equals")?
                    .try_as_basic_value()
                    .left()
                    .expect("structural equality returns i1")
                    .into_int_value()
            }
            TypeNode::Custom { .. } | TypeNode::Ref { .. } => {
                self.pointer_identity(lv.into_pointer_value(), rv.into_pointer_value())?
            }
            _ => self.builder.build_int_compare(
                IntPredicate::EQ,
                lv.into_int_value(),
                rv.into_int_value(),
                "int.cmpeqtmp",
            )?,
        };
        let v = if negate {
            self.builder.build_not(eq, "cmpnegtmp")?
        } else {
            eq
        };
        Ok(v.into())
    }

    fn pointer_identity(
        &mut self,
        l: PointerValue<'ctx>,
        r: PointerValue<'ctx>,
    ) -> Result<IntValue<'ctx>> {
        let i64t = self.llvm.i64_type();
        let li = self.builder.build_ptr_to_int(l, i64t, "ptr.cmplhstmp")?;
        let ri = self.builder.build_ptr_to_int(r, i64t, "ptr.cmprhstmp")?;
        Ok(self
            .builder
            .build_int_compare(IntPredicate::EQ, li, ri, "ptr.cmpeqtmp")?)
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    /// Emit the tests for one pattern against `matched`. Constructor
    /// patterns branch straight to `next_clause` on a tag mismatch; the
    /// returned i1 is the conjunction of the remaining field tests.
    fn lower_pattern(
        &mut self,
        p: &Pattern,
        matched: BasicValueEnum<'ctx>,
        next_clause: BasicBlock<'ctx>,
    ) -> Result<IntValue<'ctx>> {
        match &p.kind {
            PatternKind::Int(n) => Ok(self.builder.build_int_compare(
                IntPredicate::EQ,
                matched.into_int_value(),
                self.c32(*n),
                "pattern.int.cmp",
            )?),
            PatternKind::Char(c) => Ok(self.builder.build_int_compare(
                IntPredicate::EQ,
                matched.into_int_value(),
                self.llvm.i8_type().const_int(*c as u64, false),
                "pattern.char.cmp",
            )?),
            PatternKind::Bool(bv) => Ok(self.builder.build_int_compare(
                IntPredicate::EQ,
                matched.into_int_value(),
                self.c1(*bv),
                "pattern.bool.cmp",
            )?),
            PatternKind::Float(v) => Ok(self.builder.build_float_compare(
                FloatPredicate::OEQ,
                matched.into_float_value(),
                self.llvm.f64_type().const_float(*v),
                "pattern.float.cmp",
            )?),
            PatternKind::Id(name) => {
                self.values.insert(name, Binding::Value(matched));
                Ok(self.c1(true))
            }
            PatternKind::Constr { args, .. } => {
                let func = self.current_function();
                let constr = *self
                    .sem
                    .constructor_uses
                    .get(&p.id)
                    .expect("constructor pattern was resolved during analysis");
                let custom = self.sem.types.parent_custom(constr);
                let index = self.sem.types.constructor_index(constr);
                let custom_st = self.custom_struct_type(custom)?;
                let constr_st = self.constructor_struct_type(constr)?;
                let ptr = matched.into_pointer_value();

                let tag_loc =
                    self.builder
                        .build_struct_gep(custom_st, ptr, 0, "pattern.constr.tagloc")?;
                let tag = self
                    .builder
                    .build_load(self.llvm.i32_type(), tag_loc, "pattern.constr.tag")?
                    .into_int_value();
                let same = self.builder.build_int_compare(
                    IntPredicate::EQ,
                    self.c32(index as i32),
                    tag,
                    "pattern.constr.cmp",
                )?;
                let same_bb = self.llvm.append_basic_block(func, "pattern.constr.sameconstr");
                self.builder
                    .build_conditional_branch(same, same_bb, next_clause)?;
                self.builder.position_at_end(same_bb);

                let payload = self.builder.build_struct_gep(
                    custom_st,
                    ptr,
                    1,
                    "pattern.constr.payloadloc",
                )?;
                let mut all = self.c1(true);
                let fields = self.sem.types.fields(constr).to_vec();
                for (i, (sub, field_tg)) in args.iter().zip(&fields).enumerate() {
                    let field_ty = self.llvm_type(*field_tg)?;
                    let loc = self.builder.build_struct_gep(
                        constr_st,
                        payload,
                        i as u32,
                        "pattern.constr.fieldloc",
                    )?;
                    let fv = self
                        .builder
                        .build_load(field_ty, loc, "pattern.constr.field")?;
                    let sub_ok = self.lower_pattern(sub, fv, next_clause)?;
                    all = self.builder.build_and(all, sub_ok, "pattern.constr.and")?;
                }
                Ok(all)
            }
        }
    }

    // ------------------------------------------------------------------
    // Structural equality
    // ------------------------------------------------------------------

    /// The per-sum structural equality function, generated on first demand:
    /// compare tags, switch on the tag, and compare each field of the
    /// matching constructor in order.
    pub(crate) fn struct_eq_fn(&mut self, custom: TypeRef) -> Result<FunctionValue<'ctx>> {
        if let Some(f) = self.struct_eq.get(&custom) {
            return Ok(*f);
        }
        let name = format!("{}.strcteq", self.sem.types.type_name(custom));
        let i1 = self.llvm.bool_type();
        let fn_ty = i1.fn_type(&[self.ptr_type().into(), self.ptr_type().into()], false);
        let f = self
            .module
            .add_function(&name, fn_ty, Some(inkwell::module::Linkage::Internal));
        // cache before building so recursive sums terminate
        self.struct_eq.insert(custom, f);

        let saved = self.builder.get_insert_block();

        let custom_st = self.custom_struct_type(custom)?;
        let lhs = f.get_nth_param(0).expect("two parameters").into_pointer_value();
        let rhs = f.get_nth_param(1).expect("two parameters").into_pointer_value();

        let entry = self.llvm.append_basic_block(f, "entry");
        let switch_bb = self.llvm.append_basic_block(f, "switch.init");
        let error_bb = self.llvm.append_basic_block(f, "error");
        let exit_bb = self.llvm.append_basic_block(f, "exit");

        self.builder.position_at_end(exit_bb);
        let phi = self.builder.build_phi(i1, "strcteq.res")?;

        self.builder.position_at_end(entry);
        let i32t = self.llvm.i32_type();
        let l_tag_loc = self
            .builder
            .build_struct_gep(custom_st, lhs, 0, "strcteq.lhstagloc")?;
        let l_tag = self
            .builder
            .build_load(i32t, l_tag_loc, "strcteq.lhstag")?
            .into_int_value();
        let r_tag_loc = self
            .builder
            .build_struct_gep(custom_st, rhs, 0, "strcteq.rhstagloc")?;
        let r_tag = self
            .builder
            .build_load(i32t, r_tag_loc, "strcteq.rhstag")?
            .into_int_value();
        let same_tag =
            self.builder
                .build_int_compare(IntPredicate::EQ, l_tag, r_tag, "strcteq.sametag")?;
        self.builder
            .build_conditional_branch(same_tag, switch_bb, exit_bb)?;
        phi.add_incoming(&[(&same_tag as &dyn BasicValue<'ctx>, entry)]);

        self.builder.position_at_end(switch_bb);
        let l_payload = self
            .builder
            .build_struct_gep(custom_st, lhs, 1, "strcteq.lhspayload")?;
        let r_payload = self
            .builder
            .build_struct_gep(custom_st, rhs, 1, "strcteq.rhspayload")?;
        let constructors = self.sem.types.constructors(custom).to_vec();
        let mut case_bbs = Vec::with_capacity(constructors.len());
        for constr in &constructors {
            let cname = self.sem.types.type_name(*constr).to_string();
            case_bbs.push(
                self.llvm
                    .append_basic_block(f, &format!("case.{}", cname)),
            );
        }
        let cases: Vec<(IntValue<'ctx>, BasicBlock<'ctx>)> = case_bbs
            .iter()
            .enumerate()
            .map(|(i, bb)| (self.c32(i as i32), *bb))
            .collect();
        self.builder.build_switch(l_tag, error_bb, &cases)?;

        // an out-of-range tag means corrupted memory
        self.builder.position_at_end(error_bb);
        let exit_fn = self.module.get_function("exit").expect("exit is declared");
        self.builder
            .build_call(exit_fn, &[self.c32(1).into()], "")?;
        self.builder.build_unreachable()?;

        for (ci, constr) in constructors.iter().enumerate() {
            let constr_st = self.constructor_struct_type(*constr)?;
            self.builder.position_at_end(case_bbs[ci]);
            let fields = self.sem.types.fields(*constr).to_vec();
            if fields.is_empty() {
                self.builder.build_unconditional_branch(exit_bb)?;
                let t = self.c1(true);
                phi.add_incoming(&[(&t as &dyn BasicValue<'ctx>, case_bbs[ci])]);
                continue;
            }
            for (fi, field_tg) in fields.iter().enumerate() {
                let field_ty = self.llvm_type(*field_tg)?;
                let l_loc = self.builder.build_struct_gep(
                    constr_st,
                    l_payload,
                    fi as u32,
                    "strcteq.lhsfieldloc",
                )?;
                let l_field = self
                    .builder
                    .build_load(field_ty, l_loc, "strcteq.lhsfield")?;
                let r_loc = self.builder.build_struct_gep(
                    constr_st,
                    r_payload,
                    fi as u32,
                    "strcteq.rhsfieldloc",
                )?;
                let r_field = self
                    .builder
                    .build_load(field_ty, r_loc, "strcteq.rhsfield")?;
                let cmp = self.equality_helper(*field_tg, l_field, r_field)?;

                if fi != fields.len() - 1 {
                    let next_bb = self
                        .llvm
                        .append_basic_block(f, "case.nextfield");
                    let here = self.insert_block();
                    self.builder
                        .build_conditional_branch(cmp, next_bb, exit_bb)?;
                    phi.add_incoming(&[(&cmp as &dyn BasicValue<'ctx>, here)]);
                    self.builder.position_at_end(next_bb);
                } else {
                    let here = self.insert_block();
                    self.builder.build_unconditional_branch(exit_bb)?;
                    phi.add_incoming(&[(&cmp as &dyn BasicValue<'ctx>, here)]);
                }
            }
        }

        self.builder.position_at_end(exit_bb);
        self.builder
            .build_return(Some(&phi.as_basic_value()))?;

        if let Some(saved) = saved {
            self.builder.position_at_end(saved);
        }
        Ok(f)
    }

    /// Field-wise equality inside the structural comparison: recursive for
    /// nested sums, identity for refs, ordered for floats.
    fn equality_helper(
        &mut self,
        field_tg: TypeRef,
        l: BasicValueEnum<'ctx>,
        r: BasicValueEnum<'ctx>,
    ) -> Result<IntValue<'ctx>> {
        let field_tg = self.resolved(field_tg)?;
        match self.sem.types.node(field_tg).clone() {
            TypeNode::Unit => Ok(self.c1(true)),
            TypeNode::Custom { .. } => {
                let f = self.struct_eq_fn(field_tg)?;
                Ok(self
                    .builder
                    .build_call(f, &[l.into(), r.into()], "strcteq.equals")?
                    .try_as_basic_value()
                    .left()
                    .expect("structural equality returns i1")
                    .into_int_value())
            }
            TypeNode::Ref { .. } => {
                self.pointer_identity(l.into_pointer_value(), r.into_pointer_value())
            }
            TypeNode::Float => Ok(self.builder.build_float_compare(
                FloatPredicate::OEQ,
                l.into_float_value(),
                r.into_float_value(),
                "float.cmpeqtmp",
            )?),
            TypeNode::Int | TypeNode::Char | TypeNode::Bool => {
                Ok(self.builder.build_int_compare(
                    IntPredicate::EQ,
                    l.into_int_value(),
                    r.into_int_value(),
                    "int.cmpeqtmp",
                )?)
            }
            other => {
                let name = match other {
                    TypeNode::Array { .. } => "an array-typed field",
                    _ => "a function-typed field",
                };
                Err(CodeGenError::StructuralEqOnAggregateFields(
                    name.to_string(),
                ))
            }
        }
    }
}
