//! Runtime library surface.
//!
//! The C runtime speaks void and `i8*`; the language speaks unit and
//! `array of char`. This module declares the C-ABI externals (I/O, string,
//! math, control, GC) and generates the adapter functions that bridge the
//! two worlds, plus the helpers that exist only as IR: `incr`, `decr`,
//! `float_of_int`, the conversion casts, and a `pow` that handles negative
//! bases. Every adapter lands in the global value scope under its source
//! name.

use crate::error::Result;
use crate::{Binding, CodeGen};
use inkwell::intrinsics::Intrinsic;
use inkwell::module::Linkage;
use inkwell::types::BasicMetadataTypeEnum;
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, FunctionValue, PointerValue};
use inkwell::{AddressSpace, FloatPredicate};
use melc_sem::types::T_CHAR;

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    pub(crate) fn install_runtime(&mut self) -> Result<()> {
        let i1 = self.llvm.bool_type();
        let i8t = self.llvm.i8_type();
        let i32t = self.llvm.i32_type();
        let i64t = self.llvm.i64_type();
        let f64t = self.llvm.f64_type();
        let ptr = self.llvm.ptr_type(AddressSpace::default());
        let void = self.llvm.void_type();

        let ext = |gen: &Self, name: &str, ty: inkwell::types::FunctionType<'ctx>| {
            gen.module.add_function(name, ty, Some(Linkage::External))
        };

        // GC entry points
        ext(self, "GC_malloc_atomic", ptr.fn_type(&[i64t.into()], false));
        ext(
            self,
            "GC_malloc_atomic_uncollectable",
            ptr.fn_type(&[i64t.into()], false),
        );
        ext(self, "GC_free", void.fn_type(&[ptr.into()], false));

        // I/O
        let read_integer = ext(self, "readInteger", i32t.fn_type(&[], false));
        let read_boolean = ext(self, "readBoolean", i1.fn_type(&[], false));
        let read_char = ext(self, "readChar", i8t.fn_type(&[], false));
        let read_real = ext(self, "readReal", f64t.fn_type(&[], false));
        let read_string = ext(
            self,
            "readString",
            void.fn_type(&[i32t.into(), ptr.into()], false),
        );
        let write_integer = ext(self, "writeInteger", void.fn_type(&[i32t.into()], false));
        let write_boolean = ext(self, "writeBoolean", void.fn_type(&[i1.into()], false));
        let write_char = ext(self, "writeChar", void.fn_type(&[i8t.into()], false));
        let write_real = ext(self, "writeReal", void.fn_type(&[f64t.into()], false));
        let write_string = ext(self, "writeString", void.fn_type(&[ptr.into()], false));

        // strings (C signatures; strcpy/strcat declared void, which is all
        // the generated code uses of them)
        let c_strlen = ext(self, "strlen", i32t.fn_type(&[ptr.into()], false));
        let c_strcmp = ext(
            self,
            "strcmp",
            i32t.fn_type(&[ptr.into(), ptr.into()], false),
        );
        let c_strcpy = ext(
            self,
            "strcpy",
            void.fn_type(&[ptr.into(), ptr.into()], false),
        );
        let c_strcat = ext(
            self,
            "strcat",
            void.fn_type(&[ptr.into(), ptr.into()], false),
        );

        // math and control
        let abs = ext(self, "abs", i32t.fn_type(&[i32t.into()], false));
        let f_to_f = f64t.fn_type(&[f64t.into()], false);
        let fabs = ext(self, "fabs", f_to_f);
        let sqrt = ext(self, "sqrt", f_to_f);
        let sin = ext(self, "sin", f_to_f);
        let cos = ext(self, "cos", f_to_f);
        let tan = ext(self, "tan", f_to_f);
        let atan = ext(self, "atan", f_to_f);
        let exp = ext(self, "exp", f_to_f);
        let ln = ext(self, "ln", f_to_f);
        let pi = ext(self, "pi", f64t.fn_type(&[], false));
        ext(self, "exit", void.fn_type(&[i32t.into()], false));

        // source-compatible externals bind directly
        for (name, f) in [
            ("abs", abs),
            ("fabs", fabs),
            ("sqrt", sqrt),
            ("sin", sin),
            ("cos", cos),
            ("tan", tan),
            ("atan", atan),
            ("exp", exp),
            ("ln", ln),
        ] {
            self.values.insert(name, Binding::Func(f));
        }

        // readers: unit -> t
        self.wrap_reader("read_int", "read_int", read_integer)?;
        self.wrap_reader("read_bool", "read_bool", read_boolean)?;
        self.wrap_reader("read_char", "read_char", read_char)?;
        self.wrap_reader("read_float", "read_float", read_real)?;
        self.wrap_reader("pi", "wrap.pi", pi)?;

        // writers: t -> unit
        self.wrap_writer("print_int", write_integer, i32t.into())?;
        self.wrap_writer("print_bool", write_boolean, i1.into())?;
        self.wrap_writer("print_char", write_char, i8t.into())?;
        self.wrap_writer("print_float", write_real, f64t.into())?;

        self.build_print_string(write_string)?;
        self.build_read_string(read_string)?;
        self.wrap_string_fn("strlen", "wrap.strlen", c_strlen, 1, true)?;
        self.wrap_string_fn("strcmp", "wrap.strcmp", c_strcmp, 2, true)?;
        self.wrap_string_fn("strcpy", "wrap.strcpy", c_strcpy, 2, false)?;
        self.wrap_string_fn("strcat", "wrap.strcat", c_strcat, 2, false)?;

        self.build_incr_decr("incr", true)?;
        self.build_incr_decr("decr", false)?;
        self.build_float_of_int()?;
        self.build_cast_helpers()?;
        self.build_pow(fabs, ln, exp)?;

        Ok(())
    }

    fn internal_fn(
        &mut self,
        name: &str,
        ret: inkwell::types::BasicTypeEnum<'ctx>,
        params: &[BasicMetadataTypeEnum<'ctx>],
    ) -> FunctionValue<'ctx> {
        use inkwell::types::BasicType;
        let ty = ret.fn_type(params, false);
        let f = self.module.add_function(name, ty, Some(Linkage::Internal));
        let entry = self.llvm.append_basic_block(f, "entry");
        self.builder.position_at_end(entry);
        f
    }

    /// `unit -> t` adapter over a parameterless C function.
    fn wrap_reader(
        &mut self,
        name: &str,
        fn_name: &str,
        external: FunctionValue<'ctx>,
    ) -> Result<()> {
        let ret = external
            .get_type()
            .get_return_type()
            .expect("reader externals return a value");
        let f = self.internal_fn(fn_name, ret, &[self.unit_type().into()]);
        let call = self.builder.build_call(external, &[], "readtmp")?;
        let result = call
            .try_as_basic_value()
            .left()
            .expect("reader call must produce a value");
        self.builder.build_return(Some(&result))?;
        self.values.insert(name, Binding::Func(f));
        Ok(())
    }

    /// `t -> unit` adapter over a void C function.
    fn wrap_writer(
        &mut self,
        name: &str,
        external: FunctionValue<'ctx>,
        param: BasicMetadataTypeEnum<'ctx>,
    ) -> Result<()> {
        let f = self.internal_fn(name, self.unit_type().into(), &[param]);
        let arg = f.get_nth_param(0).expect("writer adapters take one value");
        self.builder
            .build_call(external, &[arg.into()], "")?;
        let unit = self.unit_value();
        self.builder.build_return(Some(&unit))?;
        self.values.insert(name, Binding::Func(f));
        Ok(())
    }

    /// Load the flat payload pointer out of a char-array descriptor.
    fn payload_of(&mut self, desc: PointerValue<'ctx>) -> Result<PointerValue<'ctx>> {
        let st = self.array_struct_type(1, T_CHAR)?;
        let loc = self.builder.build_struct_gep(st, desc, 0, "str.ptrloc")?;
        Ok(self
            .builder
            .build_load(self.ptr_type(), loc, "str.ptr")?
            .into_pointer_value())
    }

    fn build_print_string(&mut self, write_string: FunctionValue<'ctx>) -> Result<()> {
        let f = self.internal_fn("print_string", self.unit_type().into(), &[self
            .ptr_type()
            .into()]);
        let desc = f.get_nth_param(0).expect("one argument").into_pointer_value();
        let payload = self.payload_of(desc)?;
        self.builder
            .build_call(write_string, &[payload.into()], "")?;
        let unit = self.unit_value();
        self.builder.build_return(Some(&unit))?;
        self.values.insert("print_string", Binding::Func(f));
        Ok(())
    }

    /// `read_string` hands the runtime the buffer and its capacity minus
    /// the terminator slot.
    fn build_read_string(&mut self, read_string: FunctionValue<'ctx>) -> Result<()> {
        let i32t = self.llvm.i32_type();
        let f = self.internal_fn("read_string", self.unit_type().into(), &[self
            .ptr_type()
            .into()]);
        let desc = f.get_nth_param(0).expect("one argument").into_pointer_value();
        let st = self.array_struct_type(1, T_CHAR)?;
        let size_loc = self
            .builder
            .build_struct_gep(st, desc, 2, "readstr.sizeloc")?;
        let size = self
            .builder
            .build_load(i32t, size_loc, "readstr.size")?
            .into_int_value();
        let size = self
            .builder
            .build_int_sub(size, i32t.const_int(1, false), "readstr.cap")?;
        let payload = self.payload_of(desc)?;
        self.builder
            .build_call(read_string, &[size.into(), payload.into()], "")?;
        let unit = self.unit_value();
        self.builder.build_return(Some(&unit))?;
        self.values.insert("read_string", Binding::Func(f));
        Ok(())
    }

    /// Adapter that unwraps char-array descriptors into raw pointers for a
    /// C string function. `returns_value` distinguishes `strlen`/`strcmp`
    /// from the void `strcpy`/`strcat`.
    fn wrap_string_fn(
        &mut self,
        source_name: &str,
        fn_name: &str,
        external: FunctionValue<'ctx>,
        arity: usize,
        returns_value: bool,
    ) -> Result<()> {
        let ret: inkwell::types::BasicTypeEnum<'ctx> = if returns_value {
            self.llvm.i32_type().into()
        } else {
            self.unit_type().into()
        };
        let params: Vec<BasicMetadataTypeEnum<'ctx>> =
            vec![self.ptr_type().into(); arity];
        let f = self.internal_fn(fn_name, ret, &params);
        let mut args: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(arity);
        for i in 0..arity {
            let desc = f
                .get_nth_param(i as u32)
                .expect("string adapter arity")
                .into_pointer_value();
            args.push(self.payload_of(desc)?.into());
        }
        let call = self.builder.build_call(external, &args, "")?;
        if returns_value {
            let v = call
                .try_as_basic_value()
                .left()
                .expect("string external must produce a value");
            self.builder.build_return(Some(&v))?;
        } else {
            let unit = self.unit_value();
            self.builder.build_return(Some(&unit))?;
        }
        self.values.insert(source_name, Binding::Func(f));
        Ok(())
    }

    /// `int ref -> unit`, bumping the pointee in place.
    fn build_incr_decr(&mut self, name: &str, increment: bool) -> Result<()> {
        let i32t = self.llvm.i32_type();
        let f = self.internal_fn(name, self.unit_type().into(), &[self.ptr_type().into()]);
        let cell = f.get_nth_param(0).expect("one argument").into_pointer_value();
        let prev = self
            .builder
            .build_load(i32t, cell, "prevval")?
            .into_int_value();
        let one = i32t.const_int(1, false);
        let next = if increment {
            self.builder.build_int_add(prev, one, "newval")?
        } else {
            self.builder.build_int_sub(prev, one, "newval")?
        };
        self.builder.build_store(cell, next)?;
        let unit = self.unit_value();
        self.builder.build_return(Some(&unit))?;
        self.values.insert(name, Binding::Func(f));
        Ok(())
    }

    fn build_float_of_int(&mut self) -> Result<()> {
        let f64t = self.llvm.f64_type();
        let f = self.internal_fn(
            "float_of_int",
            f64t.into(),
            &[self.llvm.i32_type().into()],
        );
        let n = f.get_nth_param(0).expect("one argument").into_int_value();
        let v = self.builder.build_signed_int_to_float(n, f64t, "newfloat")?;
        self.builder.build_return(Some(&v))?;
        self.values.insert("float_of_int", Binding::Func(f));
        Ok(())
    }

    /// Pure-cast helpers generated as IR: truncation, rounding, and the
    /// char/int conversions.
    fn build_cast_helpers(&mut self) -> Result<()> {
        let i8t = self.llvm.i8_type();
        let i32t = self.llvm.i32_type();
        let f64t = self.llvm.f64_type();

        let f = self.internal_fn("int_of_float", i32t.into(), &[f64t.into()]);
        let x = f.get_nth_param(0).expect("one argument").into_float_value();
        let v = self.builder.build_float_to_signed_int(x, i32t, "trunced")?;
        self.builder.build_return(Some(&v))?;
        self.values.insert("int_of_float", Binding::Func(f));

        let f = self.internal_fn("round", i32t.into(), &[f64t.into()]);
        let x = f.get_nth_param(0).expect("one argument").into_float_value();
        let round = Intrinsic::find("llvm.round")
            .and_then(|i| i.get_declaration(&self.module, &[f64t.into()]))
            .expect("llvm.round is always available");
        let rounded = self
            .builder
            .build_call(round, &[x.into()], "rounded")?
            .try_as_basic_value()
            .left()
            .expect("llvm.round returns a value")
            .into_float_value();
        let v = self
            .builder
            .build_float_to_signed_int(rounded, i32t, "roundint")?;
        self.builder.build_return(Some(&v))?;
        self.values.insert("round", Binding::Func(f));

        let f = self.internal_fn("int_of_char", i32t.into(), &[i8t.into()]);
        let c = f.get_nth_param(0).expect("one argument").into_int_value();
        let v = self.builder.build_int_s_extend(c, i32t, "ord")?;
        self.builder.build_return(Some(&v))?;
        self.values.insert("int_of_char", Binding::Func(f));

        let f = self.internal_fn("char_of_int", i8t.into(), &[i32t.into()]);
        let n = f.get_nth_param(0).expect("one argument").into_int_value();
        let v = self.builder.build_int_truncate(n, i8t, "chr")?;
        self.builder.build_return(Some(&v))?;
        self.values.insert("char_of_int", Binding::Func(f));
        Ok(())
    }

    /// `x ** y` as sign(x) * exp(y * ln |x|), so negative bases behave.
    fn build_pow(
        &mut self,
        fabs: FunctionValue<'ctx>,
        ln: FunctionValue<'ctx>,
        exp: FunctionValue<'ctx>,
    ) -> Result<()> {
        let f64t = self.llvm.f64_type();
        let f = self.internal_fn("pow.custom", f64t.into(), &[f64t.into(), f64t.into()]);
        let entry = self.builder.get_insert_block().expect("entry exists");
        let sign_bb = self.llvm.append_basic_block(f, "signapply");
        let collect_bb = self.llvm.append_basic_block(f, "collector");

        let x = f.get_nth_param(0).expect("two arguments").into_float_value();
        let y = f.get_nth_param(1).expect("two arguments").into_float_value();
        let negative = self.builder.build_float_compare(
            FloatPredicate::OLT,
            x,
            f64t.const_float(0.0),
            "pow.xisnegative",
        )?;
        let call = |gen: &Self,
                    callee: FunctionValue<'ctx>,
                    arg: BasicValueEnum<'ctx>,
                    name: &str|
         -> Result<BasicValueEnum<'ctx>> {
            Ok(gen
                .builder
                .build_call(callee, &[arg.into()], name)?
                .try_as_basic_value()
                .left()
                .expect("libm calls return values"))
        };
        let absx = call(self, fabs, x.into(), "pow.absx")?.into_float_value();
        let lnx = call(self, ln, absx.into(), "pow.lnabsx")?.into_float_value();
        let mult = self.builder.build_float_mul(y, lnx, "pow.ylnx")?;
        let res = call(self, exp, mult.into(), "pow.res")?.into_float_value();
        self.builder
            .build_conditional_branch(negative, sign_bb, collect_bb)?;

        self.builder.position_at_end(sign_bb);
        let neg = self.builder.build_float_neg(res, "pow.negres")?;
        self.builder.build_unconditional_branch(collect_bb)?;

        self.builder.position_at_end(collect_bb);
        let phi = self.builder.build_phi(f64t, "pow.signrestore")?;
        phi.add_incoming(&[(&res, entry), (&neg, sign_bb)]);
        self.builder
            .build_return(Some(&phi.as_basic_value()))?;
        Ok(())
    }
}
