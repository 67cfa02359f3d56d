//! melc-gen - LLVM Lowering
//!
//! Lowers a fully analyzed and inferred program to an LLVM module through
//! inkwell, with the memory model of the language baked in:
//!
//! - all heap data (arrays, refs, sum payloads, string storage) comes from
//!   the conservative-GC entry points; `new` allocates uncollectable memory
//!   that `delete` releases;
//! - arrays are pointers to a descriptor struct `{ ptr, i32 dims, i32
//!   size_1, .., i32 size_k }` over a flat row-major payload;
//! - sum values are pointers to `{ i32 tag, largest-payload }` structs;
//! - first-class functions are bare function pointers (closures were
//!   rejected by the frontend);
//! - `==`/`!=` on a sum type call a structural equality function generated
//!   per type on first demand; `=`/`<>` compare identities.
//!
//! The module is created with the host triple, verified after lowering, and
//! optionally run through the standard cleanup pipeline (`-O`).

mod codegen;
mod error;
mod libglue;
mod types;

pub use error::{CodeGenError, Result};

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine,
};
use inkwell::values::{BasicValueEnum, FunctionValue, GlobalValue};
use inkwell::OptimizationLevel;
use melc_ast::Program;
use melc_sem::{Compilation, TypeRef};
use melc_util::ScopeStack;
use rustc_hash::FxHashMap;
use std::path::Path;

/// What a source name is bound to during lowering.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Binding<'ctx> {
    /// An SSA value of the function currently being generated.
    Value(BasicValueEnum<'ctx>),
    /// A module-level function.
    Func(FunctionValue<'ctx>),
    /// A module global holding a program-scope definition; the TypeRef is
    /// the (deep-substituted) type of the stored value.
    Global(GlobalValue<'ctx>, TypeRef),
}

pub struct CodeGen<'ctx, 'a> {
    pub(crate) llvm: &'ctx Context,
    pub(crate) module: Module<'ctx>,
    pub(crate) builder: Builder<'ctx>,
    pub(crate) machine: TargetMachine,
    pub(crate) sem: &'a mut Compilation,
    pub(crate) values: ScopeStack<Binding<'ctx>>,
    pub(crate) struct_eq: FxHashMap<TypeRef, FunctionValue<'ctx>>,
    optimize: bool,
}

impl<'ctx, 'a> CodeGen<'ctx, 'a> {
    /// Create the module, target machine, and runtime surface. The module
    /// uses the host triple and data layout; no cross compilation.
    pub fn new(
        llvm: &'ctx Context,
        module_name: &str,
        sem: &'a mut Compilation,
        optimize: bool,
    ) -> Result<Self> {
        Target::initialize_all(&InitializationConfig::default());
        let triple = TargetMachine::get_default_triple();
        let target =
            Target::from_triple(&triple).map_err(|e| CodeGenError::Target(e.to_string()))?;
        let machine = target
            .create_target_machine(
                &triple,
                "generic",
                "",
                if optimize {
                    OptimizationLevel::Default
                } else {
                    OptimizationLevel::None
                },
                RelocMode::Default,
                CodeModel::Default,
            )
            .ok_or_else(|| {
                CodeGenError::Target("could not create a target machine".to_string())
            })?;

        let module = llvm.create_module(module_name);
        module.set_triple(&triple);
        module.set_data_layout(&machine.get_target_data().get_data_layout());

        let mut gen = Self {
            llvm,
            module,
            builder: llvm.create_builder(),
            machine,
            sem,
            values: ScopeStack::new(),
            struct_eq: FxHashMap::default(),
            optimize,
        };
        gen.install_runtime()?;
        Ok(gen)
    }

    /// Lower the whole program into `main : () -> i32`, verify the module,
    /// and run the optimization pipeline when enabled.
    pub fn compile_program(&mut self, program: &Program) -> Result<()> {
        let i32_ty = self.llvm.i32_type();
        let main = self
            .module
            .add_function("main", i32_ty.fn_type(&[], false), None);
        let entry = self.llvm.append_basic_block(main, "entry");
        self.builder.position_at_end(entry);

        for def in &program.defs {
            self.lower_definition(def)?;
        }
        self.builder
            .build_return(Some(&i32_ty.const_int(0, false)))?;

        if let Err(msg) = self.module.verify() {
            return Err(CodeGenError::Verification(msg.to_string()));
        }
        if self.optimize {
            self.module
                .run_passes(
                    "mem2reg,instcombine,reassociate,gvn,simplifycfg",
                    &self.machine,
                    PassBuilderOptions::create(),
                )
                .map_err(|e| CodeGenError::Verification(e.to_string()))?;
        }
        Ok(())
    }

    /// The textual IR of the module (the `-i` view).
    pub fn emit_ir(&self) -> String {
        self.module.print_to_string().to_string()
    }

    pub fn write_object_file(&self, path: &Path) -> Result<()> {
        self.machine
            .write_to_file(&self.module, FileType::Object, path)
            .map_err(|e| CodeGenError::Output(e.to_string()))
    }

    /// Assembly as bytes, for stdout or a file.
    pub fn emit_assembly(&self) -> Result<Vec<u8>> {
        let buf = self
            .machine
            .write_to_memory_buffer(&self.module, FileType::Assembly)
            .map_err(|e| CodeGenError::Output(e.to_string()))?;
        Ok(buf.as_slice().to_vec())
    }
}

#[cfg(test)]
mod tests;
