//! `IRContext`: owns every type, constant, global and function and hands out
//! interned handles to them (spec.md §4.2).
//!
//! Everything here lives in one of the [`Arena`]s below and is addressed by
//! an [`Id`] handle rather than a pointer, so the whole tree is torn down in
//! one pass when the context is dropped (spec.md §3 Lifecycles).

use std::collections::HashMap;

use log::{debug, trace};

use crate::arena::{Arena, Id};
use crate::error::{IrError, IrResult};
use crate::ir::function::IRFunction;
use crate::ir::types::{FuncTypeData, FuncTypeRef, StructData, StructRef, Type};
use crate::ir::value::{
    ConstFPData, ConstFPRef, ConstIntData, ConstIntRef, ConstStructData, ConstStructRef, FuncRef,
    GlobalData, GlobalRef, Operand,
};

/// Owns every type, constant, global variable and function created against
/// it. Dropping the context frees all of them.
pub struct IRContext {
    structs: Arena<StructData>,
    func_types: Arena<FuncTypeData>,
    const_ints: Arena<ConstIntData>,
    const_fps: Arena<ConstFPData>,
    const_structs: Arena<ConstStructData>,
    globals: Arena<GlobalData>,
    functions: Arena<IRFunction>,

    // Structural-equality interning. `function_type`/struct-literal lookups
    // are a linear scan over an existing vector in the original
    // implementation; a hash map gets the same interning semantics (one
    // object per distinct signature/field-list) without the O(n) scan.
    func_type_cache: HashMap<FuncTypeData, FuncTypeRef>,
    int_cache: HashMap<(Type, u64), ConstIntRef>,
    fp_cache: HashMap<(Type, u64), ConstFPRef>,

    named_functions: HashMap<String, FuncRef>,
    named_globals: HashMap<String, GlobalRef>,
    global_mappings: HashMap<Operand, usize>,
}

impl IRContext {
    pub fn new() -> IRContext {
        debug!("creating IRContext");
        IRContext {
            structs: Arena::new(),
            func_types: Arena::new(),
            const_ints: Arena::new(),
            const_fps: Arena::new(),
            const_structs: Arena::new(),
            globals: Arena::new(),
            functions: Arena::new(),
            func_type_cache: HashMap::new(),
            int_cache: HashMap::new(),
            fp_cache: HashMap::new(),
            named_functions: HashMap::new(),
            named_globals: HashMap::new(),
            global_mappings: HashMap::new(),
        }
    }

    // ---- primitive type accessors -------------------------------------

    pub fn void_ty(&self) -> Type {
        Type::Void
    }
    pub fn int1_ty(&self) -> Type {
        Type::Int1
    }
    pub fn int8_ty(&self) -> Type {
        Type::Int8
    }
    pub fn int16_ty(&self) -> Type {
        Type::Int16
    }
    pub fn int32_ty(&self) -> Type {
        Type::Int32
    }
    pub fn int64_ty(&self) -> Type {
        Type::Int64
    }
    pub fn float_ty(&self) -> Type {
        Type::Float
    }
    pub fn double_ty(&self) -> Type {
        Type::Double
    }

    /// The pointer-to-`elem` type. Every non-pointer type "caches a single
    /// `Pointer(self)`" per spec.md §3; since `Type::Pointer` owns its
    /// element by value rather than by interned handle, that caching falls
    /// out of `Type` simply being `Clone` — this just wraps it.
    pub fn get_pointer_to(&self, elem: &Type) -> Type {
        Type::Pointer(Box::new(elem.clone()))
    }

    /// Create a new, initially field-less struct type. The caller appends
    /// fields to `struct_data_mut(..).fields` afterwards (spec.md §4.2).
    pub fn struct_type(&mut self, name: impl Into<String>) -> StructRef {
        self.structs.alloc(StructData {
            name: name.into(),
            fields: Vec::new(),
        })
    }

    pub fn struct_data(&self, r: StructRef) -> &StructData {
        self.structs.get(r)
    }

    pub fn struct_data_mut(&mut self, r: StructRef) -> &mut StructData {
        self.structs.get_mut(r)
    }

    /// Intern a function signature, reusing an existing one with the same
    /// return type and parameter list.
    pub fn function_type(&mut self, ret: Type, params: Vec<Type>) -> FuncTypeRef {
        let data = FuncTypeData { ret, params };
        if let Some(&r) = self.func_type_cache.get(&data) {
            return r;
        }
        let r = self.func_types.alloc(data.clone());
        self.func_type_cache.insert(data, r);
        r
    }

    pub fn func_type_data(&self, r: FuncTypeRef) -> &FuncTypeData {
        self.func_types.get(r)
    }

    // ---- constants ------------------------------------------------------

    /// Intern an integer constant keyed by `(type, value)`.
    pub fn const_int(&mut self, ty: Type, value: u64) -> ConstIntRef {
        let key = (ty.clone(), value);
        if let Some(&r) = self.int_cache.get(&key) {
            return r;
        }
        let r = self.const_ints.alloc(ConstIntData { ty, value });
        self.int_cache.insert(key, r);
        r
    }

    pub fn const_int_true(&mut self) -> ConstIntRef {
        self.const_int(Type::Int1, 1)
    }

    pub fn const_int_false(&mut self) -> ConstIntRef {
        self.const_int(Type::Int1, 0)
    }

    pub fn const_int_data(&self, r: ConstIntRef) -> &ConstIntData {
        self.const_ints.get(r)
    }

    /// Intern a floating-point constant keyed by `(type, raw bits)` so a NaN
    /// payload remains addressable (spec.md §3/§4.2).
    pub fn const_fp(&mut self, ty: Type, value: f64) -> ConstFPRef {
        let key = (ty.clone(), value.to_bits());
        if let Some(&r) = self.fp_cache.get(&key) {
            return r;
        }
        let r = self.const_fps.alloc(ConstFPData { ty, value });
        self.fp_cache.insert(key, r);
        r
    }

    pub fn const_fp_data(&self, r: ConstFPRef) -> &ConstFPData {
        self.const_fps.get(r)
    }

    /// Intern a struct-literal constant by linear structural-equality scan,
    /// matching spec.md §4.2 exactly (struct literals are rare enough that a
    /// hash map buys nothing over the original's vector scan).
    pub fn const_struct(&mut self, ty: Type, fields: Vec<Operand>) -> ConstStructRef {
        for (r, data) in self.const_structs.iter() {
            if data.ty == ty && data.fields == fields {
                return r;
            }
        }
        self.const_structs.alloc(ConstStructData { ty, fields })
    }

    pub fn const_struct_data(&self, r: ConstStructRef) -> &ConstStructData {
        self.const_structs.get(r)
    }

    // ---- globals & functions --------------------------------------------

    pub fn create_global_variable(
        &mut self,
        ty: Type,
        initializer: Option<Operand>,
        name: impl Into<String>,
    ) -> GlobalRef {
        let name = name.into();
        trace!("creating global variable '{}'", name);
        let r = self.globals.alloc(GlobalData {
            ty,
            initializer,
            name: name.clone(),
            globals_offset: std::cell::Cell::new(-1),
        });
        self.named_globals.insert(name, r);
        r
    }

    pub fn global_data(&self, r: GlobalRef) -> &GlobalData {
        self.globals.get(r)
    }

    pub fn named_global(&self, name: &str) -> Option<GlobalRef> {
        self.named_globals.get(name).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalRef, &GlobalData)> {
        self.globals.iter()
    }

    pub fn create_function(&mut self, func_type: FuncTypeRef, name: impl Into<String>) -> FuncRef {
        let name = name.into();
        trace!("creating function '{}'", name);
        let r = self.functions.alloc(IRFunction::new(name.clone(), func_type));
        self.named_functions.insert(name, r);
        r
    }

    pub fn function(&self, r: FuncRef) -> &IRFunction {
        self.functions.get(r)
    }

    pub fn function_mut(&mut self, r: FuncRef) -> &mut IRFunction {
        self.functions.get_mut(r)
    }

    pub fn named_function(&self, name: &str) -> Option<FuncRef> {
        self.named_functions.get(name).copied()
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncRef, &IRFunction)> {
        self.functions.iter()
    }

    /// Bind `value` (a function or global) to an already-existing native
    /// address, bypassing code generation for it (spec.md §6).
    pub fn add_global_mapping(&mut self, value: Operand, native_ptr: *const u8) {
        self.global_mappings.insert(value, native_ptr as usize);
    }

    pub fn global_mapping(&self, value: Operand) -> Option<*const u8> {
        self.global_mappings.get(&value).map(|&p| p as *const u8)
    }

    /// Every binding installed by [`Self::add_global_mapping`], in
    /// unspecified order (spec.md §6) — consulted by `JITRuntime::add` to
    /// register external functions without emitting code for them.
    pub fn global_mappings(&self) -> impl Iterator<Item = (Operand, *const u8)> + '_ {
        self.global_mappings.iter().map(|(&v, &p)| (v, p as *const u8))
    }

    /// Look through an operand's type to find its pointee's function
    /// signature, used by the validator to check `Call` arguments (spec.md
    /// §4.4).
    pub fn callee_signature(&self, ty: &Type) -> IrResult<&FuncTypeData> {
        match ty {
            Type::Function(r) => Ok(self.func_type_data(*r)),
            Type::Pointer(elem) => self.callee_signature(elem),
            _ => Err(IrError::NotCallable),
        }
    }
}

impl Default for IRContext {
    fn default() -> Self {
        IRContext::new()
    }
}
