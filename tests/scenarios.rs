//! End-to-end scenarios: build IR for one function, JIT it, and call it as
//! a native function pointer. Each test here corresponds to one of the
//! named scenarios spec.md §8 calls out explicitly.

use dragonbook::{pass, IRBuilder, IRContext, JITRuntime, Operand};

/// `fn add_int32(a: i32, b: i32) -> i32 { ret a + b }`, including the
/// `i32::MAX + 1` two's-complement wraparound case.
#[test]
fn add_int32() {
    let mut ctx = IRContext::new();
    let i32_ty = ctx.int32_ty();
    let fn_ty = ctx.function_type(i32_ty.clone(), vec![i32_ty.clone(), i32_ty]);
    let func = ctx.create_function(fn_ty, "add_int32");
    let entry = ctx.function_mut(func).create_block("entry");

    let mut builder = IRBuilder::new();
    builder.set_insert_point(func, entry);
    let sum = builder
        .create_add(&mut ctx, Operand::Arg(0), Operand::Arg(1))
        .unwrap();
    builder.create_ret(&mut ctx, Operand::Inst(sum)).unwrap();

    let mut runtime = JITRuntime::new();
    runtime.add(&ctx).expect("jit link failed");
    let ptr = runtime.get_pointer_to_function("add_int32").expect("missing symbol");
    let f: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(ptr) };

    assert_eq!(f(2, 3), 5);
    assert_eq!(f(i32::MAX, 1), i32::MIN);
    assert_eq!(f(-1, -1), -2);
}

/// `fn udiv_int8(a: u8, b: u8) -> u8 { ret a / b }`, exercising the 8-bit
/// divide path that widens into `ax` before `div r/m8` (see
/// `isa::select::div_binary`).
#[test]
fn udiv_int8() {
    let mut ctx = IRContext::new();
    let i8_ty = ctx.int8_ty();
    let fn_ty = ctx.function_type(i8_ty.clone(), vec![i8_ty.clone(), i8_ty]);
    let func = ctx.create_function(fn_ty, "udiv_int8");
    let entry = ctx.function_mut(func).create_block("entry");

    let mut builder = IRBuilder::new();
    builder.set_insert_point(func, entry);
    let q = builder
        .create_udiv(&mut ctx, Operand::Arg(0), Operand::Arg(1))
        .unwrap();
    builder.create_ret(&mut ctx, Operand::Inst(q)).unwrap();

    let mut runtime = JITRuntime::new();
    runtime.add(&ctx).expect("jit link failed");
    let ptr = runtime.get_pointer_to_function("udiv_int8").expect("missing symbol");
    let f: extern "C" fn(u8, u8) -> u8 = unsafe { std::mem::transmute(ptr) };

    assert_eq!(f(200, 7), 28);
    assert_eq!(f(255, 1), 255);
    assert_eq!(f(0, 9), 0);
}

/// `fn fdiv_double(a: f64, b: f64) -> f64 { ret a / b }`, including the
/// IEEE-754 division-by-zero case (finite / +0.0 == +infinity).
#[test]
fn fdiv_double() {
    let mut ctx = IRContext::new();
    let f64_ty = ctx.double_ty();
    let fn_ty = ctx.function_type(f64_ty.clone(), vec![f64_ty.clone(), f64_ty]);
    let func = ctx.create_function(fn_ty, "fdiv_double");
    let entry = ctx.function_mut(func).create_block("entry");

    let mut builder = IRBuilder::new();
    builder.set_insert_point(func, entry);
    let q = builder
        .create_fdiv(&mut ctx, Operand::Arg(0), Operand::Arg(1))
        .unwrap();
    builder.create_ret(&mut ctx, Operand::Inst(q)).unwrap();

    let mut runtime = JITRuntime::new();
    runtime.add(&ctx).expect("jit link failed");
    let ptr = runtime.get_pointer_to_function("fdiv_double").expect("missing symbol");
    let f: extern "C" fn(f64, f64) -> f64 = unsafe { std::mem::transmute(ptr) };

    assert_eq!(f(1.0, 0.0), f64::INFINITY);
    assert_eq!(f(7.0, 2.0), 3.5);
}

/// `fn fcmp_une_float(a: f32, b: f32) -> i1 { ret fcmp une a, b }`. `UNE` is
/// an *unordered* predicate: it's true whenever either operand is NaN, not
/// just when the operands are numerically unequal.
#[test]
fn fcmp_une_float() {
    let mut ctx = IRContext::new();
    let f32_ty = ctx.float_ty();
    let i1_ty = ctx.int1_ty();
    let fn_ty = ctx.function_type(i1_ty, vec![f32_ty.clone(), f32_ty]);
    let func = ctx.create_function(fn_ty, "fcmp_une_float");
    let entry = ctx.function_mut(func).create_block("entry");

    let mut builder = IRBuilder::new();
    builder.set_insert_point(func, entry);
    let cmp = builder
        .create_fcmp_une(&mut ctx, Operand::Arg(0), Operand::Arg(1))
        .unwrap();
    builder.create_ret(&mut ctx, Operand::Inst(cmp)).unwrap();

    let mut runtime = JITRuntime::new();
    runtime.add(&ctx).expect("jit link failed");
    let ptr = runtime
        .get_pointer_to_function("fcmp_une_float")
        .expect("missing symbol");
    let f: extern "C" fn(f32, f32) -> u8 = unsafe { std::mem::transmute(ptr) };

    assert_eq!(f(f32::NAN, 0.0), 1);
    assert_eq!(f(1.0, 1.0), 0);
    assert_eq!(f(1.0, 2.0), 1);
}

/// `fn zext_i64_i8(a: i8) -> i64 { ret zext a to i64 }` — the high 56 bits
/// must come back zero regardless of the source byte's sign bit.
#[test]
fn zext_i64_i8() {
    let mut ctx = IRContext::new();
    let i8_ty = ctx.int8_ty();
    let i64_ty = ctx.int64_ty();
    let fn_ty = ctx.function_type(i64_ty.clone(), vec![i8_ty]);
    let func = ctx.create_function(fn_ty, "zext_i64_i8");
    let entry = ctx.function_mut(func).create_block("entry");

    let mut builder = IRBuilder::new();
    builder.set_insert_point(func, entry);
    let z = builder
        .create_zext(&mut ctx, Operand::Arg(0), i64_ty.clone())
        .unwrap();
    builder.create_ret(&mut ctx, Operand::Inst(z)).unwrap();

    let mut runtime = JITRuntime::new();
    runtime.add(&ctx).expect("jit link failed");
    let ptr = runtime.get_pointer_to_function("zext_i64_i8").expect("missing symbol");
    let f: extern "C" fn(u8) -> u64 = unsafe { std::mem::transmute(ptr) };

    assert_eq!(f(0), 0);
    assert_eq!(f(0x7f), 0x7f);
    assert_eq!(f(0x80), 0x80);
    assert_eq!(f(0xff), 0xff);
}

/// `fn alloca_roundtrip(a: i32) -> i32 { %p = alloca i32; store a, %p; ret
/// load %p }` — a value written through a stack slot must read back
/// unchanged, both with and without `stack2reg::run` promoting the slot
/// into a virtual register first.
#[test]
fn alloca_roundtrip() {
    for promote in [false, true] {
        let mut ctx = IRContext::new();
        let i32_ty = ctx.int32_ty();
        let fn_ty = ctx.function_type(i32_ty.clone(), vec![i32_ty.clone()]);
        let func = ctx.create_function(fn_ty, "alloca_roundtrip");
        let entry = ctx.function_mut(func).create_block("entry");

        let mut builder = IRBuilder::new();
        builder.set_insert_point(func, entry);
        let one = ctx.const_int(i32_ty.clone(), 1);
        let slot = builder
            .create_alloca(&mut ctx, i32_ty.clone(), Operand::ConstInt(one), "slot")
            .unwrap();
        builder
            .create_store(&mut ctx, Operand::Arg(0), Operand::Inst(slot))
            .unwrap();
        let loaded = builder.create_load(&mut ctx, Operand::Inst(slot)).unwrap();
        builder.create_ret(&mut ctx, Operand::Inst(loaded)).unwrap();

        if promote {
            pass::stack2reg::run(ctx.function_mut(func));
        }

        let mut runtime = JITRuntime::new();
        runtime.add(&ctx).expect("jit link failed");
        let ptr = runtime
            .get_pointer_to_function("alloca_roundtrip")
            .expect("missing symbol");
        let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(ptr) };

        assert_eq!(f(42), 42);
        assert_eq!(f(i32::MIN), i32::MIN);
    }
}
