//! Focused coverage for the 8-bit divide/remainder path. x86 has no
//! `idiv r/m8` variant that splits quotient and remainder across two
//! registers the way the 16/32/64-bit forms split `dx:ax` (etc.): the
//! 8-bit form divides `ax` by the operand and leaves the quotient in
//! `al`, remainder in `ah`. `isa::select::div_binary` widens into `ax`
//! first and, for the remainder case, right-shifts `ax` by 8 bits before
//! truncating into the destination register — a distinct code path
//! from every other width, exercised here in isolation from the rest of
//! the scenario suite.

use dragonbook::{IRBuilder, IRContext, JITRuntime, Operand};

fn jit_two_i8_op(
    name: &str,
    build: impl FnOnce(&mut IRContext, &mut IRBuilder, Operand, Operand) -> dragonbook::Inst,
) -> *const u8 {
    let mut ctx = IRContext::new();
    let i8_ty = ctx.int8_ty();
    let fn_ty = ctx.function_type(i8_ty.clone(), vec![i8_ty.clone(), i8_ty]);
    let func = ctx.create_function(fn_ty, name);
    let entry = ctx.function_mut(func).create_block("entry");

    let mut builder = IRBuilder::new();
    builder.set_insert_point(func, entry);
    let result = build(&mut ctx, &mut builder, Operand::Arg(0), Operand::Arg(1));
    builder.create_ret(&mut ctx, Operand::Inst(result)).unwrap();

    let mut runtime = JITRuntime::new();
    runtime.add(&ctx).expect("jit link failed");
    // Leak the runtime: the compiled code must outlive this function, and
    // these tests only ever link one function each.
    let ptr = runtime.get_pointer_to_function(name).expect("missing symbol");
    std::mem::forget(runtime);
    ptr
}

#[test]
fn srem_int8() {
    let ptr = jit_two_i8_op("srem_int8", |ctx, b, lhs, rhs| {
        b.create_srem(ctx, lhs, rhs).unwrap()
    });
    let f: extern "C" fn(i8, i8) -> i8 = unsafe { std::mem::transmute(ptr) };

    assert_eq!(f(7, 3), 1);
    assert_eq!(f(-7, 3), -1);
    assert_eq!(f(7, -3), 1);
    assert_eq!(f(-128, 1), 0);
}

#[test]
fn urem_int8() {
    let ptr = jit_two_i8_op("urem_int8", |ctx, b, lhs, rhs| {
        b.create_urem(ctx, lhs, rhs).unwrap()
    });
    let f: extern "C" fn(u8, u8) -> u8 = unsafe { std::mem::transmute(ptr) };

    assert_eq!(f(200, 7), 4);
    assert_eq!(f(255, 2), 1);
    assert_eq!(f(0, 9), 0);
}

#[test]
fn sdiv_int8() {
    let ptr = jit_two_i8_op("sdiv_int8", |ctx, b, lhs, rhs| {
        b.create_sdiv(ctx, lhs, rhs).unwrap()
    });
    let f: extern "C" fn(i8, i8) -> i8 = unsafe { std::mem::transmute(ptr) };

    assert_eq!(f(7, 3), 2);
    assert_eq!(f(-7, 3), -2);
    assert_eq!(f(-128, 2), -64);
}
