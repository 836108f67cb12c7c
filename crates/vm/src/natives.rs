//! Native functions and native classes registered at VM startup.
//!
//! Natives receive the VM and a copy of their arguments, and report
//! failures by returning `Err`; the dispatch loop turns that into an
//! ordinary runtime error, so control always returns to the host.
//!
//! Registration follows the rooting discipline: every intermediate is
//! pushed onto the value stack before the next allocation safepoint, so a
//! collection mid-registration cannot reclaim a half-installed module.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::gc::GcPtr;
use crate::table::Table;
use crate::value::{NativeClass, NativeFn, NativeFunction, Value};
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    define_native(vm, "clock", clock);
    register_assert(vm);
}

fn define_native(vm: &mut Vm, name: &str, function: NativeFn) {
    vm.maybe_collect(&[]);
    let name = vm.intern(name);
    vm.root(Value::String(name));
    vm.maybe_collect(&[]);
    let native = vm.heap.alloc_native(NativeFunction { name, function });
    vm.root(Value::Native(native));
    let hash = vm.heap.get_string(name).hash;
    vm.globals.set(name, hash, Value::Native(native));
    vm.unroot();
    vm.unroot();
}

fn define_native_method(vm: &mut Vm, class: GcPtr<NativeClass>, name: &str, function: NativeFn) {
    vm.maybe_collect(&[]);
    let name = vm.intern(name);
    vm.root(Value::String(name));
    vm.maybe_collect(&[]);
    let native = vm.heap.alloc_native(NativeFunction { name, function });
    let hash = vm.heap.get_string(name).hash;
    vm.heap
        .get_native_class_mut(class)
        .methods
        .set(name, hash, Value::Native(native));
    vm.unroot();
}

fn register_assert(vm: &mut Vm) {
    vm.maybe_collect(&[]);
    let name = vm.intern("Assert");
    vm.root(Value::String(name));
    vm.maybe_collect(&[]);
    let class = vm.heap.alloc_native_class(NativeClass {
        name,
        methods: Table::new(),
    });
    vm.root(Value::NativeClass(class));

    define_native_method(vm, class, "isTrue", assert_is_true);
    define_native_method(vm, class, "isFalse", assert_is_false);
    define_native_method(vm, class, "equals", assert_equals);

    let hash = vm.heap.get_string(name).hash;
    vm.globals.set(name, hash, Value::NativeClass(class));
    vm.unroot();
    vm.unroot();
}

/// Seconds since the Unix epoch, as a Number.
fn clock(_vm: &mut Vm, _args: &[Value]) -> Result<Value, String> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Number(seconds))
}

fn failure_message(vm: &Vm, fallback: &str, detail: Option<&Value>) -> String {
    match detail {
        Some(&value) => format!("failed asserting that {}", vm.heap.format_value(value)),
        None => fallback.to_string(),
    }
}

fn assert_is_true(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    match args.first() {
        None => Err("Assert.isTrue() expects at least one argument".to_string()),
        Some(value) if value.is_falsey() => Err(failure_message(
            vm,
            "Assert.isTrue() failed",
            args.get(1),
        )),
        Some(_) => Ok(Value::Null),
    }
}

fn assert_is_false(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    match args.first() {
        None => Err("Assert.isFalse() expects at least one argument".to_string()),
        Some(value) if !value.is_falsey() => Err(failure_message(
            vm,
            "Assert.isFalse() failed",
            args.get(1),
        )),
        Some(_) => Ok(Value::Null),
    }
}

fn assert_equals(vm: &mut Vm, args: &[Value]) -> Result<Value, String> {
    if args.len() < 2 {
        return Err("Assert.equals() expects at least two arguments".to_string());
    }
    if args[0] == args[1] {
        Ok(Value::Null)
    } else {
        Err(failure_message(vm, "Assert.equals() failed", args.get(2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_class_is_registered() {
        let mut vm = Vm::new();
        let name = vm.intern("Assert");
        let hash = vm.heap.get_string(name).hash;
        let class = match vm.globals.get(name, hash) {
            Some(Value::NativeClass(class)) => class,
            other => panic!("expected native class, found {other:?}"),
        };
        let is_true = vm.intern("isTrue");
        let method_hash = vm.heap.get_string(is_true).hash;
        assert!(matches!(
            vm.heap.get_native_class(class).methods.get(is_true, method_hash),
            Some(Value::Native(_))
        ));
    }

    #[test]
    fn assert_is_true_passes_and_fails() {
        let mut vm = Vm::new();
        assert!(assert_is_true(&mut vm, &[Value::Bool(true)]).is_ok());
        let err = assert_is_true(&mut vm, &[Value::Bool(false)]).unwrap_err();
        assert_eq!(err, "Assert.isTrue() failed");
        assert!(assert_is_true(&mut vm, &[]).is_err());
    }

    #[test]
    fn assert_failure_carries_custom_message() {
        let mut vm = Vm::new();
        let message = vm.intern("custom detail");
        let err =
            assert_is_true(&mut vm, &[Value::Bool(false), Value::String(message)]).unwrap_err();
        assert_eq!(err, "failed asserting that custom detail");
    }

    #[test]
    fn assert_equals_uses_value_equality() {
        let mut vm = Vm::new();
        let a = vm.intern("same");
        let b = vm.intern("same");
        assert!(assert_equals(&mut vm, &[Value::String(a), Value::String(b)]).is_ok());
        assert!(assert_equals(&mut vm, &[Value::Number(1.0), Value::Number(2.0)]).is_err());
        assert!(assert_equals(&mut vm, &[Value::Null]).is_err());
    }

    #[test]
    fn clock_returns_a_number() {
        let mut vm = Vm::new();
        match clock(&mut vm, &[]).unwrap() {
            Value::Number(seconds) => assert!(seconds > 0.0),
            other => panic!("expected number, found {other:?}"),
        }
    }
}
