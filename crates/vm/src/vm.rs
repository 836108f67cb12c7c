//! The Ghost virtual machine.
//!
//! A stack machine driving the bytecode produced by the compiler: a value
//! stack, a call-frame stack, the sorted list of open upvalues, the global
//! and string-intern tables, and the garbage-collection safepoints that
//! tie it all to the heap.

use thiserror::Error;

use crate::chunk::OpCode;
use crate::gc::{GcConfig, GcPtr, Heap};
use crate::natives;
use crate::table::Table;
use crate::value::{
    hash_str, BoundMethod, Class, Closure, Function, Instance, List, StrObj, Upvalue, Value,
};

/// Value stack capacity.
pub const STACK_MAX: usize = 16 * 1024;
/// Call stack capacity.
pub const FRAMES_MAX: usize = 64;

/// A runtime failure: the message plus the call-stack trace recorded at
/// the point of failure, innermost frame first.
#[derive(Debug, Clone, Error)]
#[error(
    "runtime error: {message}{}",
    .trace.iter().map(|frame| format!("\n{frame}")).collect::<String>()
)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<String>,
}

/// One activation record: which closure is running, where in its chunk,
/// and where its locals start on the value stack.
struct CallFrame {
    closure: GcPtr<Closure>,
    ip: usize,
    slots: usize,
}

/// The virtual machine state. Explicitly threaded through every runtime
/// primitive; there is no global VM.
pub struct Vm {
    pub heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Open upvalues, ordered by decreasing stack slot (youngest first).
    open_upvalues: Vec<GcPtr<Upvalue>>,
    pub(crate) globals: Table,
    strings: Table,
    init_string: GcPtr<StrObj>,
    /// When set, `print` output is collected here instead of stdout.
    capture: Option<Vec<String>>,
}

impl Vm {
    pub fn new() -> Vm {
        Self::with_config(GcConfig::default())
    }

    pub fn with_config(config: GcConfig) -> Vm {
        let mut heap = Heap::with_config(config);
        let hash = hash_str("init");
        let init_string = heap.alloc_string(StrObj {
            chars: "init".to_string(),
            hash,
        });
        let mut strings = Table::new();
        strings.set(init_string, hash, Value::Null);

        let mut vm = Vm {
            heap,
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            globals: Table::new(),
            strings,
            init_string,
            capture: None,
        };
        natives::install(&mut vm);
        vm
    }

    /// Route `print` output into a buffer, for tests and the REPL.
    pub fn capture_output(&mut self) {
        self.capture = Some(Vec::new());
    }

    pub fn take_output(&mut self) -> Vec<String> {
        self.capture.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn write_output(&mut self, line: String) {
        match &mut self.capture {
            Some(buffer) => buffer.push(line),
            None => println!("{line}"),
        }
    }

    // === String interning ===

    /// Intern a borrowed string: returns the canonical heap pointer for
    /// these bytes, allocating only on a miss.
    pub fn intern(&mut self, chars: &str) -> GcPtr<StrObj> {
        let hash = hash_str(chars);
        if let Some(existing) = self.strings.find_string(&self.heap, chars, hash) {
            return existing;
        }
        let ptr = self.heap.alloc_string(StrObj {
            chars: chars.to_string(),
            hash,
        });
        self.strings.set(ptr, hash, Value::Null);
        ptr
    }

    /// Intern an owned string, dropping the buffer on an intern hit.
    pub fn intern_owned(&mut self, chars: String) -> GcPtr<StrObj> {
        let hash = hash_str(&chars);
        if let Some(existing) = self.strings.find_string(&self.heap, &chars, hash) {
            return existing;
        }
        let ptr = self.heap.alloc_string(StrObj { chars, hash });
        self.strings.set(ptr, hash, Value::Null);
        ptr
    }

    // === Garbage collection ===

    /// GC safepoint: collect if the heap asks for it. Every allocating
    /// primitive passes through here first, so a collection can fire
    /// between any two allocations.
    pub fn maybe_collect(&mut self, extra_roots: &[Value]) {
        if self.heap.should_collect() {
            self.collect_garbage(extra_roots);
        }
    }

    /// Run a full mark-sweep collection. Roots: the value stack, every
    /// frame's closure, the open upvalues, the globals table, the interned
    /// `"init"`, and whatever the caller passes (the compiler hands its
    /// constant pools through `extra_roots`). The string table is weak:
    /// unmarked keys are dropped between mark and sweep.
    pub fn collect_garbage(&mut self, extra_roots: &[Value]) {
        if self.heap.config().log {
            eprintln!("[GC] begin collection");
        }
        for &value in &self.stack {
            self.heap.mark_value(value);
        }
        for frame in &self.frames {
            self.heap.mark_raw(frame.closure.as_raw());
        }
        for upvalue in &self.open_upvalues {
            self.heap.mark_raw(upvalue.as_raw());
        }
        self.heap.mark_table(&self.globals);
        self.heap.mark_raw(self.init_string.as_raw());
        for &value in extra_roots {
            self.heap.mark_value(value);
        }
        self.heap.trace_references();
        self.strings.remove_unmarked(&self.heap);
        self.heap.sweep();
    }

    // === Stack ===

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= STACK_MAX {
            return Err(self.runtime_error("stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Null)
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    /// Registration-time rooting: native-module setup pushes intermediates
    /// here so a collection at the next safepoint cannot reclaim them.
    pub(crate) fn root(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn unroot(&mut self) {
        self.stack.pop();
    }

    /// Build a runtime error with a stack trace and reset the machine.
    pub(crate) fn runtime_error(&mut self, message: impl Into<String>) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let closure = self.heap.get_closure(frame.closure);
            let function = self.heap.get_function(closure.function);
            let line = function.chunk.line_of(frame.ip.saturating_sub(1));
            let location = match function.name {
                Some(name) => format!("{}()", self.heap.get_string(name).chars),
                None => "script".to_string(),
            };
            trace.push(format!("[line {line}] in {location}"));
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        RuntimeError {
            message: message.into(),
            trace,
        }
    }

    // === Execution ===

    /// Wrap a compiled top-level function in a closure and run it to
    /// completion.
    pub fn execute(&mut self, function: GcPtr<Function>) -> Result<(), RuntimeError> {
        self.push(Value::Function(function))?;
        self.maybe_collect(&[]);
        let closure = self.heap.alloc_closure(Closure {
            function,
            upvalues: Vec::new(),
        });
        self.pop();
        self.push(Value::Closure(closure))?;
        self.call_closure(closure, 0)?;
        self.run()
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let closure = self.heap.get_closure(frame.closure);
        let function = self.heap.get_function(closure.function);
        let byte = function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let high = self.read_byte() as u16;
        let low = self.read_byte() as u16;
        (high << 8) | low
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().unwrap();
        let closure = self.heap.get_closure(frame.closure);
        let function = self.heap.get_function(closure.function);
        function.chunk.constants[index]
    }

    fn read_string_constant(&mut self) -> GcPtr<StrObj> {
        match self.read_constant() {
            Value::String(ptr) => ptr,
            other => panic!("bytecode: expected string constant, found {}", other.type_name()),
        }
    }

    fn numeric_operands(&mut self) -> Result<(f64, f64), RuntimeError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                Ok((a, b))
            }
            _ => Err(self.runtime_error("operands must be numbers")),
        }
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let byte = self.read_byte();
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(_) => {
                    let message = format!("unknown opcode {byte:#04x}");
                    return Err(self.runtime_error(message));
                }
            };
            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value)?;
                }
                OpCode::Null => self.push(Value::Null)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slots;
                    let value = self.stack[base + slot];
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slots;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string_constant();
                    let hash = self.heap.get_string(name).hash;
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value)?,
                        None => {
                            let message = format!(
                                "undefined variable '{}'",
                                self.heap.get_string(name).chars
                            );
                            return Err(self.runtime_error(message));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string_constant();
                    let hash = self.heap.get_string(name).hash;
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string_constant();
                    let hash = self.heap.get_string(name).hash;
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        self.globals.delete(name, hash);
                        let message = format!(
                            "undefined variable '{}'",
                            self.heap.get_string(name).chars
                        );
                        return Err(self.runtime_error(message));
                    }
                }
                OpCode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = self.heap.get_closure(closure).upvalues[index];
                    let value = match *self.heap.get_upvalue(upvalue) {
                        Upvalue::Open(slot) => self.stack[slot],
                        Upvalue::Closed(value) => value,
                    };
                    self.push(value)?;
                }
                OpCode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = self.heap.get_closure(closure).upvalues[index];
                    let value = self.peek(0);
                    match self.heap.get_upvalue_mut(upvalue) {
                        Upvalue::Open(slot) => {
                            let slot = *slot;
                            self.stack[slot] = value;
                        }
                        cell => *cell = Upvalue::Closed(value),
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string_constant();
                    let hash = self.heap.get_string(name).hash;
                    match self.peek(0) {
                        Value::Instance(instance) => {
                            let field = self.heap.get_instance(instance).fields.get(name, hash);
                            if let Some(value) = field {
                                self.pop();
                                self.push(value)?;
                            } else {
                                let class = self.heap.get_instance(instance).class;
                                self.bind_method(class, name, hash)?;
                            }
                        }
                        Value::NativeClass(class) => {
                            let method =
                                self.heap.get_native_class(class).methods.get(name, hash);
                            match method {
                                Some(value) => {
                                    self.pop();
                                    self.push(value)?;
                                }
                                None => {
                                    let message = format!(
                                        "undefined property '{}'",
                                        self.heap.get_string(name).chars
                                    );
                                    return Err(self.runtime_error(message));
                                }
                            }
                        }
                        _ => return Err(self.runtime_error("only instances have properties")),
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string_constant();
                    let hash = self.heap.get_string(name).hash;
                    match self.peek(1) {
                        Value::Instance(instance) => {
                            let value = self.peek(0);
                            self.heap
                                .get_instance_mut(instance)
                                .fields
                                .set(name, hash, value);
                            let value = self.pop();
                            self.pop();
                            self.push(value)?;
                        }
                        _ => return Err(self.runtime_error("only instances have fields")),
                    }
                }
                OpCode::GetSuper => {
                    let name = self.read_string_constant();
                    let hash = self.heap.get_string(name).hash;
                    match self.pop() {
                        Value::Class(superclass) => self.bind_method(superclass, name, hash)?,
                        _ => return Err(self.runtime_error("superclass must be a class")),
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b))?;
                }
                OpCode::Greater => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Bool(a > b))?;
                }
                OpCode::Less => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Bool(a < b))?;
                }
                OpCode::Add => match (self.peek(1), self.peek(0)) {
                    (Value::Number(a), Value::Number(b)) => {
                        self.pop();
                        self.pop();
                        self.push(Value::Number(a + b))?;
                    }
                    (Value::String(a), Value::String(b)) => {
                        // Operands stay on the stack across the safepoint.
                        self.maybe_collect(&[]);
                        let mut chars = self.heap.get_string(a).chars.clone();
                        chars.push_str(&self.heap.get_string(b).chars);
                        let result = self.intern_owned(chars);
                        self.pop();
                        self.pop();
                        self.push(Value::String(result))?;
                    }
                    _ => {
                        return Err(
                            self.runtime_error("operands must be two numbers or two strings")
                        )
                    }
                },
                OpCode::Subtract => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Number(a - b))?;
                }
                OpCode::Multiply => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Number(a * b))?;
                }
                OpCode::Divide => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Number(a / b))?;
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()))?;
                }
                OpCode::Negate => match self.peek(0) {
                    Value::Number(n) => {
                        self.pop();
                        self.push(Value::Number(-n))?;
                    }
                    _ => return Err(self.runtime_error("operand must be a number")),
                },
                OpCode::Print => {
                    let value = self.pop();
                    let line = self.heap.format_value(value);
                    self.write_output(line);
                }
                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().unwrap().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().unwrap().ip -= offset;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string_constant();
                    let argc = self.read_byte();
                    self.invoke(name, argc)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string_constant();
                    let argc = self.read_byte();
                    let hash = self.heap.get_string(name).hash;
                    match self.pop() {
                        Value::Class(superclass) => {
                            self.invoke_from_class(superclass, name, hash, argc)?;
                        }
                        _ => return Err(self.runtime_error("superclass must be a class")),
                    }
                }
                OpCode::Closure => {
                    let function = match self.read_constant() {
                        Value::Function(ptr) => ptr,
                        other => panic!(
                            "bytecode: expected function constant, found {}",
                            other.type_name()
                        ),
                    };
                    let count = self.heap.get_function(function).upvalue_count;
                    let mut upvalues = Vec::with_capacity(count);
                    for _ in 0..count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        if is_local {
                            let base = self.frames.last().unwrap().slots;
                            upvalues.push(self.capture_upvalue(base + index));
                        } else {
                            let enclosing = self.frames.last().unwrap().closure;
                            upvalues.push(self.heap.get_closure(enclosing).upvalues[index]);
                        }
                    }
                    // The captured upvalues are rooted through the
                    // open-upvalue list or the enclosing closure.
                    self.maybe_collect(&[]);
                    let closure = self.heap.alloc_closure(Closure { function, upvalues });
                    self.push(Value::Closure(closure))?;
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.slots);
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result)?;
                }
                OpCode::Class => {
                    let name = self.read_string_constant();
                    self.maybe_collect(&[]);
                    let class = self.heap.alloc_class(Class {
                        name,
                        methods: Table::new(),
                    });
                    self.push(Value::Class(class))?;
                }
                OpCode::Inherit => {
                    let superclass = match self.peek(1) {
                        Value::Class(ptr) => ptr,
                        _ => return Err(self.runtime_error("superclass must be a class")),
                    };
                    let subclass = match self.peek(0) {
                        Value::Class(ptr) => ptr,
                        _ => return Err(self.runtime_error("subclass must be a class")),
                    };
                    let inherited = self.heap.get_class(superclass).methods.clone();
                    self.heap.get_class_mut(subclass).methods.add_all(&inherited);
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string_constant();
                    let hash = self.heap.get_string(name).hash;
                    let method = self.peek(0);
                    match self.peek(1) {
                        Value::Class(class) => {
                            self.heap.get_class_mut(class).methods.set(name, hash, method);
                            self.pop();
                        }
                        _ => return Err(self.runtime_error("methods require a class")),
                    }
                }
                OpCode::BuildList => {
                    let count = self.read_u16() as usize;
                    // The elements stay on the stack across the safepoint.
                    self.maybe_collect(&[]);
                    let start = self.stack.len() - count;
                    let items = self.stack[start..].to_vec();
                    let list = self.heap.alloc_list(List { items });
                    self.stack.truncate(start);
                    self.push(Value::List(list))?;
                }
                OpCode::IndexSubscript => {
                    let list = match self.peek(1) {
                        Value::List(ptr) => ptr,
                        _ => return Err(self.runtime_error("only lists can be subscripted")),
                    };
                    let index = self.list_index(self.peek(0), list)?;
                    let value = self.heap.get_list(list).items[index];
                    self.pop();
                    self.pop();
                    self.push(value)?;
                }
                OpCode::StoreSubscript => {
                    let list = match self.peek(2) {
                        Value::List(ptr) => ptr,
                        _ => return Err(self.runtime_error("only lists can be subscripted")),
                    };
                    let index = self.list_index(self.peek(1), list)?;
                    let value = self.peek(0);
                    self.heap.get_list_mut(list).items[index] = value;
                    self.pop();
                    self.pop();
                    self.pop();
                    self.push(value)?;
                }
            }
        }
    }

    fn list_index(&mut self, index: Value, list: GcPtr<List>) -> Result<usize, RuntimeError> {
        let number = match index {
            Value::Number(n) => n,
            _ => return Err(self.runtime_error("list index must be a number")),
        };
        let length = self.heap.get_list(list).items.len();
        if number.fract() != 0.0 || number < 0.0 || number as usize >= length {
            let message = format!("list index {number} out of bounds for length {length}");
            return Err(self.runtime_error(message));
        }
        Ok(number as usize)
    }

    // === Calls ===

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::Native(native) => self.call_native(native, argc),
            Value::Class(class) => {
                self.maybe_collect(&[]);
                let instance = self.heap.alloc_instance(Instance {
                    class,
                    fields: Table::new(),
                });
                let receiver_slot = self.stack.len() - argc as usize - 1;
                self.stack[receiver_slot] = Value::Instance(instance);

                let init_hash = self.heap.get_string(self.init_string).hash;
                let initializer = self
                    .heap
                    .get_class(class)
                    .methods
                    .get(self.init_string, init_hash);
                match initializer {
                    Some(Value::Closure(init)) => self.call_closure(init, argc),
                    _ if argc != 0 => {
                        let message = format!("expected 0 arguments but got {argc}");
                        Err(self.runtime_error(message))
                    }
                    _ => Ok(()),
                }
            }
            Value::BoundMethod(bound) => {
                let bound = self.heap.get_bound_method(bound);
                let receiver = bound.receiver;
                let method = bound.method;
                let receiver_slot = self.stack.len() - argc as usize - 1;
                self.stack[receiver_slot] = receiver;
                self.call_closure(method, argc)
            }
            _ => Err(self.runtime_error("can only call functions and classes")),
        }
    }

    fn call_closure(&mut self, closure: GcPtr<Closure>, argc: u8) -> Result<(), RuntimeError> {
        let arity = {
            let function = self.heap.get_closure(closure).function;
            self.heap.get_function(function).arity
        };
        if argc != arity {
            let message = format!("expected {arity} arguments but got {argc}");
            return Err(self.runtime_error(message));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("stack overflow"));
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: self.stack.len() - argc as usize - 1,
        });
        Ok(())
    }

    fn call_native(
        &mut self,
        native: GcPtr<crate::value::NativeFunction>,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        let function = self.heap.get_native(native).function;
        let start = self.stack.len() - argc as usize;
        let args: Vec<Value> = self.stack[start..].to_vec();
        match function(self, &args) {
            Ok(value) => {
                self.stack.truncate(start - 1);
                self.push(value)
            }
            Err(message) => Err(self.runtime_error(message)),
        }
    }

    fn invoke(&mut self, name: GcPtr<StrObj>, argc: u8) -> Result<(), RuntimeError> {
        let hash = self.heap.get_string(name).hash;
        match self.peek(argc as usize) {
            Value::Instance(instance) => {
                // A field holding a callable shadows any method.
                let field = self.heap.get_instance(instance).fields.get(name, hash);
                if let Some(value) = field {
                    let receiver_slot = self.stack.len() - argc as usize - 1;
                    self.stack[receiver_slot] = value;
                    self.call_value(value, argc)
                } else {
                    let class = self.heap.get_instance(instance).class;
                    self.invoke_from_class(class, name, hash, argc)
                }
            }
            Value::NativeClass(class) => {
                let method = self.heap.get_native_class(class).methods.get(name, hash);
                match method {
                    Some(Value::Native(native)) => self.call_native(native, argc),
                    _ => {
                        let message = format!(
                            "undefined property '{}'",
                            self.heap.get_string(name).chars
                        );
                        Err(self.runtime_error(message))
                    }
                }
            }
            _ => Err(self.runtime_error("only instances have methods")),
        }
    }

    fn invoke_from_class(
        &mut self,
        class: GcPtr<Class>,
        name: GcPtr<StrObj>,
        hash: u32,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        match self.heap.get_class(class).methods.get(name, hash) {
            Some(Value::Closure(method)) => self.call_closure(method, argc),
            _ => {
                let message = format!(
                    "undefined property '{}'",
                    self.heap.get_string(name).chars
                );
                Err(self.runtime_error(message))
            }
        }
    }

    /// Resolve `name` on a class and leave a bound method on the stack in
    /// place of the receiver.
    fn bind_method(
        &mut self,
        class: GcPtr<Class>,
        name: GcPtr<StrObj>,
        hash: u32,
    ) -> Result<(), RuntimeError> {
        match self.heap.get_class(class).methods.get(name, hash) {
            Some(Value::Closure(method)) => {
                let receiver = self.peek(0);
                // Receiver is still on the stack across the safepoint.
                self.maybe_collect(&[]);
                let bound = self.heap.alloc_bound_method(BoundMethod { receiver, method });
                self.pop();
                self.push(Value::BoundMethod(bound))
            }
            _ => {
                let message = format!(
                    "undefined property '{}'",
                    self.heap.get_string(name).chars
                );
                Err(self.runtime_error(message))
            }
        }
    }

    // === Upvalues ===

    /// Find the open upvalue for `slot`, or create one. Reusing an
    /// existing cell is what gives two closures over the same variable
    /// capture-by-reference semantics.
    fn capture_upvalue(&mut self, slot: usize) -> GcPtr<Upvalue> {
        for &ptr in &self.open_upvalues {
            match *self.heap.get_upvalue(ptr) {
                Upvalue::Open(s) if s == slot => return ptr,
                // The list is ordered by decreasing slot; past this point
                // every entry is older than the one we want.
                Upvalue::Open(s) if s < slot => break,
                _ => {}
            }
        }
        self.maybe_collect(&[]);
        let created = self.heap.alloc_upvalue(Upvalue::Open(slot));
        let position = self
            .open_upvalues
            .iter()
            .position(|&ptr| match *self.heap.get_upvalue(ptr) {
                Upvalue::Open(s) => s < slot,
                Upvalue::Closed(_) => false,
            })
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(position, created);
        created
    }

    /// Close every open upvalue at or above `from`: move the stack value
    /// into the cell and drop the cell from the open list.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(&ptr) = self.open_upvalues.first() {
            let slot = match *self.heap.get_upvalue(ptr) {
                Upvalue::Open(slot) => slot,
                Upvalue::Closed(_) => break,
            };
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            *self.heap.get_upvalue_mut(ptr) = Upvalue::Closed(value);
            self.open_upvalues.remove(0);
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::value::Function;

    fn run_chunk(vm: &mut Vm, chunk: Chunk) -> Result<(), RuntimeError> {
        let function = vm.heap.alloc_function(Function {
            arity: 0,
            upvalue_count: 0,
            chunk,
            name: None,
        });
        vm.execute(function)
    }

    #[test]
    fn interning_gives_byte_equal_strings_one_identity() {
        let mut vm = Vm::new();
        let a = vm.intern("shared");
        let b = vm.intern("shared");
        let c = vm.intern("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn intern_owned_matches_intern() {
        let mut vm = Vm::new();
        let copied = vm.intern("twin");
        let taken = vm.intern_owned(String::from("twin"));
        assert_eq!(copied, taken);
    }

    #[test]
    fn collection_prunes_the_intern_table() {
        let mut vm = Vm::new();
        let kept = vm.intern("kept");
        let hash = vm.heap.get_string(kept).hash;
        vm.intern("doomed");

        let live_before = vm.heap.live_objects();
        vm.collect_garbage(&[Value::String(kept)]);

        assert!(vm.heap.live_objects() < live_before);
        // The surviving string is still interned under the same identity.
        assert_eq!(vm.intern("kept"), kept);
        let _ = hash;
    }

    #[test]
    fn globals_root_their_values() {
        let mut vm = Vm::new();
        let name = vm.intern("holder");
        let hash = vm.heap.get_string(name).hash;
        let value = vm.intern("payload");
        vm.globals.set(name, hash, Value::String(value));

        vm.collect_garbage(&[]);
        assert_eq!(vm.heap.get_string(value).chars, "payload");
    }

    #[test]
    fn executes_arithmetic_chunk() {
        let mut vm = Vm::new();
        vm.capture_output();

        let mut chunk = Chunk::new();
        let one = chunk.add_constant(Value::Number(1.0)).unwrap();
        let two = chunk.add_constant(Value::Number(2.0)).unwrap();
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(one, 1);
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(two, 1);
        chunk.write_op(OpCode::Add, 1);
        chunk.write_op(OpCode::Print, 1);
        chunk.write_op(OpCode::Null, 1);
        chunk.write_op(OpCode::Return, 1);

        run_chunk(&mut vm, chunk).unwrap();
        assert_eq!(vm.take_output(), vec!["3"]);
    }

    #[test]
    fn calling_null_reports_with_trace() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Null, 3);
        chunk.write_op(OpCode::Call, 3);
        chunk.write(0, 3);
        chunk.write_op(OpCode::Null, 3);
        chunk.write_op(OpCode::Return, 3);

        let err = run_chunk(&mut vm, chunk).unwrap_err();
        assert_eq!(err.message, "can only call functions and classes");
        assert_eq!(err.trace, vec!["[line 3] in script"]);
        let rendered = err.to_string();
        assert!(rendered.contains("can only call functions and classes"));
        assert!(rendered.contains("[line 3] in script"));
    }

    #[test]
    fn type_errors_in_arithmetic() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Null, 1);
        chunk.write_op(OpCode::Negate, 1);
        chunk.write_op(OpCode::Return, 1);

        let err = run_chunk(&mut vm, chunk).unwrap_err();
        assert_eq!(err.message, "operand must be a number");
    }

    #[test]
    fn stacks_reset_after_runtime_error() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Null, 1);
        chunk.write_op(OpCode::Call, 1);
        chunk.write(0, 1);

        run_chunk(&mut vm, chunk).unwrap_err();
        assert_eq!(vm.stack.len(), 0);
        assert_eq!(vm.frames.len(), 0);
        assert!(vm.open_upvalues.is_empty());
    }

    #[test]
    fn native_clock_is_callable() {
        let mut vm = Vm::new();
        vm.capture_output();
        let name = vm.intern("clock");
        let hash = vm.heap.get_string(name).hash;
        assert!(matches!(
            vm.globals.get(name, hash),
            Some(Value::Native(_))
        ));
    }
}
