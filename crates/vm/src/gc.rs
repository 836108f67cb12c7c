//! Garbage-collected heap for the Ghost runtime.
//!
//! A mark-and-sweep collector over a slot heap: objects live in a vector of
//! slots, freed slots go on a free list for reuse, and a [`GcPtr`] is a
//! typed index into the heap. Collection marks from roots through an
//! explicit gray worklist, then sweeps unmarked slots back to the free
//! list.
//!
//! The heap never enumerates roots itself; the VM and the compiler hand
//! their roots to [`Heap::mark_value`]/[`Heap::mark_raw`] at collection
//! time. See `Vm::collect_garbage` for the orchestration, including the
//! weak treatment of the string-intern table.

use std::fmt;
use std::marker::PhantomData;

use crate::table::Table;
use crate::value::{
    BoundMethod, Class, Closure, Function, Instance, List, NativeClass, NativeFunction, StrObj,
    Upvalue, Value,
};

/// Raw index into the heap. Used for type-erased operations such as
/// tracing.
pub type RawGcPtr = u32;

/// A typed pointer to a heap object.
///
/// This is a lightweight handle (just a u32 index); the type parameter
/// records what kind of object the slot holds. `GcPtr` is `Copy` because
/// it is only an index.
pub struct GcPtr<T> {
    index: RawGcPtr,
    _marker: PhantomData<T>,
}

impl<T> Copy for GcPtr<T> {}

impl<T> Clone for GcPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> GcPtr<T> {
    pub(crate) fn from_raw(index: RawGcPtr) -> Self {
        GcPtr {
            index,
            _marker: PhantomData,
        }
    }

    pub fn as_raw(&self) -> RawGcPtr {
        self.index
    }
}

impl<T> fmt::Debug for GcPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcPtr({})", self.index)
    }
}

impl<T> PartialEq for GcPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for GcPtr<T> {}

impl<T> std::hash::Hash for GcPtr<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

/// The payload of one heap slot.
pub enum ObjData {
    Str(StrObj),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    Class(Class),
    Instance(Instance),
    BoundMethod(BoundMethod),
    NativeClass(NativeClass),
    Native(NativeFunction),
    List(List),
}

impl ObjData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjData::Str(_) => "string",
            ObjData::Function(_) => "function",
            ObjData::Closure(_) => "closure",
            ObjData::Upvalue(_) => "upvalue",
            ObjData::Class(_) => "class",
            ObjData::Instance(_) => "instance",
            ObjData::BoundMethod(_) => "bound method",
            ObjData::NativeClass(_) => "native class",
            ObjData::Native(_) => "native function",
            ObjData::List(_) => "list",
        }
    }

    /// Rough payload size in bytes, used to drive the collection
    /// threshold.
    fn estimate_size(&self) -> usize {
        let payload = match self {
            ObjData::Str(s) => s.chars.capacity(),
            ObjData::Function(f) => {
                f.chunk.code.capacity()
                    + f.chunk.constants.capacity() * std::mem::size_of::<Value>()
                    + f.chunk.lines.capacity() * std::mem::size_of::<usize>()
            }
            ObjData::Closure(c) => c.upvalues.capacity() * std::mem::size_of::<RawGcPtr>(),
            ObjData::Class(c) => c.methods.byte_size(),
            ObjData::Instance(i) => i.fields.byte_size(),
            ObjData::NativeClass(c) => c.methods.byte_size(),
            ObjData::List(l) => l.items.capacity() * std::mem::size_of::<Value>(),
            ObjData::Upvalue(_) | ObjData::BoundMethod(_) | ObjData::Native(_) => 0,
        };
        std::mem::size_of::<HeapEntry>() + payload
    }

    /// Every heap reference this object holds. Feeding these into the gray
    /// worklist is what "blackens" the object during marking.
    fn child_refs(&self, out: &mut Vec<RawGcPtr>) {
        fn push_value(out: &mut Vec<RawGcPtr>, value: Value) {
            if let Some(raw) = value.heap_ref() {
                out.push(raw);
            }
        }
        fn push_table(out: &mut Vec<RawGcPtr>, table: &Table) {
            for (key, _, value) in table.iter() {
                out.push(key.as_raw());
                push_value(out, value);
            }
        }

        match self {
            ObjData::Str(_) => {}
            ObjData::Function(f) => {
                if let Some(name) = f.name {
                    out.push(name.as_raw());
                }
                for &constant in &f.chunk.constants {
                    push_value(out, constant);
                }
            }
            ObjData::Closure(c) => {
                out.push(c.function.as_raw());
                for upvalue in &c.upvalues {
                    out.push(upvalue.as_raw());
                }
            }
            ObjData::Upvalue(Upvalue::Open(_)) => {}
            ObjData::Upvalue(Upvalue::Closed(value)) => push_value(out, *value),
            ObjData::Class(c) => {
                out.push(c.name.as_raw());
                push_table(out, &c.methods);
            }
            ObjData::Instance(i) => {
                out.push(i.class.as_raw());
                push_table(out, &i.fields);
            }
            ObjData::BoundMethod(b) => {
                push_value(out, b.receiver);
                out.push(b.method.as_raw());
            }
            ObjData::NativeClass(c) => {
                out.push(c.name.as_raw());
                push_table(out, &c.methods);
            }
            ObjData::Native(n) => out.push(n.name.as_raw()),
            ObjData::List(l) => {
                for &item in &l.items {
                    push_value(out, item);
                }
            }
        }
    }
}

/// One heap slot: the object plus its collector header.
pub struct HeapEntry {
    data: ObjData,
    marked: bool,
    size: usize,
}

/// Configuration for the garbage collector.
#[derive(Clone, Debug)]
pub struct GcConfig {
    /// Multiplier applied to the live byte count to compute the next
    /// collection threshold.
    pub heap_grow_factor: usize,
    /// Lower bound for the collection threshold.
    pub min_heap: usize,
    /// Collect at every safepoint. For shaking out rooting bugs.
    pub stress: bool,
    /// Print collection activity to stderr.
    pub log: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            heap_grow_factor: 2,
            min_heap: 1024 * 1024,
            stress: false,
            log: false,
        }
    }
}

/// Collection statistics.
#[derive(Clone, Debug, Default)]
pub struct GcStats {
    pub collections: u64,
    pub total_allocated: u64,
    pub total_freed: u64,
    pub total_bytes_allocated: u64,
    pub total_bytes_freed: u64,
}

/// The garbage-collected heap.
pub struct Heap {
    objects: Vec<Option<HeapEntry>>,
    free_list: Vec<RawGcPtr>,
    gray: Vec<RawGcPtr>,
    bytes_allocated: usize,
    next_gc: usize,
    config: GcConfig,
    stats: GcStats,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    pub fn with_config(config: GcConfig) -> Self {
        Heap {
            objects: Vec::new(),
            free_list: Vec::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: config.min_heap,
            config,
            stats: GcStats::default(),
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of live objects currently on the heap.
    pub fn live_objects(&self) -> usize {
        self.objects.iter().flatten().count()
    }

    /// True when the next safepoint should run a collection.
    pub fn should_collect(&self) -> bool {
        self.config.stress || self.bytes_allocated > self.next_gc
    }

    fn alloc(&mut self, data: ObjData) -> RawGcPtr {
        let size = data.estimate_size();
        let kind = data.kind_name();
        self.bytes_allocated += size;
        self.stats.total_allocated += 1;
        self.stats.total_bytes_allocated += size as u64;

        let entry = HeapEntry {
            data,
            marked: false,
            size,
        };
        let index = if let Some(free) = self.free_list.pop() {
            self.objects[free as usize] = Some(entry);
            free
        } else {
            let index = self.objects.len() as RawGcPtr;
            self.objects.push(Some(entry));
            index
        };
        if self.config.log {
            eprintln!("[GC] {index} allocate {size} bytes for {kind}");
        }
        index
    }

    pub fn alloc_string(&mut self, string: StrObj) -> GcPtr<StrObj> {
        GcPtr::from_raw(self.alloc(ObjData::Str(string)))
    }

    pub fn alloc_function(&mut self, function: Function) -> GcPtr<Function> {
        GcPtr::from_raw(self.alloc(ObjData::Function(function)))
    }

    pub fn alloc_closure(&mut self, closure: Closure) -> GcPtr<Closure> {
        GcPtr::from_raw(self.alloc(ObjData::Closure(closure)))
    }

    pub fn alloc_upvalue(&mut self, upvalue: Upvalue) -> GcPtr<Upvalue> {
        GcPtr::from_raw(self.alloc(ObjData::Upvalue(upvalue)))
    }

    pub fn alloc_class(&mut self, class: Class) -> GcPtr<Class> {
        GcPtr::from_raw(self.alloc(ObjData::Class(class)))
    }

    pub fn alloc_instance(&mut self, instance: Instance) -> GcPtr<Instance> {
        GcPtr::from_raw(self.alloc(ObjData::Instance(instance)))
    }

    pub fn alloc_bound_method(&mut self, bound: BoundMethod) -> GcPtr<BoundMethod> {
        GcPtr::from_raw(self.alloc(ObjData::BoundMethod(bound)))
    }

    pub fn alloc_native_class(&mut self, class: NativeClass) -> GcPtr<NativeClass> {
        GcPtr::from_raw(self.alloc(ObjData::NativeClass(class)))
    }

    pub fn alloc_native(&mut self, native: NativeFunction) -> GcPtr<NativeFunction> {
        GcPtr::from_raw(self.alloc(ObjData::Native(native)))
    }

    pub fn alloc_list(&mut self, list: List) -> GcPtr<List> {
        GcPtr::from_raw(self.alloc(ObjData::List(list)))
    }

    fn entry(&self, index: RawGcPtr) -> &ObjData {
        match self.objects.get(index as usize).and_then(|s| s.as_ref()) {
            Some(entry) => &entry.data,
            None => panic!("heap: dangling reference {index}"),
        }
    }

    fn entry_mut(&mut self, index: RawGcPtr) -> &mut ObjData {
        match self.objects.get_mut(index as usize).and_then(|s| s.as_mut()) {
            Some(entry) => &mut entry.data,
            None => panic!("heap: dangling reference {index}"),
        }
    }

    pub fn get_string(&self, ptr: GcPtr<StrObj>) -> &StrObj {
        match self.entry(ptr.as_raw()) {
            ObjData::Str(s) => s,
            other => panic!("heap: expected string, found {}", other.kind_name()),
        }
    }

    pub fn get_function(&self, ptr: GcPtr<Function>) -> &Function {
        match self.entry(ptr.as_raw()) {
            ObjData::Function(f) => f,
            other => panic!("heap: expected function, found {}", other.kind_name()),
        }
    }

    pub fn get_closure(&self, ptr: GcPtr<Closure>) -> &Closure {
        match self.entry(ptr.as_raw()) {
            ObjData::Closure(c) => c,
            other => panic!("heap: expected closure, found {}", other.kind_name()),
        }
    }

    pub fn get_upvalue(&self, ptr: GcPtr<Upvalue>) -> &Upvalue {
        match self.entry(ptr.as_raw()) {
            ObjData::Upvalue(u) => u,
            other => panic!("heap: expected upvalue, found {}", other.kind_name()),
        }
    }

    pub fn get_upvalue_mut(&mut self, ptr: GcPtr<Upvalue>) -> &mut Upvalue {
        match self.entry_mut(ptr.as_raw()) {
            ObjData::Upvalue(u) => u,
            other => panic!("heap: expected upvalue, found {}", other.kind_name()),
        }
    }

    pub fn get_class(&self, ptr: GcPtr<Class>) -> &Class {
        match self.entry(ptr.as_raw()) {
            ObjData::Class(c) => c,
            other => panic!("heap: expected class, found {}", other.kind_name()),
        }
    }

    pub fn get_class_mut(&mut self, ptr: GcPtr<Class>) -> &mut Class {
        match self.entry_mut(ptr.as_raw()) {
            ObjData::Class(c) => c,
            other => panic!("heap: expected class, found {}", other.kind_name()),
        }
    }

    pub fn get_instance(&self, ptr: GcPtr<Instance>) -> &Instance {
        match self.entry(ptr.as_raw()) {
            ObjData::Instance(i) => i,
            other => panic!("heap: expected instance, found {}", other.kind_name()),
        }
    }

    pub fn get_instance_mut(&mut self, ptr: GcPtr<Instance>) -> &mut Instance {
        match self.entry_mut(ptr.as_raw()) {
            ObjData::Instance(i) => i,
            other => panic!("heap: expected instance, found {}", other.kind_name()),
        }
    }

    pub fn get_bound_method(&self, ptr: GcPtr<BoundMethod>) -> &BoundMethod {
        match self.entry(ptr.as_raw()) {
            ObjData::BoundMethod(b) => b,
            other => panic!("heap: expected bound method, found {}", other.kind_name()),
        }
    }

    pub fn get_native_class(&self, ptr: GcPtr<NativeClass>) -> &NativeClass {
        match self.entry(ptr.as_raw()) {
            ObjData::NativeClass(c) => c,
            other => panic!("heap: expected native class, found {}", other.kind_name()),
        }
    }

    pub fn get_native_class_mut(&mut self, ptr: GcPtr<NativeClass>) -> &mut NativeClass {
        match self.entry_mut(ptr.as_raw()) {
            ObjData::NativeClass(c) => c,
            other => panic!("heap: expected native class, found {}", other.kind_name()),
        }
    }

    pub fn get_native(&self, ptr: GcPtr<NativeFunction>) -> &NativeFunction {
        match self.entry(ptr.as_raw()) {
            ObjData::Native(n) => n,
            other => panic!("heap: expected native function, found {}", other.kind_name()),
        }
    }

    pub fn get_list(&self, ptr: GcPtr<List>) -> &List {
        match self.entry(ptr.as_raw()) {
            ObjData::List(l) => l,
            other => panic!("heap: expected list, found {}", other.kind_name()),
        }
    }

    pub fn get_list_mut(&mut self, ptr: GcPtr<List>) -> &mut List {
        match self.entry_mut(ptr.as_raw()) {
            ObjData::List(l) => l,
            other => panic!("heap: expected list, found {}", other.kind_name()),
        }
    }

    pub fn is_marked(&self, index: RawGcPtr) -> bool {
        self.objects
            .get(index as usize)
            .and_then(|s| s.as_ref())
            .map(|entry| entry.marked)
            .unwrap_or(false)
    }

    /// Mark a root and queue it on the gray worklist.
    pub fn mark_raw(&mut self, index: RawGcPtr) {
        if let Some(entry) = self.objects.get_mut(index as usize).and_then(|s| s.as_mut()) {
            if !entry.marked {
                entry.marked = true;
                self.gray.push(index);
            }
        }
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Some(raw) = value.heap_ref() {
            self.mark_raw(raw);
        }
    }

    pub fn mark_table(&mut self, table: &Table) {
        for (key, _, value) in table.iter() {
            self.mark_raw(key.as_raw());
            self.mark_value(value);
        }
    }

    /// Drain the gray worklist, blackening each object by marking
    /// everything it references.
    pub fn trace_references(&mut self) {
        let mut children = Vec::new();
        while let Some(index) = self.gray.pop() {
            children.clear();
            self.entry(index).child_refs(&mut children);
            for &child in &children {
                self.mark_raw(child);
            }
        }
    }

    /// Free every unmarked object, clear the mark on survivors, and
    /// recompute the collection threshold.
    pub fn sweep(&mut self) {
        let mut freed = 0u64;
        let mut bytes_freed = 0usize;
        for index in 0..self.objects.len() {
            let live = match &mut self.objects[index] {
                Some(entry) if entry.marked => {
                    entry.marked = false;
                    true
                }
                Some(_) => false,
                None => true,
            };
            if !live {
                if let Some(entry) = self.objects[index].take() {
                    if self.config.log {
                        eprintln!("[GC] {} free {}", index, entry.data.kind_name());
                    }
                    bytes_freed += entry.size;
                    freed += 1;
                    self.free_list.push(index as RawGcPtr);
                }
            }
        }
        self.bytes_allocated -= bytes_freed;
        self.stats.collections += 1;
        self.stats.total_freed += freed;
        self.stats.total_bytes_freed += bytes_freed as u64;
        self.next_gc = std::cmp::max(
            self.bytes_allocated * self.config.heap_grow_factor,
            self.config.min_heap,
        );
        if self.config.log {
            eprintln!(
                "[GC] collection #{} done, freed {} objects ({} bytes), {} bytes live, next at {}",
                self.stats.collections, freed, bytes_freed, self.bytes_allocated, self.next_gc
            );
        }
    }

    /// Render a value for `print` and error messages.
    pub fn format_value(&self, value: Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(ptr) => self.get_string(ptr).chars.clone(),
            Value::Function(ptr) => self.format_function(ptr),
            Value::Closure(ptr) => self.format_function(self.get_closure(ptr).function),
            Value::Class(ptr) => self.get_string(self.get_class(ptr).name).chars.clone(),
            Value::Instance(ptr) => {
                let class = self.get_instance(ptr).class;
                format!("{} instance", self.get_string(self.get_class(class).name).chars)
            }
            Value::BoundMethod(ptr) => {
                self.format_function(self.get_closure(self.get_bound_method(ptr).method).function)
            }
            Value::NativeClass(ptr) => {
                self.get_string(self.get_native_class(ptr).name).chars.clone()
            }
            Value::Native(_) => "<native fn>".to_string(),
            Value::List(ptr) => {
                let items = &self.get_list(ptr).items;
                let rendered: Vec<String> =
                    items.iter().map(|&item| self.format_value(item)).collect();
                format!("[{}]", rendered.join(", "))
            }
        }
    }

    fn format_function(&self, ptr: GcPtr<Function>) -> String {
        match self.get_function(ptr).name {
            Some(name) => format!("<fn {}>", self.get_string(name).chars),
            None => "<script>".to_string(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
