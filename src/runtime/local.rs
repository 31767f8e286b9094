//! Portable in-process message-dispatch runtime
//!
//! Classes, metaclasses, methods and instance variables are records leaked for
//! the life of the process, laid out so that an object and a class both begin
//! with their `isa` pointer. Method implementations are plain C functions
//! receiving `self` and `_cmd` ahead of their declared arguments, exactly as
//! the Objective-C runtime calls them, so the bridge drives this runtime
//! through the same call interfaces it would use against `libobjc`.
//!
//! Two root classes are built in:
//! - `Object` - `alloc`, `new`, `init`, reference counting, `description`
//! - `String` - a UTF-8 string object (`stringWithUTF8String:`, `UTF8String`)

use super::{ClassRef, EntryPoint, IvarRef, MethodRef, NativeRuntime, ObjectRef, Selector};
use crate::encoding::{align_up, parse};
use crate::error::{BridgeError, Result};
use core::ffi::{c_char, c_void};
use core::mem::{size_of, transmute};
use core::ptr::{self, NonNull};
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

type Id = *mut c_void;
type Sel = *mut c_void;

const OBJECT_ALIGN: usize = 16;

/// Every instance starts with this header
#[repr(C)]
struct ObjectHeader {
    isa: *const ClassRecord,
    refcount: AtomicU32,
    _flags: u32,
}

const HEADER: usize = size_of::<ObjectHeader>();
const TEXT_OFFSET: usize = align_up(HEADER, core::mem::align_of::<*const c_char>());

/// Counters shared by a runtime and the method implementations of its classes
#[derive(Default)]
struct Shared {
    live: AtomicUsize,
    failures: AtomicUsize,
    string_class: OnceCell<ClassRef>,
    /// object address -> (key, value address)
    associations: DashMap<usize, Vec<(Selector, usize)>>,
}

#[repr(C)]
struct ClassRecord {
    isa: AtomicPtr<ClassRecord>,
    superclass: Option<&'static ClassRecord>,
    name: String,
    is_meta: bool,
    instance_size: usize,
    ivars: Vec<&'static IvarRecord>,
    methods: RwLock<Vec<&'static MethodRecord>>,
    drop_hook: Option<unsafe fn(Id)>,
    shared: &'static Shared,
}

struct MethodRecord {
    selector: Selector,
    types: String,
    imp: EntryPoint,
}

struct IvarRecord {
    name: String,
    types: String,
    offset: isize,
}

impl ClassRecord {
    #[inline]
    fn isa(&self) -> &'static ClassRecord {
        // SAFETY: isa is wired before a record is published
        unsafe { &*self.isa.load(Ordering::Acquire) }
    }

    fn chain(&'static self) -> impl Iterator<Item = &'static ClassRecord> {
        std::iter::successors(Some(self), |class| class.superclass)
    }

    fn find(&self, selector: Selector) -> Option<&'static MethodRecord> {
        self.methods
            .read()
            .iter()
            .find(|m| m.selector == selector)
            .copied()
    }
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

#[inline]
fn class_ref(record: &'static ClassRecord) -> ClassRef {
    ClassRef(NonNull::from(record).cast())
}

/// # Safety
/// `class` must come from a [`LocalRuntime`].
#[inline]
unsafe fn record(class: ClassRef) -> &'static ClassRecord {
    &*(class.as_ptr() as *const ClassRecord)
}

/// Class of an instance, or metaclass of a class receiver
#[inline]
unsafe fn isa_of(object: Id) -> &'static ClassRecord {
    &**(object as *const *const ClassRecord)
}

#[inline]
unsafe fn is_class_receiver(object: Id) -> bool {
    isa_of(object).is_meta
}

#[inline]
unsafe fn header<'a>(object: Id) -> &'a ObjectHeader {
    &*(object as *const ObjectHeader)
}

fn entry(imp: *const ()) -> EntryPoint {
    // SAFETY: function addresses are never null
    EntryPoint(unsafe { NonNull::new_unchecked(imp as *mut c_void) })
}

// ============================================================================
// Selectors
// ============================================================================

static SELECTORS: Lazy<DashMap<String, Selector>> = Lazy::new(DashMap::new);

/// Process-wide selector interning; a selector is its NUL-terminated name
fn intern(name: &str) -> Selector {
    if let Some(sel) = SELECTORS.get(name) {
        return *sel;
    }
    *SELECTORS.entry(name.to_string()).or_insert_with(|| {
        let text: &'static CStr = Box::leak(
            CString::new(name.replace('\0', ""))
                .unwrap_or_default()
                .into_boxed_c_str(),
        );
        Selector(NonNull::from(text).cast())
    })
}

fn selector_text(sel: Selector) -> String {
    // SAFETY: selectors point at NUL-terminated names
    unsafe { CStr::from_ptr(sel.as_ptr() as *const c_char) }
        .to_string_lossy()
        .into_owned()
}

// ============================================================================
// Object lifecycle
// ============================================================================

unsafe fn allocate(class: &'static ClassRecord) -> Id {
    let layout = match Layout::from_size_align(class.instance_size.max(HEADER), OBJECT_ALIGN) {
        Ok(layout) => layout,
        Err(_) => return ptr::null_mut(),
    };
    let object = alloc::alloc_zeroed(layout) as Id;
    if object.is_null() {
        alloc::handle_alloc_error(layout);
    }
    ptr::write(
        object as *mut ObjectHeader,
        ObjectHeader {
            isa: class,
            refcount: AtomicU32::new(1),
            _flags: 0,
        },
    );
    class.shared.live.fetch_add(1, Ordering::Relaxed);
    object
}

unsafe fn deallocate(object: Id) {
    let class = isa_of(object);
    for current in class.chain() {
        for ivar in &current.ivars {
            if ivar.types == "@" {
                let slot = (object as *mut u8).offset(ivar.offset) as *mut Id;
                let held = ptr::replace(slot, ptr::null_mut());
                if !held.is_null() {
                    release_object(held);
                }
            }
        }
        if let Some(hook) = current.drop_hook {
            hook(object);
        }
    }
    if let Some((_, values)) = class.shared.associations.remove(&(object as usize)) {
        for (_, value) in values {
            release_object(value as Id);
        }
    }

    class.shared.live.fetch_sub(1, Ordering::Relaxed);
    let layout = Layout::from_size_align_unchecked(class.instance_size.max(HEADER), OBJECT_ALIGN);
    alloc::dealloc(object as *mut u8, layout);
}

unsafe fn retain_object(object: Id) {
    if !is_class_receiver(object) {
        header(object).refcount.fetch_add(1, Ordering::Relaxed);
    }
}

unsafe fn release_object(object: Id) {
    if is_class_receiver(object) {
        return;
    }
    if header(object).refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
        deallocate(object);
    }
}

thread_local! {
    static POOLS: RefCell<Vec<Vec<usize>>> = RefCell::new(Vec::new());
}

unsafe fn autorelease_object(object: Id) {
    let pooled = POOLS.with(|pools| match pools.borrow_mut().last_mut() {
        Some(pool) => {
            pool.push(object as usize);
            true
        }
        None => false,
    });
    if !pooled {
        warn!(
            object = object as usize,
            class = %isa_of(object).name,
            "autorelease with no pool in place; object leaked"
        );
    }
}

/// Autorelease pool for the current thread; drains when dropped
#[must_use = "the pool drains when dropped"]
pub struct AutoreleasePool {
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for AutoreleasePool {
    fn drop(&mut self) {
        let objects = POOLS.with(|pools| pools.borrow_mut().pop()).unwrap_or_default();
        for object in objects {
            // SAFETY: each entry was one outstanding reference handed to the pool
            unsafe { release_object(object as Id) };
        }
    }
}

// ============================================================================
// Strings
// ============================================================================

unsafe fn text_slot(object: Id) -> *mut *mut c_char {
    (object as *mut u8).add(TEXT_OFFSET) as *mut *mut c_char
}

unsafe fn set_text(object: Id, text: CString) {
    let old = ptr::replace(text_slot(object), text.into_raw());
    if !old.is_null() {
        drop(CString::from_raw(old));
    }
}

unsafe fn drop_text(object: Id) {
    let old = ptr::replace(text_slot(object), ptr::null_mut());
    if !old.is_null() {
        drop(CString::from_raw(old));
    }
}

unsafe fn text_of(object: Id) -> String {
    let text = *text_slot(object);
    if text.is_null() {
        String::new()
    } else {
        CStr::from_ptr(text).to_string_lossy().into_owned()
    }
}

unsafe fn is_string(object: Id, shared: &Shared) -> bool {
    match shared.string_class.get() {
        Some(string) => isa_of(object).chain().any(|c| class_ref(c) == *string),
        None => false,
    }
}

/// A +1 string instance
unsafe fn new_string(shared: &'static Shared, text: CString) -> Id {
    let class = match shared.string_class.get() {
        Some(class) => record(*class),
        None => return ptr::null_mut(),
    };
    let object = allocate(class);
    if !object.is_null() {
        set_text(object, text);
    }
    object
}

// ============================================================================
// Built-in method implementations
// ============================================================================

unsafe fn send_id(receiver: Id, selector: &str) -> Id {
    let sel = intern(selector);
    match isa_of(receiver).chain().find_map(|c| c.find(sel)) {
        Some(method) => {
            let imp: extern "C" fn(Id, Sel) -> Id = transmute(method.imp.as_ptr());
            imp(receiver, sel.as_ptr())
        }
        None => ptr::null_mut(),
    }
}

extern "C" fn object_alloc(class: Id, _cmd: Sel) -> Id {
    // SAFETY: class receivers are class records
    unsafe { allocate(&*(class as *const ClassRecord)) }
}

extern "C" fn object_new(class: Id, cmd: Sel) -> Id {
    let object = object_alloc(class, cmd);
    if object.is_null() {
        return object;
    }
    // SAFETY: object is a live instance
    unsafe { send_id(object, "init") }
}

extern "C" fn object_self(this: Id, _cmd: Sel) -> Id {
    this
}

extern "C" fn object_class(this: Id, _cmd: Sel) -> Id {
    // SAFETY: every receiver starts with isa
    unsafe { isa_of(this) as *const ClassRecord as Id }
}

extern "C" fn object_retain(this: Id, _cmd: Sel) -> Id {
    // SAFETY: the caller holds a reference
    unsafe { retain_object(this) };
    this
}

extern "C" fn object_release(this: Id, _cmd: Sel) {
    // SAFETY: the caller gives up a reference
    unsafe { release_object(this) }
}

extern "C" fn object_autorelease(this: Id, _cmd: Sel) -> Id {
    // SAFETY: the caller hands a reference to the pool
    unsafe { autorelease_object(this) };
    this
}

extern "C" fn object_retain_count(this: Id, _cmd: Sel) -> u64 {
    // SAFETY: every receiver starts with isa
    unsafe {
        if is_class_receiver(this) {
            u64::from(u32::MAX)
        } else {
            u64::from(header(this).refcount.load(Ordering::Relaxed))
        }
    }
}

extern "C" fn object_description(this: Id, _cmd: Sel) -> Id {
    // SAFETY: every receiver starts with isa
    unsafe {
        let class = isa_of(this);
        let text = if class.is_meta {
            class.name.clone()
        } else {
            format!("<{}: {:p}>", class.name, this)
        };
        let string = new_string(class.shared, CString::new(text).unwrap_or_default());
        if !string.is_null() {
            autorelease_object(string);
        }
        string
    }
}

extern "C" fn object_is_equal(this: Id, _cmd: Sel, other: Id) -> i8 {
    i8::from(this == other)
}

extern "C" fn object_hash(this: Id, _cmd: Sel) -> u64 {
    this as usize as u64
}

extern "C" fn string_with_utf8(class: Id, cmd: Sel, text: *const c_char) -> Id {
    if text.is_null() {
        return ptr::null_mut();
    }
    let object = object_alloc(class, cmd);
    if object.is_null() {
        return object;
    }
    // SAFETY: text is a NUL-terminated C string and object a fresh instance
    unsafe {
        set_text(object, CStr::from_ptr(text).to_owned());
        autorelease_object(object);
    }
    object
}

extern "C" fn string_init_utf8(this: Id, _cmd: Sel, text: *const c_char) -> Id {
    // SAFETY: this is an allocated string; init consumes it on failure
    unsafe {
        if text.is_null() {
            release_object(this);
            return ptr::null_mut();
        }
        set_text(this, CStr::from_ptr(text).to_owned());
    }
    this
}

extern "C" fn string_utf8(this: Id, _cmd: Sel) -> *const c_char {
    // SAFETY: this is a string instance
    unsafe { *text_slot(this) }
}

extern "C" fn string_length(this: Id, _cmd: Sel) -> u64 {
    // SAFETY: this is a string instance
    unsafe { text_of(this).encode_utf16().count() as u64 }
}

extern "C" fn string_description(this: Id, cmd: Sel) -> Id {
    object_autorelease(object_retain(this, cmd), cmd)
}

extern "C" fn string_is_equal(this: Id, _cmd: Sel, other: Id) -> i8 {
    if other.is_null() {
        return 0;
    }
    // SAFETY: both receivers start with isa; other is checked to be a string
    unsafe {
        let shared = isa_of(this).shared;
        i8::from(this == other || (is_string(other, shared) && text_of(this) == text_of(other)))
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// Instance variable and method lists for a class being defined
struct ClassSpec {
    superclass: &'static ClassRecord,
    name: String,
    ivars: Vec<IvarRecord>,
    instance_size: usize,
    methods: Vec<MethodRecord>,
    class_methods: Vec<MethodRecord>,
    drop_hook: Option<unsafe fn(Id)>,
}

/// Self-contained runtime with `Object` and `String` root classes
pub struct LocalRuntime {
    classes: DashMap<String, ClassRef>,
    shared: &'static Shared,
    root: ClassRef,
    string: ClassRef,
}

fn method(selector: &str, types: &str, imp: *const ()) -> MethodRecord {
    MethodRecord {
        selector: intern(selector),
        types: types.to_string(),
        imp: entry(imp),
    }
}

impl LocalRuntime {
    pub fn new() -> Arc<Self> {
        let shared: &'static Shared = leak(Shared::default());

        let object = leak(ClassRecord {
            isa: AtomicPtr::new(ptr::null_mut()),
            superclass: None,
            name: "Object".into(),
            is_meta: false,
            instance_size: HEADER,
            ivars: vec![leak(IvarRecord {
                name: "isa".into(),
                types: "#".into(),
                offset: 0,
            })],
            methods: RwLock::new(
                [
                    method("init", "@16@0:8", object_self as *const ()),
                    method("retain", "@16@0:8", object_retain as *const ()),
                    method("release", "v16@0:8", object_release as *const ()),
                    method("autorelease", "@16@0:8", object_autorelease as *const ()),
                    method("retainCount", "Q16@0:8", object_retain_count as *const ()),
                    method("description", "@16@0:8", object_description as *const ()),
                    method("class", "#16@0:8", object_class as *const ()),
                    method("isEqual:", "c24@0:8@16", object_is_equal as *const ()),
                    method("hash", "Q16@0:8", object_hash as *const ()),
                ]
                .into_iter()
                .map(leak)
                .collect(),
            ),
            drop_hook: None,
            shared,
        });
        let meta = leak(ClassRecord {
            isa: AtomicPtr::new(ptr::null_mut()),
            superclass: Some(object),
            name: "Object".into(),
            is_meta: true,
            instance_size: 0,
            ivars: Vec::new(),
            methods: RwLock::new(
                [
                    method("alloc", "@16@0:8", object_alloc as *const ()),
                    method("new", "@16@0:8", object_new as *const ()),
                    method("class", "#16@0:8", object_self as *const ()),
                ]
                .into_iter()
                .map(leak)
                .collect(),
            ),
            drop_hook: None,
            shared,
        });
        let meta_ptr = meta as *const ClassRecord as *mut ClassRecord;
        meta.isa.store(meta_ptr, Ordering::Release);
        object.isa.store(meta_ptr, Ordering::Release);

        let root = class_ref(object);
        let classes = DashMap::new();
        classes.insert(object.name.clone(), root);

        let mut runtime = Self {
            classes,
            shared,
            root,
            string: root,
        };

        let string = runtime.install(ClassSpec {
            superclass: object,
            name: "String".into(),
            ivars: vec![IvarRecord {
                name: "_text".into(),
                types: "*".into(),
                offset: TEXT_OFFSET as isize,
            }],
            instance_size: TEXT_OFFSET + size_of::<*const c_char>(),
            methods: vec![
                method("initWithUTF8String:", "@24@0:8r*16", string_init_utf8 as *const ()),
                method("UTF8String", "r*16@0:8", string_utf8 as *const ()),
                method("length", "Q16@0:8", string_length as *const ()),
                method("description", "@16@0:8", string_description as *const ()),
                method("isEqual:", "c24@0:8@16", string_is_equal as *const ()),
            ],
            class_methods: vec![method(
                "stringWithUTF8String:",
                "@24@0:8r*16",
                string_with_utf8 as *const (),
            )],
            drop_hook: Some(drop_text),
        });
        runtime.string = string;
        // A fresh Shared has no string class yet
        let _ = shared.string_class.set(string);

        Arc::new(runtime)
    }

    /// Root class every other class inherits from
    pub fn root_class(&self) -> ClassRef {
        self.root
    }

    pub fn string_class(&self) -> ClassRef {
        self.string
    }

    /// Start defining a subclass of `superclass`
    pub fn build_class(&self, superclass: ClassRef, name: &str) -> ClassBuilder<'_> {
        ClassBuilder {
            runtime: self,
            superclass,
            name: name.to_string(),
            ivars: Vec::new(),
            methods: Vec::new(),
            class_methods: Vec::new(),
        }
    }

    /// Current reference count of an instance
    pub fn retain_count(&self, object: ObjectRef) -> usize {
        object_retain_count(object.as_ptr(), ptr::null_mut()) as usize
    }

    /// Instances allocated by this runtime and not yet deallocated
    pub fn live_objects(&self) -> usize {
        self.shared.live.load(Ordering::Relaxed)
    }

    /// Failures reported through [`NativeRuntime::report_callback_failure`]
    pub fn callback_failures(&self) -> usize {
        self.shared.failures.load(Ordering::Relaxed)
    }

    /// Push an autorelease pool for the current thread
    pub fn autorelease_pool() -> AutoreleasePool {
        POOLS.with(|pools| pools.borrow_mut().push(Vec::new()));
        AutoreleasePool {
            _thread_bound: PhantomData,
        }
    }

    fn install(&self, spec: ClassSpec) -> ClassRef {
        // SAFETY: root is this runtime's record
        let root_meta = unsafe { record(self.root) }.isa();
        let meta = leak(ClassRecord {
            isa: AtomicPtr::new(root_meta as *const ClassRecord as *mut ClassRecord),
            superclass: Some(spec.superclass.isa()),
            name: spec.name.clone(),
            is_meta: true,
            instance_size: 0,
            ivars: Vec::new(),
            methods: RwLock::new(spec.class_methods.into_iter().map(leak).collect()),
            drop_hook: None,
            shared: self.shared,
        });
        let class = leak(ClassRecord {
            isa: AtomicPtr::new(meta as *const ClassRecord as *mut ClassRecord),
            superclass: Some(spec.superclass),
            name: spec.name.clone(),
            is_meta: false,
            instance_size: spec.instance_size,
            ivars: spec.ivars.into_iter().map(leak).collect(),
            methods: RwLock::new(spec.methods.into_iter().map(leak).collect()),
            drop_hook: spec.drop_hook,
            shared: self.shared,
        });

        let class = class_ref(class);
        self.classes.insert(spec.name, class);
        class
    }
}

/// Defines a new class; nothing is registered until [`register`](Self::register)
pub struct ClassBuilder<'r> {
    runtime: &'r LocalRuntime,
    superclass: ClassRef,
    name: String,
    ivars: Vec<(String, String)>,
    methods: Vec<MethodRecord>,
    class_methods: Vec<MethodRecord>,
}

impl<'r> ClassBuilder<'r> {
    /// Add an instance variable. Object (`@`) variables hold a strong
    /// reference that is released with the instance.
    pub fn ivar(mut self, name: &str, types: &str) -> Self {
        self.ivars.push((name.to_string(), types.to_string()));
        self
    }

    /// Add an instance method
    ///
    /// # Safety
    /// `imp` must follow the C ABI described by `types`.
    pub unsafe fn method(mut self, selector: &str, types: &str, imp: EntryPoint) -> Self {
        self.methods.push(MethodRecord {
            selector: intern(selector),
            types: types.to_string(),
            imp,
        });
        self
    }

    /// Add a class method
    ///
    /// # Safety
    /// `imp` must follow the C ABI described by `types`.
    pub unsafe fn class_method(mut self, selector: &str, types: &str, imp: EntryPoint) -> Self {
        self.class_methods.push(MethodRecord {
            selector: intern(selector),
            types: types.to_string(),
            imp,
        });
        self
    }

    pub fn register(self) -> Result<ClassRef> {
        if self.runtime.classes.contains_key(&self.name) {
            return Err(BridgeError::Runtime(format!("class {} already exists", self.name)));
        }

        // SAFETY: superclass refs handed out by this runtime are its records
        let superclass = unsafe { record(self.superclass) };
        let mut size = superclass.instance_size;
        let mut ivars = Vec::with_capacity(self.ivars.len());
        for (name, types) in self.ivars {
            let desc = parse(&types)?;
            let offset = align_up(size, desc.align());
            size = offset + desc.size();
            ivars.push(IvarRecord {
                name,
                types,
                offset: offset as isize,
            });
        }

        Ok(self.runtime.install(ClassSpec {
            superclass,
            name: self.name,
            ivars,
            instance_size: size,
            methods: self.methods,
            class_methods: self.class_methods,
            drop_hook: None,
        }))
    }
}

unsafe impl NativeRuntime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    fn classes(&self) -> Vec<ClassRef> {
        self.classes.iter().map(|entry| *entry.value()).collect()
    }

    fn class_named(&self, name: &str) -> Option<ClassRef> {
        self.classes.get(name).map(|entry| *entry.value())
    }

    fn class_name(&self, class: ClassRef) -> String {
        // SAFETY: class refs handed to this runtime are its records
        unsafe { record(class) }.name.clone()
    }

    fn superclass(&self, class: ClassRef) -> Option<ClassRef> {
        unsafe { record(class) }.superclass.map(class_ref)
    }

    fn metaclass(&self, class: ClassRef) -> ClassRef {
        class_ref(unsafe { record(class) }.isa())
    }

    fn object_class(&self, object: ObjectRef) -> ClassRef {
        class_ref(unsafe { isa_of(object.as_ptr()) })
    }

    fn methods(&self, class: ClassRef) -> Vec<MethodRef> {
        unsafe { record(class) }
            .methods
            .read()
            .iter()
            .map(|m| MethodRef(NonNull::from(*m).cast()))
            .collect()
    }

    fn lookup_method(&self, class: ClassRef, selector: Selector) -> Option<MethodRef> {
        unsafe { record(class) }
            .chain()
            .find_map(|c| c.find(selector))
            .map(|m| MethodRef(NonNull::from(m).cast()))
    }

    fn method_selector(&self, method: MethodRef) -> Selector {
        unsafe { &*(method.as_ptr() as *const MethodRecord) }.selector
    }

    fn method_type_encoding(&self, method: MethodRef) -> String {
        unsafe { &*(method.as_ptr() as *const MethodRecord) }.types.clone()
    }

    fn method_implementation(&self, method: MethodRef) -> EntryPoint {
        unsafe { &*(method.as_ptr() as *const MethodRecord) }.imp
    }

    fn ivars(&self, class: ClassRef) -> Vec<IvarRef> {
        unsafe { record(class) }
            .ivars
            .iter()
            .map(|ivar| IvarRef(NonNull::from(*ivar).cast()))
            .collect()
    }

    fn ivar_name(&self, ivar: IvarRef) -> String {
        unsafe { &*(ivar.as_ptr() as *const IvarRecord) }.name.clone()
    }

    fn ivar_type_encoding(&self, ivar: IvarRef) -> String {
        unsafe { &*(ivar.as_ptr() as *const IvarRecord) }.types.clone()
    }

    fn ivar_offset(&self, ivar: IvarRef) -> isize {
        unsafe { &*(ivar.as_ptr() as *const IvarRecord) }.offset
    }

    unsafe fn add_method(
        &self,
        class: ClassRef,
        selector: Selector,
        imp: EntryPoint,
        types: &str,
    ) -> bool {
        let class = record(class);
        let mut methods = class.methods.write();
        if methods.iter().any(|m| m.selector == selector) {
            return false;
        }
        methods.push(leak(MethodRecord {
            selector,
            types: types.to_string(),
            imp,
        }));
        true
    }

    fn allocate_class(&self, superclass: ClassRef, name: &str) -> Result<ClassRef> {
        self.build_class(superclass, name).register()
    }

    fn register_selector(&self, name: &str) -> Selector {
        intern(name)
    }

    fn selector_name(&self, selector: Selector) -> String {
        selector_text(selector)
    }

    fn retain(&self, object: ObjectRef) {
        unsafe { retain_object(object.as_ptr()) }
    }

    fn release(&self, object: ObjectRef) {
        unsafe { release_object(object.as_ptr()) }
    }

    fn autorelease(&self, object: ObjectRef) {
        unsafe { autorelease_object(object.as_ptr()) }
    }

    fn set_associated(&self, object: ObjectRef, key: Selector, value: Option<ObjectRef>) {
        if let Some(value) = value {
            self.retain(value);
        }
        let replaced = {
            let mut entries = self.shared.associations.entry(object.addr()).or_default();
            match entries.iter().position(|(k, _)| *k == key) {
                Some(index) => match value {
                    Some(value) => Some(std::mem::replace(&mut entries[index].1, value.addr())),
                    None => Some(entries.remove(index).1),
                },
                None => {
                    if let Some(value) = value {
                        entries.push((key, value.addr()));
                    }
                    None
                }
            }
        };
        // Released outside the map guard: dealloc may touch the map again
        if let Some(old) = replaced {
            unsafe { release_object(old as Id) };
        }
    }

    fn associated(&self, object: ObjectRef, key: Selector) -> Option<ObjectRef> {
        let entries = self.shared.associations.get(&object.addr())?;
        let (_, value) = entries.iter().find(|(k, _)| *k == key)?;
        ObjectRef::from_ptr(*value as *const c_void)
    }

    fn string_from_str(&self, text: &str) -> Result<ObjectRef> {
        let text = CString::new(text)
            .map_err(|_| BridgeError::mismatch("string without interior NUL", "str"))?;
        let object = unsafe { new_string(self.shared, text) };
        ObjectRef::from_ptr(object)
            .ok_or_else(|| BridgeError::Runtime("string allocation failed".into()))
    }

    fn string_to_string(&self, object: ObjectRef) -> Option<String> {
        unsafe {
            if is_string(object.as_ptr(), self.shared) {
                Some(text_of(object.as_ptr()))
            } else {
                None
            }
        }
    }

    fn report_callback_failure(&self, failure: &BridgeError) {
        self.shared.failures.fetch_add(1, Ordering::Relaxed);
        error!(runtime = "local", error = %failure, "scripting callback failed");
    }
}
