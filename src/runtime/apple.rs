//! Apple `libobjc` backend

use super::{ClassRef, EntryPoint, IvarRef, MethodRef, NativeRuntime, ObjectRef, Selector};
use crate::error::{BridgeError, Result};
use core::ffi::{c_char, c_int, c_uint, c_void};
use core::mem::transmute;
use core::ptr;
use std::ffi::{CStr, CString};
use std::sync::Arc;

type Id = *mut c_void;
type Class = *mut c_void;
type Sel = *mut c_void;
type Method = *mut c_void;
type Ivar = *mut c_void;
type Imp = *const c_void;

#[link(name = "objc")]
extern "C" {
    fn objc_getClassList(buffer: *mut Class, count: c_int) -> c_int;
    fn objc_getClass(name: *const c_char) -> Class;
    fn objc_allocateClassPair(superclass: Class, name: *const c_char, extra: usize) -> Class;
    fn objc_registerClassPair(class: Class);
    fn class_getName(class: Class) -> *const c_char;
    fn class_getSuperclass(class: Class) -> Class;
    fn class_copyMethodList(class: Class, count: *mut c_uint) -> *mut Method;
    fn class_getInstanceMethod(class: Class, sel: Sel) -> Method;
    fn class_copyIvarList(class: Class, count: *mut c_uint) -> *mut Ivar;
    fn class_addMethod(class: Class, sel: Sel, imp: Imp, types: *const c_char) -> i8;
    fn class_getMethodImplementation(class: Class, sel: Sel) -> Imp;
    fn object_getClass(object: Id) -> Class;
    fn method_getName(method: Method) -> Sel;
    fn method_getTypeEncoding(method: Method) -> *const c_char;
    fn method_getImplementation(method: Method) -> Imp;
    fn ivar_getName(ivar: Ivar) -> *const c_char;
    fn ivar_getTypeEncoding(ivar: Ivar) -> *const c_char;
    fn ivar_getOffset(ivar: Ivar) -> isize;
    fn sel_registerName(name: *const c_char) -> Sel;
    fn sel_getName(sel: Sel) -> *const c_char;
    fn objc_retain(object: Id) -> Id;
    fn objc_release(object: Id);
    fn objc_autorelease(object: Id) -> Id;
    fn objc_setAssociatedObject(object: Id, key: *const c_void, value: Id, policy: usize);
    fn objc_getAssociatedObject(object: Id, key: *const c_void) -> Id;
}

const OBJC_ASSOCIATION_RETAIN_NONATOMIC: usize = 1;

#[link(name = "Foundation", kind = "framework")]
extern "C" {}

static EMPTY_NAME: [u8; 1] = [0];

/// Stands in for a missing implementation; never reached for a listed method
extern "C" fn missing_imp() {}

unsafe fn text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn c_name(name: &str) -> CString {
    CString::new(name.replace('\0', "")).unwrap_or_default()
}

/// Take ownership of a `malloc`ed list returned by a `copy` function
unsafe fn copied_list<T: Copy>(list: *mut T, count: c_uint) -> Vec<T> {
    if list.is_null() {
        return Vec::new();
    }
    let items = core::slice::from_raw_parts(list, count as usize).to_vec();
    libc::free(list as *mut c_void);
    items
}

/// The system Objective-C runtime
pub struct ObjcRuntime {
    string_class: ClassRef,
}

impl ObjcRuntime {
    pub fn new() -> Result<Arc<Self>> {
        let name = c_name("NSString");
        // SAFETY: objc_getClass accepts any NUL-terminated name
        let class = unsafe { objc_getClass(name.as_ptr()) };
        let string_class = ClassRef::from_ptr(class)
            .ok_or_else(|| BridgeError::UnknownClass("NSString".into()))?;
        Ok(Arc::new(Self { string_class }))
    }

    unsafe fn imp_for(&self, receiver: Id, selector: &str) -> (Imp, Sel) {
        let sel = self.register_selector(selector).as_ptr();
        (class_getMethodImplementation(object_getClass(receiver), sel), sel)
    }
}

unsafe impl NativeRuntime for ObjcRuntime {
    fn name(&self) -> &str {
        "libobjc"
    }

    fn classes(&self) -> Vec<ClassRef> {
        unsafe {
            let count = objc_getClassList(ptr::null_mut(), 0);
            if count <= 0 {
                return Vec::new();
            }
            let mut buffer: Vec<Class> = vec![ptr::null_mut(); count as usize];
            let filled = objc_getClassList(buffer.as_mut_ptr(), count).min(count);
            buffer.truncate(filled.max(0) as usize);
            buffer.into_iter().filter_map(|c| ClassRef::from_ptr(c)).collect()
        }
    }

    fn class_named(&self, name: &str) -> Option<ClassRef> {
        let name = c_name(name);
        ClassRef::from_ptr(unsafe { objc_getClass(name.as_ptr()) })
    }

    fn class_name(&self, class: ClassRef) -> String {
        unsafe { text(class_getName(class.as_ptr())) }
    }

    fn superclass(&self, class: ClassRef) -> Option<ClassRef> {
        ClassRef::from_ptr(unsafe { class_getSuperclass(class.as_ptr()) })
    }

    fn metaclass(&self, class: ClassRef) -> ClassRef {
        ClassRef::from_ptr(unsafe { object_getClass(class.as_ptr()) }).unwrap_or(class)
    }

    fn object_class(&self, object: ObjectRef) -> ClassRef {
        // A live object always has a class
        ClassRef::from_ptr(unsafe { object_getClass(object.as_ptr()) }).unwrap_or(self.string_class)
    }

    fn methods(&self, class: ClassRef) -> Vec<MethodRef> {
        unsafe {
            let mut count = 0;
            let list = class_copyMethodList(class.as_ptr(), &mut count);
            copied_list(list, count)
                .into_iter()
                .filter_map(|m| MethodRef::from_ptr(m))
                .collect()
        }
    }

    fn lookup_method(&self, class: ClassRef, selector: Selector) -> Option<MethodRef> {
        MethodRef::from_ptr(unsafe { class_getInstanceMethod(class.as_ptr(), selector.as_ptr()) })
    }

    fn method_selector(&self, method: MethodRef) -> Selector {
        Selector::from_ptr(unsafe { method_getName(method.as_ptr()) })
            .unwrap_or(Selector(ptr::NonNull::from(&EMPTY_NAME[0]).cast()))
    }

    fn method_type_encoding(&self, method: MethodRef) -> String {
        unsafe { text(method_getTypeEncoding(method.as_ptr())) }
    }

    fn method_implementation(&self, method: MethodRef) -> EntryPoint {
        let imp = unsafe { method_getImplementation(method.as_ptr()) };
        // SAFETY: function addresses are never null
        EntryPoint::from_ptr(imp)
            .unwrap_or_else(|| EntryPoint(unsafe { ptr::NonNull::new_unchecked(missing_imp as *mut c_void) }))
    }

    fn ivars(&self, class: ClassRef) -> Vec<IvarRef> {
        unsafe {
            let mut count = 0;
            let list = class_copyIvarList(class.as_ptr(), &mut count);
            copied_list(list, count)
                .into_iter()
                .filter_map(|i| IvarRef::from_ptr(i))
                .collect()
        }
    }

    fn ivar_name(&self, ivar: IvarRef) -> String {
        unsafe { text(ivar_getName(ivar.as_ptr())) }
    }

    fn ivar_type_encoding(&self, ivar: IvarRef) -> String {
        unsafe { text(ivar_getTypeEncoding(ivar.as_ptr())) }
    }

    fn ivar_offset(&self, ivar: IvarRef) -> isize {
        unsafe { ivar_getOffset(ivar.as_ptr()) }
    }

    unsafe fn add_method(
        &self,
        class: ClassRef,
        selector: Selector,
        imp: EntryPoint,
        types: &str,
    ) -> bool {
        let types = c_name(types);
        class_addMethod(class.as_ptr(), selector.as_ptr(), imp.as_ptr(), types.as_ptr()) != 0
    }

    fn allocate_class(&self, superclass: ClassRef, name: &str) -> Result<ClassRef> {
        let cname = c_name(name);
        unsafe {
            let class = objc_allocateClassPair(superclass.as_ptr(), cname.as_ptr(), 0);
            let class = ClassRef::from_ptr(class)
                .ok_or_else(|| BridgeError::Runtime(format!("class {} already exists", name)))?;
            objc_registerClassPair(class.as_ptr());
            Ok(class)
        }
    }

    fn register_selector(&self, name: &str) -> Selector {
        let cname = c_name(name);
        // sel_registerName never returns null for a valid C string
        let sel = unsafe { sel_registerName(cname.as_ptr()) };
        Selector::from_ptr(sel).unwrap_or(Selector(ptr::NonNull::from(&EMPTY_NAME[0]).cast()))
    }

    fn selector_name(&self, selector: Selector) -> String {
        unsafe { text(sel_getName(selector.as_ptr())) }
    }

    fn retain(&self, object: ObjectRef) {
        unsafe { objc_retain(object.as_ptr()) };
    }

    fn release(&self, object: ObjectRef) {
        unsafe { objc_release(object.as_ptr()) }
    }

    fn autorelease(&self, object: ObjectRef) {
        unsafe { objc_autorelease(object.as_ptr()) };
    }

    fn set_associated(&self, object: ObjectRef, key: Selector, value: Option<ObjectRef>) {
        let value = value.map_or(ptr::null_mut(), ObjectRef::as_ptr);
        unsafe {
            objc_setAssociatedObject(
                object.as_ptr(),
                key.as_ptr(),
                value,
                OBJC_ASSOCIATION_RETAIN_NONATOMIC,
            )
        };
    }

    fn associated(&self, object: ObjectRef, key: Selector) -> Option<ObjectRef> {
        ObjectRef::from_ptr(unsafe { objc_getAssociatedObject(object.as_ptr(), key.as_ptr()) })
    }

    fn string_from_str(&self, value: &str) -> Result<ObjectRef> {
        let cvalue = CString::new(value)
            .map_err(|_| BridgeError::mismatch("string without interior NUL", "str"))?;
        unsafe {
            let (imp, sel) = self.imp_for(self.string_class.as_ptr(), "stringWithUTF8String:");
            let imp: extern "C" fn(Id, Sel, *const c_char) -> Id = transmute(imp);
            let object = ObjectRef::from_ptr(imp(self.string_class.as_ptr(), sel, cvalue.as_ptr()))
                .ok_or_else(|| BridgeError::Runtime("NSString allocation failed".into()))?;
            // The factory result is autoreleased; the caller owns one reference
            objc_retain(object.as_ptr());
            Ok(object)
        }
    }

    fn string_to_string(&self, object: ObjectRef) -> Option<String> {
        let class = self.object_class(object);
        if !self.is_subclass(class, self.string_class) {
            return None;
        }
        unsafe {
            let (imp, sel) = self.imp_for(object.as_ptr(), "UTF8String");
            let imp: extern "C" fn(Id, Sel) -> *const c_char = transmute(imp);
            Some(text(imp(object.as_ptr(), sel)))
        }
    }
}
