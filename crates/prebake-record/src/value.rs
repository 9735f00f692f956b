//! The live-value model.
//!
//! The recorder owns every live object in an arena ([`Realm`]); handles
//! ([`ObjRef`]) index into it and are the only thing handed back to early
//! code. Arena ownership is what pins a wrapper's backing object for the
//! recorder's whole lifetime.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::recorder::RecordError;

/// Handle to a live object in a [`Realm`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjRef(pub(crate) u32);

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a recorded symbol recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymRef(pub(crate) u32);

/// A dynamic value. Primitives pass through the recorder unwrapped;
/// objects and functions appear only as [`ObjRef`] handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Sym(SymRef),
    Obj(ObjRef),
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            Value::Obj(obj) => Some(*obj),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Obj(_))
    }
}

/// Property key: string or symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropKey {
    Str(String),
    Sym(SymRef),
}

impl From<&str> for PropKey {
    fn from(value: &str) -> Self {
        PropKey::Str(value.to_string())
    }
}

impl From<String> for PropKey {
    fn from(value: String) -> Self {
        PropKey::Str(value)
    }
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Str(name) => write!(f, "{name}"),
            PropKey::Sym(sym) => write!(f, "@@{}", sym.0),
        }
    }
}

/// A property descriptor as captured in events. Accessor pairs are
/// captured whole so a replayer can re-define them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub value: Option<Value>,
    pub get: Option<Value>,
    pub set: Option<Value>,
    pub writable: Option<bool>,
    pub enumerable: Option<bool>,
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    pub fn data(value: Value) -> Self {
        Self {
            value: Some(value),
            writable: Some(true),
            enumerable: Some(true),
            configurable: Some(true),
            ..Self::default()
        }
    }

    pub fn accessor(get: Option<Value>, set: Option<Value>) -> Self {
        Self {
            get,
            set,
            enumerable: Some(true),
            configurable: Some(true),
            ..Self::default()
        }
    }

    pub fn is_accessor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }
}

/// A property slot on a live object.
#[derive(Debug, Clone)]
pub enum PropertySlot {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<ObjRef>,
        set: Option<ObjRef>,
        enumerable: bool,
        configurable: bool,
    },
}

/// Host-provided function behavior. The callee may allocate in the realm;
/// wrapping whatever it returns is the recorder's job.
pub trait HostFn: Send + Sync {
    fn call(&self, realm: &mut Realm, this: Value, args: &[Value]) -> Result<Value, RecordError>;
}

/// What happens when a function object is invoked.
#[derive(Clone)]
pub enum Callable {
    /// `%Object%`: construct a plain object.
    Object,
    /// `%Array%`: construct an array-like object.
    Array,
    /// `%Number%`, `%String%`, `%Boolean%`: coercing callables.
    Number,
    String,
    Boolean,
    /// A function captured through `code-bind`; the recorder holds its
    /// opaque source handle and cannot execute it.
    Bound,
    /// Arbitrary host behavior, used by embedders and tests.
    Host(Arc<dyn HostFn>),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Object => write!(f, "Object"),
            Callable::Array => write!(f, "Array"),
            Callable::Number => write!(f, "Number"),
            Callable::String => write!(f, "String"),
            Callable::Boolean => write!(f, "Boolean"),
            Callable::Bound => write!(f, "Bound"),
            Callable::Host(_) => write!(f, "Host"),
        }
    }
}

/// A live object: prototype link, own properties, extensibility, and
/// optional call behavior.
#[derive(Debug, Clone, Default)]
pub struct LiveObject {
    pub proto: Option<ObjRef>,
    pub props: FxHashMap<PropKey, PropertySlot>,
    pub extensible: bool,
    pub callable: Option<Callable>,
}

impl LiveObject {
    pub fn plain(proto: Option<ObjRef>) -> Self {
        Self {
            proto,
            props: FxHashMap::default(),
            extensible: true,
            callable: None,
        }
    }

    pub fn function(proto: Option<ObjRef>, callable: Callable) -> Self {
        Self {
            proto,
            props: FxHashMap::default(),
            extensible: true,
            callable: Some(callable),
        }
    }
}

/// How a symbol is recreated on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolRecipe {
    /// `Symbol.for(key)`: shared across realms by key.
    Shared(String),
    /// A fresh symbol with an optional description.
    Fresh(Option<String>),
}

/// Well-known objects every realm starts with.
#[derive(Debug, Clone, Copy)]
pub struct Intrinsics {
    pub global: ObjRef,
    pub object_proto: ObjRef,
    pub function_proto: ObjRef,
    pub array_proto: ObjRef,
    pub object_ctor: ObjRef,
    pub array_ctor: ObjRef,
    pub number_ctor: ObjRef,
    pub string_ctor: ObjRef,
    pub boolean_ctor: ObjRef,
}

/// The recorder-owned object arena plus symbol registry.
pub struct Realm {
    objects: Vec<LiveObject>,
    symbols: Vec<SymbolRecipe>,
    shared_symbols: FxHashMap<String, SymRef>,
    pub intrinsics: Intrinsics,
}

impl Realm {
    pub fn new() -> Self {
        let mut objects = Vec::new();
        let mut alloc = |object: LiveObject| {
            objects.push(object);
            ObjRef(objects.len() as u32 - 1)
        };

        let object_proto = alloc(LiveObject::plain(None));
        let function_proto = alloc(LiveObject::plain(Some(object_proto)));
        let array_proto = alloc(LiveObject::plain(Some(object_proto)));
        let object_ctor = alloc(LiveObject::function(Some(function_proto), Callable::Object));
        let array_ctor = alloc(LiveObject::function(Some(function_proto), Callable::Array));
        let number_ctor = alloc(LiveObject::function(Some(function_proto), Callable::Number));
        let string_ctor = alloc(LiveObject::function(Some(function_proto), Callable::String));
        let boolean_ctor = alloc(LiveObject::function(Some(function_proto), Callable::Boolean));
        let global = alloc(LiveObject::plain(Some(object_proto)));

        let intrinsics = Intrinsics {
            global,
            object_proto,
            function_proto,
            array_proto,
            object_ctor,
            array_ctor,
            number_ctor,
            string_ctor,
            boolean_ctor,
        };

        let mut realm = Self {
            objects,
            symbols: Vec::new(),
            shared_symbols: FxHashMap::default(),
            intrinsics,
        };

        for (name, ctor) in Self::global_bindings(&intrinsics) {
            realm.set_raw_data(global, PropKey::from(name), Value::Obj(ctor));
        }
        realm
    }

    /// The global object's well-known constructor bindings, in binding
    /// order.
    pub fn global_bindings(intrinsics: &Intrinsics) -> Vec<(&'static str, ObjRef)> {
        vec![
            ("Object", intrinsics.object_ctor),
            ("Array", intrinsics.array_ctor),
            ("Number", intrinsics.number_ctor),
            ("String", intrinsics.string_ctor),
            ("Boolean", intrinsics.boolean_ctor),
        ]
    }

    pub fn alloc(&mut self, object: LiveObject) -> ObjRef {
        self.objects.push(object);
        ObjRef(self.objects.len() as u32 - 1)
    }

    pub fn new_plain(&mut self) -> ObjRef {
        let proto = self.intrinsics.object_proto;
        self.alloc(LiveObject::plain(Some(proto)))
    }

    pub fn new_array(&mut self) -> ObjRef {
        let proto = self.intrinsics.array_proto;
        self.alloc(LiveObject::plain(Some(proto)))
    }

    pub fn object(&self, obj: ObjRef) -> &LiveObject {
        &self.objects[obj.0 as usize]
    }

    pub fn object_mut(&mut self, obj: ObjRef) -> &mut LiveObject {
        &mut self.objects[obj.0 as usize]
    }

    pub fn contains(&self, obj: ObjRef) -> bool {
        (obj.0 as usize) < self.objects.len()
    }

    /// Walk the prototype chain looking for `key`. Returns the slot and
    /// the object that holds it.
    pub fn lookup(&self, obj: ObjRef, key: &PropKey) -> Option<(ObjRef, &PropertySlot)> {
        let mut current = Some(obj);
        while let Some(holder) = current {
            if let Some(slot) = self.object(holder).props.get(key) {
                return Some((holder, slot));
            }
            current = self.object(holder).proto;
        }
        None
    }

    /// Plain data write without recording: used for realm setup and by the
    /// replayer. Ignored on a non-extensible object that lacks the key.
    pub fn set_raw_data(&mut self, obj: ObjRef, key: PropKey, value: Value) {
        let object = self.object_mut(obj);
        if !object.extensible && !object.props.contains_key(&key) {
            return;
        }
        object.props.insert(
            key,
            PropertySlot::Data {
                value,
                writable: true,
                enumerable: true,
                configurable: true,
            },
        );
    }

    /// Apply a descriptor without recording.
    pub fn define_raw(
        &mut self,
        obj: ObjRef,
        key: PropKey,
        descriptor: &PropertyDescriptor,
    ) -> Result<(), RecordError> {
        let getter = object_or_none(descriptor.get.as_ref())?;
        let setter = object_or_none(descriptor.set.as_ref())?;
        let object = self.object_mut(obj);
        if !object.extensible && !object.props.contains_key(&key) {
            return Err(RecordError::NotExtensible(obj));
        }
        let slot = if descriptor.is_accessor() {
            PropertySlot::Accessor {
                get: getter,
                set: setter,
                enumerable: descriptor.enumerable.unwrap_or(false),
                configurable: descriptor.configurable.unwrap_or(false),
            }
        } else {
            PropertySlot::Data {
                value: descriptor.value.clone().unwrap_or(Value::Undefined),
                writable: descriptor.writable.unwrap_or(false),
                enumerable: descriptor.enumerable.unwrap_or(false),
                configurable: descriptor.configurable.unwrap_or(false),
            }
        };
        object.props.insert(key, slot);
        Ok(())
    }

    pub fn delete_raw(&mut self, obj: ObjRef, key: &PropKey) -> bool {
        self.object_mut(obj).props.remove(key).is_some()
    }

    /// Invoke a callable object's native behavior.
    pub fn call(
        &mut self,
        callee: ObjRef,
        this: Value,
        args: &[Value],
    ) -> Result<Value, RecordError> {
        let callable = self
            .object(callee)
            .callable
            .clone()
            .ok_or(RecordError::NotCallable(callee))?;
        match callable {
            Callable::Object => Ok(Value::Obj(self.new_plain())),
            Callable::Array => Ok(Value::Obj(self.new_array())),
            Callable::Number => Ok(Value::Num(coerce_number(args.first()))),
            Callable::String => Ok(Value::str(coerce_string(args.first()))),
            Callable::Boolean => Ok(Value::Bool(coerce_boolean(args.first()))),
            Callable::Bound => Err(RecordError::NotExecutable(callee)),
            Callable::Host(host) => host.call(self, this, args),
        }
    }

    /// Invoke a callable as a constructor.
    pub fn construct(&mut self, callee: ObjRef, args: &[Value]) -> Result<Value, RecordError> {
        let callable = self
            .object(callee)
            .callable
            .clone()
            .ok_or(RecordError::NotCallable(callee))?;
        match callable {
            Callable::Object => Ok(Value::Obj(self.new_plain())),
            Callable::Array => Ok(Value::Obj(self.new_array())),
            // Wrapper objects carry no primitive data in this model; a
            // plain object is enough for identity.
            Callable::Number | Callable::String | Callable::Boolean => {
                Ok(Value::Obj(self.new_plain()))
            }
            Callable::Bound => Err(RecordError::NotExecutable(callee)),
            Callable::Host(host) => {
                let this = Value::Obj(self.new_plain());
                let result = host.call(self, this.clone(), args)?;
                Ok(if result.is_object() { result } else { this })
            }
        }
    }

    pub fn make_symbol(&mut self, recipe: SymbolRecipe) -> SymRef {
        if let SymbolRecipe::Shared(key) = &recipe {
            if let Some(existing) = self.shared_symbols.get(key) {
                return *existing;
            }
        }
        self.symbols.push(recipe.clone());
        let sym = SymRef(self.symbols.len() as u32 - 1);
        if let SymbolRecipe::Shared(key) = recipe {
            self.shared_symbols.insert(key, sym);
        }
        sym
    }

    pub fn symbol(&self, sym: SymRef) -> &SymbolRecipe {
        &self.symbols[sym.0 as usize]
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

fn object_or_none(value: Option<&Value>) -> Result<Option<ObjRef>, RecordError> {
    match value {
        None | Some(Value::Undefined) => Ok(None),
        Some(Value::Obj(obj)) => Ok(Some(*obj)),
        Some(other) => Err(RecordError::BadDescriptor(format!(
            "accessor must be an object, got {other:?}"
        ))),
    }
}

fn coerce_number(value: Option<&Value>) -> f64 {
    match value {
        None | Some(Value::Undefined) => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Some(Value::Num(n)) => *n,
        Some(Value::Str(s)) => s.trim().parse().unwrap_or(f64::NAN),
        Some(_) => f64::NAN,
    }
}

fn coerce_string(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::Undefined) => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Num(n)) => n.to_string(),
        Some(Value::Str(s)) => s.clone(),
        Some(Value::Sym(_)) => "Symbol()".to_string(),
        Some(Value::Obj(_)) => "[object Object]".to_string(),
    }
}

fn coerce_boolean(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Undefined) | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Num(n)) => *n != 0.0 && !n.is_nan(),
        Some(Value::Str(s)) => !s.is_empty(),
        Some(Value::Sym(_)) | Some(Value::Obj(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_starts_with_global_bindings() {
        let realm = Realm::new();
        let global = realm.intrinsics.global;
        let (_, slot) = realm.lookup(global, &PropKey::from("Object")).unwrap();
        match slot {
            PropertySlot::Data { value, .. } => {
                assert_eq!(value.as_obj(), Some(realm.intrinsics.object_ctor));
            }
            _ => panic!("expected data slot"),
        }
    }

    #[test]
    fn lookup_walks_the_prototype_chain() {
        let mut realm = Realm::new();
        let proto = realm.new_plain();
        realm.set_raw_data(proto, PropKey::from("shared"), Value::Num(7.0));
        let child = realm.alloc(LiveObject::plain(Some(proto)));

        let (holder, _) = realm.lookup(child, &PropKey::from("shared")).unwrap();
        assert_eq!(holder, proto);
    }

    #[test]
    fn shared_symbols_deduplicate_by_key() {
        let mut realm = Realm::new();
        let a = realm.make_symbol(SymbolRecipe::Shared("app.key".into()));
        let b = realm.make_symbol(SymbolRecipe::Shared("app.key".into()));
        let c = realm.make_symbol(SymbolRecipe::Fresh(None));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn non_extensible_object_rejects_new_defines() {
        let mut realm = Realm::new();
        let obj = realm.new_plain();
        realm.object_mut(obj).extensible = false;
        let err = realm.define_raw(
            obj,
            PropKey::from("x"),
            &PropertyDescriptor::data(Value::Num(1.0)),
        );
        assert!(err.is_err());
    }

    #[test]
    fn constructors_produce_fresh_objects() {
        let mut realm = Realm::new();
        let ctor = realm.intrinsics.object_ctor;
        let a = realm.construct(ctor, &[]).unwrap();
        let b = realm.construct(ctor, &[]).unwrap();
        assert_ne!(a.as_obj(), b.as_obj());
    }
}
