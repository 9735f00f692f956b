//! The recorder: the trap layer over the live object graph.
//!
//! Every operation early code performs goes through one of the trap
//! methods here. Each trap stamps an event at dispatch time with the
//! strictly increasing sequence counter, performs the underlying operation
//! on the realm, and hands back values whose object parts are guaranteed
//! to carry a recorded origin.
//!
//! Invoking a trap with an object the recorder never wrapped is a
//! programmer error of the embedding and fails fast.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::event::{Event, EventKind, SourceHandle};
use crate::value::{
    Callable, LiveObject, ObjRef, PropKey, PropertyDescriptor, PropertySlot, Realm, SymbolRecipe,
    Value,
};

/// Recorder-level failures. These indicate misuse of the core, not bad
/// input data.
#[derive(Debug, Clone, Error)]
pub enum RecordError {
    #[error("object {0} was never wrapped by this recorder")]
    NeverWrapped(ObjRef),

    #[error("object {0} is not callable")]
    NotCallable(ObjRef),

    #[error("object {0} is a code-bound function the recorder cannot execute")]
    NotExecutable(ObjRef),

    #[error("object {0} is not extensible")]
    NotExtensible(ObjRef),

    #[error("invalid property descriptor: {0}")]
    BadDescriptor(String),

    #[error("prototype must be an object or null")]
    BadPrototype,

    #[error("invalid JSON: {0}")]
    Json(String),
}

/// Per-object record: how the object came to exist, and every mutation
/// observed since, in order.
#[derive(Debug, Clone)]
pub struct History {
    pub origin: Event,
    pub changes: Vec<Event>,
}

/// The object-graph recorder.
pub struct Recorder {
    realm: Realm,
    histories: FxHashMap<ObjRef, History>,
    seq: u64,
}

impl Recorder {
    /// Build a recorder over a fresh realm. Installs the root `get-global`
    /// event and eagerly wraps the global object's well-known constructor
    /// bindings so every object a replayer could need is reachable through
    /// a deterministic access path.
    pub fn new() -> Self {
        let realm = Realm::new();
        let mut recorder = Self {
            realm,
            histories: FxHashMap::default(),
            seq: 0,
        };

        let global = recorder.realm.intrinsics.global;
        let origin = recorder.stamp(EventKind::GetGlobal);
        recorder.histories.insert(
            global,
            History {
                origin,
                changes: Vec::new(),
            },
        );

        for (name, ctor) in Realm::global_bindings(&recorder.realm.intrinsics) {
            let origin = recorder.stamp(EventKind::Get {
                target: global,
                key: PropKey::from(name),
            });
            recorder.histories.insert(
                ctor,
                History {
                    origin,
                    changes: Vec::new(),
                },
            );
        }
        recorder
    }

    pub fn global(&self) -> ObjRef {
        self.realm.intrinsics.global
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    pub fn history(&self, obj: ObjRef) -> Option<&History> {
        self.histories.get(&obj)
    }

    /// Current value of the sequence counter.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    fn stamp(&mut self, kind: EventKind) -> Event {
        let seq = self.seq;
        self.seq += 1;
        Event { seq, kind }
    }

    fn expect_wrapped(&self, obj: ObjRef) -> Result<(), RecordError> {
        if self.histories.contains_key(&obj) {
            Ok(())
        } else {
            Err(RecordError::NeverWrapped(obj))
        }
    }

    fn expect_value_wrapped(&self, value: &Value) -> Result<(), RecordError> {
        match value {
            Value::Obj(obj) => self.expect_wrapped(*obj),
            _ => Ok(()),
        }
    }

    fn record_change(&mut self, target: ObjRef, event: Event) {
        self.histories
            .get_mut(&target)
            .expect("change on unwrapped object")
            .changes
            .push(event);
    }

    /// Give an object value an origin if it has none, stamping a fresh
    /// event.
    fn adopt(&mut self, value: &Value, kind: EventKind) {
        if let Value::Obj(obj) = value {
            if !self.histories.contains_key(obj) {
                let origin = self.stamp(kind);
                self.histories.insert(
                    *obj,
                    History {
                        origin,
                        changes: Vec::new(),
                    },
                );
            }
        }
    }

    /// Give an object value an origin if it has none, reusing an
    /// already-stamped event.
    fn adopt_with(&mut self, value: &Value, event: &Event) {
        if let Value::Obj(obj) = value {
            self.histories.entry(*obj).or_insert_with(|| History {
                origin: event.clone(),
                changes: Vec::new(),
            });
        }
    }

    /// Read a property. Data reads record nothing on the target; the read
    /// value's origin is the access path. A user-defined getter may
    /// mutate, so accessor reads record a `get` change event on the
    /// target.
    pub fn get(&mut self, target: ObjRef, key: impl Into<PropKey>) -> Result<Value, RecordError> {
        self.expect_wrapped(target)?;
        let key = key.into();

        enum Looked {
            Data(Value),
            Getter(ObjRef),
            Missing,
        }
        let looked = match self.realm.lookup(target, &key) {
            Some((_, PropertySlot::Data { value, .. })) => Looked::Data(value.clone()),
            Some((_, PropertySlot::Accessor { get: Some(getter), .. })) => Looked::Getter(*getter),
            _ => Looked::Missing,
        };

        match looked {
            Looked::Data(value) => {
                self.adopt(&value, EventKind::Get { target, key });
                Ok(value)
            }
            Looked::Getter(getter) => {
                let event = self.stamp(EventKind::Get {
                    target,
                    key: key.clone(),
                });
                self.record_change(target, event.clone());
                let result = self.realm.call(getter, Value::Obj(target), &[])?;
                self.adopt_with(&result, &event);
                Ok(result)
            }
            Looked::Missing => Ok(Value::Undefined),
        }
    }

    /// Write a property: records `set`, then performs the underlying write
    /// (through a setter when one exists).
    pub fn set(
        &mut self,
        target: ObjRef,
        key: impl Into<PropKey>,
        value: Value,
    ) -> Result<(), RecordError> {
        self.expect_wrapped(target)?;
        self.expect_value_wrapped(&value)?;
        let key = key.into();

        let event = self.stamp(EventKind::Set {
            target,
            key: key.clone(),
            value: value.clone(),
        });
        self.record_change(target, event);

        enum Write {
            Setter(ObjRef),
            Silent,
            Data,
        }
        let write = match self.realm.lookup(target, &key) {
            Some((_, PropertySlot::Accessor { set: Some(setter), .. })) => Write::Setter(*setter),
            Some((_, PropertySlot::Accessor { set: None, .. })) => Write::Silent,
            _ => Write::Data,
        };
        match write {
            Write::Setter(setter) => {
                self.realm.call(setter, Value::Obj(target), &[value])?;
            }
            Write::Silent => {}
            Write::Data => self.realm.set_raw_data(target, key, value),
        }
        Ok(())
    }

    /// Delete a property: records `delete`, performs the underlying
    /// delete, and reports whether anything was removed.
    pub fn delete(
        &mut self,
        target: ObjRef,
        key: impl Into<PropKey>,
    ) -> Result<bool, RecordError> {
        self.expect_wrapped(target)?;
        let key = key.into();
        let event = self.stamp(EventKind::Delete {
            target,
            key: key.clone(),
        });
        self.record_change(target, event);
        Ok(self.realm.delete_raw(target, &key))
    }

    /// Define a property, capturing the full descriptor (accessor pair
    /// included) in the recorded event.
    pub fn define_property(
        &mut self,
        target: ObjRef,
        key: impl Into<PropKey>,
        descriptor: PropertyDescriptor,
    ) -> Result<(), RecordError> {
        self.expect_wrapped(target)?;
        for value in [&descriptor.value, &descriptor.get, &descriptor.set]
            .into_iter()
            .flatten()
        {
            self.expect_value_wrapped(value)?;
        }
        let key = key.into();
        let event = self.stamp(EventKind::DefineProperty {
            target,
            key: key.clone(),
            descriptor: descriptor.clone(),
        });
        self.record_change(target, event);
        self.realm.define_raw(target, key, &descriptor)
    }

    /// Read the prototype. Not a mutation; the prototype's origin is the
    /// access path.
    pub fn get_prototype_of(&mut self, target: ObjRef) -> Result<Value, RecordError> {
        self.expect_wrapped(target)?;
        match self.realm.object(target).proto {
            Some(proto) => {
                let value = Value::Obj(proto);
                self.adopt(&value, EventKind::GetPrototypeOf { target });
                Ok(value)
            }
            None => Ok(Value::Null),
        }
    }

    /// Set the prototype: records `set-prototype-of`, then performs it.
    pub fn set_prototype_of(&mut self, target: ObjRef, value: Value) -> Result<(), RecordError> {
        self.expect_wrapped(target)?;
        let proto = match &value {
            Value::Null => None,
            Value::Obj(obj) => {
                self.expect_wrapped(*obj)?;
                Some(*obj)
            }
            _ => return Err(RecordError::BadPrototype),
        };
        let event = self.stamp(EventKind::SetPrototypeOf {
            target,
            value: value.clone(),
        });
        self.record_change(target, event);
        self.realm.object_mut(target).proto = proto;
        Ok(())
    }

    /// Prevent extensions. Recorded unconditionally before the underlying
    /// operation.
    pub fn prevent_extensions(&mut self, target: ObjRef) -> Result<(), RecordError> {
        self.expect_wrapped(target)?;
        let event = self.stamp(EventKind::PreventExtensions { target });
        self.record_change(target, event);
        self.realm.object_mut(target).extensible = false;
        Ok(())
    }

    /// Read an own property descriptor. Objects surfaced through the
    /// descriptor get their origin from this access path; the target's
    /// history is untouched.
    pub fn get_own_property_descriptor(
        &mut self,
        target: ObjRef,
        key: impl Into<PropKey>,
    ) -> Result<Option<PropertyDescriptor>, RecordError> {
        self.expect_wrapped(target)?;
        let key = key.into();
        let descriptor = match self.realm.object(target).props.get(&key) {
            Some(PropertySlot::Data {
                value,
                writable,
                enumerable,
                configurable,
            }) => PropertyDescriptor {
                value: Some(value.clone()),
                get: None,
                set: None,
                writable: Some(*writable),
                enumerable: Some(*enumerable),
                configurable: Some(*configurable),
            },
            Some(PropertySlot::Accessor {
                get,
                set,
                enumerable,
                configurable,
            }) => PropertyDescriptor {
                value: None,
                get: (*get).map(Value::Obj),
                set: (*set).map(Value::Obj),
                writable: None,
                enumerable: Some(*enumerable),
                configurable: Some(*configurable),
            },
            None => return Ok(None),
        };

        for value in [&descriptor.value, &descriptor.get, &descriptor.set]
            .into_iter()
            .flatten()
        {
            let value = value.clone();
            self.adopt(
                &value,
                EventKind::GetOwnPropertyDescriptor {
                    target,
                    key: key.clone(),
                },
            );
        }
        Ok(Some(descriptor))
    }

    /// Call a function. The `apply` event becomes the returned value's
    /// origin.
    pub fn apply(
        &mut self,
        callee: ObjRef,
        this: Value,
        args: Vec<Value>,
    ) -> Result<Value, RecordError> {
        self.expect_wrapped(callee)?;
        self.expect_value_wrapped(&this)?;
        for arg in &args {
            self.expect_value_wrapped(arg)?;
        }
        let event = self.stamp(EventKind::Apply {
            callee,
            this: this.clone(),
            args: args.clone(),
        });
        let result = self.realm.call(callee, this, &args)?;
        self.adopt_with(&result, &event);
        Ok(result)
    }

    /// Construct with a function. The `construct` event becomes the
    /// constructed value's origin.
    pub fn construct(&mut self, callee: ObjRef, args: Vec<Value>) -> Result<Value, RecordError> {
        self.expect_wrapped(callee)?;
        for arg in &args {
            self.expect_value_wrapped(arg)?;
        }
        let event = self.stamp(EventKind::Construct {
            callee,
            args: args.clone(),
        });
        let result = self.realm.construct(callee, &args)?;
        self.adopt_with(&result, &event);
        Ok(result)
    }

    /// Record a function created by early code over mutable lexical
    /// state. The source handle is threaded through unchanged; the frames
    /// are the shared stack-frame objects the function reads and writes.
    pub fn code_bind(
        &mut self,
        source: SourceHandle,
        frames: Vec<ObjRef>,
    ) -> Result<ObjRef, RecordError> {
        for frame in &frames {
            self.expect_wrapped(*frame)?;
        }
        let proto = self.realm.intrinsics.function_proto;
        let function = self
            .realm
            .alloc(LiveObject::function(Some(proto), Callable::Bound));
        let origin = self.stamp(EventKind::CodeBind { source, frames });
        self.histories.insert(
            function,
            History {
                origin,
                changes: Vec::new(),
            },
        );
        Ok(function)
    }

    /// A symbol shared by key across realms.
    pub fn shared_symbol(&mut self, key: impl Into<String>) -> Value {
        Value::Sym(self.realm.make_symbol(SymbolRecipe::Shared(key.into())))
    }

    /// A fresh symbol with an optional description.
    pub fn fresh_symbol(&mut self, description: Option<String>) -> Value {
        Value::Sym(self.realm.make_symbol(SymbolRecipe::Fresh(description)))
    }

    /// Materialize a JSON text through the recorder, synthesizing
    /// `construct(%Object%)`, `construct(%Array%)`, and `define-property`
    /// events so the produced values never bypass interposition.
    pub fn materialize_json(&mut self, text: &str) -> Result<Value, RecordError> {
        let parsed: serde_json::Value =
            serde_json::from_str(text).map_err(|err| RecordError::Json(err.to_string()))?;
        self.materialize(parsed)
    }

    fn materialize(&mut self, json: serde_json::Value) -> Result<Value, RecordError> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => Ok(Value::Num(n.as_f64().unwrap_or(f64::NAN))),
            serde_json::Value::String(s) => Ok(Value::Str(s)),
            serde_json::Value::Array(items) => {
                let ctor = self.realm.intrinsics.array_ctor;
                let array = self
                    .construct(ctor, Vec::new())?
                    .as_obj()
                    .expect("array constructor returns an object");
                for (index, item) in items.into_iter().enumerate() {
                    let value = self.materialize(item)?;
                    self.define_property(
                        array,
                        PropKey::Str(index.to_string()),
                        PropertyDescriptor::data(value),
                    )?;
                }
                Ok(Value::Obj(array))
            }
            serde_json::Value::Object(map) => {
                let ctor = self.realm.intrinsics.object_ctor;
                let object = self
                    .construct(ctor, Vec::new())?
                    .as_obj()
                    .expect("object constructor returns an object");
                for (key, item) in map {
                    let value = self.materialize(item)?;
                    self.define_property(object, PropKey::Str(key), PropertyDescriptor::data(value))?;
                }
                Ok(Value::Obj(object))
            }
        }
    }

    /// Serialize the event script needed to recreate `roots`.
    pub fn compact(&self, roots: &[Value]) -> Result<crate::replay::ReplayScript, RecordError> {
        crate::replay::compact(self, roots)
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::value::HostFn;

    #[test]
    fn bootstrap_wraps_global_and_constructors() {
        let recorder = Recorder::new();
        let global = recorder.global();
        assert!(matches!(
            recorder.history(global).unwrap().origin.kind,
            EventKind::GetGlobal
        ));
        let object_ctor = recorder.realm().intrinsics.object_ctor;
        match &recorder.history(object_ctor).unwrap().origin.kind {
            EventKind::Get { target, key } => {
                assert_eq!(*target, global);
                assert_eq!(*key, PropKey::from("Object"));
            }
            other => panic!("unexpected origin {other:?}"),
        }
    }

    #[test]
    fn sequence_is_strictly_increasing_across_traps() {
        let mut recorder = Recorder::new();
        let ctor = recorder.realm().intrinsics.object_ctor;
        let obj = recorder.construct(ctor, vec![]).unwrap().as_obj().unwrap();
        recorder.set(obj, "x", Value::Num(1.0)).unwrap();
        recorder.set(obj, "y", Value::str("str")).unwrap();

        let history = recorder.history(obj).unwrap();
        let mut last = history.origin.seq;
        for change in &history.changes {
            assert!(change.seq > last);
            last = change.seq;
        }
    }

    #[test]
    fn data_reads_record_nothing_on_the_target() {
        let mut recorder = Recorder::new();
        let global = recorder.global();
        recorder.get(global, "Object").unwrap();
        recorder.get(global, "Array").unwrap();
        assert!(recorder.history(global).unwrap().changes.is_empty());
    }

    #[test]
    fn accessor_reads_record_a_get_change() {
        struct CountingGetter;
        impl HostFn for CountingGetter {
            fn call(
                &self,
                _realm: &mut Realm,
                _this: Value,
                _args: &[Value],
            ) -> Result<Value, RecordError> {
                Ok(Value::Num(5.0))
            }
        }

        let mut recorder = Recorder::new();
        let ctor = recorder.realm().intrinsics.object_ctor;
        let obj = recorder.construct(ctor, vec![]).unwrap().as_obj().unwrap();

        let getter = recorder.realm.alloc(LiveObject::function(
            None,
            Callable::Host(Arc::new(CountingGetter)),
        ));
        let origin = recorder.stamp(EventKind::GetGlobal);
        recorder.histories.insert(
            getter,
            History {
                origin,
                changes: Vec::new(),
            },
        );

        recorder
            .define_property(
                obj,
                "answer",
                PropertyDescriptor::accessor(Some(Value::Obj(getter)), None),
            )
            .unwrap();
        let before = recorder.history(obj).unwrap().changes.len();
        let value = recorder.get(obj, "answer").unwrap();
        assert_eq!(value, Value::Num(5.0));
        let after = recorder.history(obj).unwrap().changes.len();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn unwrapped_object_fails_fast() {
        let mut recorder = Recorder::new();
        let raw = ObjRef(999);
        assert!(matches!(
            recorder.get(raw, "x"),
            Err(RecordError::NeverWrapped(_))
        ));
    }

    #[test]
    fn prevent_extensions_is_recorded_before_the_operation() {
        let mut recorder = Recorder::new();
        let ctor = recorder.realm().intrinsics.object_ctor;
        let obj = recorder.construct(ctor, vec![]).unwrap().as_obj().unwrap();
        recorder.prevent_extensions(obj).unwrap();

        let history = recorder.history(obj).unwrap();
        assert!(matches!(
            history.changes.last().unwrap().kind,
            EventKind::PreventExtensions { .. }
        ));
        assert!(!recorder.realm().object(obj).extensible);
    }

    #[test]
    fn json_materialization_goes_through_interposition() {
        let mut recorder = Recorder::new();
        let value = recorder
            .materialize_json(r#"{"a": 1, "b": [true, "s"]}"#)
            .unwrap();
        let obj = value.as_obj().unwrap();

        let history = recorder.history(obj).unwrap();
        assert!(matches!(history.origin.kind, EventKind::Construct { .. }));
        // One define-property change per key.
        assert_eq!(
            history
                .changes
                .iter()
                .filter(|e| matches!(e.kind, EventKind::DefineProperty { .. }))
                .count(),
            2
        );

        let b = recorder.get(obj, "b").unwrap().as_obj().unwrap();
        assert!(matches!(
            recorder.history(b).unwrap().origin.kind,
            EventKind::Construct { .. }
        ));
    }

    #[test]
    fn code_bind_threads_the_source_handle_unchanged() {
        let mut recorder = Recorder::new();
        let ctor = recorder.realm().intrinsics.object_ctor;
        let frame = recorder.construct(ctor, vec![]).unwrap().as_obj().unwrap();

        let function = recorder
            .code_bind(SourceHandle::new("fn-handle-17"), vec![frame])
            .unwrap();
        match &recorder.history(function).unwrap().origin.kind {
            EventKind::CodeBind { source, frames } => {
                assert_eq!(source.token(), "fn-handle-17");
                assert_eq!(frames, &vec![frame]);
            }
            other => panic!("unexpected origin {other:?}"),
        }

        // Code-bound functions cannot be executed by the recorder.
        assert!(matches!(
            recorder.apply(function, Value::Undefined, vec![]),
            Err(RecordError::NotExecutable(_))
        ));
    }

    #[test]
    fn shared_symbols_reuse_their_recipe() {
        let mut recorder = Recorder::new();
        let a = recorder.shared_symbol("app.key");
        let b = recorder.shared_symbol("app.key");
        assert_eq!(a, b);
        let c = recorder.fresh_symbol(Some("desc".into()));
        assert_ne!(a, c);
    }
}
