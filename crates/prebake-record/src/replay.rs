//! Compaction and replay.
//!
//! Compaction walks a chosen root set: each object contributes its origin
//! and change events, every object-typed operand of those events joins the
//! worklist, and the collected events are merge-sorted by sequence. A
//! [`Replayer`] performing them in order reproduces the same observable
//! object graph in a fresh realm.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{Event, EventKind};
use crate::recorder::{RecordError, Recorder};
use crate::value::{
    Callable, LiveObject, ObjRef, PropKey, PropertyDescriptor, PropertySlot, Realm, SymRef,
    SymbolRecipe, Value,
};

/// A pool entry: an object in the recreated subgraph, identified by the
/// sequence number of its origin event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub object: ObjRef,
    pub origin_seq: u64,
}

/// The minimal event script recreating a root set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayScript {
    /// Events in sequence order, deduplicated.
    pub events: Vec<Event>,
    /// Objects in the recreated subgraph, in discovery order.
    pub pool: Vec<PoolEntry>,
    /// Recipes for every symbol the events reference.
    pub symbols: Vec<(SymRef, SymbolRecipe)>,
}

/// Serialize the histories of `roots` into a replay script.
///
/// Presenting an object value the recorder never wrapped is an error;
/// primitive roots need no recreation and are skipped.
pub fn compact(recorder: &Recorder, roots: &[Value]) -> Result<ReplayScript, RecordError> {
    let mut worklist: Vec<ObjRef> = Vec::new();
    for root in roots {
        if let Value::Obj(obj) = root {
            if recorder.history(*obj).is_none() {
                return Err(RecordError::NeverWrapped(*obj));
            }
            worklist.push(*obj);
        }
    }

    let mut visited: FxHashSet<ObjRef> = FxHashSet::default();
    let mut pool = Vec::new();
    let mut events: BTreeMap<u64, Event> = BTreeMap::new();
    let mut seen_symbols: FxHashSet<SymRef> = FxHashSet::default();
    let mut symbols = Vec::new();

    while let Some(obj) = worklist.pop() {
        if !visited.insert(obj) {
            continue;
        }
        let history = recorder
            .history(obj)
            .ok_or(RecordError::NeverWrapped(obj))?;
        pool.push(PoolEntry {
            object: obj,
            origin_seq: history.origin.seq,
        });

        for event in std::iter::once(&history.origin).chain(history.changes.iter()) {
            let mut operands = Vec::new();
            event.kind.object_operands(&mut operands);
            worklist.extend(operands);

            let mut syms = Vec::new();
            event.kind.symbol_operands(&mut syms);
            for sym in syms {
                if seen_symbols.insert(sym) {
                    symbols.push((sym, recorder.realm().symbol(sym).clone()));
                }
            }

            events.insert(event.seq, event.clone());
        }
    }

    Ok(ReplayScript {
        events: events.into_values().collect(),
        pool,
        symbols,
    })
}

/// Replay failures: a malformed or truncated script.
#[derive(Debug, Clone, Error)]
pub enum ReplayError {
    #[error("script references object {0} before any event binds it")]
    Unbound(ObjRef),

    #[error("script references an unknown symbol")]
    UnknownSymbol(SymRef),

    #[error("event {0} should have produced an object but did not")]
    NothingProduced(u64),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Interprets a replay script against a fresh realm, rebuilding the
/// recorded object graph.
pub struct Replayer {
    realm: Realm,
    objects: FxHashMap<ObjRef, ObjRef>,
    symbols: FxHashMap<SymRef, SymRef>,
}

impl Replayer {
    pub fn new() -> Self {
        Self {
            realm: Realm::new(),
            objects: FxHashMap::default(),
            symbols: FxHashMap::default(),
        }
    }

    /// The rebuilt realm.
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// The rebuilt counterpart of a recorded object.
    pub fn resolve(&self, recorded: ObjRef) -> Option<ObjRef> {
        self.objects.get(&recorded).copied()
    }

    /// Perform every event in order. Origin events bind their produced
    /// object to the recorded ref the pool associates with their sequence
    /// number.
    pub fn replay(&mut self, script: &ReplayScript) -> Result<(), ReplayError> {
        for (recorded, recipe) in &script.symbols {
            let local = self.realm.make_symbol(recipe.clone());
            self.symbols.insert(*recorded, local);
        }

        let bindings: FxHashMap<u64, ObjRef> = script
            .pool
            .iter()
            .map(|entry| (entry.origin_seq, entry.object))
            .collect();

        for event in &script.events {
            let produced = self.perform(&event.kind)?;
            if let Some(recorded) = bindings.get(&event.seq) {
                match produced {
                    Some(local) => {
                        self.objects.insert(*recorded, local);
                    }
                    None => return Err(ReplayError::NothingProduced(event.seq)),
                }
            }
        }
        Ok(())
    }

    fn obj(&self, recorded: ObjRef) -> Result<ObjRef, ReplayError> {
        self.objects
            .get(&recorded)
            .copied()
            .ok_or(ReplayError::Unbound(recorded))
    }

    fn value(&self, value: &Value) -> Result<Value, ReplayError> {
        Ok(match value {
            Value::Obj(obj) => Value::Obj(self.obj(*obj)?),
            Value::Sym(sym) => Value::Sym(
                self.symbols
                    .get(sym)
                    .copied()
                    .ok_or(ReplayError::UnknownSymbol(*sym))?,
            ),
            other => other.clone(),
        })
    }

    fn key(&self, key: &PropKey) -> Result<PropKey, ReplayError> {
        Ok(match key {
            PropKey::Sym(sym) => PropKey::Sym(
                self.symbols
                    .get(sym)
                    .copied()
                    .ok_or(ReplayError::UnknownSymbol(*sym))?,
            ),
            other => other.clone(),
        })
    }

    fn perform(&mut self, kind: &EventKind) -> Result<Option<ObjRef>, ReplayError> {
        match kind {
            EventKind::GetGlobal => Ok(Some(self.realm.intrinsics.global)),

            EventKind::Get { target, key } => {
                let target = self.obj(*target)?;
                let key = self.key(key)?;

                enum Looked {
                    Data(Value),
                    Getter(ObjRef),
                    Missing,
                }
                let looked = match self.realm.lookup(target, &key) {
                    Some((_, PropertySlot::Data { value, .. })) => Looked::Data(value.clone()),
                    Some((_, PropertySlot::Accessor { get: Some(getter), .. })) => {
                        Looked::Getter(*getter)
                    }
                    _ => Looked::Missing,
                };
                let value = match looked {
                    Looked::Data(value) => value,
                    Looked::Getter(getter) => {
                        self.realm.call(getter, Value::Obj(target), &[])?
                    }
                    Looked::Missing => Value::Undefined,
                };
                Ok(value.as_obj())
            }

            EventKind::Apply { callee, this, args } => {
                let callee = self.obj(*callee)?;
                let this = self.value(this)?;
                let args = args
                    .iter()
                    .map(|arg| self.value(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = self.realm.call(callee, this, &args)?;
                Ok(result.as_obj())
            }

            EventKind::Construct { callee, args } => {
                let callee = self.obj(*callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.value(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = self.realm.construct(callee, &args)?;
                Ok(result.as_obj())
            }

            EventKind::CodeBind { frames, .. } => {
                for frame in frames {
                    self.obj(*frame)?;
                }
                let proto = self.realm.intrinsics.function_proto;
                let function = self
                    .realm
                    .alloc(LiveObject::function(Some(proto), Callable::Bound));
                Ok(Some(function))
            }

            EventKind::GetPrototypeOf { target } => {
                let target = self.obj(*target)?;
                Ok(self.realm.object(target).proto)
            }

            EventKind::GetOwnPropertyDescriptor { target, key } => {
                let target = self.obj(*target)?;
                let key = self.key(key)?;
                match self.realm.object(target).props.get(&key) {
                    Some(PropertySlot::Data { value, .. }) => Ok(value.as_obj()),
                    Some(PropertySlot::Accessor { get, set, .. }) => Ok((*get).or(*set)),
                    None => Ok(None),
                }
            }

            EventKind::Set { target, key, value } => {
                let target = self.obj(*target)?;
                let key = self.key(key)?;
                let value = self.value(value)?;

                let setter = match self.realm.lookup(target, &key) {
                    Some((_, PropertySlot::Accessor { set, .. })) => Some(*set),
                    _ => None,
                };
                match setter {
                    Some(Some(setter)) => {
                        self.realm.call(setter, Value::Obj(target), &[value])?;
                    }
                    Some(None) => {}
                    None => self.realm.set_raw_data(target, key, value),
                }
                Ok(None)
            }

            EventKind::Delete { target, key } => {
                let target = self.obj(*target)?;
                let key = self.key(key)?;
                self.realm.delete_raw(target, &key);
                Ok(None)
            }

            EventKind::DefineProperty {
                target,
                key,
                descriptor,
            } => {
                let target = self.obj(*target)?;
                let key = self.key(key)?;
                let descriptor = PropertyDescriptor {
                    value: descriptor.value.as_ref().map(|v| self.value(v)).transpose()?,
                    get: descriptor.get.as_ref().map(|v| self.value(v)).transpose()?,
                    set: descriptor.set.as_ref().map(|v| self.value(v)).transpose()?,
                    writable: descriptor.writable,
                    enumerable: descriptor.enumerable,
                    configurable: descriptor.configurable,
                };
                self.realm.define_raw(target, key, &descriptor)?;
                Ok(None)
            }

            EventKind::SetPrototypeOf { target, value } => {
                let target = self.obj(*target)?;
                let proto = match self.value(value)? {
                    Value::Null => None,
                    Value::Obj(obj) => Some(obj),
                    _ => return Err(ReplayError::Record(RecordError::BadPrototype)),
                };
                self.realm.object_mut(target).proto = proto;
                Ok(None)
            }

            EventKind::PreventExtensions { target } => {
                let target = self.obj(*target)?;
                self.realm.object_mut(target).extensible = false;
                Ok(None)
            }
        }
    }
}

impl Default for Replayer {
    fn default() -> Self {
        Self::new()
    }
}
