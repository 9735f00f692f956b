//! Object-graph events.
//!
//! Every trap dispatch stamps one event with the recorder's global
//! sequence counter. Origin variants say how an object came to exist or be
//! observed; mutation variants say how it changed. Events are plain values
//! with no hidden state.

use serde::{Deserialize, Serialize};

use crate::value::{ObjRef, PropKey, PropertyDescriptor, Value};

/// Opaque token stored in a `code-bind` event. The recorder threads it
/// through unchanged; only the reknitter interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHandle(String);

impl SourceHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

/// A sequenced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub kind: EventKind,
}

/// Origin and mutation variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    // Origins.
    GetGlobal,
    Get {
        target: ObjRef,
        key: PropKey,
    },
    Apply {
        callee: ObjRef,
        this: Value,
        args: Vec<Value>,
    },
    Construct {
        callee: ObjRef,
        args: Vec<Value>,
    },
    CodeBind {
        source: SourceHandle,
        frames: Vec<ObjRef>,
    },
    GetPrototypeOf {
        target: ObjRef,
    },
    GetOwnPropertyDescriptor {
        target: ObjRef,
        key: PropKey,
    },
    // Mutations.
    Set {
        target: ObjRef,
        key: PropKey,
        value: Value,
    },
    Delete {
        target: ObjRef,
        key: PropKey,
    },
    DefineProperty {
        target: ObjRef,
        key: PropKey,
        descriptor: PropertyDescriptor,
    },
    SetPrototypeOf {
        target: ObjRef,
        value: Value,
    },
    PreventExtensions {
        target: ObjRef,
    },
}

impl EventKind {
    /// Every object this event's operands reference: the compaction
    /// worklist follows these.
    pub fn object_operands(&self, out: &mut Vec<ObjRef>) {
        fn push_value(out: &mut Vec<ObjRef>, value: &Value) {
            if let Value::Obj(obj) = value {
                out.push(*obj);
            }
        }
        match self {
            EventKind::GetGlobal => {}
            EventKind::Get { target, .. }
            | EventKind::GetPrototypeOf { target }
            | EventKind::GetOwnPropertyDescriptor { target, .. }
            | EventKind::Delete { target, .. }
            | EventKind::PreventExtensions { target } => out.push(*target),
            EventKind::Apply { callee, this, args } => {
                out.push(*callee);
                push_value(out, this);
                for arg in args {
                    push_value(out, arg);
                }
            }
            EventKind::Construct { callee, args } => {
                out.push(*callee);
                for arg in args {
                    push_value(out, arg);
                }
            }
            EventKind::CodeBind { frames, .. } => out.extend(frames.iter().copied()),
            EventKind::Set { target, value, .. } => {
                out.push(*target);
                push_value(out, value);
            }
            EventKind::DefineProperty {
                target, descriptor, ..
            } => {
                out.push(*target);
                for value in [&descriptor.value, &descriptor.get, &descriptor.set]
                    .into_iter()
                    .flatten()
                {
                    push_value(out, value);
                }
            }
            EventKind::SetPrototypeOf { target, value } => {
                out.push(*target);
                push_value(out, value);
            }
        }
    }

    /// Symbols referenced by this event, for the replay script's symbol
    /// table.
    pub fn symbol_operands(&self, out: &mut Vec<crate::value::SymRef>) {
        fn push_key(out: &mut Vec<crate::value::SymRef>, key: &PropKey) {
            if let PropKey::Sym(sym) = key {
                out.push(*sym);
            }
        }
        fn push_value(out: &mut Vec<crate::value::SymRef>, value: &Value) {
            if let Value::Sym(sym) = value {
                out.push(*sym);
            }
        }
        match self {
            EventKind::Get { key, .. }
            | EventKind::GetOwnPropertyDescriptor { key, .. }
            | EventKind::Delete { key, .. } => push_key(out, key),
            EventKind::Set { key, value, .. } => {
                push_key(out, key);
                push_value(out, value);
            }
            EventKind::DefineProperty {
                key, descriptor, ..
            } => {
                push_key(out, key);
                if let Some(value) = &descriptor.value {
                    push_value(out, value);
                }
            }
            EventKind::Apply { this, args, .. } => {
                push_value(out, this);
                for arg in args {
                    push_value(out, arg);
                }
            }
            EventKind::Construct { args, .. } => {
                for arg in args {
                    push_value(out, arg);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_event_operands_cover_target_and_value() {
        let kind = EventKind::Set {
            target: ObjRef(1),
            key: PropKey::from("x"),
            value: Value::Obj(ObjRef(2)),
        };
        let mut out = Vec::new();
        kind.object_operands(&mut out);
        assert_eq!(out, vec![ObjRef(1), ObjRef(2)]);
    }

    #[test]
    fn descriptor_operands_cover_accessor_pair() {
        let kind = EventKind::DefineProperty {
            target: ObjRef(1),
            key: PropKey::from("x"),
            descriptor: PropertyDescriptor::accessor(
                Some(Value::Obj(ObjRef(3))),
                Some(Value::Obj(ObjRef(4))),
            ),
        };
        let mut out = Vec::new();
        kind.object_operands(&mut out);
        assert_eq!(out, vec![ObjRef(1), ObjRef(3), ObjRef(4)]);
    }

    #[test]
    fn events_serialize_round_trip() {
        let event = Event {
            seq: 9,
            kind: EventKind::Construct {
                callee: ObjRef(0),
                args: vec![Value::Num(1.0), Value::str("s")],
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
