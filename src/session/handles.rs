//! Opaque handles handed to the front end
//!
//! A [`HandleRegistry`] maps integers to session-side descriptors. The
//! variables tree uses it for [`VariableContainer`]s, the `source` request
//! for inline source text.

use std::collections::HashMap;

use serde_json::Value;
use tracing::error;

use crate::wire::message::{Command, FrameScope};

/// First handle a registry hands out
pub const FIRST_HANDLE: i64 = 1000;

/// Integer handle → value table; handles are never reused
#[derive(Debug)]
pub struct HandleRegistry<T> {
    next_handle: i64,
    entries: HashMap<i64, T>,
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self {
            next_handle: FIRST_HANDLE,
            entries: HashMap::new(),
        }
    }
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, value: T) -> i64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.entries.insert(handle, value);
        handle
    }

    /// `None` for handles this registry never issued
    pub fn get(&self, handle: i64) -> Option<&T> {
        self.entries.get(&handle)
    }
}

// ============================================================================
// Variable containers
// ============================================================================

/// What kind of object a container's children live in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerKind {
    /// A frame's locals or globals
    Frame,
    Dict,
    List,
    Tuple,
    /// Any other object, by type name
    Object(String),
}

impl ContainerKind {
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "dict" => ContainerKind::Dict,
            "list" => ContainerKind::List,
            "tuple" => ContainerKind::Tuple,
            other => ContainerKind::Object(other.to_string()),
        }
    }
}

/// Child assignment is only expressible for frames and subscriptable
/// containers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot build an assignable expression inside a {0} container")]
pub struct UnsupportedContainer(pub String);

/// Debuggee command that lists a container's children
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerQuery {
    Frame { frame_id: i64, scope: FrameScope },
    Properties { id: Value, frame_id: i64 },
}

/// Everything needed to list or assign a container's children later
#[derive(Debug, Clone, PartialEq)]
pub struct VariableContainer {
    pub kind: ContainerKind,
    pub name: String,
    /// Expression naming this container in the debuggee
    pub key: String,
    pub query: ContainerQuery,
}

impl VariableContainer {
    /// Locals or globals of a stack frame
    pub fn frame_scope(frame_id: i64, scope: FrameScope) -> Self {
        let name = match scope {
            FrameScope::Locals => "f_locals",
            FrameScope::Globals => "f_globals",
        };
        Self {
            kind: ContainerKind::Frame,
            name: name.to_string(),
            key: String::new(),
            query: ContainerQuery::Frame { frame_id, scope },
        }
    }

    /// Expandable child `name` of type `type_name`, listed via `getProperties`
    pub fn child(&self, name: &str, type_name: &str, id: Value) -> Self {
        Self {
            kind: ContainerKind::from_type_name(type_name),
            name: name.to_string(),
            key: self.lvalue_or_none(name),
            query: ContainerQuery::Properties {
                id,
                frame_id: self.frame_id(),
            },
        }
    }

    pub fn frame_id(&self) -> i64 {
        match &self.query {
            ContainerQuery::Frame { frame_id, .. } | ContainerQuery::Properties { frame_id, .. } => *frame_id,
        }
    }

    pub fn command(&self) -> Command {
        match &self.query {
            ContainerQuery::Frame { frame_id, scope } => Command::GetFrameVariables {
                frame_id: *frame_id,
                scope: *scope,
            },
            ContainerQuery::Properties { id, frame_id } => Command::GetProperties {
                id: id.clone(),
                frame_id: *frame_id,
            },
        }
    }

    /// Assignable expression for child `name`
    pub fn lvalue(&self, name: &str) -> Result<String, UnsupportedContainer> {
        match &self.kind {
            ContainerKind::Frame => Ok(name.to_string()),
            ContainerKind::Dict | ContainerKind::List | ContainerKind::Tuple => {
                Ok(format!("{}[{}]", self.key, name))
            }
            ContainerKind::Object(type_name) => Err(UnsupportedContainer(type_name.clone())),
        }
    }

    /// [`lvalue`](Self::lvalue), or the `None` literal when there is none
    pub fn lvalue_or_none(&self, name: &str) -> String {
        self.lvalue(name).unwrap_or_else(|e| {
            error!("lvalue for '{}' in '{}': {}", name, self.name, e);
            "None".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handles_are_unique_and_start_at_1000() {
        let mut registry = HandleRegistry::new();
        let first = registry.create("a");
        let second = registry.create("b");
        assert_eq!(first, 1000);
        assert_eq!(second, 1001);
        assert_eq!(registry.get(first), Some(&"a"));
        assert_eq!(registry.get(second), Some(&"b"));
        assert_eq!(registry.get(999), None);
        assert_eq!(registry.get(5000), None);
    }

    #[test]
    fn test_frame_lvalue_is_plain_name() {
        let frame = VariableContainer::frame_scope(3, FrameScope::Locals);
        assert_eq!(frame.lvalue("x").unwrap(), "x");
        assert_eq!(frame.command(), Command::GetFrameVariables { frame_id: 3, scope: FrameScope::Locals });
    }

    #[test]
    fn test_subscript_lvalues() {
        let frame = VariableContainer::frame_scope(3, FrameScope::Locals);
        let dict = frame.child("d", "dict", json!("0x1"));
        assert_eq!(dict.key, "d");
        assert_eq!(dict.lvalue("k").unwrap(), "d[k]");
        assert_eq!(dict.command(), Command::GetProperties { id: json!("0x1"), frame_id: 3 });

        let nested = dict.child("'items'", "list", json!(7));
        assert_eq!(nested.kind, ContainerKind::List);
        assert_eq!(nested.lvalue("0").unwrap(), "d['items'][0]");
        assert_eq!(nested.frame_id(), 3);

        let tuple = frame.child("t", "tuple", json!(8));
        assert_eq!(tuple.lvalue("1").unwrap(), "t[1]");
    }

    #[test]
    fn test_object_container_falls_back_to_none() {
        let frame = VariableContainer::frame_scope(1, FrameScope::Globals);
        let object = frame.child("obj", "Widget", json!(9));
        assert_eq!(object.kind, ContainerKind::Object("Widget".to_string()));
        assert_eq!(object.lvalue("attr"), Err(UnsupportedContainer("Widget".to_string())));
        assert_eq!(object.lvalue_or_none("attr"), "None");

        let grandchild = object.child("attr", "dict", json!(10));
        assert_eq!(grandchild.key, "None");
    }
}
