//! Request-scoped result tree
//!
//! Slots live in one arena owned by the request and are released together
//! when the tree is rendered. Each slot knows its parent and whether it is
//! non-null, which is all null propagation needs: nulling a non-null slot
//! nulls its parent instead, repeatedly, until a nullable slot (or the
//! nullable root) absorbs the null.

use serde_json::{Map, Value};

/// Index of a slot in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

/// Execution state of the field a slot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
enum SlotValue {
    Pending,
    Null,
    Leaf(Value),
    Object(Vec<(String, SlotId)>),
    List(Vec<SlotId>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: SlotValue,
    parent: Option<SlotId>,
    non_null: bool,
    state: FieldState,
}

/// The response data of one request, under construction
#[derive(Debug, Clone)]
pub struct ResultTree {
    slots: Vec<Slot>,
}

impl Default for ResultTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultTree {
    /// A tree with an empty, nullable root object
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                value: SlotValue::Object(Vec::new()),
                parent: None,
                non_null: false,
                state: FieldState::Running,
            }],
        }
    }

    pub fn root(&self) -> SlotId {
        SlotId(0)
    }

    fn push(&mut self, parent: SlotId, non_null: bool) -> SlotId {
        let id = SlotId(self.slots.len());
        self.slots.push(Slot {
            value: SlotValue::Pending,
            parent: Some(parent),
            non_null,
            state: FieldState::Pending,
        });
        id
    }

    /// Add a pending field under an object slot, in response order
    pub fn add_field(&mut self, object: SlotId, key: String, non_null: bool) -> SlotId {
        let id = self.push(object, non_null);
        match &mut self.slots[object.0].value {
            SlotValue::Object(fields) => fields.push((key, id)),
            other => *other = SlotValue::Object(vec![(key, id)]),
        }
        id
    }

    /// Turn a slot into an (empty) object
    pub fn set_object(&mut self, slot: SlotId) {
        self.slots[slot.0].value = SlotValue::Object(Vec::new());
    }

    /// Turn a slot into a list of `len` pending items
    pub fn set_list(&mut self, slot: SlotId, len: usize, items_non_null: bool) -> Vec<SlotId> {
        let items: Vec<SlotId> = (0..len).map(|_| self.push(slot, items_non_null)).collect();
        self.slots[slot.0].value = SlotValue::List(items.clone());
        items
    }

    pub fn set_leaf(&mut self, slot: SlotId, value: Value) {
        self.slots[slot.0].value = SlotValue::Leaf(value);
    }

    pub fn set_state(&mut self, slot: SlotId, state: FieldState) {
        self.slots[slot.0].state = state;
    }

    pub fn state(&self, slot: SlotId) -> FieldState {
        self.slots[slot.0].state
    }

    /// Null a slot, propagating through non-null ancestors
    ///
    /// Returns the slot that ends up null: the nearest nullable slot at or
    /// above `slot`.
    pub fn set_null(&mut self, slot: SlotId) -> SlotId {
        let mut current = slot;
        while self.slots[current.0].non_null {
            match self.slots[current.0].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        self.slots[current.0].value = SlotValue::Null;
        current
    }

    /// Whether no ancestor of the slot has been nulled
    pub fn is_live(&self, slot: SlotId) -> bool {
        let mut current = self.slots[slot.0].parent;
        while let Some(id) = current {
            if matches!(self.slots[id.0].value, SlotValue::Null) {
                return false;
            }
            current = self.slots[id.0].parent;
        }
        true
    }

    /// Whether the data is null as a whole
    pub fn is_root_null(&self) -> bool {
        matches!(self.slots[0].value, SlotValue::Null)
    }

    /// Null every live slot still pending; returns how many were nulled
    pub fn null_pending(&mut self) -> usize {
        let mut nulled = 0;
        for index in 0..self.slots.len() {
            let id = SlotId(index);
            if matches!(self.slots[index].value, SlotValue::Pending) && self.is_live(id) {
                self.set_null(id);
                nulled += 1;
            }
        }
        nulled
    }

    /// Render the tree as JSON
    pub fn into_value(self) -> Value {
        self.render(self.root())
    }

    fn render(&self, slot: SlotId) -> Value {
        match &self.slots[slot.0].value {
            SlotValue::Pending | SlotValue::Null => Value::Null,
            SlotValue::Leaf(value) => value.clone(),
            SlotValue::Object(fields) => {
                let mut map = Map::new();
                for (key, child) in fields {
                    map.insert(key.clone(), self.render(*child));
                }
                Value::Object(map)
            }
            SlotValue::List(items) => {
                Value::Array(items.iter().map(|item| self.render(*item)).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_in_insertion_order() {
        let mut tree = ResultTree::new();
        let root = tree.root();
        let b = tree.add_field(root, "b".into(), false);
        let a = tree.add_field(root, "a".into(), false);
        tree.set_leaf(b, json!(2));
        let items = tree.set_list(a, 2, false);
        tree.set_leaf(items[0], json!("x"));
        tree.set_leaf(items[1], Value::Null);

        let rendered = serde_json::to_string(&tree.into_value()).unwrap();
        assert_eq!(rendered, r#"{"b":2,"a":["x",null]}"#);
    }

    #[test]
    fn test_null_stops_at_nearest_nullable_ancestor() {
        let mut tree = ResultTree::new();
        let root = tree.root();
        let author = tree.add_field(root, "author".into(), false);
        tree.set_object(author);
        let name = tree.add_field(author, "name".into(), true);

        assert_eq!(tree.set_null(name), author);
        assert!(!tree.is_live(name));
        assert!(tree.is_live(author));
        assert_eq!(tree.into_value(), json!({"author": null}));
    }

    #[test]
    fn test_null_bubbles_to_root() {
        // { book { title } } with Query.book: Book! and Book.title: String!
        let mut tree = ResultTree::new();
        let root = tree.root();
        let book = tree.add_field(root, "book".into(), true);
        tree.set_object(book);
        let title = tree.add_field(book, "title".into(), true);

        assert_eq!(tree.set_null(title), root);
        assert!(tree.is_root_null());
        assert_eq!(tree.into_value(), Value::Null);
    }

    #[test]
    fn test_non_null_list_item_nulls_the_list() {
        let mut tree = ResultTree::new();
        let root = tree.root();
        let books = tree.add_field(root, "books".into(), false);
        let items = tree.set_list(books, 2, true);
        tree.set_leaf(items[0], json!("ok"));
        tree.set_null(items[1]);
        assert_eq!(tree.into_value(), json!({"books": null}));
    }

    #[test]
    fn test_nullable_list_item_nulls_only_itself() {
        let mut tree = ResultTree::new();
        let root = tree.root();
        let books = tree.add_field(root, "books".into(), false);
        let items = tree.set_list(books, 2, false);
        tree.set_leaf(items[0], json!("ok"));
        tree.set_null(items[1]);
        assert_eq!(tree.into_value(), json!({"books": ["ok", null]}));
    }

    #[test]
    fn test_null_pending() {
        let mut tree = ResultTree::new();
        let root = tree.root();
        let done = tree.add_field(root, "done".into(), true);
        tree.set_leaf(done, json!(1));
        let slow = tree.add_field(root, "slow".into(), false);
        tree.set_state(slow, FieldState::Running);

        assert_eq!(tree.null_pending(), 1);
        assert_eq!(tree.state(slow), FieldState::Running);
        assert_eq!(tree.into_value(), json!({"done": 1, "slow": null}));
    }
}
