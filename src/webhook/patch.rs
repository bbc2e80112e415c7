//! Structural diff between two JSON documents as RFC 6902 operations
//!
//! The admission pipeline works on documents as submitted, so the paths
//! emitted here are valid against the caller's object byte for byte.

use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation};
use jsonptr::{PointerBuf, Token};
use serde_json::Value;

/// An ordered list of patch operations accumulated during admission
pub type PatchList = Vec<PatchOperation>;

/// Compute the operations that transform `old` into `new`
///
/// Objects are compared key by key, arrays of equal length element by
/// element. Anything else that differs becomes a single replace of the whole
/// subtree. Applying the result to `old` yields `new` exactly.
pub fn diff(old: &Value, new: &Value) -> PatchList {
    let mut ops = PatchList::new();
    let mut path = PointerBuf::new();
    diff_at(old, new, &mut path, &mut ops);
    ops
}

fn diff_at(old: &Value, new: &Value, path: &mut PointerBuf, ops: &mut PatchList) {
    if old == new {
        return;
    }

    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                path.push_back(Token::new(key));
                match new_map.get(key) {
                    Some(new_value) => diff_at(old_value, new_value, path, ops),
                    None => ops.push(PatchOperation::Remove(RemoveOperation {
                        path: path.clone(),
                    })),
                }
                path.pop_back();
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    path.push_back(Token::new(key));
                    ops.push(PatchOperation::Add(AddOperation {
                        path: path.clone(),
                        value: new_value.clone(),
                    }));
                    path.pop_back();
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items))
            if old_items.len() == new_items.len() =>
        {
            for (index, (old_item, new_item)) in old_items.iter().zip(new_items).enumerate() {
                path.push_back(Token::new(index.to_string()));
                diff_at(old_item, new_item, path, ops);
                path.pop_back();
            }
        }
        _ => ops.push(PatchOperation::Replace(ReplaceOperation {
            path: path.clone(),
            value: new.clone(),
        })),
    }
}
