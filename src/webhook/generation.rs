//! Spec generation bookkeeping
//!
//! Every resource spec carries a `generation` counter the webhook maintains:
//! it is bumped exactly when the spec meaningfully changes, so controllers
//! can cheaply tell a real edit from a status-only or no-op update.

use json_patch::{AddOperation, PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use serde_json::Value;

use super::patch::{diff, PatchList};
use crate::{Error, Result};

/// JSON pointer to the generation counter within a resource document
pub(crate) fn generation_path() -> PointerBuf {
    PointerBuf::from_tokens(["spec", "generation"])
}

fn spec_of(doc: &Value) -> Result<&Value> {
    doc.get("spec")
        .ok_or_else(|| Error::shape("resource document has no spec field"))
}

fn generation_of(spec: &Value) -> i64 {
    spec.get("generation").and_then(Value::as_i64).unwrap_or(0)
}

/// Append the generation operation an update warrants, if any
///
/// A creation (`old` is `None`) initializes the counter to 1. An update bumps
/// it only when the spec sub-documents differ structurally, and the emitted
/// value always derives from the stored object. The operation is `add` when
/// the incoming document carries no generation yet and `replace` when it
/// does.
pub fn update_generation(
    patches: &mut PatchList,
    old: Option<&Value>,
    new: &Value,
) -> Result<()> {
    let new_spec = spec_of(new)?;

    let Some(old) = old else {
        patches.push(PatchOperation::Add(AddOperation {
            path: generation_path(),
            value: Value::from(1),
        }));
        return Ok(());
    };

    let old_spec = spec_of(old)?;
    if diff(old_spec, new_spec).is_empty() {
        return Ok(());
    }

    let next = generation_of(old_spec) + 1;
    let op = if generation_of(new_spec) == 0 {
        PatchOperation::Add(AddOperation {
            path: generation_path(),
            value: Value::from(next),
        })
    } else {
        PatchOperation::Replace(ReplaceOperation {
            path: generation_path(),
            value: Value::from(next),
        })
    };
    patches.push(op);
    Ok(())
}
