//! The admission pipeline: decode, bump generation, default, validate, patch

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use serde_json::Value;
use tracing::{debug, warn};

use super::generation::update_generation;
use super::patch::PatchList;
use super::registry::{Handler, HandlerRegistry};
use crate::{Error, Result};

/// Axum handler for POST /admit
///
/// A body that does not decode into an `AdmissionReview` is answered with
/// 400 carrying the decode error text (the `Json` extractor already answers
/// 415 for non-JSON content types). Once the envelope decodes, the answer is
/// always 200 with a review; pipeline failures surface as denials inside it,
/// not as transport errors. A review with no request at all is answered with
/// an uid-less invalid response.
pub async fn admit_handler(
    State(registry): State<Arc<HandlerRegistry>>,
    Json(body): Json<Value>,
) -> std::result::Result<Json<AdmissionReview<DynamicObject>>, (StatusCode, String)> {
    let review: AdmissionReview<DynamicObject> = serde_json::from_value(body).map_err(|e| {
        warn!(error = %e, "undecodable admission review body");
        (
            StatusCode::BAD_REQUEST,
            format!("cannot decode admission review: {e}"),
        )
    })?;
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "malformed admission review");
            return Ok(Json(AdmissionResponse::invalid(e.to_string()).into_review()));
        }
    };

    debug!(
        kind = %request.kind.kind,
        namespace = request.namespace.as_deref().unwrap_or(""),
        name = %request.name,
        operation = ?request.operation,
        user = %request.user_info.username.as_deref().unwrap_or(""),
        "admission request"
    );

    Ok(Json(admit(&registry, &request).into_review()))
}

/// Run the pipeline for one admission request
pub fn admit(
    registry: &HandlerRegistry,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    if !matches!(request.operation, Operation::Create | Operation::Update) {
        return AdmissionResponse::from(request);
    }

    let kind = request.kind.kind.as_str();
    let patches = match mutate(
        registry,
        kind,
        request.old_object.as_ref(),
        request.object.as_ref(),
    ) {
        Ok(patches) => patches,
        Err(e) => return deny(request, &e),
    };

    // An empty list still serializes, as "[]" rather than an absent patch
    match AdmissionResponse::from(request).with_patch(json_patch::Patch(patches)) {
        Ok(response) => response,
        Err(e) => deny(
            request,
            &Error::decode(format!("failed to serialize patch: {e}")),
        ),
    }
}

/// Compute the patch for a create or update of `kind`
///
/// The stored object (`old`) is absent on creation. An absent incoming
/// object (a deletion racing through as an update) yields an empty patch.
fn mutate(
    registry: &HandlerRegistry,
    kind: &str,
    old: Option<&DynamicObject>,
    new: Option<&DynamicObject>,
) -> Result<PatchList> {
    let handler = registry
        .get(kind)
        .ok_or_else(|| Error::decode(format!("unhandled kind: {kind:?}")))?;

    let Some(new) = new else {
        return Ok(PatchList::new());
    };
    let new = decode_document(handler, new, "new")?;
    let old = old
        .map(|obj| decode_document(handler, obj, "old"))
        .transpose()?;

    let mut patches = PatchList::new();
    update_generation(&mut patches, old.as_ref(), &new)
        .map_err(|e| Error::generation(e.to_string()))?;

    if let Some(defaulter) = handler.defaulter() {
        defaulter(&mut patches, &new)?;
    }
    (handler.validator())(&mut patches, old.as_ref(), &new)?;
    Ok(patches)
}

/// Serialize an embedded object back to JSON and check it against the
/// kind's schema
///
/// The raw document flows through the pipeline so that emitted patch paths
/// stay valid against the object exactly as the caller submitted it.
/// One caveat: the envelope's typed object metadata drops unrecognized
/// `metadata` keys before this check runs, so strictness covers the
/// resource's own fields but not arbitrary metadata additions.
fn decode_document(handler: &Handler, obj: &DynamicObject, role: &str) -> Result<Value> {
    let doc = serde_json::to_value(obj)?;
    handler.decode_strict(&doc, role)?;
    Ok(doc)
}

fn deny(request: &AdmissionRequest<DynamicObject>, err: &Error) -> AdmissionResponse {
    warn!(
        kind = %request.kind.kind,
        name = %request.name,
        error = %err,
        "denying admission request"
    );
    let mut response = AdmissionResponse::from(request).deny(err.to_string());
    response.result.code = 400;
    response.result.reason = "BadRequest".to_string();
    response
}
