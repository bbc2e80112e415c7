//! Handler registry mapping resource kinds to their admission callbacks

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::patch::PatchList;
use crate::{Error, Result};

/// Kind-specific defaulting callback
///
/// Receives the incoming document and appends patch operations that fill in
/// missing fields. Runs before validation so validators see defaulted state.
pub type Defaulter = Box<dyn Fn(&mut PatchList, &Value) -> Result<()> + Send + Sync>;

/// Kind-specific validation callback
///
/// Receives the stored document (absent on creation) and the incoming one.
/// An error denies the request with the callback's message verbatim.
pub type Validator =
    Box<dyn Fn(&mut PatchList, Option<&Value>, &Value) -> Result<()> + Send + Sync>;

/// Admission callbacks and schema check for one resource kind
pub struct Handler {
    decode: Box<dyn Fn(&Value) -> std::result::Result<(), serde_json::Error> + Send + Sync>,
    defaulter: Option<Defaulter>,
    validator: Validator,
}

impl Handler {
    /// Build a handler whose schema check decodes into `T`
    ///
    /// `T` should reject unknown fields so that typoed or unsupported fields
    /// deny the request instead of being dropped on write.
    pub fn new<T>(
        validator: impl Fn(&mut PatchList, Option<&Value>, &Value) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self
    where
        T: DeserializeOwned + 'static,
    {
        Self {
            decode: Box::new(|doc| serde_json::from_value::<T>(doc.clone()).map(|_| ())),
            defaulter: None,
            validator: Box::new(validator),
        }
    }

    /// Attach a defaulting callback
    pub fn with_defaulter(
        mut self,
        defaulter: impl Fn(&mut PatchList, &Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.defaulter = Some(Box::new(defaulter));
        self
    }

    /// Check that `doc` matches the kind's schema exactly
    ///
    /// `role` names which side of the request the document came from
    /// ("new" or "old") so denial messages identify the offender.
    pub(crate) fn decode_strict(&self, doc: &Value, role: &str) -> Result<()> {
        (self.decode)(doc)
            .map_err(|e| Error::decode(format!("cannot decode incoming {role} object: {e}")))
    }

    pub(crate) fn defaulter(&self) -> Option<&Defaulter> {
        self.defaulter.as_ref()
    }

    pub(crate) fn validator(&self) -> &Validator {
        &self.validator
    }
}

/// Immutable lookup table from kind name to handler
///
/// Built once at startup via [`HandlerRegistry::builder`] and shared across
/// request tasks behind an `Arc`.
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Start building a registry
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Look up the handler for a kind, if one is registered
    pub fn get(&self, kind: &str) -> Option<&Handler> {
        self.handlers.get(kind)
    }
}

/// Builder for [`HandlerRegistry`]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistryBuilder {
    /// Register a handler under a kind name, replacing any previous entry
    pub fn register(mut self, kind: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(kind.into(), handler);
        self
    }

    /// Finish building
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
