//! Schema codec: wire JSON <-> typed actions and observations
//!
//! Decoding validates through serde's typed deserialization and reports
//! failures as [`SchemaError`] with the offending field path. Encoding turns
//! any serializable observation into the interoperable step response shape
//! `{observation: {...}, reward, done}`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

use crate::action::WireAction;
use crate::error::SchemaError;

/// Decoder for one variant of a discriminated union, given the payload minus its tag
pub type VariantDecoder<T> = fn(serde_json::Value) -> Result<T, SchemaError>;

/// `tag -> decoder` registry for a discriminated union
pub struct UnionDecoder<T> {
    tag_field: &'static str,
    default_tag: Option<&'static str>,
    decoders: HashMap<&'static str, VariantDecoder<T>>,
}

impl<T> UnionDecoder<T> {
    pub fn new(tag_field: &'static str) -> Self {
        Self {
            tag_field,
            default_tag: None,
            decoders: HashMap::new(),
        }
    }

    /// Register a variant decoder
    pub fn variant(mut self, tag: &'static str, decoder: VariantDecoder<T>) -> Self {
        self.decoders.insert(tag, decoder);
        self
    }

    /// Variant assumed when the discriminator is absent
    pub fn with_default(mut self, tag: &'static str) -> Self {
        self.default_tag = Some(tag);
        self
    }

    /// Registered discriminator values
    pub fn tags(&self) -> impl Iterator<Item = &&'static str> {
        self.decoders.keys()
    }

    pub fn decode(&self, raw: serde_json::Value) -> Result<T, SchemaError> {
        let serde_json::Value::Object(mut fields) = raw else {
            return Err(SchemaError::invalid("$", "expected a JSON object"));
        };

        let tag = match fields.remove(self.tag_field) {
            Some(serde_json::Value::String(tag)) => tag,
            Some(other) => {
                return Err(SchemaError::invalid(
                    self.tag_field,
                    format!("discriminator must be a string, got {}", other),
                ));
            }
            None => match self.default_tag {
                Some(tag) => tag.to_string(),
                None => return Err(SchemaError::missing_field(self.tag_field)),
            },
        };

        let decoder = self
            .decoders
            .get(tag.as_str())
            .ok_or_else(|| SchemaError::unknown_variant(self.tag_field, &tag))?;
        decoder(serde_json::Value::Object(fields))
    }
}

/// Validate a payload directly against a non-union type
pub fn decode_plain<T: DeserializeOwned>(raw: serde_json::Value) -> Result<T, SchemaError> {
    serde_json::from_value(raw).map_err(SchemaError::from)
}

/// Decode an action payload as the declared action type
pub fn decode_action<A: WireAction>(raw: serde_json::Value) -> Result<A, SchemaError> {
    A::decode(raw)
}

/// Encode an observation into the step response wire shape
///
/// `done` is required; `reward` defaults to `null`. Metadata stays inside the
/// observation body and is dropped when empty.
pub fn encode_observation<O: Serialize>(obs: &O) -> Result<serde_json::Value, SchemaError> {
    let serde_json::Value::Object(mut fields) =
        serde_json::to_value(obs).map_err(SchemaError::from)?
    else {
        return Err(SchemaError::invalid(
            "$",
            "observation must serialize to a JSON object",
        ));
    };

    let done = match fields.remove("done") {
        Some(serde_json::Value::Bool(done)) => done,
        Some(other) => {
            return Err(SchemaError::invalid(
                "done",
                format!("expected a boolean, got {}", other),
            ));
        }
        None => return Err(SchemaError::missing_field("done")),
    };

    let reward = match fields.remove("reward") {
        None | Some(serde_json::Value::Null) => serde_json::Value::Null,
        Some(serde_json::Value::Number(n)) => serde_json::Value::Number(n),
        Some(other) => {
            return Err(SchemaError::invalid(
                "reward",
                format!("expected a number or null, got {}", other),
            ));
        }
    };

    match fields.remove("metadata") {
        Some(serde_json::Value::Object(meta)) if !meta.is_empty() => {
            fields.insert("metadata".into(), serde_json::Value::Object(meta));
        }
        _ => {}
    }

    Ok(serde_json::json!({
        "observation": serde_json::Value::Object(fields),
        "reward": reward,
        "done": done,
    }))
}
