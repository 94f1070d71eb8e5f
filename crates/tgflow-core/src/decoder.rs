//! Raw payload to [`Update`] decoding.
//!
//! The decoder looks at which variant field is present and deserializes that
//! field into its typed payload. Field presence follows the platform contract
//! loosely: a `null` value counts as absent, a second payload field only
//! produces a warning, and unrecognised fields never fail the decode.
//!
//! When no known payload is present, the update becomes
//! [`UpdateKind::Unknown`] carrying the alphabetically first non-null field
//! other than `update_id`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{DecodeError, DecodeResult};
use crate::model::{Extra, UnknownPayload, Update, UpdateKind};

const UPDATE_ID: &str = "update_id";

/// Decoder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Keep unrecognised top-level fields in [`Update::extra`].
    #[serde(default = "default_preserve_unknown")]
    pub preserve_unknown: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            preserve_unknown: default_preserve_unknown(),
        }
    }
}

fn default_preserve_unknown() -> bool {
    true
}

/// An update together with the decode diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The decoded update.
    pub update: Update,
    /// Known payload fields that lost to a field earlier in precedence order.
    pub shadowed: Vec<String>,
}

/// Converts raw payloads into typed updates.
#[derive(Debug, Clone, Default)]
pub struct UpdateDecoder {
    config: DecoderConfig,
}

impl UpdateDecoder {
    /// Creates a decoder with the given settings.
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Returns the decoder settings.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decodes one raw payload.
    pub fn decode(&self, raw: &Value) -> DecodeResult<Update> {
        self.decode_detailed(raw).map(|decoded| decoded.update)
    }

    /// Decodes one raw payload and reports shadowed payload fields.
    pub fn decode_detailed(&self, raw: &Value) -> DecodeResult<Decoded> {
        let object = raw.as_object().ok_or(DecodeError::NotAnObject)?;
        let update_id = read_update_id(object)?;

        let mut selected: Option<(&str, UpdateKind)> = None;
        let mut shadowed = Vec::new();

        for &field in UpdateKind::FIELDS {
            let Some(value) = object.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            if selected.is_some() {
                shadowed.push(field.to_string());
                continue;
            }
            match UpdateKind::from_field(field, value.clone()) {
                Some(Ok(kind)) => selected = Some((field, kind)),
                Some(Err(e)) => {
                    return Err(DecodeError::InvalidPayload {
                        update_id,
                        field: field.to_string(),
                        reason: e.to_string(),
                    });
                }
                None => {}
            }
        }

        if let Some((field, _)) = &selected
            && !shadowed.is_empty()
        {
            warn!(
                update_id,
                field = %field,
                shadowed = ?shadowed,
                "Update carries more than one payload, keeping the first"
            );
        }

        // Without a known payload, the lexicographically smallest non-null
        // field is taken, so the choice does not depend on map ordering.
        let (field, kind) = match selected {
            Some(selected) => selected,
            None => {
                let (name, value) = object
                    .iter()
                    .filter(|(name, value)| name.as_str() != UPDATE_ID && !value.is_null())
                    .min_by(|(a, _), (b, _)| a.cmp(b))
                    .ok_or(DecodeError::EmptyUpdate { update_id })?;
                debug!(update_id, field = %name, "Unrecognised update payload");
                let kind = UpdateKind::Unknown(UnknownPayload {
                    field: name.clone(),
                    value: value.clone(),
                });
                (name.as_str(), kind)
            }
        };

        let extra = if self.config.preserve_unknown {
            collect_extra(object, field)
        } else {
            Extra::new()
        };

        Ok(Decoded {
            update: Update {
                update_id,
                kind,
                extra,
            },
            shadowed,
        })
    }
}

/// Reads `update_id` without decoding the rest of the payload.
///
/// Lets callers skip past a payload that fails to decode.
pub fn peek_update_id(raw: &Value) -> Option<i64> {
    raw.get(UPDATE_ID).and_then(Value::as_i64)
}

fn read_update_id(object: &Map<String, Value>) -> DecodeResult<i64> {
    let value = object
        .get(UPDATE_ID)
        .ok_or(DecodeError::MissingField { field: UPDATE_ID })?;
    // `as_i64` rejects floats and integers beyond the i64 range.
    value.as_i64().ok_or_else(|| DecodeError::InvalidIdentifier {
        field: UPDATE_ID,
        value: value.to_string(),
    })
}

fn collect_extra(object: &Map<String, Value>, payload_field: &str) -> Extra {
    object
        .iter()
        .filter(|(name, _)| name.as_str() != UPDATE_ID && name.as_str() != payload_field)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
