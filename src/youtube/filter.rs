//! Restrict video update bodies to the fields the API accepts.
//!
//! Sending read-only fields back in an update makes the API reject the call,
//! so details obtained from a `video_details` request are trimmed to this
//! shape before being submitted.

use serde_json::{Map, Value};

use crate::value::PathValue;

enum Allowed {
  /// Copy the whole value
  Whole,
  /// Copy only these keys of a nested object
  Keys(&'static [&'static str]),
}

const UPDATABLE: &[(&str, Allowed)] = &[
  ("id", Allowed::Whole),
  (
    "snippet",
    Allowed::Keys(&[
      "title",
      "description",
      "tags",
      "categoryId",
      "defaultLanguage",
    ]),
  ),
  (
    "status",
    Allowed::Keys(&[
      "embeddable",
      "license",
      "privacyStatus",
      "publicStatsViewable",
      "publishAt",
      "selfDeclaredMadeForKids",
    ]),
  ),
  ("recordingDetails", Allowed::Keys(&["recordingDate"])),
  ("localizations", Allowed::Whole),
];

/// Keep only updatable fields of `details`.
///
/// This only makes the body well formed: any updatable field left out of
/// the body is cleared on the remote side.
pub fn filter_video_update(details: &PathValue) -> PathValue {
  let mut filtered = Map::new();

  for (key, allowed) in UPDATABLE {
    let Some(value) = details.get(key) else {
      continue;
    };

    match (allowed, value) {
      (Allowed::Whole, value) => {
        filtered.insert((*key).to_string(), value.clone());
      }
      (Allowed::Keys(keys), Value::Object(section)) => {
        let kept: Map<String, Value> = section
          .iter()
          .filter(|(name, _)| keys.iter().any(|k| *k == name.as_str()))
          .map(|(name, value)| (name.clone(), value.clone()))
          .collect();
        filtered.insert((*key).to_string(), Value::Object(kept));
      }
      // A scalar where a section is expected cannot be sent back.
      (Allowed::Keys(_), _) => {}
    }
  }

  PathValue::new(Value::Object(filtered))
}
