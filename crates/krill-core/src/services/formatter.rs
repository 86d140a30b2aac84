//! Formatters: encode rendered payloads into bytes and decode them back.

use super::codec::{Codec, JsonCodec, Payload, TextCodec, YamlCodec};
use super::{withdraw, EntityService, Scope};
use crate::error::{BuildError, FormatError};
use crate::registry::Entity;
use crate::store::Stores;
use bytes::Bytes;
use krill_types::{EntityKind, FormatterKind, FormatterSpec};
use std::sync::Arc;

pub struct Formatter {
    name: String,
    kind: FormatterKind,
    codec: Box<dyn Codec>,
}

impl Formatter {
    #[must_use]
    pub fn new(name: &str, kind: FormatterKind) -> Self {
        let codec: Box<dyn Codec> = match kind {
            FormatterKind::Json => Box::new(JsonCodec),
            FormatterKind::Yaml => Box::new(YamlCodec),
            FormatterKind::Text => Box::new(TextCodec),
        };
        Self {
            name: name.to_string(),
            kind,
            codec,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FormatterKind {
        self.kind
    }

    pub fn encode(&self, payload: &Payload) -> Result<Bytes, FormatError> {
        self.codec.encode(payload).map_err(|reason| FormatError::Encode {
            formatter: self.name.clone(),
            reason,
        })
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Payload, FormatError> {
        self.codec.decode(bytes).map_err(|reason| FormatError::Decode {
            formatter: self.name.clone(),
            reason,
        })
    }
}

impl std::fmt::Debug for Formatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Formatter")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Entity for Formatter {
    const KIND: EntityKind = EntityKind::Formatter;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct FormatterService {
    stores: Arc<Stores>,
}

impl FormatterService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for FormatterService {
    type Spec = FormatterSpec;
    type Entity = Formatter;

    fn create(&self, spec: &FormatterSpec) -> Result<Arc<Formatter>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        scope.admit(
            &self.stores.formatters,
            Arc::new(Formatter::new(&spec.name, spec.kind)),
        )
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.formatters, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_errors_name_the_formatter() {
        let formatter = Formatter::new("flat", FormatterKind::Text);
        let err = formatter.encode(&json!("scalar")).unwrap_err();
        assert!(matches!(err, FormatError::Encode { ref formatter, .. } if formatter == "flat"));

        let err = formatter.decode(b"oops").unwrap_err();
        assert!(matches!(err, FormatError::Decode { .. }));
    }

    #[test]
    fn test_create_formatter() {
        let stores = Stores::new();
        let formatter = FormatterService::new(Arc::clone(&stores))
            .create(&FormatterSpec {
                name: "json".into(),
                kind: FormatterKind::Json,
            })
            .unwrap();
        assert_eq!(formatter.kind(), FormatterKind::Json);
        assert!(stores.formatters.get("json").is_some());
    }
}
