//! # Message Codec
//!
//! Converts between `DynamicMessage`s and their proto3 JSON form.
//!
//! All conversions of one schema generation share a single [`TypeRegistry`]. Message
//! descriptors handed to [`MessageCodec::to_message`] are re-resolved by full name in that
//! registry, so `google.protobuf.Any` payloads pointing at any type of the schema resolve,
//! no matter which pool the caller's descriptor came from.
use prost_reflect::{
    DescriptorPool, DeserializeOptions, DynamicMessage, MessageDescriptor, ReflectMessage,
    SerializeOptions,
};

#[derive(Debug, thiserror::Error)]
pub enum MessageConversionError {
    #[error("Invalid JSON for message '{message}': {source}")]
    InvalidJson {
        message: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to render message '{message}' as JSON: {source}")]
    Render {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The set of message types JSON conversion can resolve, including `Any` payloads.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    pool: DescriptorPool,
}

impl TypeRegistry {
    pub fn new(pool: DescriptorPool) -> Self {
        Self { pool }
    }

    /// A registry holding only the protobuf well-known types.
    pub fn well_known() -> Self {
        Self::new(DescriptorPool::global())
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn resolve(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }
}

/// JSON <-> protobuf conversion bound to one [`TypeRegistry`].
#[derive(Debug, Clone)]
pub struct MessageCodec {
    registry: TypeRegistry,
}

impl MessageCodec {
    pub fn new(registry: TypeRegistry) -> Self {
        Self { registry }
    }

    pub fn well_known() -> Self {
        Self::new(TypeRegistry::well_known())
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Renders `message` as proto3 JSON with lowerCamelCase names and defaults omitted.
    pub fn to_json(&self, message: &DynamicMessage) -> Result<String, MessageConversionError> {
        let mut out = Vec::new();
        let mut serializer = serde_json::Serializer::new(&mut out);

        message
            .serialize_with_options(&mut serializer, &serialize_options())
            .map_err(|source| MessageConversionError::Render {
                message: message.descriptor().full_name().to_string(),
                source,
            })?;

        // serde_json only ever writes UTF-8.
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Parses one message of type `target` from `json`.
    pub fn to_message(
        &self,
        json: &str,
        target: &MessageDescriptor,
    ) -> Result<DynamicMessage, MessageConversionError> {
        let descriptor = self.resolve(target);
        let invalid = |source| MessageConversionError::InvalidJson {
            message: descriptor.full_name().to_string(),
            source,
        };

        let mut deserializer = serde_json::Deserializer::from_str(json);
        let message = DynamicMessage::deserialize_with_options(
            descriptor.clone(),
            &mut deserializer,
            &deserialize_options(),
        )
        .map_err(invalid)?;
        deserializer.end().map_err(invalid)?;

        Ok(message)
    }

    /// Parses every whitespace separated JSON value in `json` as a message of type `target`.
    pub fn to_messages(
        &self,
        json: &str,
        target: &MessageDescriptor,
    ) -> Result<Vec<DynamicMessage>, MessageConversionError> {
        let descriptor = self.resolve(target);
        let invalid = |source| MessageConversionError::InvalidJson {
            message: descriptor.full_name().to_string(),
            source,
        };

        serde_json::Deserializer::from_str(json)
            .into_iter::<serde_json::Value>()
            .map(|value| {
                let value = value.map_err(invalid)?;
                DynamicMessage::deserialize_with_options(
                    descriptor.clone(),
                    value,
                    &deserialize_options(),
                )
                .map_err(invalid)
            })
            .collect()
    }

    fn resolve(&self, target: &MessageDescriptor) -> MessageDescriptor {
        self.registry
            .resolve(target.full_name())
            .unwrap_or_else(|| target.clone())
    }
}

fn serialize_options() -> SerializeOptions {
    SerializeOptions::new()
        .skip_default_fields(true)
        .use_proto_field_name(false)
}

fn deserialize_options() -> DeserializeOptions {
    DeserializeOptions::new().deny_unknown_fields(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_reflect::Value;

    #[test]
    fn well_known_empty_round_trips_without_schema() {
        let codec = MessageCodec::well_known();
        let empty = codec.registry().resolve("google.protobuf.Empty").unwrap();

        let message = DynamicMessage::new(empty.clone());
        let json = codec.to_json(&message).unwrap();
        assert_eq!(json, "{}");
        assert_eq!(codec.to_message(&json, &empty).unwrap(), message);
    }

    #[test]
    fn invalid_json_carries_the_parser_diagnostic() {
        let codec = MessageCodec::well_known();
        let duration = codec.registry().resolve("google.protobuf.Duration").unwrap();

        let err = codec.to_message("{not json", &duration).unwrap_err();
        assert!(matches!(err, MessageConversionError::InvalidJson { .. }));
        assert!(err.to_string().contains("google.protobuf.Duration"));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let codec = MessageCodec::well_known();
        let empty = codec.registry().resolve("google.protobuf.Empty").unwrap();

        assert!(codec.to_message("{} {}", &empty).is_err());
    }

    #[test]
    fn a_sequence_of_values_yields_one_message_each() {
        let codec = MessageCodec::well_known();
        let wrapper = codec.registry().resolve("google.protobuf.StringValue").unwrap();

        let messages = codec
            .to_messages("\"a\"\n\"b\"  \"c\"\n", &wrapper)
            .unwrap();

        let values: Vec<_> = messages
            .iter()
            .map(|m| m.get_field_by_name("value").unwrap().into_owned())
            .collect();
        assert_eq!(
            values,
            [
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into())
            ]
        );
        assert!(codec.to_messages("   ", &wrapper).unwrap().is_empty());
    }

    #[test]
    fn nested_any_round_trips_through_the_schema_registry() {
        use crate::descriptor::{RawDescriptorSets, SchemaSource};
        use stubrpc_fixtures::schema::{envelope_set, greeting_set};

        let schema = RawDescriptorSets::new([greeting_set(), envelope_set()])
            .load()
            .unwrap();
        let codec = MessageCodec::new(TypeRegistry::new(schema.pool().clone()));
        let envelope = codec
            .registry()
            .resolve("com.example.grpc.envelope.Envelope")
            .unwrap();

        let json = r#"{
            "label": "wrapped",
            "payload": {
                "@type": "type.googleapis.com/com.example.grpc.HelloRequest",
                "name": "Tom"
            }
        }"#;

        let message = codec.to_message(json, &envelope).unwrap();
        let rendered = codec.to_json(&message).unwrap();
        assert!(rendered.contains(r#""@type":"type.googleapis.com/com.example.grpc.HelloRequest""#));

        let back = codec.to_message(&rendered, &envelope).unwrap();
        assert_eq!(back, message);
    }
}
