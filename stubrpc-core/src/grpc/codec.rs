//! # Protobuf Wire Codec
//!
//! Implements `tonic::codec::Codec` for `DynamicMessage`.
//!
//! Encoding is schema agnostic: any message is written in its binary form. Decoding needs
//! to know which message type the bytes hold, so the codec is bound to one
//! `MessageDescriptor`. A server decodes the method input with it and a client the method
//! output, which is why both directions share one type.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

#[derive(Debug, Clone)]
pub struct DynamicCodec {
    decode_as: MessageDescriptor,
}

impl DynamicCodec {
    /// Creates a codec decoding every inbound frame as `decode_as`.
    pub fn new(decode_as: MessageDescriptor) -> Self {
        Self { decode_as }
    }

    pub fn decodes(&self) -> &MessageDescriptor {
        &self.decode_as
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.decode_as.clone())
    }
}

/// Writes a `DynamicMessage` as protobuf bytes.
#[derive(Debug)]
pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst).map_err(|e| {
            Status::internal(format!(
                "Failed to encode '{}': {e}",
                item.descriptor().full_name()
            ))
        })
    }
}

/// Reads protobuf bytes into a `DynamicMessage` of a fixed type.
#[derive(Debug)]
pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        DynamicMessage::decode(self.0.clone(), src)
            .map(Some)
            .map_err(|e| {
                Status::internal(format!(
                    "Failed to decode Protobuf bytes as '{}': {e}",
                    self.0.full_name()
                ))
            })
    }
}
