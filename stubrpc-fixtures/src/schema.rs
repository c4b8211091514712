//! Proto schemas used across the integration tests, built in code.
//!
//! ```proto
//! // greet.proto
//! package com.example.grpc;
//! import "google/protobuf/empty.proto";
//!
//! message HelloRequest { string name = 1; }
//! message HelloResponse { string greeting = 1; }
//!
//! service GreetingService {
//!   rpc greeting(HelloRequest) returns (HelloResponse);
//!   rpc manyGreetingsOneReply(stream HelloRequest) returns (HelloResponse);
//!   rpc oneGreetingManyReplies(HelloRequest) returns (stream HelloResponse);
//!   rpc oneGreetingEmptyReply(HelloRequest) returns (google.protobuf.Empty);
//!   rpc chat(stream HelloRequest) returns (stream HelloResponse);
//! }
//!
//! // booking.proto
//! package com.example.grpc.booking;
//!
//! message BookingRequest { string id = 1; }
//! message BookingResponse { string id = 1; string created = 2; string user_id = 3; }
//!
//! service BookingService { rpc booking(BookingRequest) returns (BookingResponse); }
//!
//! // envelope.proto
//! package com.example.grpc.envelope;
//! import "google/protobuf/any.proto";
//!
//! message Envelope { string label = 1; google.protobuf.Any payload = 2; }
//!
//! service EnvelopeService { rpc wrap(Envelope) returns (Envelope); }
//! ```
use prost::Message;
use prost_reflect::{DescriptorPool, MethodDescriptor};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
    field_descriptor_proto::{Label, Type},
};

pub const GREETING_SERVICE: &str = "com.example.grpc.GreetingService";
pub const BOOKING_SERVICE: &str = "com.example.grpc.booking.BookingService";
pub const ENVELOPE_SERVICE: &str = "com.example.grpc.envelope.EnvelopeService";

fn field(
    name: &str,
    number: i32,
    json_name: &str,
    kind: Type,
    type_name: Option<&str>,
) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        json_name: Some(json_name.to_string()),
        label: Some(Label::Optional as i32),
        r#type: Some(kind as i32),
        type_name: type_name.map(str::to_string),
        ..Default::default()
    }
}

fn string_field(name: &str, number: i32, json_name: &str) -> FieldDescriptorProto {
    field(name, number, json_name, Type::String, None)
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

fn rpc(
    name: &str,
    input: &str,
    output: &str,
    client_streaming: bool,
    server_streaming: bool,
) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(input.to_string()),
        output_type: Some(output.to_string()),
        client_streaming: Some(client_streaming),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}

fn file(
    name: &str,
    package: &str,
    dependency: &[&str],
    message_type: Vec<DescriptorProto>,
    service: ServiceDescriptorProto,
) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: Some(package.to_string()),
        dependency: dependency.iter().map(|d| d.to_string()).collect(),
        message_type,
        service: vec![service],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

pub fn greeting_file() -> FileDescriptorProto {
    let request = ".com.example.grpc.HelloRequest";
    let response = ".com.example.grpc.HelloResponse";

    file(
        "greet.proto",
        "com.example.grpc",
        &["google/protobuf/empty.proto"],
        vec![
            message("HelloRequest", vec![string_field("name", 1, "name")]),
            message("HelloResponse", vec![string_field("greeting", 1, "greeting")]),
        ],
        ServiceDescriptorProto {
            name: Some("GreetingService".to_string()),
            method: vec![
                rpc("greeting", request, response, false, false),
                rpc("manyGreetingsOneReply", request, response, true, false),
                rpc("oneGreetingManyReplies", request, response, false, true),
                rpc(
                    "oneGreetingEmptyReply",
                    request,
                    ".google.protobuf.Empty",
                    false,
                    false,
                ),
                rpc("chat", request, response, true, true),
            ],
            ..Default::default()
        },
    )
}

pub fn booking_file() -> FileDescriptorProto {
    file(
        "booking.proto",
        "com.example.grpc.booking",
        &[],
        vec![
            message("BookingRequest", vec![string_field("id", 1, "id")]),
            message(
                "BookingResponse",
                vec![
                    string_field("id", 1, "id"),
                    string_field("created", 2, "created"),
                    string_field("user_id", 3, "userId"),
                ],
            ),
        ],
        ServiceDescriptorProto {
            name: Some("BookingService".to_string()),
            method: vec![rpc(
                "booking",
                ".com.example.grpc.booking.BookingRequest",
                ".com.example.grpc.booking.BookingResponse",
                false,
                false,
            )],
            ..Default::default()
        },
    )
}

pub fn envelope_file() -> FileDescriptorProto {
    let envelope = ".com.example.grpc.envelope.Envelope";

    file(
        "envelope.proto",
        "com.example.grpc.envelope",
        &["google/protobuf/any.proto"],
        vec![message(
            "Envelope",
            vec![
                string_field("label", 1, "label"),
                field("payload", 2, "payload", Type::Message, Some(".google.protobuf.Any")),
            ],
        )],
        ServiceDescriptorProto {
            name: Some("EnvelopeService".to_string()),
            method: vec![rpc("wrap", envelope, envelope, false, false)],
            ..Default::default()
        },
    )
}

/// Encodes files as a `FileDescriptorSet`, the format of `.dsc` blobs.
pub fn encode_set(files: Vec<FileDescriptorProto>) -> Vec<u8> {
    FileDescriptorSet { file: files }.encode_to_vec()
}

pub fn greeting_set() -> Vec<u8> {
    encode_set(vec![greeting_file()])
}

pub fn booking_set() -> Vec<u8> {
    encode_set(vec![booking_file()])
}

pub fn envelope_set() -> Vec<u8> {
    encode_set(vec![envelope_file()])
}

/// A client side pool holding every fixture schema.
pub fn client_pool() -> DescriptorPool {
    let mut pool = DescriptorPool::global();
    for file in [greeting_file(), booking_file(), envelope_file()] {
        if let Err(e) = pool.add_file_descriptor_proto(file) {
            panic!("fixture schema does not link: {e}");
        }
    }
    pool
}

/// Looks up a method of the fixture schemas.
pub fn method(service: &str, name: &str) -> MethodDescriptor {
    client_pool()
        .get_service_by_name(service)
        .and_then(|service| service.methods().find(|m| m.name() == name))
        .unwrap_or_else(|| panic!("no method {service}/{name} in the fixture schemas"))
}
