use crate::codec::MessageCodec;
use crate::engine::{
    BridgeResponse, Fault, GRPC_STATUS_DETAILS, GRPC_STATUS_NAME, GRPC_STATUS_REASON,
};
use crate::headers::{HttpHeaders, decode_binary};
use crate::status::{StatusMapping, grpc_status_for, not_found_status, parse_code_name};
use bytes::Bytes;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::{Code, Status};
use tracing::warn;

/// Response headers that are never reflected to the client as trailers.
pub const RESERVED_RESPONSE_HEADERS: [&str; 11] = [
    GRPC_STATUS_NAME,
    GRPC_STATUS_REASON,
    GRPC_STATUS_DETAILS,
    "content-type",
    "content-length",
    "transfer-encoding",
    "te",
    "user-agent",
    "grpc-message",
    "grpc-message-type",
    "grpc-status",
];

/// How a [`BridgeResponse`] is projected onto a gRPC call.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Faulted(Fault),
    /// The stub named a gRPC status explicitly.
    Explicit {
        code: Code,
        reason: String,
        details: Option<Bytes>,
    },
    NotFound,
    Mapped(&'static StatusMapping),
    /// A non-2xx status with no entry in the status table.
    Unexpected(u16),
    Succeeded,
}

impl Decision {
    pub fn of(response: &BridgeResponse) -> Self {
        if let Some(fault) = response.fault {
            return Decision::Faulted(fault);
        }

        if let Some(explicit) = explicit_status(&response.headers) {
            return explicit;
        }

        if response.status == 404 {
            return Decision::NotFound;
        }

        if let Some(mapping) = grpc_status_for(response.status) {
            return Decision::Mapped(mapping);
        }

        if !(200..300).contains(&response.status) {
            return Decision::Unexpected(response.status);
        }

        Decision::Succeeded
    }

    /// Whether this outcome settles a client-streaming call.
    pub fn is_decisive(&self) -> bool {
        !matches!(self, Decision::NotFound)
    }

    /// The error the call ends with, `None` on success.
    pub fn into_status(self) -> Option<Status> {
        match self {
            Decision::Faulted(fault) => Some(fault.to_status()),
            Decision::Explicit {
                code,
                reason,
                details: Some(details),
            } => Some(Status::with_details(code, reason, details)),
            Decision::Explicit { code, reason, .. } => Some(Status::new(code, reason)),
            Decision::NotFound => Some(not_found_status()),
            Decision::Mapped(mapping) => Some(mapping.to_status()),
            Decision::Unexpected(http_status) => Some(Status::internal(format!(
                "Stub responded with unexpected HTTP status {http_status}"
            ))),
            Decision::Succeeded => None,
        }
    }
}

fn explicit_status(headers: &HttpHeaders) -> Option<Decision> {
    let name = headers.first(GRPC_STATUS_NAME)?;

    let code = match parse_code_name(name) {
        Some(Code::Ok) => return None,
        Some(code) => code,
        None => {
            warn!(name, "Unknown gRPC status name in stub response, using UNKNOWN");
            Code::Unknown
        }
    };

    let reason = headers
        .first(GRPC_STATUS_REASON)
        .unwrap_or_default()
        .to_string();

    let details = headers
        .first(GRPC_STATUS_DETAILS)
        .and_then(|value| match decode_binary(value) {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                warn!(error = %e, "Ignoring status details that are not base64");
                None
            }
        });

    Some(Decision::Explicit {
        code,
        reason,
        details,
    })
}

/// The response headers that are reflected as trailers.
pub fn trailers_of(response: &BridgeResponse) -> HttpHeaders {
    response
        .headers
        .iter()
        .filter(|(key, _)| {
            !RESERVED_RESPONSE_HEADERS
                .iter()
                .any(|reserved| reserved.eq_ignore_ascii_case(key))
        })
        .flat_map(|(key, values)| values.iter().map(move |value| (key, value.as_str())))
        .collect()
}

fn body_text(response: &BridgeResponse) -> Result<&str, Status> {
    std::str::from_utf8(&response.body)
        .map_err(|e| Status::internal(format!("Stub response body is not UTF-8: {e}")))
}

/// Decodes a successful body as one message. A blank body is the default message.
pub fn decode_body(
    codec: &MessageCodec,
    response: &BridgeResponse,
    output: &MessageDescriptor,
) -> Result<DynamicMessage, Status> {
    let body = body_text(response)?;

    if body.trim().is_empty() {
        return Ok(DynamicMessage::new(output.clone()));
    }

    codec
        .to_message(body, output)
        .map_err(|e| Status::internal(e.to_string()))
}

/// Decodes a successful body holding any number of messages.
pub fn decode_body_stream(
    codec: &MessageCodec,
    response: &BridgeResponse,
    output: &MessageDescriptor,
) -> Result<Vec<DynamicMessage>, Status> {
    let body = body_text(response)?;

    codec
        .to_messages(body, output)
        .map_err(|e| Status::internal(e.to_string()))
}
