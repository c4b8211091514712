//! # Status Mapper
//!
//! Bidirectional mapping between the HTTP status codes a stub engine answers with and the
//! gRPC status codes a client observes, following
//! [the gRPC HTTP mapping](https://github.com/grpc/grpc/blob/master/doc/http-grpc-status-mapping.md).
//!
//! The table is static. Raw statuses outside of it are not dropped: the call handlers turn a
//! non-2xx status without an explicit gRPC status header into an `INTERNAL` error.
use tonic::{Code, Status};

/// Reason attached to calls that no stub mapping answered.
pub const NOT_FOUND_REASON: &str = "No matching stub mapping found for gRPC request";

/// One row of the HTTP <-> gRPC table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMapping {
    pub http_status: u16,
    pub code: Code,
    pub reason: &'static str,
    /// Whether this row is the one used when mapping `code` back to HTTP.
    canonical: bool,
}

impl StatusMapping {
    const fn new(http_status: u16, code: Code, reason: &'static str, canonical: bool) -> Self {
        Self {
            http_status,
            code,
            reason,
            canonical,
        }
    }

    /// Builds the `tonic::Status` described by this row.
    pub fn to_status(&self) -> Status {
        Status::new(self.code, self.reason)
    }
}

const MAPPINGS: [StatusMapping; 8] = [
    StatusMapping::new(400, Code::Internal, "Bad Request", true),
    StatusMapping::new(
        401,
        Code::Unauthenticated,
        "You are not authorized to access this resource",
        true,
    ),
    StatusMapping::new(
        403,
        Code::PermissionDenied,
        "You are not authorized to access this resource",
        true,
    ),
    StatusMapping::new(404, Code::Unimplemented, NOT_FOUND_REASON, true),
    StatusMapping::new(429, Code::Unavailable, "Too many requests", false),
    StatusMapping::new(502, Code::Unavailable, "Bad Gateway", false),
    StatusMapping::new(503, Code::Unavailable, "Service Unavailable", true),
    StatusMapping::new(504, Code::Unavailable, "Gateway Timeout", false),
];

/// Returns every row of the table, in ascending HTTP status order.
pub fn mappings() -> &'static [StatusMapping] {
    &MAPPINGS
}

/// Looks up the gRPC status for a raw HTTP status.
pub fn grpc_status_for(http_status: u16) -> Option<&'static StatusMapping> {
    MAPPINGS.iter().find(|m| m.http_status == http_status)
}

/// Maps a gRPC code back to the HTTP status a stub response would carry for it.
///
/// `OK` maps to `200`, codes without a canonical row map to `500`.
pub fn http_status_for(code: Code) -> u16 {
    if code == Code::Ok {
        return 200;
    }

    MAPPINGS
        .iter()
        .find(|m| m.canonical && m.code == code)
        .map(|m| m.http_status)
        .unwrap_or(500)
}

/// The status every call resolves to when no stub mapping matched it.
pub fn not_found_status() -> Status {
    Status::unimplemented(NOT_FOUND_REASON)
}

const CODE_NAMES: [(Code, &str); 17] = [
    (Code::Ok, "OK"),
    (Code::Cancelled, "CANCELLED"),
    (Code::Unknown, "UNKNOWN"),
    (Code::InvalidArgument, "INVALID_ARGUMENT"),
    (Code::DeadlineExceeded, "DEADLINE_EXCEEDED"),
    (Code::NotFound, "NOT_FOUND"),
    (Code::AlreadyExists, "ALREADY_EXISTS"),
    (Code::PermissionDenied, "PERMISSION_DENIED"),
    (Code::ResourceExhausted, "RESOURCE_EXHAUSTED"),
    (Code::FailedPrecondition, "FAILED_PRECONDITION"),
    (Code::Aborted, "ABORTED"),
    (Code::OutOfRange, "OUT_OF_RANGE"),
    (Code::Unimplemented, "UNIMPLEMENTED"),
    (Code::Internal, "INTERNAL"),
    (Code::Unavailable, "UNAVAILABLE"),
    (Code::DataLoss, "DATA_LOSS"),
    (Code::Unauthenticated, "UNAUTHENTICATED"),
];

/// Canonical upper-case name of a code (e.g. `FAILED_PRECONDITION`).
pub fn code_name(code: Code) -> &'static str {
    CODE_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or("UNKNOWN")
}

/// Parses a canonical status name, ignoring ASCII case and surrounding whitespace.
pub fn parse_code_name(name: &str) -> Option<Code> {
    let name = name.trim();
    CODE_NAMES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(code, _)| *code)
}
