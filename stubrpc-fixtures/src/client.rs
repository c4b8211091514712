//! A gRPC client for arbitrary methods, driven by JSON.
//!
//! Requests are built from `serde_json::Value`s against the method's descriptor and
//! responses come back as JSON too, so tests never need generated types. The client takes
//! any `GrpcService`, which lets tests pass a `BridgeServer` directly instead of a channel.
use futures_util::{Stream, StreamExt};
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use stubrpc_core::grpc::codec::DynamicCodec;
use stubrpc_core::tonic::{
    self, Request, Response, Status, client::GrpcService, metadata::MetadataMap,
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The messages and trailers of a server-streaming call.
#[derive(Debug)]
pub struct StreamedReply {
    pub messages: Vec<serde_json::Value>,
    pub trailers: Option<MetadataMap>,
}

pub struct DynamicClient<S> {
    client: tonic::client::Grpc<S>,
}

impl<S> DynamicClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = bytes::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            client: tonic::client::Grpc::new(service),
        }
    }

    /// Performs a unary call. Trailers end up in the response metadata.
    pub async fn unary(
        &mut self,
        method: &MethodDescriptor,
        payload: serde_json::Value,
        metadata: MetadataMap,
    ) -> Result<Response<serde_json::Value>, Status> {
        self.ready().await?;

        let request = with_metadata(Request::new(to_message(method, payload)?), metadata);
        let response = self
            .client
            .unary(request, path(method), DynamicCodec::new(method.output()))
            .await?;

        into_json(response)
    }

    /// Streams `payloads` in order and returns the single reply.
    pub async fn client_streaming(
        &mut self,
        method: &MethodDescriptor,
        payloads: Vec<serde_json::Value>,
        metadata: MetadataMap,
    ) -> Result<Response<serde_json::Value>, Status> {
        let messages = payloads
            .into_iter()
            .map(|payload| to_message(method, payload))
            .collect::<Result<Vec<_>, _>>()?;

        self.client_stream(method, futures_util::stream::iter(messages), metadata)
            .await
    }

    /// Like [`DynamicClient::client_streaming`], with a caller controlled stream.
    pub async fn client_stream(
        &mut self,
        method: &MethodDescriptor,
        messages: impl Stream<Item = DynamicMessage> + Send + 'static,
        metadata: MetadataMap,
    ) -> Result<Response<serde_json::Value>, Status> {
        self.ready().await?;

        let request = with_metadata(Request::new(messages), metadata);
        let response = self
            .client
            .client_streaming(request, path(method), DynamicCodec::new(method.output()))
            .await?;

        into_json(response)
    }

    /// Performs a server-streaming call and collects every message.
    pub async fn server_streaming(
        &mut self,
        method: &MethodDescriptor,
        payload: serde_json::Value,
        metadata: MetadataMap,
    ) -> Result<StreamedReply, Status> {
        self.ready().await?;

        let request = with_metadata(Request::new(to_message(method, payload)?), metadata);
        let mut stream = self
            .client
            .server_streaming(request, path(method), DynamicCodec::new(method.output()))
            .await?
            .into_inner();

        let mut messages = Vec::new();
        while let Some(message) = stream.message().await? {
            messages.push(to_json(&message)?);
        }

        Ok(StreamedReply {
            messages,
            trailers: stream.trailers().await?,
        })
    }

    /// Performs a bidirectional call, sending every payload and collecting every reply.
    pub async fn bidi(
        &mut self,
        method: &MethodDescriptor,
        payloads: Vec<serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>, Status> {
        self.ready().await?;

        let messages = payloads
            .into_iter()
            .map(|payload| to_message(method, payload))
            .collect::<Result<Vec<_>, _>>()?;

        let stream = self
            .client
            .streaming(
                Request::new(futures_util::stream::iter(messages)),
                path(method),
                DynamicCodec::new(method.output()),
            )
            .await?
            .into_inner();

        stream
            .map(|message| message.and_then(|m| to_json(&m)))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.client.ready().await.map_err(|e| {
            let e: BoxError = e.into();
            Status::unavailable(format!("client not ready: {e}"))
        })
    }
}

fn path(method: &MethodDescriptor) -> tonic::codegen::http::uri::PathAndQuery {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    path.parse()
        .unwrap_or_else(|_| panic!("'{path}' is not a valid request path"))
}

fn with_metadata<T>(mut request: Request<T>, metadata: MetadataMap) -> Request<T> {
    *request.metadata_mut() = metadata;
    request
}

fn to_message(
    method: &MethodDescriptor,
    payload: serde_json::Value,
) -> Result<DynamicMessage, Status> {
    DynamicMessage::deserialize(method.input(), payload)
        .map_err(|e| Status::invalid_argument(format!("payload does not match the schema: {e}")))
}

fn to_json(message: &DynamicMessage) -> Result<serde_json::Value, Status> {
    serde_json::to_value(message)
        .map_err(|e| Status::internal(format!("failed to map response to JSON: {e}")))
}

fn into_json(response: Response<DynamicMessage>) -> Result<Response<serde_json::Value>, Status> {
    let (metadata, message, extensions) = response.into_parts();
    Ok(Response::from_parts(metadata, to_json(&message)?, extensions))
}
