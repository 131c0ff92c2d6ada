use rpc_calls::{Deadline, RequestStream};
use thiserror::Error;
use tonic::client::Grpc;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status, Streaming};
use tonic_prost::ProstCodec;
use tracing::debug;

use crate::config::ClientConfig;

/// Errors that can occur while establishing a channel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChannelError {
    #[error("invalid server address '{addr}'")]
    InvalidAddress {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("failed to connect to '{addr}'")]
    Connect {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },
}

/// An established connection to one endpoint.
///
/// Cheap to clone; every clone multiplexes calls over the same connection.
/// Calls never mutate it, and a failed call leaves it usable.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    channel: Channel,
    addr: String,
}

impl ChannelHandle {
    /// Connect eagerly, failing if the endpoint cannot be reached.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ChannelError> {
        let endpoint = Self::endpoint(config)?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|source| ChannelError::Connect {
                addr: config.addr.clone(),
                source,
            })?;

        debug!(addr = %config.addr, "Channel connected");
        Ok(Self {
            channel,
            addr: config.addr.clone(),
        })
    }

    /// Connect on first use. Connection failures surface on the first call.
    pub fn connect_lazy(config: &ClientConfig) -> Result<Self, ChannelError> {
        let channel = Self::endpoint(config)?.connect_lazy();
        Ok(Self {
            channel,
            addr: config.addr.clone(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn endpoint(config: &ClientConfig) -> Result<Endpoint, ChannelError> {
        let endpoint = Endpoint::from_shared(config.endpoint_uri()).map_err(|source| {
            ChannelError::InvalidAddress {
                addr: config.addr.clone(),
                source,
            }
        })?;
        Ok(endpoint.connect_timeout(config.connect_timeout))
    }

    async fn ready(&self) -> Result<Grpc<Channel>, Status> {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;
        Ok(grpc)
    }

    pub async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        request: Req,
        deadline: Deadline,
    ) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let response = grpc
            .unary(
                deadline.apply(Request::new(request)),
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await?;
        Ok(response.into_inner())
    }

    pub async fn server_streaming<Req, Resp>(
        &self,
        path: &'static str,
        request: Req,
        deadline: Deadline,
    ) -> Result<Streaming<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let response = grpc
            .server_streaming(
                deadline.apply(Request::new(request)),
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await?;
        Ok(response.into_inner())
    }

    /// Stream `requests` and read the single reply. `None` if the endpoint
    /// finished the call cleanly without one.
    pub async fn client_streaming<Req, Resp>(
        &self,
        path: &'static str,
        requests: RequestStream<Req>,
        deadline: Deadline,
    ) -> Result<Option<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut inbound = self.streaming::<Req, Resp>(path, requests, deadline).await?;
        let message = inbound.message().await?;
        if message.is_some() {
            // Surface a failure status sent after the reply.
            inbound.trailers().await?;
        }
        Ok(message)
    }

    pub async fn streaming<Req, Resp>(
        &self,
        path: &'static str,
        requests: RequestStream<Req>,
        deadline: Deadline,
    ) -> Result<Streaming<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let response = grpc
            .streaming(
                deadline.apply(Request::new(requests)),
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await?;
        Ok(response.into_inner())
    }
}
