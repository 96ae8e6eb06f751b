use async_trait::async_trait;
use russh::{Channel, ChannelStream, client};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use crate::session::SharedSessionHandle;

// Internal Result type alias for convenience
type Result<T> = crate::SshResult<T>;

/// Trait for streams that can be used for forwarding.
pub trait ForwardStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type alias for boxed forward streams.
pub type ForwardStream = Box<dyn ForwardStreamIo>;

/// Transport able to open `direct-tcpip` channels and drop server listeners.
#[async_trait]
pub trait ForwardSession: Clone + Send + Sync + 'static {
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> Result<ForwardStream>;

    async fn cancel_tcpip_forwarding(&self, bind_address: String, port: u32) -> Result<()>;
}

/// Server-initiated channel carrying one forwarded connection.
#[async_trait]
pub trait RemoteForwardChannel: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    fn into_stream(self) -> Self::Stream;
    async fn close(self) -> Result<()>;
}

/// One `forwarded-tcpip` channel as announced by the server.
pub struct ForwardedConnection<C> {
    pub channel: C,
    pub connected_address: String,
    pub connected_port: u32,
    pub originator_address: String,
    pub originator_port: u32,
}

/// Listener the server opened for us; channels arrive on `incoming`.
///
/// The stream ends once the transport goes away.
pub struct RemoteListener<C> {
    pub bind_address: String,
    /// Port reported by the server, `0` when it kept the requested one.
    pub bound_port: u32,
    pub incoming: mpsc::UnboundedReceiver<ForwardedConnection<C>>,
}

/// Trait for registering remote forwards with the server.
#[async_trait]
pub trait RemoteRegistrar {
    type Channel: RemoteForwardChannel;

    async fn request_tcpip_forward(
        &mut self,
        bind_address: String,
        bind_port: u16,
    ) -> Result<RemoteListener<Self::Channel>>;
}

// Trait implementations for russh types

#[async_trait]
impl<H> ForwardSession for SharedSessionHandle<H>
where
    H: client::Handler + Send + Sync + 'static,
{
    async fn open_direct_tcpip(
        &self,
        target_host: String,
        target_port: u16,
        origin_host: String,
        origin_port: u16,
    ) -> Result<ForwardStream> {
        let channel = self
            .as_ref()
            .channel_open_direct_tcpip(target_host, target_port.into(), origin_host, origin_port.into())
            .await?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn cancel_tcpip_forwarding(&self, bind_address: String, port: u32) -> Result<()> {
        self.as_ref().cancel_tcpip_forward(bind_address, port).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteForwardChannel for Channel<client::Msg> {
    type Stream = ChannelStream<client::Msg>;

    fn into_stream(self) -> Self::Stream {
        Channel::into_stream(self)
    }

    async fn close(self) -> Result<()> {
        Channel::close(&self).await?;
        Ok(())
    }
}
