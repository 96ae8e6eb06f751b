use russh::{
    Disconnect,
    client::{self, Handle},
};
use std::sync::Arc;
use tracing::debug;

pub type SessionHandle<H> = Handle<H>;
pub type SharedSessionHandle<H> = Arc<Handle<H>>;

/// Politely close the transport; errors only mean it is already gone.
pub async fn disconnect<H>(session: &SessionHandle<H>)
where
    H: client::Handler + Send,
{
    if let Err(err) = session.disconnect(Disconnect::ByApplication, "", "").await {
        debug!(?err, "disconnect on closed transport");
    }
}
