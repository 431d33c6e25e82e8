use crate::network::Inbound;
use crate::AppError;

use super::ClientHandle;

/// Callbacks a client reports its lifecycle and traffic to.
///
/// Every callback runs on the client's own runtime. Implementations should return quickly;
/// a slow callback delays reads on the connection. Writing through the passed handle from
/// inside a callback is fine.
pub trait ClientListener: Send + Sync + 'static {
    /// First connection established.
    fn on_connected(&self, _client: &ClientHandle) {}

    /// Connection established again after it was lost.
    fn on_reconnected(&self, _client: &ClientHandle) {}

    /// Connection lost, a reconnect cycle begins.
    fn on_offline(&self, _client: &ClientHandle) {}

    /// A message arrived. Heartbeat frames are not delivered here.
    fn on_readable(&self, client: &ClientHandle, message: Inbound);

    /// The socket became writable after connecting.
    fn on_writable(&self, _client: &ClientHandle) {}

    fn on_error(&self, message: &str, cause: &AppError);

    /// The client stopped for good. Called once.
    fn on_stop(&self) {}
}
