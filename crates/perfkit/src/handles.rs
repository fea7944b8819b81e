//! Typed handle objects (§4.7, component H): immutable value types
//! representing Channel / Source / Plugin / Encoder / Subscription
//! identifiers bound to a `Connection`. Every method on them is a thin
//! call through the dispatcher (§4.4); calling one on a disconnected
//! connection fails with `InvalidState`.

use crate::connection::Connection;
use crate::dispatch::{AsyncCall, Completion};
use crate::rpc::{
    decode_object_path_reply, decode_string_list_reply, decode_string_reply, encode_add_subscription_args,
    encode_channel_arg, encode_no_args, object_path, ChannelState,
};
use crate::transport::Transport;
use perfkit_core::PerfkitError;
use std::sync::Arc;

/// The root `Manager` object (§6): not itself a per-identity handle, but
/// the entry point every other handle is created from.
pub struct Manager<T: Transport> {
    conn: Arc<Connection<T>>,
}

impl<T: Transport> Manager<T> {
    pub fn new(conn: Arc<Connection<T>>) -> Self {
        Manager { conn }
    }

    fn object_path(&self) -> String {
        format!("{}/Manager", self.conn.config().object_root)
    }

    fn interface(&self) -> String {
        format!("{}.Manager", self.conn.config().service_name)
    }

    /// `Manager.Ping() -> timestamp` (§6, §8 scenario 1).
    pub async fn ping(&self) -> Result<u64, PerfkitError> {
        let body = self.conn.call(self.interface(), "Ping", self.object_path(), encode_no_args()).await?;
        crate::rpc::decode_ping_reply(&body)
    }

    /// `Manager.GetPlugins() -> plugin[]`.
    pub async fn get_plugins(&self) -> Result<Vec<Plugin<T>>, PerfkitError> {
        let body = self
            .conn
            .call(self.interface(), "GetPlugins", self.object_path(), encode_no_args())
            .await?;
        decode_string_list_reply(&body)
            .map(|names| names.into_iter().map(|name| Plugin::new(self.conn.clone(), name)).collect())
    }

    /// `Manager.GetVersion() -> string`.
    pub async fn get_version(&self) -> Result<String, PerfkitError> {
        let body = self
            .conn
            .call(self.interface(), "GetVersion", self.object_path(), encode_no_args())
            .await?;
        decode_string_reply(&body)
    }

    /// `Manager.AddChannel() -> channel` (§8 scenario 2).
    pub async fn add_channel(&self) -> Result<Channel<T>, PerfkitError> {
        let body = self
            .conn
            .call(self.interface(), "AddChannel", self.object_path(), encode_no_args())
            .await?;
        let id = decode_object_path_reply(&body, &self.conn.config().object_root, "Channel")?;
        Ok(Channel::new(self.conn.clone(), id))
    }

    /// `Manager.RemoveChannel(channel) -> ok`.
    pub async fn remove_channel(&self, channel: &Channel<T>) -> Result<(), PerfkitError> {
        self.conn
            .call(self.interface(), "RemoveChannel", self.object_path(), encode_channel_arg(channel.id))
            .await?;
        Ok(())
    }

    /// `Manager.AddSubscription(buffer_size, timeout, encoder) -> subscription`.
    pub async fn add_subscription(
        &self,
        buffer_size: u32,
        timeout_ms: u32,
        encoder: u64,
    ) -> Result<Subscription<T>, PerfkitError> {
        let body = self
            .conn
            .call(
                self.interface(),
                "AddSubscription",
                self.object_path(),
                encode_add_subscription_args(buffer_size, timeout_ms, encoder),
            )
            .await?;
        let id = decode_object_path_reply(&body, &self.conn.config().object_root, "Subscription")?;
        Ok(Subscription::new(self.conn.clone(), id))
    }

    /// `Manager.RemoveSubscription(subscription) -> ok`.
    pub async fn remove_subscription(&self, subscription: &Subscription<T>) -> Result<(), PerfkitError> {
        self.conn
            .call(
                self.interface(),
                "RemoveSubscription",
                self.object_path(),
                encode_channel_arg(subscription.id),
            )
            .await?;
        self.conn.subscriptions().lock().remove(subscription.id);
        Ok(())
    }
}

macro_rules! typed_handle {
    ($name:ident, $kind:literal) => {
        #[derive(Clone)]
        pub struct $name<T: Transport> {
            conn: Arc<Connection<T>>,
            id: u64,
        }

        impl<T: Transport> $name<T> {
            pub(crate) fn new(conn: Arc<Connection<T>>, id: u64) -> Self {
                $name { conn, id }
            }

            pub fn id(&self) -> u64 {
                self.id
            }

            pub fn object_path(&self) -> String {
                object_path(&self.conn.config().object_root, $kind, self.id)
            }

            fn interface(&self) -> String {
                format!("{}.{}", self.conn.config().service_name, $kind)
            }
        }
    };
}

typed_handle!(Channel, "Channel");
typed_handle!(Source, "Source");
typed_handle!(Encoder, "Encoder");
typed_handle!(Subscription, "Subscription");

impl<T: Transport> Channel<T> {
    /// `Channel.GetArgs() -> string[]`, the blocking convenience form.
    pub async fn get_args(&self) -> Result<Vec<String>, PerfkitError> {
        let call = self.get_args_async(None).await?;
        self.get_args_finish(call).await
    }

    /// `Channel.GetArgs_async` (§8 scenario 5 uses this call as the
    /// cancellation target).
    pub async fn get_args_async(
        &self,
        completion: Option<Completion>,
    ) -> Result<AsyncCall, PerfkitError> {
        self.conn
            .call_async(self.interface(), "GetArgs", self.object_path(), encode_no_args(), completion)
            .await
    }

    /// `Channel.GetArgs_finish`.
    pub async fn get_args_finish(&self, call: AsyncCall) -> Result<Vec<String>, PerfkitError> {
        let body = self.conn.finish(call).await?;
        decode_string_list_reply(&body)
    }

    /// Cancels a call previously obtained from `get_args_async` (§4.4
    /// "Completion and cancellation").
    pub fn cancel(&self, call: &AsyncCall) {
        self.conn.cancel(call.token());
    }

    pub async fn start(&self) -> Result<(), PerfkitError> {
        self.conn.call(self.interface(), "Start", self.object_path(), encode_no_args()).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), PerfkitError> {
        self.conn.call(self.interface(), "Stop", self.object_path(), encode_no_args()).await?;
        Ok(())
    }

    pub async fn mute(&self) -> Result<(), PerfkitError> {
        self.conn.call(self.interface(), "Mute", self.object_path(), encode_no_args()).await?;
        Ok(())
    }

    pub async fn unmute(&self) -> Result<(), PerfkitError> {
        self.conn.call(self.interface(), "Unmute", self.object_path(), encode_no_args()).await?;
        Ok(())
    }

    pub async fn get_state(&self) -> Result<ChannelState, PerfkitError> {
        let body = self.conn.call(self.interface(), "GetState", self.object_path(), encode_no_args()).await?;
        let mut reader = perfkit_core::Reader::new(body);
        let (field, kind) = reader.read_tag()?;
        if field != 1 || kind != perfkit_core::WireKind::Enum {
            return Err(PerfkitError::ProtocolError("expected field 1, enum channel state".into()));
        }
        ChannelState::from_wire(reader.read_varint_u32()?)
    }
}

impl<T: Transport> Source<T> {
    pub async fn get_plugin(&self) -> Result<String, PerfkitError> {
        let body = self.conn.call(self.interface(), "GetPlugin", self.object_path(), encode_no_args()).await?;
        decode_string_reply(&body)
    }
}

impl<T: Transport> Encoder<T> {
    pub async fn get_plugin(&self) -> Result<String, PerfkitError> {
        let body = self.conn.call(self.interface(), "GetPlugin", self.object_path(), encode_no_args()).await?;
        decode_string_reply(&body)
    }
}

impl<T: Transport> Subscription<T> {
    pub async fn set_buffer(&self, timeout_ms: u32, size_bytes: u32) -> Result<(), PerfkitError> {
        let mut w = perfkit_core::Writer::new();
        w.write_tag(1, perfkit_core::WireKind::Varint);
        w.write_varint_u32(timeout_ms);
        w.write_tag(2, perfkit_core::WireKind::Varint);
        w.write_varint_u32(size_bytes);
        self.conn
            .call(self.interface(), "SetBuffer", self.object_path(), w.into_bytes())
            .await?;
        Ok(())
    }

    pub async fn add_channel(&self, channel: &Channel<T>, monitor: bool) -> Result<(), PerfkitError> {
        let mut w = perfkit_core::Writer::new();
        w.write_tag(1, perfkit_core::WireKind::Varint);
        w.write_varint_u64_value(channel.id());
        w.write_tag(2, perfkit_core::WireKind::Varint);
        w.write_varint_u32(monitor as u32);
        self.conn
            .call(self.interface(), "AddChannel", self.object_path(), w.into_bytes())
            .await?;
        Ok(())
    }

    /// Installs the callbacks invoked for deliveries routed to this
    /// subscription by the connection's subscription inbox (§4.6).
    pub fn set_callbacks(&self, callbacks: crate::subscription::SubscriptionCallbacks) {
        self.conn.subscriptions().lock().register(self.id, callbacks);
    }
}

/// A loadable agent-side unit identified by name rather than a numeric id
/// (§4.7: "an identity (`int` for most, `string` for plugins)").
#[derive(Clone)]
pub struct Plugin<T: Transport> {
    conn: Arc<Connection<T>>,
    name: String,
}

impl<T: Transport> Plugin<T> {
    pub(crate) fn new(conn: Arc<Connection<T>>, name: String) -> Self {
        Plugin { conn, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn object_path(&self) -> String {
        object_path(&self.conn.config().object_root, "Plugin", &self.name)
    }

    fn interface(&self) -> String {
        format!("{}.Plugin", self.conn.config().service_name)
    }

    pub async fn get_name(&self) -> Result<String, PerfkitError> {
        let body = self.conn.call(self.interface(), "GetName", self.object_path(), encode_no_args()).await?;
        decode_string_reply(&body)
    }

    pub async fn get_description(&self) -> Result<String, PerfkitError> {
        let body = self
            .conn
            .call(self.interface(), "GetDescription", self.object_path(), encode_no_args())
            .await?;
        decode_string_reply(&body)
    }

    /// `Plugin.CreateSource() -> source`.
    pub async fn create_source(&self) -> Result<Source<T>, PerfkitError> {
        let body = self
            .conn
            .call(self.interface(), "CreateSource", self.object_path(), encode_no_args())
            .await?;
        let id = decode_object_path_reply(&body, &self.conn.config().object_root, "Source")?;
        Ok(Source::new(self.conn.clone(), id))
    }

    /// `Plugin.CreateEncoder() -> encoder`.
    pub async fn create_encoder(&self) -> Result<Encoder<T>, PerfkitError> {
        let body = self
            .conn
            .call(self.interface(), "CreateEncoder", self.object_path(), encode_no_args())
            .await?;
        let id = decode_object_path_reply(&body, &self.conn.config().object_root, "Encoder")?;
        Ok(Encoder::new(self.conn.clone(), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::MemTransport;

    #[test]
    fn handle_object_paths_follow_the_root_kind_id_template() {
        let conn = Connection::<MemTransport>::new(ClientConfig::default());
        let channel = Channel::new(conn.clone(), 7);
        assert_eq!(channel.object_path(), "/org/perfkit/Agent/Channel/7");

        let plugin = Plugin::new(conn, "sysmon".to_string());
        assert_eq!(plugin.object_path(), "/org/perfkit/Agent/Plugin/sysmon");
    }
}
