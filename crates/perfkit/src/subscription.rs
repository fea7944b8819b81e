//! The subscription inbox (§4.6, component G): routes inbound frames by
//! the subscription id embedded in their object path, decodes manifests
//! and samples, and invokes per-subscription callbacks.

use bytes::Bytes;
use perfkit_core::{Manifest, PerfkitError, Reader, Resolver, Sample};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type ManifestCallback = Box<dyn Fn(Arc<Manifest>) + Send + Sync>;
type SampleCallback = Box<dyn Fn(Sample) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(PerfkitError) + Send + Sync>;

/// User callbacks installed for one subscription.
#[derive(Default)]
pub struct SubscriptionCallbacks {
    pub on_manifest: Option<ManifestCallback>,
    pub on_sample: Option<SampleCallback>,
    pub on_error: Option<ErrorCallback>,
}

/// Demultiplexes inbound frames to the subscription they target.
pub struct SubscriptionInbox {
    object_root: String,
    subscriptions: HashMap<u64, SubscriptionCallbacks>,
}

impl SubscriptionInbox {
    pub fn new(object_root: String) -> Self {
        SubscriptionInbox { object_root, subscriptions: HashMap::new() }
    }

    pub fn register(&mut self, id: u64, callbacks: SubscriptionCallbacks) {
        self.subscriptions.insert(id, callbacks);
    }

    pub fn remove(&mut self, id: u64) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    /// Parses `<root>/Subscription/<id>`; paths not matching this prefix
    /// are ignored (§4.6 step 1).
    pub fn parse_subscription_id(&self, object_path: &str) -> Option<u64> {
        let prefix = format!("{}/Subscription/", self.object_root);
        object_path.strip_prefix(&prefix)?.parse().ok()
    }

    /// Routes one inbound frame. Decode failures go to the subscription's
    /// error callback, if installed, and the frame is dropped without
    /// tearing down the connection (§4.6 step 5).
    pub fn dispatch(&self, object_path: &str, member: &str, body: Bytes, resolver: &mut Resolver) {
        let Some(id) = self.parse_subscription_id(object_path) else {
            debug!(object_path, "inbound frame does not match a subscription path, ignoring");
            return;
        };
        let Some(callbacks) = self.subscriptions.get(&id) else {
            debug!(id, "inbound frame for unknown subscription id, ignoring");
            return;
        };

        match member {
            "Manifest" => match Manifest::decode(&mut Reader::new(body)) {
                Ok(manifest) => {
                    let handle = resolver.insert(manifest);
                    if let Some(cb) = &callbacks.on_manifest {
                        cb(handle);
                    }
                }
                Err(err) => {
                    if let Some(cb) = &callbacks.on_error {
                        cb(err);
                    }
                }
            },
            "Sample" => match Sample::decode(&mut Reader::new(body), resolver) {
                Ok(sample) => {
                    if let Some(cb) = &callbacks.on_sample {
                        cb(sample);
                    }
                }
                Err(err) => {
                    if let Some(cb) = &callbacks.on_error {
                        cb(err);
                    }
                }
            },
            other => {
                debug!(method = other, "unrecognized subscription delivery kind, ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfkit_core::{WireKind, Writer};
    use std::sync::Mutex;

    fn manifest_frame(source_id: u64) -> Bytes {
        let mut w = Writer::new();
        w.write_tag(1, WireKind::Fixed64);
        w.write_fixed64(1_000_000u64.to_le_bytes());
        w.write_tag(2, WireKind::Enum);
        w.write_varint_u32(0);
        w.write_tag(3, WireKind::Varint);
        w.write_varint_u64_value(source_id);
        w.write_tag(4, WireKind::Repeated);
        w.write_bytes(&[]);
        w.into_bytes()
    }

    #[test]
    fn unmatched_path_is_ignored_without_error_callback() {
        let mut resolver = Resolver::new();
        let inbox = SubscriptionInbox::new("/org/perfkit/Agent".into());
        inbox.dispatch("/org/perfkit/Agent/Channel/1", "Manifest", manifest_frame(1), &mut resolver);
        assert!(resolver.lookup(1).is_none());
    }

    #[test]
    fn manifest_delivery_inserts_into_resolver_and_invokes_callback() {
        let mut resolver = Resolver::new();
        let mut inbox = SubscriptionInbox::new("/org/perfkit/Agent".into());

        let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
        let seen_clone = seen.clone();
        inbox.register(
            5,
            SubscriptionCallbacks {
                on_manifest: Some(Box::new(move |m| seen_clone.lock().unwrap().push(m.source_id))),
                on_sample: None,
                on_error: None,
            },
        );

        inbox.dispatch("/org/perfkit/Agent/Subscription/5", "Manifest", manifest_frame(9), &mut resolver);
        assert_eq!(seen.lock().unwrap().as_slice(), [9]);
        assert!(resolver.lookup(9).is_some());
    }

    #[test]
    fn decode_failure_routes_to_error_callback_without_panicking() {
        let mut resolver = Resolver::new();
        let mut inbox = SubscriptionInbox::new("/org/perfkit/Agent".into());

        let errors: Arc<Mutex<usize>> = Arc::default();
        let errors_clone = errors.clone();
        inbox.register(
            1,
            SubscriptionCallbacks {
                on_manifest: None,
                on_sample: None,
                on_error: Some(Box::new(move |_| *errors_clone.lock().unwrap() += 1)),
            },
        );

        inbox.dispatch("/org/perfkit/Agent/Subscription/1", "Manifest", Bytes::from_static(b"\xff"), &mut resolver);
        assert_eq!(*errors.lock().unwrap(), 1);
    }
}
