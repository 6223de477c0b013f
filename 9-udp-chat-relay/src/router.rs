use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    message::{Body, ClientToServer, RESERVED_NAMES, ServerToClient, WireMessage},
    presence,
    registry::{Endpoint, Registry},
};

/// One message and the endpoints it should be sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub targets: Vec<Endpoint>,
    pub message: ServerToClient,
}

impl Outbound {
    pub fn unicast(target: Endpoint, message: ServerToClient) -> Self {
        Self {
            targets: vec![target],
            message,
        }
    }
}

/// Decides who hears about each inbound datagram.
///
/// Routing is synchronous and performs no I/O. Callers hand over raw datagrams
/// and deliver the returned [`Outbound`]s in order.
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn route_datagram(&self, sender: Endpoint, datagram: &[u8]) -> Vec<Outbound> {
        self.registry.touch(sender);

        match ClientToServer::decode(datagram) {
            Ok(message) => self.route(sender, message),
            Err(err) => {
                debug!(peer = %sender, error = %err, "dropping malformed datagram");
                Vec::new()
            }
        }
    }

    pub fn route(&self, sender: Endpoint, message: ClientToServer) -> Vec<Outbound> {
        match message {
            ClientToServer::Connect { name } => self.handle_connect(sender, name),
            ClientToServer::Broadcast { body } => self.handle_broadcast(sender, body),
            ClientToServer::Private { target, body } => self.handle_private(sender, target, body),
        }
    }

    /// Evicts endpoints silent for `max_idle` and republishes presence if any left.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<Outbound> {
        let evicted = self.registry.evict_idle(max_idle);
        if evicted.is_empty() {
            return Vec::new();
        }

        for entry in &evicted {
            info!(peer = %entry.endpoint, name = %entry.name, "evicted idle client");
        }
        non_empty(vec![presence::publish(&self.registry)])
    }

    pub fn shutdown_notice(&self) -> Vec<Outbound> {
        non_empty(vec![Outbound {
            targets: self.registry.all_endpoints_except(None),
            message: ServerToClient::text("server shutting down"),
        }])
    }

    fn handle_connect(&self, sender: Endpoint, name: String) -> Vec<Outbound> {
        if let Err(reason) = validate_name(&name) {
            warn!(peer = %sender, %name, reason, "rejecting connect");
            return vec![Outbound::unicast(
                sender,
                ServerToClient::text(format!("invalid name '{name}': {reason}")),
            )];
        }

        match self.registry.register(sender, name.clone()) {
            Some(previous) => info!(peer = %sender, %previous, %name, "client renamed"),
            None => info!(peer = %sender, %name, "client joined"),
        }

        non_empty(vec![
            presence::publish(&self.registry),
            Outbound {
                targets: self.registry.all_endpoints_except(Some(sender)),
                message: ServerToClient::text(format!("{name} joined")),
            },
        ])
    }

    fn handle_broadcast(&self, sender: Endpoint, body: Body) -> Vec<Outbound> {
        let name = self.registry.display_name(sender);
        let body = match body {
            Body::Text(text) if text.trim().is_empty() => {
                debug!(peer = %sender, "ignoring blank broadcast");
                return Vec::new();
            }
            Body::Text(text) => Body::Text(format!("{name}: {text}")),
            image @ Body::Image(_) => image,
        };

        let message = ServerToClient::Relay { body };
        if let Some(refusal) = refusal(sender, &message) {
            return vec![refusal];
        }

        debug!(peer = %sender, %name, "broadcasting");
        non_empty(vec![Outbound {
            targets: self.registry.all_endpoints_except(Some(sender)),
            message,
        }])
    }

    fn handle_private(&self, sender: Endpoint, target: String, body: Body) -> Vec<Outbound> {
        let Some(recipient) = self.registry.find_by_name(&target) else {
            debug!(peer = %sender, %target, "private message to unknown user");
            return vec![Outbound::unicast(
                sender,
                ServerToClient::text(format!("user '{target}' not found")),
            )];
        };

        let confirmation = ServerToClient::text(format!("to {target}: {body}"));
        let relayed = ServerToClient::Relay { body };
        // The confirmation is never longer than the inbound frame, so only the
        // relayed body can fail to encode.
        if let Some(refusal) = refusal(sender, &relayed) {
            return vec![refusal];
        }

        debug!(peer = %sender, %target, %recipient, "delivering private message");
        vec![
            Outbound::unicast(recipient, relayed),
            Outbound::unicast(sender, confirmation),
        ]
    }
}

/// A notice for `sender` when `message` has no wire form that decodes back to it.
fn refusal(sender: Endpoint, message: &ServerToClient) -> Option<Outbound> {
    let err = message.encode().err()?;
    warn!(peer = %sender, error = %err, "refusing undeliverable message");
    Some(Outbound::unicast(
        sender,
        ServerToClient::text(format!("message not delivered: {err}")),
    ))
}

fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name cannot be empty");
    }
    if name.contains([',', ':']) {
        return Err("name cannot contain ',' or ':'");
    }
    if RESERVED_NAMES.contains(&name) {
        return Err("name is reserved");
    }
    Ok(())
}

fn non_empty(outbound: Vec<Outbound>) -> Vec<Outbound> {
    outbound
        .into_iter()
        .filter(|outbound| !outbound.targets.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::message::{Image, MAX_DATAGRAM_PAYLOAD};

    fn endpoint(port: u16) -> Endpoint {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn router() -> Router {
        Router::new(Arc::new(Registry::new()))
    }

    fn presence(names: &[&str]) -> ServerToClient {
        ServerToClient::Presence {
            names: names.iter().map(|name| name.to_string()).collect(),
        }
    }

    #[test]
    fn first_connect_publishes_presence_only_to_joiner() {
        let router = router();
        let alice = endpoint(4001);

        let outbound = router.route_datagram(alice, b"CONNECT:alice");

        assert_eq!(outbound, vec![Outbound::unicast(alice, presence(&["alice"]))]);
        assert_eq!(router.registry().name_of(alice).as_deref(), Some("alice"));
    }

    #[test]
    fn second_connect_publishes_presence_and_join_notice() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");

        let outbound = router.route_datagram(bob, b"CONNECT:bob");

        assert_eq!(
            outbound,
            vec![
                Outbound {
                    targets: vec![alice, bob],
                    message: presence(&["alice", "bob"]),
                },
                Outbound::unicast(alice, ServerToClient::text("bob joined")),
            ]
        );
    }

    #[test]
    fn repeated_connect_keeps_one_entry_with_latest_name() {
        let router = router();
        let alice = endpoint(4001);
        router.route_datagram(alice, b"CONNECT:alice");

        let outbound = router.route_datagram(alice, b"CONNECT:alicia");

        assert_eq!(outbound, vec![Outbound::unicast(alice, presence(&["alicia"]))]);
        assert_eq!(router.registry().len(), 1);
    }

    #[test]
    fn invalid_names_are_refused_with_a_notice() {
        let router = router();
        let sender = endpoint(4001);

        let datagrams: [&[u8]; 3] = [b"CONNECT:   ", b"CONNECT:a,b", b"CONNECT:LIST"];
        for datagram in datagrams {
            let outbound = router.route_datagram(sender, datagram);
            assert_eq!(outbound.len(), 1);
            assert_eq!(outbound[0].targets, vec![sender]);
        }
        assert!(router.registry().is_empty());
    }

    #[test]
    fn broadcast_text_is_attributed_and_skips_sender() {
        let router = router();
        let (alice, bob, carol) = (endpoint(4001), endpoint(4002), endpoint(4003));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");
        router.route_datagram(carol, b"CONNECT:carol");

        let outbound = router.route_datagram(alice, b"hi");

        assert_eq!(
            outbound,
            vec![Outbound {
                targets: vec![bob, carol],
                message: ServerToClient::text("alice: hi"),
            }]
        );
    }

    #[test]
    fn broadcast_image_is_relayed_unlabelled() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");

        let outbound = router.route_datagram(alice, b"IMAGE:cat.jpg:AQID");

        let image = Body::Image(Image {
            filename: "cat.jpg".into(),
            data: vec![1, 2, 3],
        });
        assert_eq!(
            outbound,
            vec![Outbound::unicast(bob, ServerToClient::Relay { body: image })]
        );
    }

    #[test]
    fn unregistered_sender_broadcasts_as_unknown() {
        let router = router();
        let alice = endpoint(4001);
        router.route_datagram(alice, b"CONNECT:alice");

        let outbound = router.route_datagram(endpoint(4999), b"hello");

        assert_eq!(
            outbound,
            vec![Outbound::unicast(alice, ServerToClient::text("Unknown: hello"))]
        );
    }

    #[test]
    fn blank_broadcast_is_ignored() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");

        assert!(router.route_datagram(alice, b"  \n").is_empty());
    }

    #[test]
    fn private_message_reaches_target_and_confirms_to_sender() {
        let router = router();
        let (alice, bob, carol) = (endpoint(4001), endpoint(4002), endpoint(4003));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");
        router.route_datagram(carol, b"CONNECT:carol");

        let outbound = router.route_datagram(alice, b"PRIVATE:bob:psst");

        assert_eq!(
            outbound,
            vec![
                Outbound::unicast(bob, ServerToClient::text("psst")),
                Outbound::unicast(alice, ServerToClient::text("to bob: psst")),
            ]
        );
    }

    #[test]
    fn private_message_to_unknown_name_only_notifies_sender() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");

        let outbound = router.route_datagram(alice, b"PRIVATE:dave:hello");

        assert_eq!(
            outbound,
            vec![Outbound::unicast(
                alice,
                ServerToClient::text("user 'dave' not found")
            )]
        );
    }

    #[test]
    fn malformed_private_is_dropped_silently() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");

        assert!(router.route_datagram(alice, b"PRIVATE:bob").is_empty());
    }

    #[test]
    fn private_image_reaches_target_and_confirms_to_sender() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");

        let outbound = router.route_datagram(alice, b"PRIVATE:bob:IMAGE:f:AQID");

        let image = Body::Image(Image {
            filename: "f".into(),
            data: vec![1, 2, 3],
        });
        assert_eq!(
            outbound,
            vec![
                Outbound::unicast(bob, ServerToClient::Relay { body: image }),
                Outbound::unicast(alice, ServerToClient::text("to bob: image f (3 bytes)")),
            ]
        );
    }

    #[test]
    fn private_body_shaped_like_a_frame_is_not_relayed() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");

        let datagrams: [&[u8]; 2] = [b"PRIVATE:bob:LIST:mallory,eve", b"PRIVATE:bob:PRIVATE:x:y"];
        for datagram in datagrams {
            let outbound = router.route_datagram(alice, datagram);

            assert_eq!(outbound.len(), 1);
            assert_eq!(outbound[0].targets, vec![alice]);
            let ServerToClient::Relay {
                body: Body::Text(notice),
            } = &outbound[0].message
            else {
                panic!("expected a text notice, got {:?}", outbound[0].message);
            };
            assert!(notice.starts_with("message not delivered: text must not start with"));
        }
    }

    #[test]
    fn broadcast_too_large_once_attributed_is_refused_to_sender() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");

        let text = "x".repeat(MAX_DATAGRAM_PAYLOAD - 3);
        let outbound = router.route_datagram(alice, text.as_bytes());

        let attributed = MAX_DATAGRAM_PAYLOAD - 3 + "alice: ".len();
        assert_eq!(
            outbound,
            vec![Outbound::unicast(
                alice,
                ServerToClient::text(format!(
                    "message not delivered: message too large: {attributed} bytes exceeds the \
                     {MAX_DATAGRAM_PAYLOAD} byte datagram limit"
                )),
            )]
        );
    }

    #[test]
    fn private_near_the_limit_still_fits_with_its_confirmation() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");

        let frame = format!("PRIVATE:bob:{}", "x".repeat(MAX_DATAGRAM_PAYLOAD - 12));
        assert_eq!(frame.len(), MAX_DATAGRAM_PAYLOAD);
        let outbound = router.route_datagram(alice, frame.as_bytes());

        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound[0].targets, vec![bob]);
        assert_eq!(outbound[1].targets, vec![alice]);
        for delivery in &outbound {
            assert!(delivery.message.encode().is_ok());
        }
    }

    #[test]
    fn eviction_republishes_presence_to_survivors() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        router.route_datagram(alice, b"CONNECT:alice");
        std::thread::sleep(Duration::from_millis(200));
        router.route_datagram(bob, b"CONNECT:bob");

        assert!(router.evict_idle(Duration::from_secs(3600)).is_empty());
        let outbound = router.evict_idle(Duration::from_millis(100));

        assert_eq!(outbound, vec![Outbound::unicast(bob, presence(&["bob"]))]);
        assert_eq!(router.registry().name_of(alice), None);
    }

    #[test]
    fn shutdown_notice_goes_to_everyone() {
        let router = router();
        let (alice, bob) = (endpoint(4001), endpoint(4002));
        assert!(router.shutdown_notice().is_empty());

        router.route_datagram(alice, b"CONNECT:alice");
        router.route_datagram(bob, b"CONNECT:bob");

        assert_eq!(
            router.shutdown_notice(),
            vec![Outbound {
                targets: vec![alice, bob],
                message: ServerToClient::text("server shutting down"),
            }]
        );
    }
}
