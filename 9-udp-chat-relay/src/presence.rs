use crate::{message::ServerToClient, registry::Registry, router::Outbound};

/// Full presence listing addressed to every registered endpoint.
///
/// Names and targets come from one registry snapshot, so the listing always
/// matches the set of endpoints it is sent to.
pub fn publish(registry: &Registry) -> Outbound {
    let entries = registry.entries();
    let targets = entries.iter().map(|entry| entry.endpoint).collect();
    let names = entries.into_iter().map(|entry| entry.name).collect();

    Outbound {
        targets,
        message: ServerToClient::Presence { names },
    }
}
