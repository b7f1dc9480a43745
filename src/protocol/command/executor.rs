use super::{Action, CommandOutcome, CommandRequest, Target};
use crate::mailbox::Mailbox;
use crate::network::Connection;
use crate::protocol::frame;
use crate::registry::Registry;
use std::io;
use tracing::warn;

/// Result of applying an operator command to the registry
#[derive(Debug)]
pub struct Applied<S> {
    pub outcome: CommandOutcome,
    /// Kicked connections, already out of the registry; the caller closes them
    pub removed: Vec<Connection<S>>,
}

/// Apply `request` to every matching connection.
///
/// Kicks swap-remove from the registry, so the scan stays on the same index
/// after a removal. A single-client target stops at the first match.
pub fn apply_command<L, S, F>(
    registry: &mut Registry<L, S>,
    request: &CommandRequest,
    mailbox: &Mailbox,
    mut send: F,
) -> Applied<S>
where
    F: FnMut(&mut Connection<S>, &[u8]) -> io::Result<usize>,
{
    let framed = match &request.action {
        Action::Message(text) => Some(frame::encode_line(text)),
        Action::Kick => None,
    };

    let mut removed = Vec::new();
    let mut delivered = 0;
    let mut failed = 0;
    let mut index = 0;

    while index < registry.len() {
        if mailbox.is_inactive() {
            return Applied {
                outcome: CommandOutcome::Interrupted,
                removed,
            };
        }

        let Some(conn) = registry.get_mut(index) else {
            break;
        };
        let id = conn.id();
        if !request.target.matches(id) {
            index += 1;
            continue;
        }

        match &framed {
            None => {
                removed.push(registry.remove(index));
                if let Target::Client(_) = request.target {
                    return Applied {
                        outcome: CommandOutcome::Kicked(id),
                        removed,
                    };
                }
            }
            Some(framed) => {
                let result = send(conn, framed);
                if let Err(e) = &result {
                    warn!("Failed to send message to client {}: {}", id, e);
                }

                if let Target::Client(_) = request.target {
                    let outcome = match result {
                        Ok(_) => CommandOutcome::Sent(id),
                        Err(_) => CommandOutcome::SendFailed(id),
                    };
                    return Applied { outcome, removed };
                }

                match result {
                    Ok(_) => delivered += 1,
                    Err(_) => failed += 1,
                }
                index += 1;
            }
        }
    }

    let outcome = match (request.target, &request.action) {
        (Target::Client(id), _) => CommandOutcome::NotFound(id),
        (Target::All, Action::Kick) => CommandOutcome::KickedAll(removed.len()),
        (Target::All, Action::Message(_)) => CommandOutcome::Broadcast { delivered, failed },
    };

    Applied { outcome, removed }
}
