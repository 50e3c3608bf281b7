#[macro_use]
extern crate afl;
use parley::{Account, MessageType, Session};

/// A responder session that has seen one genuine message, so both the
/// pre-key and the normal decrypt paths are reachable.
fn get_session() -> Option<Session> {
    let alice = Account::new(None).ok()?;
    let mut bob = Account::new(None).ok()?;
    bob.generate_one_time_keys(1).ok()?;
    let bundle = bob.identity_bundle();
    let one_time_key = bundle.one_time_keys.values().next()?;

    let mut outbound = alice
        .create_outbound_session(&bundle.identity_keys, one_time_key)
        .ok()?;
    let (message_type, message) = outbound.encrypt(b"fuzz-context").ok()?;
    let mut inbound = bob.create_inbound_session(&message).ok()?;
    inbound.decrypt(message_type, &message).ok()?;

    Some(inbound)
}

fn main() {
    let Some(mut session) = get_session() else {
        return;
    };

    fuzz!(|data: &[u8]| {
        if let Some((&kind, message)) = data.split_first() {
            let message_type = if kind & 1 == 0 {
                MessageType::PreKey
            } else {
                MessageType::Normal
            };
            let _ = session.decrypt(message_type, message);
        }
    });
}
