#[macro_use]
extern crate afl;
use parley::Message;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(message) = Message::from_bytes(data) {
            let (message_type, bytes) = message.to_parts();
            let _ = Message::from_parts(message_type, &bytes);
        }
    });
}
