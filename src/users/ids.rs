use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use uuid::Uuid;

const ID_BYTES: usize = 18;

/// Produces visitor ids.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 24-character URL-safe ids drawn from OS randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        let head = Uuid::new_v4().into_bytes();
        let tail = Uuid::new_v4().into_bytes();

        let mut bytes = [0_u8; ID_BYTES];
        bytes[..16].copy_from_slice(&head);
        bytes[16..].copy_from_slice(&tail[..ID_BYTES - 16]);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}
