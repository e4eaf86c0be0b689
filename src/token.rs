use rand::{Rng, distr::Alphanumeric};

pub const UPLOAD_KEY_LENGTH: usize = 16;

/// Random alphanumeric string, used as the per-upload key form field.
pub fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
