use rand::Rng;

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const REFERRAL_CODE_LENGTH: usize = 8;

/// Random `[A-Z0-9]` string of the given length
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_CHARSET.len());
            CODE_CHARSET[idx] as char
        })
        .collect()
}

pub fn generate_referral_code() -> String {
    generate_code(REFERRAL_CODE_LENGTH)
}

/// Promo codes are matched case-insensitively and stored upper-cased
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
