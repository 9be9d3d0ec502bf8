//! Server side of the SRP6 logon exchange.
//!
//! Every number on the wire is an unsigned little-endian integer of fixed
//! width: 32 bytes for group elements, 20 for hashes.

use num_bigint::BigUint;
use sha1::{Digest, Sha1};

use super::AuthResult;

/// Safe prime N, big-endian.
pub const N_BYTES_BE: [u8; 32] = [
    0x89, 0x4B, 0x64, 0x5E, 0x89, 0xE1, 0x53, 0x5B, 0xBD, 0xAD, 0x5B, 0x8B, 0x29, 0x06, 0x50, 0x53,
    0x08, 0x01, 0xB1, 0x8E, 0xBF, 0xBF, 0x5E, 0x8F, 0xAB, 0x3C, 0x82, 0x87, 0x2A, 0x3E, 0x9B, 0xB7,
];

/// Generator.
pub const G: u8 = 7;

/// Multiplier parameter.
pub const K: u32 = 3;

pub const SESSION_KEY_LEN: usize = 40;

pub fn modulus() -> BigUint {
    BigUint::from_bytes_be(&N_BYTES_BE)
}

/// `n` as a fixed-width little-endian array. Values wider than `W` are
/// truncated to their low bytes.
pub fn to_le_fixed<const W: usize>(n: &BigUint) -> [u8; W] {
    let bytes = n.to_bytes_le();
    let mut out = [0u8; W];
    let len = bytes.len().min(W);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

fn sha1(parts: &[&[u8]]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Private key `x = H(s | H(UPPER(I) ":" UPPER(P)))`, read little-endian.
pub fn private_key(username: &str, password: &str, salt: &[u8; 32]) -> BigUint {
    let identity = format!("{}:{}", username.to_uppercase(), password.to_uppercase());
    let inner = sha1(&[identity.as_bytes()]);
    BigUint::from_bytes_le(&sha1(&[&salt[..], &inner[..]]))
}

/// Password verifier `v = g^x mod N`.
pub fn compute_verifier(username: &str, password: &str, salt: &[u8; 32]) -> [u8; 32] {
    let x = private_key(username, password, salt);
    to_le_fixed(&BigUint::from(G).modpow(&x, &modulus()))
}

/// Session key: SHA-1 of the even and of the odd bytes of `S`, interleaved.
pub fn interleave(s: &BigUint) -> [u8; SESSION_KEY_LEN] {
    let bytes: [u8; 32] = to_le_fixed(s);
    let even: Vec<u8> = bytes.iter().step_by(2).copied().collect();
    let odd: Vec<u8> = bytes.iter().skip(1).step_by(2).copied().collect();
    let h_even = sha1(&[&even[..]]);
    let h_odd = sha1(&[&odd[..]]);

    let mut key = [0u8; SESSION_KEY_LEN];
    for i in 0..20 {
        key[i * 2] = h_even[i];
        key[i * 2 + 1] = h_odd[i];
    }
    key
}

/// `H(N) xor H(g)`, the fixed prefix of the client proof.
pub fn group_hash() -> [u8; 20] {
    let n: [u8; 32] = to_le_fixed(&modulus());
    let hn = sha1(&[&n[..]]);
    let hg = sha1(&[&[G][..]]);
    let mut out = [0u8; 20];
    for i in 0..20 {
        out[i] = hn[i] ^ hg[i];
    }
    out
}

/// `M1 = H(H(N) xor H(g) | H(I) | s | A | B | K)`.
pub fn client_proof(
    username: &str,
    salt: &[u8; 32],
    a_pub: &[u8; 32],
    b_pub: &[u8; 32],
    key: &[u8; SESSION_KEY_LEN],
) -> [u8; 20] {
    let hi = sha1(&[username.to_uppercase().as_bytes()]);
    sha1(&[&group_hash()[..], &hi[..], &salt[..], &a_pub[..], &b_pub[..], &key[..]])
}

/// `M2 = H(A | M1 | K)`.
pub fn server_proof(a_pub: &[u8; 32], m1: &[u8; 20], key: &[u8; SESSION_KEY_LEN]) -> [u8; 20] {
    sha1(&[&a_pub[..], &m1[..], &key[..]])
}

/// Equality over the full length of both digests, without early exit.
pub fn digests_match(a: &[u8; 20], b: &[u8; 20]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Values sent to the client in the challenge response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChallenge {
    pub b_pub: [u8; 32],
    pub g: u8,
    pub n: [u8; 32],
    pub salt: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofOutcome {
    Authenticated {
        session_key: [u8; SESSION_KEY_LEN],
        server_proof: [u8; 20],
    },
    Rejected(AuthResult),
}

/// Ephemeral state of one logon attempt. [`Exchange::verify`] consumes it,
/// so a proof can be checked against a challenge at most once.
pub struct Exchange {
    username: String,
    salt: [u8; 32],
    v: BigUint,
    b: BigUint,
    b_pub: [u8; 32],
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Exchange {
    /// Starts an exchange with a fresh random server ephemeral.
    pub fn new(username: &str, salt: [u8; 32], verifier: &[u8; 32]) -> Self {
        Self::with_private(username, salt, verifier, rand::random::<[u8; 32]>())
    }

    /// Starts an exchange with a caller-chosen private ephemeral `b`.
    pub fn with_private(username: &str, salt: [u8; 32], verifier: &[u8; 32], b: [u8; 32]) -> Self {
        let n = modulus();
        let v = BigUint::from_bytes_le(verifier);
        let b = BigUint::from_bytes_le(&b);
        let b_pub = (BigUint::from(K) * &v + BigUint::from(G).modpow(&b, &n)) % &n;
        Self {
            username: username.to_uppercase(),
            salt,
            v,
            b,
            b_pub: to_le_fixed(&b_pub),
        }
    }

    pub fn challenge(&self) -> ServerChallenge {
        ServerChallenge {
            b_pub: self.b_pub,
            g: G,
            n: to_le_fixed(&modulus()),
            salt: self.salt,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Checks the client proof. Any mismatch, including a degenerate client
    /// ephemeral, is reported as an unknown account.
    pub fn verify(self, a_pub: &[u8; 32], m1: &[u8; 20]) -> ProofOutcome {
        let n = modulus();
        let a = BigUint::from_bytes_le(a_pub);
        if (&a % &n).bits() == 0 {
            return ProofOutcome::Rejected(AuthResult::UnknownAccount);
        }

        let u = BigUint::from_bytes_le(&sha1(&[&a_pub[..], &self.b_pub[..]]));
        let s = (a * self.v.modpow(&u, &n)).modpow(&self.b, &n);
        let key = interleave(&s);

        let expected = client_proof(&self.username, &self.salt, a_pub, &self.b_pub, &key);
        if !digests_match(&expected, m1) {
            return ProofOutcome::Rejected(AuthResult::UnknownAccount);
        }

        ProofOutcome::Authenticated {
            session_key: key,
            server_proof: server_proof(a_pub, m1, &key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; 32] = [0xAD; 32];
    const B_PRIV: [u8; 32] = [0x11; 32];
    const A_PRIV: [u8; 32] = [0x22; 32];

    /// Client half of the exchange, computed without any server state.
    fn client(
        user: &str,
        pass: &str,
        salt: &[u8; 32],
        b_pub: &[u8; 32],
    ) -> ([u8; 32], [u8; 20], [u8; SESSION_KEY_LEN]) {
        let n = modulus();
        let g = BigUint::from(G);
        let a = BigUint::from_bytes_le(&A_PRIV);
        let a_pub: [u8; 32] = to_le_fixed(&g.modpow(&a, &n));

        let x = private_key(user, pass, salt);
        let b = BigUint::from_bytes_le(b_pub);
        let u = BigUint::from_bytes_le(&sha1(&[&a_pub[..], &b_pub[..]]));
        let kgx = (BigUint::from(K) * g.modpow(&x, &n)) % &n;
        let base = (b + &n - kgx) % &n;
        let s = base.modpow(&(a + u * x), &n);
        let key = interleave(&s);
        let m1 = client_proof(user, salt, &a_pub, b_pub, &key);
        (a_pub, m1, key)
    }

    fn exchange() -> Exchange {
        let v = compute_verifier("john", "doe", &SALT);
        Exchange::with_private("john", SALT, &v, B_PRIV)
    }

    #[test]
    fn test_modulus_roundtrip_le() {
        let n: [u8; 32] = to_le_fixed(&modulus());
        assert_eq!(n[0], 0xB7);
        assert_eq!(n[31], 0x89);
    }

    #[test]
    fn test_verifier_is_case_insensitive() {
        assert_eq!(
            compute_verifier("john", "doe", &SALT),
            compute_verifier("JOHN", "DOE", &SALT)
        );
        assert_ne!(
            compute_verifier("john", "doe", &SALT),
            compute_verifier("john", "dough", &SALT)
        );
    }

    #[test]
    fn test_challenge_fields() {
        let c = exchange().challenge();
        assert_eq!(c.g, 7);
        assert_eq!(c.salt, SALT);
        assert_ne!(c.b_pub, [0u8; 32]);
    }

    #[test]
    fn test_john_doe_handshake() {
        let server = exchange();
        let c = server.challenge();
        let (a_pub, m1, client_key) = client("john", "doe", &SALT, &c.b_pub);

        match server.verify(&a_pub, &m1) {
            ProofOutcome::Authenticated { session_key, server_proof: m2 } => {
                assert_eq!(session_key, client_key);
                assert_eq!(m2, super::server_proof(&a_pub, &m1, &client_key));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    /// john/doe with salt 0xAD.., b 0x11.., a 0x22.., worked out separately.
    #[test]
    fn test_known_answer_vector() {
        const B_PUB: [u8; 32] = [
            0x90, 0x47, 0x55, 0x65, 0x11, 0xA1, 0x71, 0x37, 0x08, 0x6B, 0xE4, 0x22, 0x5C, 0xAA, 0x7F, 0xDA,
            0x15, 0x19, 0x4C, 0x77, 0x1B, 0xD1, 0x72, 0x89, 0x53, 0x4C, 0x68, 0x63, 0x52, 0xD9, 0xAA, 0x36,
        ];
        const A_PUB: [u8; 32] = [
            0x88, 0xE0, 0xEF, 0x5D, 0xF7, 0x8D, 0x45, 0x98, 0x42, 0xDE, 0xEE, 0x63, 0x7A, 0xE4, 0xF8, 0x00,
            0xBD, 0xE0, 0x88, 0x8D, 0x75, 0x95, 0xFD, 0xC0, 0xC6, 0x82, 0x0D, 0x82, 0x4D, 0x3F, 0xE4, 0x53,
        ];
        const M1: [u8; 20] = [
            0xEB, 0xE0, 0x7B, 0x14, 0xBD, 0x96, 0x8B, 0x8F, 0x12, 0xAA, 0x0B, 0x64, 0x2D, 0xB3, 0xF3, 0x61,
            0xCD, 0xC2, 0x72, 0x69,
        ];
        const M2: [u8; 20] = [
            0x23, 0x18, 0xAF, 0x3F, 0xB8, 0x17, 0xAD, 0x7E, 0x3A, 0xEF, 0x51, 0x62, 0x03, 0x94, 0x2A, 0x3B,
            0x82, 0xFD, 0x09, 0x27,
        ];
        const KEY: [u8; 40] = [
            0xFE, 0xAD, 0x33, 0xAF, 0x2E, 0x85, 0x74, 0x53, 0x00, 0xB0, 0x58, 0x36, 0xD9, 0x2F, 0x45, 0xD6,
            0xA2, 0x7A, 0x14, 0xEB, 0xB3, 0xA5, 0xB8, 0xF2, 0x94, 0x74, 0x45, 0x82, 0x72, 0x53, 0x33, 0xFE,
            0xA4, 0xDD, 0x56, 0xB4, 0xDF, 0xE4, 0x1C, 0xBB,
        ];

        let server = exchange();
        assert_eq!(server.challenge().b_pub, B_PUB);
        assert_eq!(
            server.verify(&A_PUB, &M1),
            ProofOutcome::Authenticated { session_key: KEY, server_proof: M2 }
        );
    }

    #[test]
    fn test_wrong_password_rejected() {
        let server = exchange();
        let c = server.challenge();
        let (a_pub, m1, _) = client("john", "nope", &SALT, &c.b_pub);
        assert_eq!(
            server.verify(&a_pub, &m1),
            ProofOutcome::Rejected(AuthResult::UnknownAccount)
        );
    }

    #[test]
    fn test_every_flipped_m1_bit_rejected() {
        let c = exchange().challenge();
        let (a_pub, m1, _) = client("john", "doe", &SALT, &c.b_pub);
        for bit in 0..160 {
            let mut bad = m1;
            bad[bit / 8] ^= 1 << (bit % 8);
            assert_eq!(
                exchange().verify(&a_pub, &bad),
                ProofOutcome::Rejected(AuthResult::UnknownAccount),
                "bit {}",
                bit
            );
        }
    }

    #[test]
    fn test_zero_client_ephemeral_rejected() {
        let m1 = [0u8; 20];
        assert_eq!(
            exchange().verify(&[0u8; 32], &m1),
            ProofOutcome::Rejected(AuthResult::UnknownAccount)
        );
        let n: [u8; 32] = to_le_fixed(&modulus());
        assert_eq!(
            exchange().verify(&n, &m1),
            ProofOutcome::Rejected(AuthResult::UnknownAccount)
        );
    }

    #[test]
    fn test_digests_match() {
        let a = [7u8; 20];
        let mut b = a;
        assert!(digests_match(&a, &b));
        b[19] ^= 0x80;
        assert!(!digests_match(&a, &b));
    }

    #[test]
    fn test_interleave_layout() {
        let s = BigUint::from_bytes_le(&[1u8; 32]);
        let key = interleave(&s);
        let h = sha1(&[&[1u8; 16][..]]);
        assert_eq!(key[0], h[0]);
        assert_eq!(key[1], h[0]);
        assert_eq!(key[38], h[19]);
    }
}
