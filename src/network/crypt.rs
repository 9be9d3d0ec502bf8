//! Session header cipher.
//!
//! A keystream transform keyed by the 40-byte SRP6 session key. Only frame
//! headers pass through it; payload bytes are never enciphered. Send and
//! receive directions advance independently.

/// Length of the SRP6 session key the cipher is normally keyed with.
pub const SESSION_KEY_LEN: usize = 40;

#[derive(Debug, Clone)]
pub struct SessionCipher {
    key: Vec<u8>,
    send_i: usize,
    send_j: u8,
    recv_i: usize,
    recv_j: u8,
}

impl SessionCipher {
    /// Creates a cipher keyed by `key`. An empty key is replaced by a single
    /// zero byte so the index arithmetic stays defined.
    pub fn new(key: &[u8]) -> Self {
        let key = if key.is_empty() { vec![0] } else { key.to_vec() };
        Self {
            key,
            send_i: 0,
            send_j: 0,
            recv_i: 0,
            recv_j: 0,
        }
    }

    /// Enciphers an outbound header in place.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            let x = (*b ^ self.key[self.send_i]).wrapping_add(self.send_j);
            self.send_i = (self.send_i + 1) % self.key.len();
            *b = x;
            self.send_j = x;
        }
    }

    /// Deciphers an inbound header in place.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for b in data.iter_mut() {
            let cipher = *b;
            let x = cipher.wrapping_sub(self.recv_j) ^ self.key[self.recv_i];
            self.recv_i = (self.recv_i + 1) % self.key.len();
            self.recv_j = cipher;
            *b = x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Vec<u8> {
        (0..SESSION_KEY_LEN as u8).map(|b| b.wrapping_mul(37)).collect()
    }

    #[test]
    fn test_encrypt_changes_header() {
        let mut cipher = SessionCipher::new(&key());
        let mut header = [0x00, 0x06, 0xEE, 0x01];
        cipher.encrypt(&mut header);
        assert_ne!(header, [0x00, 0x06, 0xEE, 0x01]);
    }

    #[test]
    fn test_peer_roundtrip_over_many_headers() {
        let mut server = SessionCipher::new(&key());
        let mut client = SessionCipher::new(&key());

        // Enough headers to wrap the key index several times.
        for n in 0..64u16 {
            let original = [(n >> 8) as u8, n as u8, 0xDC, 0x01];
            let mut header = original;
            server.encrypt(&mut header);
            client.decrypt(&mut header);
            assert_eq!(header, original);
        }
    }

    #[test]
    fn test_directions_are_independent() {
        let mut a = SessionCipher::new(&key());
        let mut b = SessionCipher::new(&key());

        let mut out = [1u8, 2, 3, 4];
        a.encrypt(&mut out);
        // Decrypting on `a` itself must not disturb its send state.
        let mut inbound = [9u8, 9, 9, 9, 9, 9];
        a.decrypt(&mut inbound);

        let mut next = [5u8, 6, 7, 8];
        a.encrypt(&mut next);

        let mut first = out;
        b.decrypt(&mut first);
        let mut second = next;
        b.decrypt(&mut second);
        assert_eq!(first, [1, 2, 3, 4]);
        assert_eq!(second, [5, 6, 7, 8]);
    }

    #[test]
    fn test_empty_key_does_not_panic() {
        let mut cipher = SessionCipher::new(&[]);
        let mut header = [1u8, 2, 3];
        cipher.encrypt(&mut header);
        cipher.decrypt(&mut header);
    }
}
