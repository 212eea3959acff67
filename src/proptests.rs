//! Property-based tests for the cipher and the conversation projection.

use proptest::prelude::*;

use crate::cipher::{
    decode_from_transport, decrypt, decrypt_or_raw, encode_for_transport, encrypt,
    MAX_PLAINTEXT_LEN,
};
use crate::keys::KeyPair;
use crate::message::{Header, TransportMessage};
use crate::projector::project;

fn message(id: usize, from: &str, date: u64) -> TransportMessage {
    TransportMessage {
        id: id.to_string(),
        internal_date: date,
        headers: vec![Header::new("From", from)],
        body: String::new(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Transport encoding round-trips any byte string.
    #[test]
    fn transport_encoding_roundtrip(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let encoded = encode_for_transport(&bytes);
        prop_assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        prop_assert_eq!(decode_from_transport(&encoded).unwrap(), bytes);
    }

    /// Anything within the size limit decrypts to itself.
    #[test]
    fn encrypt_decrypt_roundtrip(plaintext in ".{0,200}") {
        prop_assume!(plaintext.len() <= MAX_PLAINTEXT_LEN);
        let pair = KeyPair::generate().unwrap();
        let ciphertext = encrypt(&pair.public_key, &plaintext).unwrap();
        prop_assert_eq!(decrypt(&pair.private_key, &ciphertext).unwrap(), plaintext);
    }

    /// The display path never fails and shows unreadable input verbatim.
    #[test]
    fn display_fallback_is_identity(body in ".{0,300}") {
        let pair = KeyPair::generate().unwrap();
        prop_assume!(decrypt(&pair.private_key, &body).is_err());
        prop_assert_eq!(decrypt_or_raw(Some(&pair.private_key), &body), body);
    }

    /// Projection is deterministic and every conversation is internally sorted.
    #[test]
    fn projection_invariants(
        raw in prop::collection::vec((0usize..4, 0u64..50), 0..40)
    ) {
        let senders = ["a@x.com", "b@x.com", "c@x.com", "d@x.com"];
        let messages: Vec<_> = raw
            .iter()
            .enumerate()
            .map(|(i, (s, d))| message(i, senders[*s], *d))
            .collect();

        let conversations = project(&messages);
        prop_assert_eq!(&conversations, &project(&messages));

        let total: usize = conversations.iter().map(|c| c.messages.len()).sum();
        prop_assert_eq!(total, messages.len());

        for pair in conversations.windows(2) {
            prop_assert!(pair[0].last_activity >= pair[1].last_activity);
        }
        for conversation in &conversations {
            for pair in conversation.messages.windows(2) {
                prop_assert!(pair[0].internal_date >= pair[1].internal_date);
            }
            prop_assert_eq!(
                conversation.last_activity,
                conversation.messages.iter().map(|m| m.internal_date).max().unwrap()
            );
            prop_assert!(conversation
                .messages
                .iter()
                .all(|m| m.from() == Some(conversation.counterparty.as_str())));
        }
    }
}
