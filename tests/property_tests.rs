//! Property-based tests for Shroud
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Key Derivation Properties
// ============================================================================

mod key_properties {
    use super::*;
    use shroud_crypto::SessionKey;

    proptest! {
        /// Keys are 32 lowercase hex characters
        #[test]
        fn key_is_lowercase_hex(secret in ".{1,64}") {
            let key = SessionKey::derive(&secret).unwrap();
            prop_assert!(key
                .as_bytes()
                .iter()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b)));
        }

        /// Derivation is deterministic
        #[test]
        fn key_is_deterministic(secret in ".{1,64}") {
            let a = SessionKey::derive(&secret).unwrap();
            let b = SessionKey::derive(&secret).unwrap();
            prop_assert_eq!(a.as_bytes(), b.as_bytes());
        }

        /// Distinct secrets give distinct keys
        #[test]
        fn distinct_secrets_distinct_keys(a in "[a-z0-9]{1,32}", b in "[a-z0-9]{1,32}") {
            prop_assume!(a != b);
            let ka = SessionKey::derive(&a).unwrap();
            let kb = SessionKey::derive(&b).unwrap();
            prop_assert_ne!(ka.as_bytes(), kb.as_bytes());
        }
    }
}

// ============================================================================
// Cipher Stream Properties
// ============================================================================

mod cipher_properties {
    use super::*;
    use shroud_crypto::{CipherStream, NONCE_SIZE};
    use shroud_integration_tests::key;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const PIPE: usize = 64 * 1024;

    proptest! {
        /// Whatever one side writes in any chunking, the other side reads
        #[test]
        fn cipher_is_transparent(
            plaintext in prop::collection::vec(any::<u8>(), 0..4096),
            chunk in 1usize..512,
        ) {
            let received = runtime().block_on(async {
                let (left, right) = tokio::io::duplex(PIPE);
                let mut writer = CipherStream::new(key("secret"), left).await.unwrap();
                let mut reader = CipherStream::new(key("secret"), right).await.unwrap();

                for piece in plaintext.chunks(chunk) {
                    writer.write_all(piece).await.unwrap();
                }
                writer.shutdown().await.unwrap();

                let mut received = Vec::new();
                reader.read_to_end(&mut received).await.unwrap();
                received
            });
            prop_assert_eq!(received, plaintext);
        }

        /// The wire carries the nonce, then exactly one ciphertext byte per
        /// plaintext byte
        #[test]
        fn wire_is_nonce_then_same_length(
            plaintext in prop::collection::vec(any::<u8>(), 1..4096),
        ) {
            let wire = runtime().block_on(async {
                let (left, mut right) = tokio::io::duplex(PIPE);
                let mut writer = CipherStream::new(key("secret"), left).await.unwrap();
                writer.write_all(&plaintext).await.unwrap();
                writer.shutdown().await.unwrap();

                let mut wire = Vec::new();
                right.read_to_end(&mut wire).await.unwrap();
                wire
            });
            prop_assert_eq!(wire.len(), NONCE_SIZE + plaintext.len());
            if plaintext.len() >= 16 {
                prop_assert_ne!(&wire[NONCE_SIZE..], &plaintext[..]);
            }
        }

        /// A different secret never recovers the plaintext
        #[test]
        fn wrong_secret_yields_garbage(
            plaintext in prop::collection::vec(any::<u8>(), 16..1024),
        ) {
            let received = runtime().block_on(async {
                let (left, right) = tokio::io::duplex(PIPE);
                let mut writer = CipherStream::new(key("secret"), left).await.unwrap();
                let mut reader = CipherStream::new(key("Secret"), right).await.unwrap();
                writer.write_all(&plaintext).await.unwrap();
                writer.shutdown().await.unwrap();

                let mut received = Vec::new();
                reader.read_to_end(&mut received).await.unwrap();
                received
            });
            prop_assert_eq!(received.len(), plaintext.len());
            prop_assert_ne!(received, plaintext);
        }
    }
}

// ============================================================================
// ARQ Segment Properties
// ============================================================================

mod segment_properties {
    use super::*;
    use bytes::Bytes;
    use shroud_transport::arq::{Command, HEADER_SIZE, Segment};

    fn command() -> impl Strategy<Value = Command> {
        prop_oneof![
            Just(Command::Push),
            Just(Command::Ack),
            Just(Command::WindowAsk),
            Just(Command::WindowTell),
            Just(Command::Fin),
        ]
    }

    proptest! {
        /// Encoding then decoding preserves every field
        #[test]
        fn segment_survives_the_wire(
            conv in any::<u32>(),
            cmd in command(),
            wnd in any::<u16>(),
            sn in any::<u32>(),
            una in any::<u32>(),
            payload in prop::collection::vec(any::<u8>(), 0..1400),
        ) {
            let segment = Segment { conv, cmd, wnd, sn, una, payload: Bytes::from(payload) };
            let wire = segment.encode().unwrap();
            prop_assert_eq!(wire.len(), HEADER_SIZE + segment.payload.len());
            prop_assert_eq!(Segment::decode(&wire).unwrap(), segment);
        }

        /// Any truncation of a valid segment is rejected
        #[test]
        fn truncated_segment_rejected(
            payload in prop::collection::vec(any::<u8>(), 0..256),
            cut in 1usize..64,
        ) {
            let segment = Segment {
                conv: 1,
                cmd: Command::Push,
                wnd: 128,
                sn: 0,
                una: 0,
                payload: Bytes::from(payload),
            };
            let wire = segment.encode().unwrap();
            let keep = wire.len().saturating_sub(cut);
            prop_assert!(Segment::decode(&wire[..keep]).is_err());
        }
    }
}

// ============================================================================
// ARQ Stream Properties
// ============================================================================

mod arq_properties {
    use super::*;
    use shroud_transport::{ArqConfig, ArqListener, ArqStream};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        /// Bytes arrive once, in order, whatever the write pattern
        #[test]
        fn arq_delivers_in_order(
            payload in prop::collection::vec(any::<u8>(), 1..200_000),
            chunk in 1usize..8192,
        ) {
            let received = runtime().block_on(async {
                let mut listener =
                    ArqListener::bind("127.0.0.1:0".parse().unwrap(), ArqConfig::default())
                        .await
                        .unwrap();
                let mut client =
                    ArqStream::connect(listener.local_addr(), ArqConfig::default())
                        .await
                        .unwrap();

                let to_send = payload.clone();
                let writer = tokio::spawn(async move {
                    for piece in to_send.chunks(chunk) {
                        client.write_all(piece).await.unwrap();
                    }
                    client.shutdown().await.unwrap();
                    client
                });

                let (mut server, _) = listener.accept().await.unwrap();
                let mut received = Vec::new();
                tokio::time::timeout(Duration::from_secs(20), server.read_to_end(&mut received))
                    .await
                    .unwrap()
                    .unwrap();
                drop(writer.await.unwrap());
                received
            });
            prop_assert_eq!(received, payload);
        }
    }
}
