#[cfg(test)]
mod integration_tests {
    use parley::{
        Account, AccountConfig, Error, IdentityBundle, MessageType, Role, Session,
        SignedOneTimeKey,
    };
    use rand::{TryCryptoRng, TryRngCore};
    use std::fmt;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[derive(Debug)]
    struct Exhausted;

    impl fmt::Display for Exhausted {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("exhausted")
        }
    }

    struct ExhaustedRng;

    impl TryRngCore for ExhaustedRng {
        type Error = Exhausted;

        fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
            Err(Exhausted)
        }

        fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
            Err(Exhausted)
        }

        fn try_fill_bytes(&mut self, _dst: &mut [u8]) -> Result<(), Self::Error> {
            Err(Exhausted)
        }
    }

    impl TryCryptoRng for ExhaustedRng {}

    fn first_one_time_key(bundle: &IdentityBundle) -> SignedOneTimeKey {
        *bundle.one_time_keys.values().next().unwrap()
    }

    /// Alice opens a session to Bob and Bob answers the first message.
    fn establish(alice: &Account, bob: &mut Account) -> (Session, Session) {
        bob.generate_one_time_keys(1).unwrap();
        let bundle = bob.identity_bundle();
        bob.mark_published();

        let mut alice_session = alice
            .create_outbound_session(&bundle.identity_keys, &first_one_time_key(&bundle))
            .unwrap();
        let (message_type, message) = alice_session.encrypt(b"Hello Bob").unwrap();
        assert_eq!(message_type, MessageType::PreKey);

        let mut bob_session = bob.create_inbound_session(&message).unwrap();
        assert_eq!(
            bob_session.decrypt(message_type, &message).unwrap(),
            b"Hello Bob"
        );

        (alice_session, bob_session)
    }

    #[test]
    fn test_full_protocol_flow() {
        init_tracing();

        println!("Step 1: Creating accounts for Alice and Bob...");
        let alice = Account::new(None).unwrap();
        let mut bob = Account::new(None).unwrap();

        println!("Step 2: Bob publishes his identity bundle...");
        bob.generate_one_time_keys(5).unwrap();
        let bundle = bob.identity_bundle();
        assert_eq!(bundle.one_time_keys.len(), 5);
        bob.mark_published();
        assert!(bob.identity_bundle().one_time_keys.is_empty());

        println!("Step 3: Alice creates an outbound session to Bob...");
        let mut alice_session = alice
            .create_outbound_session(&bundle.identity_keys, &first_one_time_key(&bundle))
            .unwrap();
        assert_eq!(alice_session.role(), Role::Initiator);

        println!("Step 4: Alice sends the first message...");
        let (message_type, message) = alice_session
            .encrypt(b"Hey Bob, this is a secure message!")
            .unwrap();
        assert_eq!(message_type, MessageType::PreKey);

        println!("Step 5: Bob creates the inbound session and decrypts...");
        let mut bob_session = bob.create_inbound_session(&message).unwrap();
        assert!(bob_session.matches_inbound(&message));
        assert_eq!(bob_session.session_id(), alice_session.session_id());
        assert_eq!(
            bob_session.decrypt(message_type, &message).unwrap(),
            b"Hey Bob, this is a secure message!"
        );

        println!("Step 6: Bob replies...");
        let (reply_type, reply) = bob_session.encrypt(b"Hi Alice!").unwrap();
        assert_eq!(reply_type, MessageType::Normal);
        assert_eq!(
            alice_session.decrypt(reply_type, &reply).unwrap(),
            b"Hi Alice!"
        );

        println!("Step 7: Bob drops the consumed one-time key...");
        bob.remove_one_time_keys(&bob_session).unwrap();

        println!("Step 8: Conversation continues with ordinary messages...");
        for round in 0..5 {
            let text = format!("Alice round {round}");
            let (message_type, message) = alice_session.encrypt(text.as_bytes()).unwrap();
            assert_eq!(message_type, MessageType::Normal);
            assert_eq!(
                bob_session.decrypt(message_type, &message).unwrap(),
                text.as_bytes()
            );

            let text = format!("Bob round {round}");
            let (message_type, message) = bob_session.encrypt(text.as_bytes()).unwrap();
            assert_eq!(
                alice_session.decrypt(message_type, &message).unwrap(),
                text.as_bytes()
            );
        }
    }

    #[test]
    fn test_out_of_order_delivery() {
        init_tracing();
        let alice = Account::new(None).unwrap();
        let mut bob = Account::new(None).unwrap();
        let (mut alice_session, mut bob_session) = establish(&alice, &mut bob);

        let m1 = alice_session.encrypt(b"M1").unwrap();
        let m2 = alice_session.encrypt(b"M2").unwrap();
        let m3 = alice_session.encrypt(b"M3").unwrap();

        assert_eq!(bob_session.decrypt(m3.0, &m3.1).unwrap(), b"M3");
        assert_eq!(bob_session.decrypt(m1.0, &m1.1).unwrap(), b"M1");
        assert_eq!(bob_session.decrypt(m2.0, &m2.1).unwrap(), b"M2");

        // Each skipped key is gone once used
        assert_eq!(
            bob_session.decrypt(m1.0, &m1.1).unwrap_err(),
            Error::DecryptFailure
        );
    }

    #[test]
    fn test_out_of_order_across_turns() {
        let alice = Account::new(None).unwrap();
        let mut bob = Account::new(None).unwrap();
        let (mut alice_session, mut bob_session) = establish(&alice, &mut bob);

        let (reply_type, reply) = bob_session.encrypt(b"ack").unwrap();
        let delayed = alice_session.encrypt(b"delayed").unwrap();
        alice_session.decrypt(reply_type, &reply).unwrap();
        let fresh = alice_session.encrypt(b"fresh").unwrap();

        assert_eq!(bob_session.decrypt(fresh.0, &fresh.1).unwrap(), b"fresh");
        assert_eq!(
            bob_session.decrypt(delayed.0, &delayed.1).unwrap(),
            b"delayed"
        );
    }

    #[test]
    fn test_no_ciphertext_reuse() {
        let alice = Account::new(None).unwrap();
        let mut bob = Account::new(None).unwrap();
        let (mut alice_session, mut bob_session) = establish(&alice, &mut bob);

        let first = alice_session.encrypt(b"same plaintext").unwrap();
        let second = alice_session.encrypt(b"same plaintext").unwrap();
        assert_ne!(first.1, second.1);

        let first = bob_session.encrypt(b"same plaintext").unwrap();
        let second = bob_session.encrypt(b"same plaintext").unwrap();
        assert_ne!(first.1, second.1);
    }

    #[test]
    fn test_forward_secrecy() {
        let alice = Account::new(None).unwrap();
        let mut bob = Account::new(None).unwrap();
        let (mut alice_session, mut bob_session) = establish(&alice, &mut bob);

        let mut delivered = Vec::new();
        for index in 0..4 {
            let message = alice_session
                .encrypt(format!("secret {index}").as_bytes())
                .unwrap();
            bob_session.decrypt(message.0, &message.1).unwrap();
            delivered.push(message);

            let reply = bob_session.encrypt(b"ok").unwrap();
            alice_session.decrypt(reply.0, &reply.1).unwrap();
        }

        // A full copy of Bob's current state cannot read any earlier message
        let snapshot = bob_session.pickle(b"snapshot").unwrap();
        let mut compromised = Session::from_pickle(b"snapshot", &snapshot).unwrap();
        for (message_type, message) in &delivered {
            assert_eq!(
                compromised.decrypt(*message_type, message).unwrap_err(),
                Error::DecryptFailure
            );
        }
    }

    #[test]
    fn test_one_time_key_exhaustion() {
        let alice = Account::new(None).unwrap();
        let mut bob = Account::new(None).unwrap();
        bob.generate_one_time_keys(1).unwrap();
        let bundle = bob.identity_bundle();
        let one_time_key = first_one_time_key(&bundle);

        let mut alice_session = alice
            .create_outbound_session(&bundle.identity_keys, &one_time_key)
            .unwrap();
        let (_, message) = alice_session.encrypt(b"hello").unwrap();
        bob.create_inbound_session(&message).unwrap();

        // A second initiator racing for the same key
        let carol = Account::new(None).unwrap();
        let mut carol_session = carol
            .create_outbound_session(&bundle.identity_keys, &one_time_key)
            .unwrap();
        let (_, message) = carol_session.encrypt(b"hello too").unwrap();

        assert_eq!(
            bob.create_inbound_session(&message).err(),
            Some(Error::UnknownOneTimeKey(one_time_key.id))
        );
    }

    #[test]
    fn test_skip_limit_leaves_state_untouched() {
        let config = AccountConfig {
            max_skip: 5,
            ..AccountConfig::default()
        };
        let alice = Account::new(Some(config.clone())).unwrap();
        let mut bob = Account::new(Some(config)).unwrap();
        let (mut alice_session, mut bob_session) = establish(&alice, &mut bob);

        let messages: Vec<(MessageType, Vec<u8>)> = (1..=7)
            .map(|index| {
                alice_session
                    .encrypt(format!("message {index}").as_bytes())
                    .unwrap()
            })
            .collect();

        let before = bob_session.pickle(b"key").unwrap();
        let last = &messages[6];
        assert_eq!(
            bob_session.decrypt(last.0, &last.1).unwrap_err(),
            Error::TooManySkippedMessages {
                requested: 6,
                max: 5
            }
        );

        // Same behaviour as a copy taken before the failure
        let mut restored = Session::from_pickle(b"key", &before).unwrap();
        for session in [&mut bob_session, &mut restored] {
            assert_eq!(
                session.decrypt(messages[0].0, &messages[0].1).unwrap(),
                b"message 1"
            );
            assert_eq!(
                session.decrypt(last.0, &last.1).unwrap(),
                b"message 7"
            );
        }
    }

    #[test]
    fn test_multiple_sessions() {
        let alice = Account::new(None).unwrap();
        let carol = Account::new(None).unwrap();
        let mut bob = Account::new(None).unwrap();
        bob.generate_one_time_keys(2).unwrap();
        let bundle = bob.identity_bundle();
        let mut keys = bundle.one_time_keys.values().copied();
        let (alice_key, carol_key) = (keys.next().unwrap(), keys.next().unwrap());

        let mut alice_session = alice
            .create_outbound_session(&bundle.identity_keys, &alice_key)
            .unwrap();
        let mut carol_session = carol
            .create_outbound_session(&bundle.identity_keys, &carol_key)
            .unwrap();
        let (_, from_alice) = alice_session.encrypt(b"from alice").unwrap();
        let (_, from_carol) = carol_session.encrypt(b"from carol").unwrap();

        let bob_alice = bob
            .create_inbound_session_from(&alice.identity_keys().curve25519, &from_alice)
            .unwrap();
        let bob_carol = bob.create_inbound_session(&from_carol).unwrap();

        assert_ne!(bob_alice.session_id(), bob_carol.session_id());
        assert!(bob_alice.matches_inbound(&from_alice));
        assert!(!bob_alice.matches_inbound(&from_carol));
        assert!(bob_carol.matches_inbound_from(&carol.identity_keys().curve25519, &from_carol));
        assert!(!bob_carol.matches_inbound_from(&alice.identity_keys().curve25519, &from_carol));

        // A pre-key message meant for another session is refused
        let mut bob_alice = bob_alice;
        assert_eq!(
            bob_alice
                .decrypt(MessageType::PreKey, &from_carol)
                .unwrap_err(),
            Error::KeyMismatch
        );
    }

    #[test]
    fn test_account_pickle_round_trip() {
        init_tracing();
        let mut account = Account::new(None).unwrap();
        account.generate_one_time_keys(3).unwrap();
        account.mark_published();
        account.generate_one_time_keys(2).unwrap();

        let pickle = account.pickle(b"passphrase").unwrap();
        let mut restored = Account::from_pickle(b"passphrase", &pickle).unwrap();

        assert_eq!(restored.identity_keys(), account.identity_keys());
        assert_eq!(restored.identity_bundle(), account.identity_bundle());
        assert_eq!(restored.config(), account.config());

        // Ids continue where the original left off
        assert_eq!(restored.generate_one_time_keys(1).unwrap(), vec![6]);

        let signature = restored.sign(b"same identity");
        assert!(account
            .identity_keys()
            .verify(b"same identity", &signature)
            .is_ok());
    }

    #[test]
    fn test_pickle_rejections() {
        let account = Account::new(None).unwrap();
        let pickle = account.pickle(b"right").unwrap();

        assert_eq!(
            Account::from_pickle(b"wrong", &pickle).err(),
            Some(Error::BadPickleKey)
        );
        assert_eq!(
            Session::from_pickle(b"right", &pickle).err(),
            Some(Error::BadPickleKey)
        );

        let mut corrupted = pickle.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0x80;
        assert_eq!(
            Account::from_pickle(b"right", &corrupted).err(),
            Some(Error::BadPickleKey)
        );

        let mut future = pickle;
        future[0] = 0x7f;
        assert_eq!(
            Account::from_pickle(b"right", &future).err(),
            Some(Error::UnsupportedPickleVersion(0x7f))
        );
    }

    #[test]
    fn test_session_pickle_round_trip() {
        let alice = Account::new(None).unwrap();
        let mut bob = Account::new(None).unwrap();
        let (mut alice_session, bob_session) = establish(&alice, &mut bob);

        // Leave a skipped key behind so it has to survive the round trip
        let skipped = alice_session.encrypt(b"skipped").unwrap();
        let delivered = alice_session.encrypt(b"delivered").unwrap();

        let pickle = bob_session.pickle(b"session key").unwrap();
        drop(bob_session);
        let mut bob_session = Session::from_pickle(b"session key", &pickle).unwrap();

        assert_eq!(bob_session.role(), Role::Responder);
        assert!(bob_session.has_received_message());
        assert_eq!(
            bob_session.remote_identity_key(),
            alice.identity_keys().curve25519
        );

        assert_eq!(
            bob_session.decrypt(delivered.0, &delivered.1).unwrap(),
            b"delivered"
        );
        let pickle = bob_session.pickle(b"session key").unwrap();
        let mut bob_session = Session::from_pickle(b"session key", &pickle).unwrap();
        assert_eq!(
            bob_session.decrypt(skipped.0, &skipped.1).unwrap(),
            b"skipped"
        );

        let (reply_type, reply) = bob_session.encrypt(b"after restore").unwrap();
        assert_eq!(
            alice_session.decrypt(reply_type, &reply).unwrap(),
            b"after restore"
        );
    }

    #[test]
    fn test_insufficient_randomness_is_atomic() {
        assert_eq!(
            Account::new_with_rng(None, &mut ExhaustedRng).err(),
            Some(Error::InsufficientRandomness)
        );

        let alice = Account::new(None).unwrap();
        let mut bob = Account::new(None).unwrap();

        assert_eq!(
            bob.generate_one_time_keys_with_rng(3, &mut ExhaustedRng)
                .unwrap_err(),
            Error::InsufficientRandomness
        );
        assert!(bob.identity_bundle().one_time_keys.is_empty());

        bob.generate_one_time_keys(1).unwrap();
        let bundle = bob.identity_bundle();
        assert_eq!(
            alice
                .create_outbound_session_with_rng(
                    &bundle.identity_keys,
                    &first_one_time_key(&bundle),
                    &mut ExhaustedRng,
                )
                .err(),
            Some(Error::InsufficientRandomness)
        );

        let mut alice_session = alice
            .create_outbound_session(&bundle.identity_keys, &first_one_time_key(&bundle))
            .unwrap();
        let (message_type, message) = alice_session.encrypt(b"hello").unwrap();
        let mut bob_session = bob.create_inbound_session(&message).unwrap();
        bob_session.decrypt(message_type, &message).unwrap();

        // Bob's first reply needs a fresh ratchet key
        assert_eq!(
            bob_session
                .encrypt_with_rng(b"reply", &mut ExhaustedRng)
                .unwrap_err(),
            Error::InsufficientRandomness
        );
        let (reply_type, reply) = bob_session.encrypt(b"reply").unwrap();
        assert_eq!(alice_session.decrypt(reply_type, &reply).unwrap(), b"reply");

        assert_eq!(
            bob_session
                .pickle_with_rng(b"key", &mut ExhaustedRng)
                .unwrap_err(),
            Error::InsufficientRandomness
        );
    }

    #[test]
    fn test_mismatched_protocol_info_never_agrees() {
        let alice = Account::new(Some(AccountConfig {
            protocol_info: b"Other-Protocol".to_vec(),
            ..AccountConfig::default()
        }))
        .unwrap();
        let mut bob = Account::new(None).unwrap();
        bob.generate_one_time_keys(1).unwrap();
        let bundle = bob.identity_bundle();

        let mut alice_session = alice
            .create_outbound_session(&bundle.identity_keys, &first_one_time_key(&bundle))
            .unwrap();
        let (_, message) = alice_session.encrypt(b"hello").unwrap();

        assert_eq!(
            bob.create_inbound_session(&message).err(),
            Some(Error::DecryptFailure)
        );
        // The key was not consumed by the failed attempt
        assert_eq!(bob.identity_bundle(), bundle);
    }

    #[test]
    fn test_version() {
        assert!(!parley::version().is_empty());
    }
}
