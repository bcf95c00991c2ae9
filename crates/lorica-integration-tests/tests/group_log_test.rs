//! End-to-end scenarios for the group log family, against a server that
//! enforces signatures, access proofs, and transition proofs.

use std::sync::Arc;

use lorica_bbs::keys::{generate_group_keypair, issue_credential, ManagerPrivateKey};
use lorica_chain::entry::{build_payload, seal_group_entry, GENESIS_HASH};
use lorica_crypto::identity::IdentityKeypair;
use lorica_dblog::replay::ReplayEngine;
use lorica_integration_tests::{actions, TestServer};
use lorica_mls::access::{self, EpochAccessKey};
use lorica_mls::group::create_group;
use lorica_mls::messages::MlsMessage;
use lorica_sync::group::GroupLog;
use lorica_sync::storage::{MemoryStorage, StorageBackend};
use lorica_sync::transport::{AppendGroupChainLogRequest, Transport, TransportError};
use lorica_sync::SyncConfig;

struct Fixture {
    server: Arc<TestServer>,
    manager: ManagerPrivateKey,
    group_id: String,
    creator: GroupLog,
    members: Vec<GroupLog>,
}

/// A creator and `member_count` joined members, registered on the server.
async fn group_fixture(member_count: usize) -> Fixture {
    let server = Arc::new(TestServer::new());
    let manager = generate_group_keypair();

    let identities: Vec<IdentityKeypair> =
        (0..member_count).map(|_| IdentityKeypair::generate()).collect();
    let publics: Vec<String> = identities
        .iter()
        .map(|identity| lorica_crypto::hex::encode(&identity.public_key()))
        .collect();

    let (mls, welcomes) = create_group(&publics).expect("create group");
    let group_id = mls.group_id().to_string();

    let creator_storage = Arc::new(MemoryStorage::new());
    creator_storage.save_group_state(&mls).await.expect("save state");
    creator_storage
        .save_credential(&group_id, &issue_credential(&manager).expect("issue"))
        .await
        .expect("save credential");
    creator_storage
        .save_group_public_key(&group_id, &manager.public_key)
        .await
        .expect("save gpk");

    let creator = GroupLog::new(
        group_id.clone(),
        "shared",
        IdentityKeypair::generate(),
        server.clone() as Arc<dyn Transport>,
        creator_storage,
        ReplayEngine::open_memory().expect("engine"),
        SyncConfig::default(),
    );
    creator.initialize().await.expect("initialize");
    creator.create_on_server().await.expect("register");

    let mut members = Vec::with_capacity(member_count);
    for (identity, welcome) in identities.into_iter().zip(&welcomes) {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save_credential(&group_id, &issue_credential(&manager).expect("issue"))
            .await
            .expect("save credential");
        storage
            .save_group_public_key(&group_id, &manager.public_key)
            .await
            .expect("save gpk");

        let log = GroupLog::new(
            group_id.clone(),
            "shared",
            identity,
            server.clone() as Arc<dyn Transport>,
            storage,
            ReplayEngine::open_memory().expect("engine"),
            SyncConfig::default(),
        );
        log.join_from_welcome(welcome).await.expect("join");
        log.initialize().await.expect("initialize");
        members.push(log);
    }

    Fixture {
        server,
        manager,
        group_id,
        creator,
        members,
    }
}

/// Scenario: three participants agree on the group key through creation,
/// welcomes, and a key rotation, and all replay the same entries.
#[tokio::test]
async fn three_party_agreement_and_replay() {
    let fixture = group_fixture(2).await;

    fixture
        .creator
        .append(&actions(
            r#"[{"type":"schema","v":1,"dblogindex":0,"table":"posts",
                 "columns":{"id":"TEXT PRIMARY KEY","body":"TEXT"}}]"#,
        ))
        .await
        .expect("append schema");

    for member in &fixture.members {
        member.sync().await.expect("sync");
        assert_eq!(member.head_index().await, Some(0));
    }

    // Member 0 rotates its key; everyone else applies the update.
    let update = fixture.members[0].update_own_key().await.expect("rotate");
    fixture
        .creator
        .apply_mls_message(&MlsMessage::Update(update.clone()))
        .await
        .expect("creator applies");
    fixture.members[1]
        .apply_mls_message(&MlsMessage::Update(update))
        .await
        .expect("member applies");

    // The rotating member announces the transition; everyone can still
    // write and read at the new epoch.
    fixture.members[0]
        .announce_epoch_transition()
        .await
        .expect("announce");
    fixture.members[1]
        .append(&actions(
            r#"[{"type":"set","v":1,"dblogindex":0,"table":"posts","id":"p1",
                 "data":{"body":"after rotation"}}]"#,
        ))
        .await
        .expect("append at new epoch");

    fixture.creator.sync().await.expect("creator sync");
    fixture.members[0].sync().await.expect("member 0 sync");
    assert_eq!(fixture.creator.head_index().await, Some(2));
    assert_eq!(fixture.members[0].head_index().await, Some(2));
}

/// Scenario: the server adopts a new access key only over a valid
/// transition proof, and stale-epoch proofs stop verifying afterwards.
#[tokio::test]
async fn epoch_transition_server_enforcement() {
    let fixture = group_fixture(1).await;
    let group_id = &fixture.group_id;

    fixture
        .creator
        .append(&actions(
            r#"[{"type":"schema","v":1,"dblogindex":0,"table":"posts",
                 "columns":{"id":"TEXT PRIMARY KEY"}}]"#,
        ))
        .await
        .expect("append at epoch 0");

    let k0 = fixture
        .server
        .current_access_key(group_id)
        .expect("registered");
    assert_eq!(k0.epoch, 0);

    // Rotate and announce; the server must now hold the epoch-1 key.
    let update = fixture.creator.update_own_key().await.expect("rotate");
    fixture.members[0]
        .apply_mls_message(&MlsMessage::Update(update))
        .await
        .expect("member applies");
    fixture
        .creator
        .announce_epoch_transition()
        .await
        .expect("announce");

    let k1 = fixture
        .server
        .current_access_key(group_id)
        .expect("still registered");
    assert_eq!(k1.epoch, 1);
    assert_ne!(k0.key, k1.key);

    // An entry proved under the stale epoch-0 key is rejected.
    let stale_key = k0;
    let credential = issue_credential(&fixture.manager).expect("issue");
    let sender = IdentityKeypair::generate();
    let payload = build_payload(&sender, "[]", 1, None).expect("payload");
    let head = fixture
        .server
        .group_head(group_id, "shared")
        .await
        .expect("head")
        .expect("nonempty");
    let stale = seal_group_entry(
        &payload,
        &[0x5au8; 32],
        head.index + 1,
        &head.hash,
        &credential,
        &fixture.manager.public_key,
        &stale_key,
    )
    .expect("seal");
    let result = fixture
        .server
        .group_append(
            group_id,
            "shared",
            AppendGroupChainLogRequest {
                entry: stale,
                new_access_key: None,
                transition_proof: None,
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(TransportError::HttpStatus { code: 403, .. })
    ));
}

/// A forged transition (substituted key or proof under the wrong base) is
/// rejected and the server keeps its current key.
#[tokio::test]
async fn forged_transition_rejected() {
    let fixture = group_fixture(1).await;
    let group_id = &fixture.group_id;
    let k0 = fixture
        .server
        .current_access_key(group_id)
        .expect("registered");

    let credential = issue_credential(&fixture.manager).expect("issue");
    let sender = IdentityKeypair::generate();
    let forged_key = EpochAccessKey {
        key: "11".repeat(32),
        epoch: 1,
    };
    // The proof is valid for a different key than the one submitted.
    let honest_next = EpochAccessKey::derive(&[0x77u8; 32], group_id, 1);
    let proof = access::transition_proof(&k0, &honest_next).expect("proof");

    let payload = build_payload(&sender, "[]", 1, None).expect("payload");
    let entry = seal_group_entry(
        &payload,
        &[0x5au8; 32],
        0,
        GENESIS_HASH,
        &credential,
        &fixture.manager.public_key,
        &k0,
    )
    .expect("seal");

    let result = fixture
        .server
        .group_append(
            group_id,
            "shared",
            AppendGroupChainLogRequest {
                entry,
                new_access_key: Some(forged_key),
                transition_proof: Some(proof),
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(TransportError::HttpStatus { code: 403, .. })
    ));
    assert_eq!(
        fixture.server.current_access_key(group_id).expect("key").key,
        k0.key
    );
}

/// A tampered group signature is rejected by the server.
#[tokio::test]
async fn tampered_group_signature_rejected() {
    let fixture = group_fixture(1).await;
    let group_id = &fixture.group_id;
    let k0 = fixture
        .server
        .current_access_key(group_id)
        .expect("registered");

    let other_group = generate_group_keypair();
    let foreign_credential = issue_credential(&other_group).expect("issue");
    let sender = IdentityKeypair::generate();
    let payload = build_payload(&sender, "[]", 0, None).expect("payload");

    // Signed with a credential from a different group.
    let entry = seal_group_entry(
        &payload,
        &[0x5au8; 32],
        0,
        GENESIS_HASH,
        &foreign_credential,
        &other_group.public_key,
        &k0,
    )
    .expect("seal");

    let result = fixture
        .server
        .group_append(
            group_id,
            "shared",
            AppendGroupChainLogRequest {
                entry,
                new_access_key: None,
                transition_proof: None,
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(TransportError::HttpStatus { code: 403, body }) if body.contains("signature")
    ));
}
