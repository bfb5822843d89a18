//! Unit tests for credential resolution

use super::*;
use crate::credentials::{CredentialUpdate, EncodedSecret, MasterKey};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const SYSTEM_YOUTUBE_KEY: &str = "AIzaSySystemDefault0000";

fn test_cipher() -> Arc<SecretCipher> {
    Arc::new(SecretCipher::new(MasterKey::from_bytes([3u8; 32])))
}

fn youtube_defaults() -> Arc<dyn DefaultCredentials> {
    let mut defaults = HashMap::new();
    defaults.insert(Platform::Youtube, SYSTEM_YOUTUBE_KEY.to_string());
    Arc::new(defaults)
}

/// Repository double that counts calls and can be told to fail.
#[derive(Default)]
struct RecordingRepository {
    records: Mutex<Vec<StoredCredential>>,
    lookups: AtomicUsize,
    touched: Mutex<Vec<Uuid>>,
    fail_lookup: bool,
    fail_touch: bool,
}

impl CredentialRepository for RecordingRepository {
    fn find_active_credential(
        &self,
        id: Uuid,
        owner_id: &str,
        platform: Platform,
    ) -> anyhow::Result<Option<StoredCredential>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup {
            return Err(anyhow!("database is locked"));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id && r.owner_id == owner_id && r.platform == platform && r.is_active)
            .cloned())
    }

    fn touch_last_used(&self, id: Uuid) -> anyhow::Result<()> {
        self.touched.lock().unwrap().push(id);
        if self.fail_touch {
            return Err(anyhow!("disk full"));
        }
        Ok(())
    }
}

fn stored(cipher: &SecretCipher, owner: &str, platform: Platform, key: &str) -> StoredCredential {
    StoredCredential {
        id: Uuid::now_v7(),
        owner_id: owner.to_string(),
        platform,
        secret: cipher.encrypt(key).unwrap().encode(),
        label: None,
        is_active: true,
        last_used_at: None,
    }
}

async fn wait_for_touch(repository: &RecordingRepository) -> Vec<Uuid> {
    for _ in 0..100 {
        let touched = repository.touched.lock().unwrap().clone();
        if !touched.is_empty() {
            return touched;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Vec::new()
}

#[tokio::test]
async fn test_no_key_id_uses_system_default() {
    let repository = Arc::new(RecordingRepository::default());
    let resolver = CredentialResolver::new(test_cipher(), repository.clone(), youtube_defaults());

    let resolved = resolver.resolve(Platform::Youtube, None, Some("user1")).await.unwrap();

    assert_eq!(resolved.plaintext(), SYSTEM_YOUTUBE_KEY);
    assert_eq!(resolved.source, CredentialSource::System);
    assert!(resolved.record_id.is_none());
    assert!(resolved.fallback_from.is_none());
    assert_eq!(repository.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_system_default_names_platform() {
    let resolver = CredentialResolver::new(
        test_cipher(),
        Arc::new(RecordingRepository::default()),
        youtube_defaults(),
    );

    let err = resolver.resolve(Platform::Instagram, None, None).await.unwrap_err();

    assert!(matches!(err, ResolveError::NoCredential { platform: Platform::Instagram }));
    assert_eq!(err.to_string(), "no credential available for INSTAGRAM");
    assert_eq!(err.kind(), ErrorKind::Resolution);
}

#[tokio::test]
async fn test_blank_system_default_counts_as_missing() {
    let mut defaults = HashMap::new();
    defaults.insert(Platform::Youtube, "   ".to_string());
    let resolver = CredentialResolver::new(
        test_cipher(),
        Arc::new(RecordingRepository::default()),
        Arc::new(defaults),
    );

    let err = resolver.resolve(Platform::Youtube, None, None).await.unwrap_err();
    assert!(matches!(err, ResolveError::NoCredential { .. }));
}

#[tokio::test]
async fn test_key_without_user_is_unauthorized_and_skips_store() {
    let repository = Arc::new(RecordingRepository::default());
    let resolver = CredentialResolver::new(test_cipher(), repository.clone(), youtube_defaults());

    let err = resolver
        .resolve(Platform::Youtube, Some(Uuid::now_v7()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Unauthorized));

    let err = resolver
        .resolve(Platform::Youtube, Some(Uuid::now_v7()), Some("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Unauthorized));

    assert_eq!(repository.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_key_falls_back_to_system_default() {
    let repository = Arc::new(RecordingRepository::default());
    let resolver = CredentialResolver::new(test_cipher(), repository.clone(), youtube_defaults());
    let key_id = Uuid::now_v7();

    let resolved = resolver
        .resolve(Platform::Youtube, Some(key_id), Some("user1"))
        .await
        .unwrap();

    assert_eq!(resolved.source, CredentialSource::System);
    assert_eq!(resolved.plaintext(), SYSTEM_YOUTUBE_KEY);
    assert_eq!(resolved.fallback_from, Some(key_id));
    assert_eq!(repository.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_other_users_key_falls_back() {
    let cipher = test_cipher();
    let record = stored(&cipher, "owner", Platform::Youtube, "AIzaSyOwnersPrivateKey1");
    let key_id = record.id;
    let repository = Arc::new(RecordingRepository {
        records: Mutex::new(vec![record]),
        ..Default::default()
    });
    let resolver = CredentialResolver::new(cipher, repository, youtube_defaults());

    let resolved = resolver
        .resolve(Platform::Youtube, Some(key_id), Some("intruder"))
        .await
        .unwrap();

    assert_eq!(resolved.source, CredentialSource::System);
    assert_ne!(resolved.plaintext(), "AIzaSyOwnersPrivateKey1");
}

#[tokio::test]
async fn test_strict_policy_rejects_unavailable_key() {
    let resolver = CredentialResolver::new(
        test_cipher(),
        Arc::new(RecordingRepository::default()),
        youtube_defaults(),
    )
    .with_policy(FallbackPolicy::Reject);
    let key_id = Uuid::now_v7();

    let err = resolver
        .resolve(Platform::Youtube, Some(key_id), Some("user1"))
        .await
        .unwrap_err();

    match err {
        ResolveError::KeyUnavailable { platform, key_id: rejected } => {
            assert_eq!(platform, Platform::Youtube);
            assert_eq!(rejected, key_id);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_user_key_is_decrypted_and_touched() {
    let cipher = test_cipher();
    let record = stored(&cipher, "user1", Platform::Instagram, "rapidapi-user-key-42");
    let key_id = record.id;
    let repository = Arc::new(RecordingRepository {
        records: Mutex::new(vec![record]),
        ..Default::default()
    });
    let resolver = CredentialResolver::new(cipher, repository.clone(), youtube_defaults());

    let resolved = resolver
        .resolve(Platform::Instagram, Some(key_id), Some("user1"))
        .await
        .unwrap();

    assert_eq!(resolved.plaintext(), "rapidapi-user-key-42");
    assert_eq!(resolved.source, CredentialSource::User);
    assert_eq!(resolved.record_id, Some(key_id));
    assert!(resolved.fallback_from.is_none());

    assert_eq!(wait_for_touch(&repository).await, vec![key_id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decrypts_share_kdf_slots() {
    let cipher =
        Arc::new(SecretCipher::new(MasterKey::from_bytes([3u8; 32])).with_max_concurrent_kdf(1));
    let record = stored(&cipher, "user1", Platform::Youtube, "AIzaSyDTestKey123456789");
    let key_id = record.id;
    let repository = Arc::new(RecordingRepository {
        records: Mutex::new(vec![record]),
        ..Default::default()
    });
    let resolver = CredentialResolver::new(Arc::clone(&cipher), repository, youtube_defaults());

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                resolver
                    .resolve(Platform::Youtube, Some(key_id), Some("user1"))
                    .await
                    .map(|resolved| resolved.source)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), CredentialSource::User);
    }
    assert_eq!(cipher.available_kdf_slots(), 1);
}

#[tokio::test]
async fn test_touch_failure_does_not_fail_resolution() {
    let cipher = test_cipher();
    let record = stored(&cipher, "user1", Platform::Youtube, "AIzaSyUserKey000000001");
    let key_id = record.id;
    let repository = Arc::new(RecordingRepository {
        records: Mutex::new(vec![record]),
        fail_touch: true,
        ..Default::default()
    });
    let resolver = CredentialResolver::new(cipher, repository.clone(), youtube_defaults());

    let resolved = resolver
        .resolve(Platform::Youtube, Some(key_id), Some("user1"))
        .await
        .unwrap();

    assert_eq!(resolved.source, CredentialSource::User);
    assert_eq!(wait_for_touch(&repository).await, vec![key_id]);
}

#[tokio::test]
async fn test_tampered_auth_tag_is_corruption_not_fallback() {
    let cipher = test_cipher();
    let mut record = stored(&cipher, "user1", Platform::Youtube, "AIzaSyUserKey000000001");
    let mut tag = BASE64.decode(&record.secret.auth_tag).unwrap();
    tag[0] ^= 0xff;
    record.secret.auth_tag = BASE64.encode(&tag);
    let key_id = record.id;

    let repository = Arc::new(RecordingRepository {
        records: Mutex::new(vec![record]),
        ..Default::default()
    });
    let resolver = CredentialResolver::new(cipher, repository.clone(), youtube_defaults());

    let err = resolver
        .resolve(Platform::Youtube, Some(key_id), Some("user1"))
        .await
        .unwrap_err();

    match &err {
        ResolveError::Corrupted { record_id, source } => {
            assert_eq!(*record_id, key_id);
            assert_eq!(*source, CipherError::DecryptionFailed);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.kind(), ErrorKind::Corruption);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(repository.touched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_record_is_corruption() {
    let cipher = test_cipher();
    let mut record = stored(&cipher, "user1", Platform::Youtube, "AIzaSyUserKey000000001");
    record.secret = EncodedSecret {
        salt: String::new(),
        ..record.secret
    };
    let key_id = record.id;
    let repository = Arc::new(RecordingRepository {
        records: Mutex::new(vec![record]),
        ..Default::default()
    });
    let resolver = CredentialResolver::new(cipher, repository, youtube_defaults());

    let err = resolver
        .resolve(Platform::Youtube, Some(key_id), Some("user1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResolveError::Corrupted {
            source: CipherError::MissingFields,
            ..
        }
    ));
}

#[tokio::test]
async fn test_record_under_other_master_key_is_corruption() {
    let other_cipher = SecretCipher::new(MasterKey::from_bytes([9u8; 32]));
    let record = stored(&other_cipher, "user1", Platform::Youtube, "AIzaSyUserKey000000001");
    let key_id = record.id;
    let repository = Arc::new(RecordingRepository {
        records: Mutex::new(vec![record]),
        ..Default::default()
    });
    let resolver = CredentialResolver::new(test_cipher(), repository, youtube_defaults());

    let err = resolver
        .resolve(Platform::Youtube, Some(key_id), Some("user1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Corruption);
}

#[tokio::test]
async fn test_lookup_failure_is_storage_error() {
    let repository = Arc::new(RecordingRepository {
        fail_lookup: true,
        ..Default::default()
    });
    let resolver = CredentialResolver::new(test_cipher(), repository, youtube_defaults());

    let err = resolver
        .resolve(Platform::Youtube, Some(Uuid::now_v7()), Some("user1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.to_string().contains("database is locked"));
}

#[tokio::test]
async fn test_debug_redacts_plaintext() {
    let resolver = CredentialResolver::new(
        test_cipher(),
        Arc::new(RecordingRepository::default()),
        youtube_defaults(),
    );
    let resolved = resolver.resolve(Platform::Youtube, None, None).await.unwrap();

    let rendered = format!("{:?}", resolved);
    assert!(!rendered.contains(SYSTEM_YOUTUBE_KEY));
    assert!(rendered.contains("<redacted>"));
}

#[tokio::test]
async fn test_resolves_through_sqlite_store() {
    let cipher = test_cipher();
    let store = Arc::new(CredentialStore::new(":memory:", Arc::clone(&cipher)).unwrap());
    let added = store
        .add("user1", Platform::Youtube, "AIzaSyStoredKey12345678", Some("main"))
        .unwrap();
    let resolver = CredentialResolver::new(cipher, store.clone(), youtube_defaults());

    let resolved = resolver
        .resolve(Platform::Youtube, Some(added.id), Some("user1"))
        .await
        .unwrap();
    assert_eq!(resolved.plaintext(), "AIzaSyStoredKey12345678");
    assert_eq!(resolved.source, CredentialSource::User);

    let mut last_used = None;
    for _ in 0..100 {
        last_used = store.get_summary("user1", added.id).unwrap().unwrap().last_used_at;
        if last_used.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(last_used.is_some());

    store
        .update(
            "user1",
            added.id,
            &CredentialUpdate {
                label: None,
                is_active: Some(false),
            },
        )
        .unwrap();
    let resolved = resolver
        .resolve(Platform::Youtube, Some(added.id), Some("user1"))
        .await
        .unwrap();
    assert_eq!(resolved.source, CredentialSource::System);
    assert_eq!(resolved.fallback_from, Some(added.id));
}

#[tokio::test]
async fn test_altered_auth_tag_in_store_is_corruption() {
    let cipher = test_cipher();
    let store = Arc::new(CredentialStore::new(":memory:", Arc::clone(&cipher)).unwrap());
    let added = store
        .add("user1", Platform::Youtube, "AIzaSyStoredKey12345678", None)
        .unwrap();

    let mut secret = store
        .find_active_credential(added.id, "user1", Platform::Youtube)
        .unwrap()
        .unwrap()
        .secret;
    let mut tag = BASE64.decode(&secret.auth_tag).unwrap();
    tag[15] ^= 0x01;
    secret.auth_tag = BASE64.encode(&tag);
    store.overwrite_secret(added.id, &secret).unwrap();

    let resolver = CredentialResolver::new(cipher, store, youtube_defaults());
    let err = resolver
        .resolve(Platform::Youtube, Some(added.id), Some("user1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::Corrupted { record_id, .. } if record_id == added.id));
}
