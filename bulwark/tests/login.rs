use std::sync::Arc;

use async_trait::async_trait;
use bulwark::{
    Bulwark, BulwarkBuilder, BulwarkError, CredentialVerifier, IncidentFilter, IncidentType,
    LockRequest, LoginOutcome, NewUser, RequestContext, SqliteRepositoryProvider, User,
};

struct StaticPassword(&'static str);

#[async_trait]
impl CredentialVerifier for StaticPassword {
    async fn verify(&self, _user: &User, password: &str) -> Result<bool, BulwarkError> {
        Ok(password == self.0)
    }
}

struct BrokenVerifier;

#[async_trait]
impl CredentialVerifier for BrokenVerifier {
    async fn verify(&self, _user: &User, _password: &str) -> Result<bool, BulwarkError> {
        Err(BulwarkError::Verifier("hash store offline".to_string()))
    }
}

async fn setup() -> Bulwark<SqliteRepositoryProvider> {
    let _ = tracing_subscriber::fmt().try_init();

    BulwarkBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect")
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build Bulwark")
}

fn context() -> RequestContext {
    RequestContext::new(Some("203.0.113.7".to_string()), Some("test-agent".to_string()))
}

#[tokio::test]
async fn test_successful_login_clears_failures() {
    let bulwark = setup().await;
    let verifier = StaticPassword("correct horse");
    bulwark.create_user(NewUser::new("alice")).await.unwrap();

    for _ in 0..2 {
        let outcome = bulwark
            .authenticate("alice", "wrong", &context(), &verifier)
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::InvalidCredentials { .. }));
    }

    let status = bulwark.check_login_rate_limit("alice").await.unwrap();
    assert_eq!(status.remaining_attempts, Some(3));

    let outcome = bulwark
        .authenticate("alice", "correct horse", &context(), &verifier)
        .await
        .unwrap();
    assert!(outcome.is_success());

    let status = bulwark.check_login_rate_limit("alice").await.unwrap();
    assert!(status.allowed);
    assert_eq!(status.remaining_attempts, Some(5));

    let successes = bulwark
        .get_security_incidents(&IncidentFilter::default().incident_type(IncidentType::SuccessfulLogin))
        .await
        .unwrap();
    assert_eq!(successes.total, 1);
    assert_eq!(successes.incidents[0].ip_address.as_deref(), Some("203.0.113.7"));
}

#[tokio::test]
async fn test_fifth_failure_locks_account() {
    let bulwark = setup().await;
    let verifier = StaticPassword("correct horse");
    let alice = bulwark.create_user(NewUser::new("alice")).await.unwrap();

    for expected_remaining in [4, 3, 2, 1] {
        let outcome = bulwark
            .authenticate("alice", "wrong", &context(), &verifier)
            .await
            .unwrap();
        match outcome {
            LoginOutcome::InvalidCredentials { remaining_attempts } => {
                assert_eq!(remaining_attempts, Some(expected_remaining));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    let status = bulwark.check_login_rate_limit("alice").await.unwrap();
    assert!(status.allowed);
    assert_eq!(status.remaining_attempts, Some(1));

    let outcome = bulwark
        .authenticate("alice", "wrong", &context(), &verifier)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        LoginOutcome::InvalidCredentials {
            remaining_attempts: Some(0)
        }
    ));

    let status = bulwark.check_login_rate_limit("alice").await.unwrap();
    assert!(!status.allowed);
    assert!(status.lockout_until.unwrap() > chrono::Utc::now());

    let stored = bulwark.get_user(&alice.id).await.unwrap().unwrap();
    assert!(bulwark.is_account_locked(&stored));

    // The right password does not help while locked out.
    let outcome = bulwark
        .authenticate("alice", "correct horse", &context(), &verifier)
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Throttled { .. }));

    let locks = bulwark
        .get_security_incidents(&IncidentFilter::default().incident_type(IncidentType::AccountLocked))
        .await
        .unwrap();
    assert!(locks.total >= 1);
    assert!(
        locks
            .incidents
            .iter()
            .all(|incident| incident.username.as_deref() == Some("alice"))
    );

    let failures = bulwark
        .get_security_incidents(&IncidentFilter::default().incident_type(IncidentType::FailedLogin))
        .await
        .unwrap();
    assert_eq!(failures.total, 5);
}

#[tokio::test]
async fn test_unknown_user_is_indistinguishable() {
    let bulwark = setup().await;
    let verifier = StaticPassword("correct horse");
    bulwark.create_user(NewUser::new("alice")).await.unwrap();

    let unknown = bulwark
        .authenticate("mallory", "guess", &context(), &verifier)
        .await
        .unwrap();
    let wrong = bulwark
        .authenticate("alice", "guess", &context(), &verifier)
        .await
        .unwrap();

    assert_eq!(unknown.public_message(), wrong.public_message());

    for _ in 0..4 {
        bulwark
            .authenticate("mallory", "guess", &context(), &verifier)
            .await
            .unwrap();
    }

    let throttled = bulwark
        .authenticate("mallory", "guess", &context(), &verifier)
        .await
        .unwrap();
    assert!(matches!(throttled, LoginOutcome::Throttled { .. }));
    assert_eq!(throttled.public_message(), wrong.public_message());
}

#[tokio::test]
async fn test_admin_lock_reports_reason() {
    let bulwark = setup().await;
    let verifier = StaticPassword("correct horse");
    let bob = bulwark.create_user(NewUser::new("bob")).await.unwrap();

    bulwark
        .lock_account(
            &LockRequest::new(bob.id.clone())
                .reason("fraud review")
                .indefinite()
                .locked_by("admin-1"),
        )
        .await
        .unwrap();

    let outcome = bulwark
        .authenticate("bob", "correct horse", &context(), &verifier)
        .await
        .unwrap();

    match outcome {
        LoginOutcome::Locked {
            message,
            locked_until,
        } => {
            assert_eq!(message, "Account is locked: fraud review");
            assert!(locked_until.is_none());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // A locked account does not accumulate failures.
    let status = bulwark.check_login_rate_limit("bob").await.unwrap();
    assert_eq!(status.remaining_attempts, Some(5));
}

#[tokio::test]
async fn test_expired_lock_is_swept_on_login() {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    let bulwark = BulwarkBuilder::new()
        .with_sqlite_pool(pool.clone())
        .apply_migrations(true)
        .build()
        .await
        .unwrap();
    let verifier = StaticPassword("correct horse");
    let carol = bulwark.create_user(NewUser::new("carol")).await.unwrap();

    bulwark
        .lock_account(&LockRequest::new(carol.id.clone()).duration_minutes(15))
        .await
        .unwrap();

    sqlx::query("UPDATE users SET locked_until = ?1 WHERE id = ?2")
        .bind(chrono::Utc::now().timestamp() - 60)
        .bind(carol.id.as_str())
        .execute(&pool)
        .await
        .unwrap();

    let outcome = bulwark
        .authenticate("carol", "correct horse", &context(), &verifier)
        .await
        .unwrap();
    assert!(outcome.is_success());

    let stored = bulwark.get_user(&carol.id).await.unwrap().unwrap();
    assert!(!stored.lock.locked);
    assert!(stored.lock.locked_until.is_none());
}

#[tokio::test]
async fn test_verifier_error_is_returned() {
    let bulwark = setup().await;
    bulwark.create_user(NewUser::new("alice")).await.unwrap();

    let result = bulwark
        .authenticate("alice", "whatever", &context(), &BrokenVerifier)
        .await;
    assert!(matches!(result, Err(BulwarkError::Verifier(_))));

    // Nothing was counted against alice.
    let status = bulwark.check_login_rate_limit("alice").await.unwrap();
    assert_eq!(status.remaining_attempts, Some(5));
}

#[tokio::test]
async fn test_blank_username_rejected() {
    let bulwark = setup().await;

    let result = bulwark
        .authenticate("   ", "whatever", &context(), &StaticPassword("x"))
        .await;
    assert!(result.unwrap_err().is_validation_error());
}

#[tokio::test]
async fn test_verifier_as_trait_object() {
    let bulwark = setup().await;
    bulwark.create_user(NewUser::new("dave")).await.unwrap();

    let verifier: Arc<dyn CredentialVerifier> = Arc::new(StaticPassword("pw"));
    let outcome = bulwark
        .authenticate("dave", "pw", &RequestContext::default(), verifier.as_ref())
        .await
        .unwrap();
    assert!(outcome.is_success());
}
