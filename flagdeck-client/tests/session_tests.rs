//! Session lifecycle: sign-in, sign-out, expiry and password change.

use flagdeck_client::cache::CacheKey;
use flagdeck_client::core::{ChangePasswordRequest, UpdateProjectRequest};
use flagdeck_client::{ErrorKind, SessionEvent, SignOutReason};
use flagdeck_test_utils::assertions::assert_error_kind;
use flagdeck_test_utils::{fixtures, Endpoint};


#[tokio::test]
async fn login_publishes_signed_in_and_starts_empty() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::client(&api);
    client.cache().set(&CacheKey::Users, &vec![seed.admin.clone()]).unwrap();
    let mut events = client.session().subscribe();

    let user = client
        .session()
        .login(fixtures::ADMIN_USERNAME, fixtures::ADMIN_PASSWORD)
        .await
        .unwrap();

    assert_eq!(user, seed.admin);
    assert!(client.session().is_authenticated());
    assert!(!client.cache().contains(&CacheKey::Users).unwrap());
    assert_eq!(
        test_support::recv_session_event(&mut events).await,
        SessionEvent::SignedIn(seed.admin)
    );
}

#[tokio::test]
async fn bad_credentials_leave_the_session_signed_out() {
    let (api, _) = fixtures::seeded();
    let client = test_support::client(&api);

    let result = client
        .session()
        .login(fixtures::ADMIN_USERNAME, "wrong-password")
        .await;
    assert_error_kind(&result, ErrorKind::Unauthorized);
    assert_eq!(
        result.unwrap_err().user_message(),
        "Invalid username or password"
    );
    assert!(client.session().current_user().is_none());

    let empty = client.session().login("", "").await;
    assert_error_kind(&empty, ErrorKind::Validation);
    assert_eq!(api.call_count(Endpoint::Login), 1);
}

#[tokio::test]
async fn expired_session_signs_out_and_clears_the_cache() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    let project_id = seed.project.id();
    client.project(project_id).await.unwrap();
    client.projects().await.unwrap();
    let mut events = client.session().subscribe();

    api.expire_session();
    let req = UpdateProjectRequest {
        name: "Renamed shop".to_string(),
        description: None,
    };
    let settled = client.update_project(project_id, &req).await;

    assert_error_kind(&settled.result, ErrorKind::Unauthorized);
    assert_eq!(
        test_support::recv_session_event(&mut events).await,
        SessionEvent::SignedOut(SignOutReason::Expired)
    );
    assert!(!client.session().is_authenticated());
    assert_eq!(client.cache().stats().unwrap().entries, 0);
    // Expiry is reported by the redirect, not a toast.
    assert!(client.drain_notifications().is_empty());
}

#[tokio::test]
async fn expired_session_on_a_read_signs_out() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;

    api.expire_session();
    let result = client.scopes(seed.project.id()).await;
    assert_error_kind(&result, ErrorKind::Unauthorized);
    assert!(client.session().current_user().is_none());
}

#[tokio::test]
async fn check_auth_restores_or_ends_the_session() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;

    assert_eq!(client.session().check_auth().await, Some(seed.admin.clone()));

    api.expire_session();
    let mut events = client.session().subscribe();
    assert_eq!(client.session().check_auth().await, None);
    assert_eq!(
        test_support::recv_session_event(&mut events).await,
        SessionEvent::SignedOut(SignOutReason::Expired)
    );
}

#[tokio::test]
async fn logout_clears_state_even_when_the_server_fails() {
    let (api, seed) = fixtures::seeded();
    let client = test_support::admin_client(&api).await;
    client.project(seed.project.id()).await.unwrap();
    let mut events = client.session().subscribe();

    api.fail_next(Endpoint::Logout, 500, None);
    let result = client.session().logout().await;

    assert_error_kind(&result, ErrorKind::Server);
    assert!(!client.session().is_authenticated());
    assert_eq!(client.cache().stats().unwrap().entries, 0);
    assert_eq!(
        test_support::recv_session_event(&mut events).await,
        SessionEvent::SignedOut(SignOutReason::Logout)
    );
}

#[tokio::test]
async fn change_password_clears_the_must_change_flag() {
    let (api, _) = fixtures::seeded();
    let mut fresh = fixtures::user("new-hire", flagdeck_client::core::GlobalRole::User);
    fresh.must_change_password = true;
    api.add_user(fresh.clone(), "temporary-pass");

    let client = test_support::client(&api);
    client.session().login("new-hire", "temporary-pass").await.unwrap();
    assert!(client.session().needs_password_change());

    let mismatched = ChangePasswordRequest {
        current_password: "temporary-pass".to_string(),
        new_password: "long-enough-secret".to_string(),
        confirm_password: "something-else".to_string(),
    };
    let err = client.session().change_password(&mismatched).await.unwrap_err();
    assert_eq!(err.field_error().map(|f| f.field.as_str()), Some("confirmPassword"));
    assert_eq!(api.call_count(Endpoint::ChangePassword), 0);

    let req = ChangePasswordRequest {
        current_password: "temporary-pass".to_string(),
        new_password: "long-enough-secret".to_string(),
        confirm_password: "long-enough-secret".to_string(),
    };
    client.session().change_password(&req).await.unwrap();
    assert!(!client.session().needs_password_change());

    client.session().logout().await.unwrap();
    assert!(client
        .session()
        .login("new-hire", "long-enough-secret")
        .await
        .is_ok());
}
