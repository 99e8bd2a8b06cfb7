//! Connection Wizard Flow Tests
//!
//! Drives the wizard with a scripted dialogue, an in-memory profile store
//! and a fake engine adapter. Covers:
//! - new connection with repeated failed connection tests
//! - reconnect, delete, and fall-through when nothing is saved
//! - bounded retry of unanswered prompts and explicit cancellation
//! - terminal abort when no schema is accessible
//! - thread naming after connect and schema selection

mod common;

use askdb::config::WizardConfig;
use askdb::profile::{ConnectionProfile, ProfileStore, SqliteProfileStore};
use askdb::wizard::{AbortReason, ConnectionWizard};
use common::*;
use pretty_assertions::assert_eq;

fn store() -> SqliteProfileStore {
    SqliteProfileStore::open_in_memory().expect("Should open in-memory store")
}

fn config(max_prompt_attempts: u32) -> WizardConfig {
    WizardConfig { max_prompt_attempts }
}

// ============================================================================
// New connection
// ============================================================================

#[tokio::test]
async fn test_three_failed_tests_then_success_persists_one_profile() {
    let service = service(FakeAdapter::with_connection_results(&[false, false, false, true]));
    let store = store();

    let mut script = vec![choice(0), choice(0)];
    for attempt in 0..4 {
        script.extend(postgres_answers(&format!("db{attempt}.internal"), "warehouse"));
    }
    script.push(choice(1));
    let dialogue = ScriptedDialogue::new(script);

    let session = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await
        .expect("Wizard should succeed");

    assert_eq!(session.schema, "sales");
    assert_eq!(session.profile.params.tcp.host, "db3.internal");
    assert_eq!(Calls::get(&service.adapter().calls.test_connection), 4);
    assert_eq!(dialogue.notes_containing("Could not connect"), 3);

    let saved = store.list_by_owner("a@x.com").unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, session.profile.id);
    assert_eq!(dialogue.remaining(), 0);
}

#[tokio::test]
async fn test_invalid_port_is_asked_again() {
    let service = service(FakeAdapter::default());
    let store = store();
    let dialogue = ScriptedDialogue::new(vec![
        choice(0),
        choice(0),
        text("db.internal"),
        text("fifty"),
        text("70000"),
        text("5432"),
        choice(1),
        text("root"),
        text("pw"),
        text("shop"),
        choice(0),
    ]);

    let session = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await
        .expect("Wizard should succeed");

    assert_eq!(session.profile.params.tcp.port, 5432);
    assert_eq!(session.profile.params.target, askdb::DatabaseTarget::MySql);
    assert_eq!(dialogue.notes_containing("Port must be a number"), 2);
}

#[tokio::test]
async fn test_duplicate_name_reasks_only_the_name() {
    let service = service(FakeAdapter::default());
    let store = store();
    store.insert(&ConnectionProfile::new("a@x.com", "warehouse", pg_params())).unwrap();

    let mut script = vec![choice(0), choice(0)];
    script.extend(postgres_answers("db.internal", "warehouse"));
    script.push(text("warehouse-eu"));
    script.push(choice(0));
    let dialogue = ScriptedDialogue::new(script);

    let session = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await
        .expect("Wizard should succeed");

    assert_eq!(session.profile.display_name, "warehouse-eu");
    assert_eq!(Calls::get(&service.adapter().calls.test_connection), 1);
    assert_eq!(store.list_by_owner("a@x.com").unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_password_is_accepted_for_passwordless_login() {
    let service = service(FakeAdapter::default());
    let store = store();
    let dialogue = ScriptedDialogue::new(vec![
        choice(0),
        choice(0),
        text("db.internal"),
        text("5432"),
        choice(0),
        text("northwind"),
        text("analyst"),
        text(""),
        text("warehouse"),
        choice(0),
    ]);

    let session = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await
        .expect("Wizard should succeed");

    assert_eq!(session.profile.params.tcp.password, "");
    assert_eq!(session.profile.display_name, "warehouse");
    assert_eq!(dialogue.remaining(), 0);

    let saved = store
        .find_by_name("a@x.com", "warehouse")
        .unwrap()
        .expect("Profile should be saved");
    assert_eq!(saved.params.tcp.password, "");
}

#[tokio::test]
async fn test_unreachable_ssh_server_never_persists() {
    let service = service(FakeAdapter::default());
    let store = store();
    let dialogue = ScriptedDialogue::new(vec![
        choice(0),
        choice(1),
        text("127.0.0.1"),
        text("1"),
        text("ops"),
        text("tunnelpw"),
        text("10.0.0.5"),
        text("3306"),
        choice(1),
        text("root"),
        text("pw"),
        text("shop"),
    ]);

    let outcome = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await;

    // Script runs out while the parameters are being asked again
    assert_eq!(outcome, Err(AbortReason::Cancelled));
    assert_eq!(dialogue.notes_containing("Could not connect"), 1);
    assert_eq!(Calls::get(&service.adapter().calls.test_connection), 0);
    assert!(store.list_by_owner("a@x.com").unwrap().is_empty());
}

// ============================================================================
// Reconnect and delete
// ============================================================================

#[tokio::test]
async fn test_reconnect_names_thread_after_profile_and_schema() {
    let service = service(FakeAdapter::default());
    let store = store();
    store.insert(&ConnectionProfile::new("a@x.com", "warehouse", pg_params())).unwrap();
    store.insert(&ConnectionProfile::new("a@x.com", "shop", mysql_params())).unwrap();

    let dialogue = ScriptedDialogue::new(vec![choice(1), no_choice(), choice(0), choice(0)]);

    let session = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", Some("thread-1"))
        .await
        .expect("Wizard should succeed");

    assert_eq!(session.profile.display_name, "warehouse");
    assert_eq!(session.schema, "public");
    assert_eq!(
        store.thread_name("a@x.com", "thread-1").unwrap().as_deref(),
        Some("warehouse - public")
    );
}

#[tokio::test]
async fn test_reconnect_without_profiles_falls_through_to_new_connection() {
    let service = service(FakeAdapter::default());
    let store = store();

    let mut script = vec![choice(1), choice(0)];
    script.extend(postgres_answers("db.internal", "warehouse"));
    script.push(choice(0));
    let dialogue = ScriptedDialogue::new(script);

    let session = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await
        .expect("Wizard should succeed");

    assert_eq!(session.profile.display_name, "warehouse");
    assert_eq!(dialogue.notes_containing("no saved connections"), 1);
}

#[tokio::test]
async fn test_unreachable_saved_profile_returns_to_menu() {
    let service = service(FakeAdapter::with_connection_results(&[false]));
    let store = store();
    store.insert(&ConnectionProfile::new("a@x.com", "warehouse", pg_params())).unwrap();

    let dialogue = ScriptedDialogue::new(vec![choice(1), choice(0), cancel_choice()]);

    let outcome = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await;

    assert_eq!(outcome, Err(AbortReason::Cancelled));
    assert_eq!(dialogue.notes_containing("Could not reach 'warehouse'"), 1);
    assert_eq!(Calls::get(&service.adapter().calls.list_schemas), 0);
}

#[tokio::test]
async fn test_delete_returns_to_action_menu() {
    let service = service(FakeAdapter::default());
    let store = store();
    store.insert(&ConnectionProfile::new("a@x.com", "warehouse", pg_params())).unwrap();
    store.insert(&ConnectionProfile::new("a@x.com", "shop", mysql_params())).unwrap();

    let dialogue = ScriptedDialogue::new(vec![choice(2), choice(0), cancel_choice()]);

    let outcome = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await;

    assert_eq!(outcome, Err(AbortReason::Cancelled));
    let remaining: Vec<String> =
        store.list_by_owner("a@x.com").unwrap().into_iter().map(|p| p.display_name).collect();
    assert_eq!(remaining, vec!["shop".to_string()]);
    assert_eq!(dialogue.notes_containing("Connection 'warehouse' deleted."), 1);
}

// ============================================================================
// Aborts
// ============================================================================

#[tokio::test]
async fn test_no_schemas_aborts_without_retry() {
    let service = service(FakeAdapter::with_schemas(&[]));
    let store = store();
    store.insert(&ConnectionProfile::new("a@x.com", "warehouse", pg_params())).unwrap();

    let dialogue = ScriptedDialogue::new(vec![choice(1), choice(0)]);

    let outcome = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await;

    assert_eq!(outcome, Err(AbortReason::NoSchemasFound));
    assert_eq!(Calls::get(&service.adapter().calls.list_schemas), 1);
    assert_eq!(dialogue.notes_containing("No accessible schemas"), 1);
}

#[tokio::test]
async fn test_unanswered_prompt_gives_up_after_limit() {
    let service = service(FakeAdapter::default());
    let store = store();
    let dialogue = ScriptedDialogue::new(vec![no_choice(), no_choice(), no_choice(), choice(0)]);

    let outcome = ConnectionWizard::new(&service, &store, &dialogue, &config(3))
        .resolve_connection_and_schema("a@x.com", None)
        .await;

    assert_eq!(outcome, Err(AbortReason::Unanswered));
    assert_eq!(dialogue.remaining(), 1);
}

#[tokio::test]
async fn test_blank_text_counts_as_no_answer() {
    let service = service(FakeAdapter::default());
    let store = store();
    let dialogue =
        ScriptedDialogue::new(vec![choice(0), choice(0), text("   "), no_text(), text("db.internal")]);

    let outcome = ConnectionWizard::new(&service, &store, &dialogue, &config(2))
        .resolve_connection_and_schema("a@x.com", None)
        .await;

    assert_eq!(outcome, Err(AbortReason::Unanswered));
    assert_eq!(dialogue.remaining(), 1);
}

#[tokio::test]
async fn test_cancel_aborts_immediately() {
    let service = service(FakeAdapter::default());
    let store = store();
    let dialogue = ScriptedDialogue::new(vec![cancel_choice(), choice(0)]);

    let outcome = ConnectionWizard::new(&service, &store, &dialogue, &config(5))
        .resolve_connection_and_schema("a@x.com", None)
        .await;

    assert_eq!(outcome, Err(AbortReason::Cancelled));
    assert_eq!(dialogue.remaining(), 1);
    assert_eq!(outcome.unwrap_err().error_code(), "CANCELLED");
}
