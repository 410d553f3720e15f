use std::sync::Arc;

use bulletin::chat::{fields, USERS_COLLECTION};
use bulletin::identity::{IdentityProvider, LocalIdentity, SessionUser};
use bulletin::profile::{ChatBackground, ProfileError, ProfileStore, BACKGROUND_OPTIONS};
use docstore::{DocumentStore, MemoryStore};

fn memory_store() -> Arc<dyn DocumentStore> {
    Arc::new(MemoryStore::new())
}

fn signed_in(user_id: &str, handle: &str) -> Arc<LocalIdentity> {
    Arc::new(LocalIdentity::signed_in(SessionUser::new(user_id, handle)))
}

fn profile(store: &Arc<dyn DocumentStore>, identity: &Arc<LocalIdentity>) -> ProfileStore {
    ProfileStore::new(
        Arc::clone(store),
        Arc::clone(identity) as Arc<dyn IdentityProvider>,
    )
}

#[tokio::test]
async fn unknown_handle_resolves_to_local_part() {
    let store = memory_store();
    let amy = signed_in("uid-amy", "amy@example.com");
    let name = profile(&store, &amy)
        .resolve_display_name("stranger@example.com")
        .await
        .expect("Resolution failed");
    assert_eq!(name, "stranger");
}

#[tokio::test]
async fn remote_names_are_looked_up_once_and_cached() {
    let store = memory_store();
    let amy = signed_in("uid-amy", "amy@example.com");
    let bob = signed_in("uid-bob", "bob@example.com");
    let amy_profile = profile(&store, &amy);
    let bob_profile = profile(&store, &bob);

    bob_profile
        .save_display_name("Bobby")
        .await
        .expect("Failed to save display name");

    let name = amy_profile
        .resolve_display_name("Bob@Example.com")
        .await
        .expect("Resolution failed");
    assert_eq!(name, "Bobby");

    // The cached name sticks for this session even after a remote change.
    bob_profile
        .save_display_name("Robert")
        .await
        .expect("Failed to save display name");
    let name = amy_profile
        .resolve_display_name("bob@example.com")
        .await
        .expect("Resolution failed");
    assert_eq!(name, "Bobby");
    assert_eq!(
        amy_profile.display_name_cached("bob@example.com").await,
        "Bobby"
    );

    // A fresh session has no cache and sees the new name.
    let fresh = profile(&store, &amy);
    let name = fresh
        .resolve_display_name("bob@example.com")
        .await
        .expect("Resolution failed");
    assert_eq!(name, "Robert");
}

#[tokio::test]
async fn nicknames_win_over_remote_names() {
    let store = memory_store();
    let amy = signed_in("uid-amy", "amy@example.com");
    let bob = signed_in("uid-bob", "bob@example.com");
    let amy_profile = profile(&store, &amy);

    profile(&store, &bob)
        .save_display_name("Robert")
        .await
        .expect("Failed to save display name");

    amy_profile
        .set_nickname("bob@example.com", "Bobster")
        .await
        .expect("Failed to set nickname");
    let name = amy_profile
        .resolve_display_name("bob@example.com")
        .await
        .expect("Resolution failed");
    assert_eq!(name, "Bobster");

    // Clearing the nickname drops back to the remote name.
    amy_profile
        .set_nickname("bob@example.com", "")
        .await
        .expect("Failed to clear nickname");
    assert_eq!(amy_profile.nickname("bob@example.com").await, None);
    let name = amy_profile
        .resolve_display_name("bob@example.com")
        .await
        .expect("Resolution failed");
    assert_eq!(name, "Robert");
}

#[tokio::test]
async fn empty_remote_name_falls_through_to_local_part() {
    let store = memory_store();
    let amy = signed_in("uid-amy", "amy@example.com");
    let bob = signed_in("uid-bob", "bob@example.com");

    profile(&store, &bob)
        .save_display_name("")
        .await
        .expect("Failed to save display name");

    let name = profile(&store, &amy)
        .resolve_display_name("bob@example.com")
        .await
        .expect("Resolution failed");
    assert_eq!(name, "bob");
}

#[tokio::test]
async fn map_writes_do_not_clobber_sibling_fields() {
    let store = memory_store();
    let amy = signed_in("uid-amy", "amy@example.com");
    let amy_profile = profile(&store, &amy);

    amy_profile
        .save_display_name("Amy")
        .await
        .expect("Failed to save display name");
    amy_profile
        .set_nickname("bob@example.com", "Bobster")
        .await
        .expect("Failed to set nickname");
    amy_profile
        .set_chat_background("chat-1", "blue")
        .await
        .expect("Failed to set background");
    amy_profile
        .set_nickname("carol@example.com", "CC")
        .await
        .expect("Failed to set nickname");

    let doc = store
        .get_document(USERS_COLLECTION, "uid-amy")
        .await
        .expect("Lookup failed")
        .expect("Profile document missing");
    assert_eq!(doc.str_field(fields::DISPLAY_NAME), Some("Amy"));
    assert_eq!(doc.str_field(fields::EMAIL), Some("amy@example.com"));
    let nicknames = doc.map_field(fields::NICKNAMES).expect("No nickname map");
    assert_eq!(nicknames.len(), 2);
    let backgrounds = doc
        .map_field(fields::CHAT_BACKGROUNDS)
        .expect("No background map");
    assert_eq!(backgrounds.get("chat-1").map(String::as_str), Some("blue"));
}

#[tokio::test]
async fn preferences_survive_a_reload() {
    let store = memory_store();
    let amy = signed_in("uid-amy", "amy@example.com");
    let amy_profile = profile(&store, &amy);

    amy_profile
        .save_display_name("Amy")
        .await
        .expect("Failed to save display name");
    amy_profile
        .set_nickname("bob@example.com", "Bobster")
        .await
        .expect("Failed to set nickname");
    amy_profile
        .set_chat_background("chat-1", "green")
        .await
        .expect("Failed to set background");

    let reloaded = profile(&store, &amy);
    reloaded.load().await.expect("Failed to load profile");
    assert_eq!(reloaded.display_name().await, "Amy");
    assert_eq!(
        reloaded.nickname("bob@example.com").await.as_deref(),
        Some("Bobster")
    );
    assert_eq!(
        reloaded.chat_background("chat-1").await.as_deref(),
        Some("green")
    );
}

#[tokio::test]
async fn loading_a_missing_profile_is_not_an_error() {
    let store = memory_store();
    let amy = signed_in("uid-amy", "amy@example.com");
    let amy_profile = profile(&store, &amy);
    amy_profile.load().await.expect("Load failed");
    assert_eq!(amy_profile.my_display_name().await, "amy");
}

#[tokio::test]
async fn background_image_outranks_the_color_token() {
    let store = memory_store();
    let amy = signed_in("uid-amy", "amy@example.com");
    let amy_profile = profile(&store, &amy);

    // The picker only offers named tokens; "image" marks a custom image.
    assert!(BACKGROUND_OPTIONS.contains(&"purple"));
    assert!(BACKGROUND_OPTIONS.contains(&"image"));

    amy_profile
        .set_chat_background("chat-1", "purple")
        .await
        .expect("Failed to set background");
    assert_eq!(
        amy_profile.effective_background("chat-1").await,
        ChatBackground::Color("purple".to_string())
    );

    amy_profile
        .set_chat_background_image("chat-1", Some("backgrounds/sunset.png"))
        .await
        .expect("Failed to set background image");
    assert_eq!(
        amy_profile.effective_background("chat-1").await,
        ChatBackground::Image("backgrounds/sunset.png".to_string())
    );

    // Clearing the image uncovers the color token again.
    amy_profile
        .set_chat_background_image("chat-1", None)
        .await
        .expect("Failed to clear background image");
    assert_eq!(
        amy_profile.effective_background("chat-1").await,
        ChatBackground::Color("purple".to_string())
    );

    assert_eq!(
        amy_profile.effective_background("chat-2").await,
        ChatBackground::Default
    );
}

#[tokio::test]
async fn writes_require_a_signed_in_user() {
    let store = memory_store();
    let amy = signed_in("uid-amy", "amy@example.com");
    let amy_profile = profile(&store, &amy);
    amy.sign_out();

    assert!(matches!(
        amy_profile.save_display_name("Amy").await,
        Err(ProfileError::Unauthenticated)
    ));
    assert!(matches!(
        amy_profile.set_nickname("bob@example.com", "B").await,
        Err(ProfileError::Unauthenticated)
    ));
    assert_eq!(amy_profile.my_display_name().await, "guest");
}
