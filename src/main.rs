//! Scripted two-user walkthrough over the in-memory store.

use std::sync::Arc;

use anyhow::Result;
use docstore::{DocumentStore, MemoryStore};

use bulletin::identity::{IdentityProvider, LocalIdentity, SessionUser};
use bulletin::notice::Notice;
use bulletin::session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

    //// Sign in Amy and Bob
    let amy_identity: Arc<dyn IdentityProvider> = Arc::new(LocalIdentity::signed_in(
        SessionUser::new("uid-amy", "amy@example.com"),
    ));
    let bob_identity: Arc<dyn IdentityProvider> = Arc::new(LocalIdentity::signed_in(
        SessionUser::new("uid-bob", "bob@example.com"),
    ));
    let amy = Session::open(Arc::clone(&store), amy_identity).await?;
    let bob = Session::open(Arc::clone(&store), bob_identity).await?;
    amy.profile().save_display_name("Amy").await?;
    println!("Signed in {} and {}", amy.user().handle, bob.user().handle);

    //// Amy creates a group, Bob joins by code
    let code = amy.directory().create_group("Lunch Crew").await?;
    println!("Amy created group 'Lunch Crew' with join code {code}");

    let group = bob.directory().join_group(&code).await?;
    assert!(group.member_ids.contains(&"uid-bob".to_string()));
    println!("Bob joined {} ({} members)", group.name, group.member_ids.len());

    //// Bob subscribes and both send messages
    let mut feed = bob.messages().subscribe(&group.id).await?;
    amy.messages().send(&group.id, "lunch at noon?").await?;
    bob.messages().send(&group.id, "works for me").await?;

    while let Some(snapshot) = feed.next().await {
        let messages = snapshot?;
        if messages.len() < 2 {
            continue;
        }
        for message in &messages {
            let author = bob.profile().resolve_display_name(&message.author_handle).await?;
            println!("  [{}] {}", author, message.text);
        }
        break;
    }
    feed.release();

    //// Direct messages deduplicate per pair
    let dm = amy.directory().start_dm("bob@example.com").await?;
    let same_dm = bob.directory().start_dm("amy@example.com").await?;
    assert_eq!(dm.id, same_dm.id);
    println!("Amy and Bob share one DM thread ({})", dm.id);

    //// Failures surface as notices, not crashes
    if let Err(err) = amy.directory().start_dm("amy@example.com").await {
        let notice = Notice::from_error(&err);
        println!("Notice shown to Amy: {}", notice.message);
    }

    //// Recent conversations with last-message previews
    for recent in amy.recent().recent_chats().await? {
        println!("Recent: {}", serde_json::to_string(&recent)?);
    }

    Ok(())
}
