mod common;

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use cliprelay::clipboard::{formats, ClipboardActor, Item, MemoryClipboard};
use cliprelay::sync::SyncEngine;
use cliprelay::transport::{build_client, TransportKind};

use common::{fast_config, identity, FakeRelay};

async fn engine(relay: &FakeRelay, device_id: &str, clipboard: &MemoryClipboard) -> SyncEngine {
    let identity = identity(device_id);
    let client = build_client(
        TransportKind::Poll,
        &relay.endpoint(),
        identity.clone(),
        fast_config(),
    )
    .unwrap();

    let provider = clipboard.clone();
    let handle = ClipboardActor::spawn(move || Ok(provider)).await.unwrap();
    SyncEngine::new(identity, handle, client, Duration::from_millis(20))
}

async fn wait_for(clipboard: &MemoryClipboard, expected: &[Item]) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if clipboard.contents() == expected {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_copy_on_one_machine_reaches_the_other() {
    let relay = FakeRelay::start().await;
    let laptop_clipboard = MemoryClipboard::new();
    let desktop_clipboard = MemoryClipboard::new();

    let laptop = engine(&relay, "laptop01", &laptop_clipboard).await;
    let desktop = engine(&relay, "desktop1", &desktop_clipboard).await;

    let cancel = CancellationToken::new();
    let running = {
        let cancel = cancel.clone();
        async move {
            tokio::join!(laptop.run(cancel.clone()), desktop.run(cancel.clone()));
        }
    };

    let scenario = async {
        let copied = vec![Item::text(formats::TEXT, "copied on the laptop")];
        laptop_clipboard.set(copied.clone());
        assert!(wait_for(&desktop_clipboard, &copied).await, "desktop never received it");

        let reply = vec![Item::text(formats::TEXT, "and back from the desktop")];
        desktop_clipboard.set(reply.clone());
        assert!(wait_for(&laptop_clipboard, &reply).await, "laptop never received it");

        // applied content must not bounce back as a new upload
        sleep(Duration::from_millis(200)).await;
        let uploads = relay.posts().iter().map(|post| post.cid.clone()).collect::<std::collections::HashSet<_>>();
        assert_eq!(uploads.len(), 2);

        cancel.cancel();
    };

    tokio::join!(running, scenario);
}
