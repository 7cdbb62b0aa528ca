mod common;

use bytes::Bytes;
use common::setup_temp_dir;
use futures::stream;
use lanboard::board::{AttachmentDraft, Board, BoardEvent, MessageDraft};
use lanboard::common::AppError;
use lanboard::store::{ContentStore, FileKind, NewUpload};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

const ATTACHMENT_LIMIT: u64 = 1024 * 1024;

//===============
// Test Helpers
//===============

async fn open_fixture(dir: &TempDir, limit: usize) -> (Board, ContentStore) {
    let board = Board::open(dir.path().join("history.jsonl"), limit)
        .await
        .expect("open board");
    let store = ContentStore::open(dir.path().join("uploads"))
        .await
        .expect("open content store");
    (board, store)
}

async fn stash(store: &ContentStore, name: &str, data: &[u8]) -> String {
    store
        .put(
            NewUpload {
                name,
                declared_size: None,
                content_type: "application/octet-stream",
            },
            ATTACHMENT_LIMIT,
            stream::iter(vec![anyhow::Ok(Bytes::copy_from_slice(data))]),
        )
        .await
        .expect("stash file")
        .identity
}

fn draft(sender: &str, text: &str) -> MessageDraft {
    MessageDraft {
        sender: sender.to_string(),
        text: text.to_string(),
        attachments: vec![],
    }
}

//===============
// Posting
//===============

#[tokio::test]
async fn post_truncates_sender_and_text() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 100).await;

    let message = board
        .post(
            draft(&"x".repeat(40), &"y".repeat(6000)),
            &store,
            ATTACHMENT_LIMIT,
        )
        .await
        .unwrap();

    assert_eq!(message.sender.chars().count(), 30);
    assert_eq!(message.text.chars().count(), 5000);
    assert_eq!(message.id.len(), 32);
    assert!(message.ts_ms > 0);
}

#[tokio::test]
async fn empty_draft_is_rejected() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 100).await;

    let err = board
        .post(draft("laptop", ""), &store, ATTACHMENT_LIMIT)
        .await
        .expect_err("empty draft");
    match err {
        AppError::BadRequest(msg) => assert!(msg.contains("empty")),
        other => panic!("expected BadRequest, got {other}"),
    }
    assert_eq!(board.message_count().await, 0);
}

#[tokio::test]
async fn unknown_attachments_are_dropped() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 100).await;

    let message = board
        .post(
            MessageDraft {
                text: "hi".to_string(),
                attachments: vec![AttachmentDraft {
                    identity: "nope.bin".to_string(),
                }],
                ..Default::default()
            },
            &store,
            ATTACHMENT_LIMIT,
        )
        .await
        .unwrap();

    assert!(message.attachments.is_empty());
}

#[tokio::test]
async fn attachment_only_message_resolves_metadata() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 100).await;
    let identity = stash(&store, "photo.png", b"pretend png").await;

    let message = board
        .post(
            MessageDraft {
                sender: "phone".to_string(),
                attachments: vec![AttachmentDraft {
                    identity: identity.clone(),
                }],
                ..Default::default()
            },
            &store,
            ATTACHMENT_LIMIT,
        )
        .await
        .unwrap();

    assert_eq!(message.text, "");
    assert_eq!(message.attachments.len(), 1);
    let attachment = &message.attachments[0];
    assert_eq!(attachment.identity, identity);
    assert_eq!(attachment.name, "photo.png");
    assert_eq!(attachment.size, 11);
    assert_eq!(attachment.kind, FileKind::Image);
}

#[tokio::test]
async fn oversized_attachment_is_dropped() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 100).await;
    let identity = stash(&store, "big.bin", b"lots of bytes here").await;

    // With text the message still posts, minus the attachment.
    let message = board
        .post(
            MessageDraft {
                text: "see file".to_string(),
                attachments: vec![AttachmentDraft {
                    identity: identity.clone(),
                }],
                ..Default::default()
            },
            &store,
            4,
        )
        .await
        .unwrap();
    assert!(message.attachments.is_empty());

    // Without text there is nothing left to post.
    let err = board
        .post(
            MessageDraft {
                attachments: vec![AttachmentDraft { identity }],
                ..Default::default()
            },
            &store,
            4,
        )
        .await
        .expect_err("nothing left after dropping the attachment");
    assert!(matches!(err, AppError::BadRequest(_)));
}

//===============
// Persistence
//===============

#[tokio::test]
async fn history_survives_reopen() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 100).await;

    let first = board
        .post(draft("laptop", "hello"), &store, ATTACHMENT_LIMIT)
        .await
        .unwrap();
    let second = board
        .post(draft("phone", "world"), &store, ATTACHMENT_LIMIT)
        .await
        .unwrap();
    drop(board);

    let reopened = Board::open(dir.path().join("history.jsonl"), 100)
        .await
        .unwrap();
    let items = reopened.snapshot().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], first);
    assert_eq!(items[1], second);
}

#[tokio::test]
async fn history_limit_drops_the_oldest() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 3).await;

    for i in 0..5 {
        board
            .post(draft("laptop", &format!("m{i}")), &store, ATTACHMENT_LIMIT)
            .await
            .unwrap();
    }

    let items = board.snapshot().await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].text, "m2");
    assert_eq!(items[2].text, "m4");
    drop(board);

    // The trim reached the file too.
    let reopened = Board::open(dir.path().join("history.jsonl"), 100)
        .await
        .unwrap();
    assert_eq!(reopened.message_count().await, 3);
}

//===============
// Delete / clear
//===============

#[tokio::test]
async fn delete_removes_message_and_attachment_files() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 100).await;
    let identity = stash(&store, "doc.pdf", b"attached").await;

    let message = board
        .post(
            MessageDraft {
                text: "with file".to_string(),
                attachments: vec![AttachmentDraft {
                    identity: identity.clone(),
                }],
                ..Default::default()
            },
            &store,
            ATTACHMENT_LIMIT,
        )
        .await
        .unwrap();

    assert!(board.delete(&message.id, &store).await.unwrap());
    assert_eq!(board.message_count().await, 0);
    assert!(!store.contains(&identity));

    // Second delete of the same id reports nothing removed.
    assert!(!board.delete(&message.id, &store).await.unwrap());
}

#[tokio::test]
async fn clear_wipes_messages_and_files() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 100).await;

    board
        .post(draft("laptop", "one"), &store, ATTACHMENT_LIMIT)
        .await
        .unwrap();
    board
        .post(draft("phone", "two"), &store, ATTACHMENT_LIMIT)
        .await
        .unwrap();
    // A file nobody references is wiped too.
    stash(&store, "loose.bin", b"unreferenced").await;

    board.clear(&store).await.unwrap();
    assert_eq!(board.message_count().await, 0);
    assert_eq!(store.file_count(), 0);
    drop(board);

    let reopened = Board::open(dir.path().join("history.jsonl"), 100)
        .await
        .unwrap();
    assert_eq!(reopened.message_count().await, 0);
}

//===============
// Events
//===============

#[tokio::test]
async fn events_reach_subscribers() {
    let dir = setup_temp_dir();
    let (board, store) = open_fixture(&dir, 100).await;
    let mut events = board.subscribe();

    let posted = board
        .post(draft("laptop", "live"), &store, ATTACHMENT_LIMIT)
        .await
        .unwrap();
    match timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
        BoardEvent::Msg { item } => assert_eq!(item, posted),
        other => panic!("expected msg event, got {other:?}"),
    }

    board.delete(&posted.id, &store).await.unwrap();
    match timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
        BoardEvent::Delete { id } => assert_eq!(id, posted.id),
        other => panic!("expected delete event, got {other:?}"),
    }

    board.clear(&store).await.unwrap();
    match timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap() {
        BoardEvent::Clear => {}
        other => panic!("expected clear event, got {other:?}"),
    }
}
