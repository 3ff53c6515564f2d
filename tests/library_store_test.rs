mod support;
use std::sync::Arc;
use tempfile::TempDir;

use crate::support::tracing_init;
use deckport::db::ImageSource;
use deckport::import::CardOverrides;
use deckport::library::{CardStore, CommitBatch, LibraryManager, NewCard, NewImage};

async fn setup_library() -> (LibraryManager, TempDir) {
    tracing_init();

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("library.db");
    let library = LibraryManager::open(db_path.to_str().unwrap())
        .await
        .expect("Failed to open library");

    (library, temp_dir)
}

fn new_card(name: &str, image_id: &str) -> NewCard {
    NewCard {
        name: name.to_string(),
        quantity: 1,
        is_token: false,
        category: None,
        set: Some("tst".to_string()),
        number: Some("1".to_string()),
        catalog_id: Some(format!("id-{}", name)),
        image_id: Some(image_id.to_string()),
        back_image_id: None,
        has_built_in_bleed: Some(false),
        overrides: None,
    }
}

#[tokio::test]
async fn test_commit_and_list_keep_order_and_fields() {
    let (library, _temp_dir) = setup_library().await;

    let mut bolt = new_card("Lightning Bolt", "mpc:art-1");
    bolt.quantity = 4;
    bolt.category = Some("Sideboard".to_string());
    bolt.has_built_in_bleed = Some(true);
    bolt.overrides = Some(CardOverrides {
        bleed_mm: Some(1.5),
        dark_cut_lines: Some(true),
        ..Default::default()
    });

    let batch = CommitBatch {
        generation: 1,
        cards: vec![new_card("Sol Ring", "scryfall:id-Sol Ring"), bolt],
        images: vec![
            NewImage {
                id: "scryfall:id-Sol Ring".to_string(),
                source: ImageSource::Scryfall,
                source_ref: Some("https://img.test/sol-ring.png".to_string()),
                bytes: None,
            },
            NewImage {
                id: "mpc:art-1".to_string(),
                source: ImageSource::Mpc,
                source_ref: Some("art-1".to_string()),
                bytes: Some(Arc::new(b"png bytes".to_vec())),
            },
        ],
    };
    library.commit(batch).await.unwrap();

    let cards = library.list_cards().await.unwrap();
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].name, "Sol Ring");
    assert_eq!(cards[1].name, "Lightning Bolt");
    assert_eq!(cards[1].quantity, 4);
    assert_eq!(cards[1].category.as_deref(), Some("Sideboard"));
    assert_eq!(cards[1].has_built_in_bleed, Some(true));
    assert_eq!(cards[1].generation, 1);
    let overrides = cards[1].overrides.as_ref().unwrap();
    assert_eq!(overrides.bleed_mm, Some(1.5));
    assert_eq!(overrides.dark_cut_lines, Some(true));

    let image = library
        .database()
        .get_image("mpc:art-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(image.source, ImageSource::Mpc);
    assert_eq!(image.bytes.as_deref(), Some(&b"png bytes"[..]));
}

#[tokio::test]
async fn test_shared_images_are_written_once_across_commits() {
    let (library, _temp_dir) = setup_library().await;

    let image = NewImage {
        id: "mpc:art-1".to_string(),
        source: ImageSource::Mpc,
        source_ref: Some("art-1".to_string()),
        bytes: Some(Arc::new(vec![1, 2, 3])),
    };
    for generation in 1..=2 {
        library
            .commit(CommitBatch {
                generation,
                cards: vec![new_card("Lightning Bolt", "mpc:art-1")],
                images: vec![image.clone()],
            })
            .await
            .unwrap();
    }

    let cards = library.list_cards().await.unwrap();
    assert_eq!(cards.len(), 2);
    assert_eq!(
        cards.iter().map(|c| c.generation).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[tokio::test]
async fn test_has_card_matches_name_and_token_flag() {
    let (library, _temp_dir) = setup_library().await;

    let mut treasure = new_card("Treasure", "scryfall:id-Treasure");
    treasure.is_token = true;
    library
        .commit(CommitBatch {
            generation: 1,
            cards: vec![treasure, new_card("Sol Ring", "local-1")],
            images: Vec::new(),
        })
        .await
        .unwrap();

    assert!(library.has_card("treasure", true).await.unwrap());
    assert!(!library.has_card("Treasure", false).await.unwrap());
    assert!(library.has_card("SOL RING", false).await.unwrap());
    assert!(!library.has_card("Island", false).await.unwrap());
}

#[tokio::test]
async fn test_remove_generation() {
    let (library, _temp_dir) = setup_library().await;

    for (generation, name) in [(1, "Sol Ring"), (2, "Island"), (2, "Forest")] {
        library
            .commit(CommitBatch {
                generation,
                cards: vec![new_card(name, "local-1")],
                images: Vec::new(),
            })
            .await
            .unwrap();
    }

    assert_eq!(library.remove_generation(2).await.unwrap(), 2);
    let names: Vec<String> = library
        .list_cards()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Sol Ring"]);
}
