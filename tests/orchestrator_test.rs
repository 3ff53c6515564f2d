#![cfg(feature = "test-utils")]

mod support;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::support::tracing_init;
use deckport::batching::BatchLimits;
use deckport::cache::CacheConfig;
use deckport::import::{
    Generation, ImportError, ImportIntent, ImportOrchestrator, ImportOutcome, ImportProgress,
    ImportState, IntentSource, ProcessOptions, NO_VALID_CARDS,
};
use deckport::library::CardStore;
use deckport::ports::InMemorySettings;
use deckport::test_support::{
    FakeArtSource, FakeCatalog, MemoryCardStore, Notification, RecordingNotifier,
};
use tokio_util::sync::CancellationToken;

struct Harness {
    orchestrator: ImportOrchestrator,
    store: Arc<MemoryCardStore>,
    notifier: Arc<RecordingNotifier>,
    settings: Arc<InMemorySettings>,
}

fn setup(catalog: FakeCatalog, art: FakeArtSource) -> Harness {
    tracing_init();

    let store = Arc::new(MemoryCardStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let settings = Arc::new(InMemorySettings::new());
    let orchestrator = ImportOrchestrator::with_providers(
        Arc::new(catalog),
        Arc::new(art),
        BatchLimits::default(),
        CacheConfig::default(),
        store.clone(),
        notifier.clone(),
        settings.clone(),
    );

    Harness {
        orchestrator,
        store,
        notifier,
        settings,
    }
}

fn named(names: &[&str]) -> Vec<ImportIntent> {
    names
        .iter()
        .map(|name| ImportIntent::named(name, 1).unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_import_commits_and_notifies() {
    let h = setup(
        FakeCatalog::new().with_card("Sol Ring").with_card("Island"),
        FakeArtSource::new(),
    );

    let outcome = h.orchestrator.process_cards(named(&["Sol Ring", "Island"])).await;

    let summary = outcome.summary().expect("import should complete");
    assert_eq!(summary.generation, Generation(1));
    assert_eq!(summary.imported(), 2);
    assert!(!summary.is_partial());
    assert_eq!(h.store.card_names(), vec!["Sol Ring", "Island"]);
    assert_eq!(h.notifier.successes(), vec!["Imported 2 cards."]);
    assert!(h.notifier.errors().is_empty());
    assert_eq!(h.orchestrator.state(), ImportState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_partial_import_reports_missing_cards() {
    let h = setup(FakeCatalog::new().with_card("Sol Ring"), FakeArtSource::new());

    let outcome = h
        .orchestrator
        .process_cards(named(&["Sol Ring", "Not A Real Card"]))
        .await;

    let summary = outcome.summary().unwrap();
    assert_eq!(summary.imported(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].name, "Not A Real Card");
    assert_eq!(
        h.notifier.notifications(),
        vec![
            Notification::Success("Imported 1 card.".to_string()),
            Notification::Error("1 of 2 cards could not be found.".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_nothing_resolved_fails_without_commit() {
    let h = setup(FakeCatalog::new(), FakeArtSource::new());

    let outcome = h.orchestrator.process_cards(named(&["Foo", "Bar"])).await;

    assert!(matches!(
        outcome,
        ImportOutcome::Failed(ImportError::NothingResolved { requested: 2 })
    ));
    assert!(h.store.batches().is_empty());
    assert_eq!(h.notifier.errors(), vec!["2 of 2 cards could not be found."]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_input_notifies_unless_silent() {
    let h = setup(FakeCatalog::new(), FakeArtSource::new());

    let outcome = h.orchestrator.process_cards(Vec::new()).await;
    assert!(matches!(outcome, ImportOutcome::NoValidCards));
    assert_eq!(h.notifier.errors(), vec![NO_VALID_CARDS]);
    assert_eq!(h.orchestrator.current_generation(), Generation(0));

    let outcome = h
        .orchestrator
        .process(Vec::new(), ProcessOptions::silent())
        .await;
    assert!(matches!(outcome, ImportOutcome::NoValidCards));
    assert_eq!(h.notifier.notifications().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_intents_are_merged() {
    let h = setup(FakeCatalog::new().with_card("Sol Ring"), FakeArtSource::new());

    let intents = vec![
        ImportIntent::named("Sol Ring", 1).unwrap(),
        ImportIntent::named("sol ring", 2).unwrap(),
    ];
    let outcome = h.orchestrator.process_cards(intents).await;

    let summary = outcome.summary().unwrap();
    assert_eq!(summary.requested, 1);
    let cards = h.store.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].quantity, 3);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_is_reported() {
    let h = setup(FakeCatalog::new().with_card("Sol Ring"), FakeArtSource::new());
    h.store.fail_commits(true);

    let outcome = h.orchestrator.process_cards(named(&["Sol Ring"])).await;

    assert!(matches!(
        outcome,
        ImportOutcome::Failed(ImportError::Persistence(_))
    ));
    let errors = h.notifier.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Failed to import cards:"));
    assert!(h.notifier.successes().is_empty());
    assert_eq!(h.orchestrator.state(), ImportState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_newer_run_supersedes_older_one() {
    let h = setup(
        FakeCatalog::new()
            .with_card("Sol Ring")
            .with_card("Island")
            .with_delay(Duration::from_millis(500)),
        FakeArtSource::new(),
    );

    let completions = Arc::new(Mutex::new(Vec::new()));
    let record = |completions: &Arc<Mutex<Vec<Generation>>>| {
        let completions = completions.clone();
        ProcessOptions::default().on_complete(move |summary| {
            completions.lock().unwrap().push(summary.generation);
        })
    };

    let first = h
        .orchestrator
        .start(named(&["Sol Ring"]), record(&completions));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = h
        .orchestrator
        .start(named(&["Island"]), record(&completions));

    assert!(!first.is_current());
    assert!(second.is_current());

    let first = first.outcome().await;
    let second = second.outcome().await;

    assert!(first.is_cancelled());
    assert_eq!(second.summary().unwrap().generation, Generation(2));
    assert_eq!(h.store.card_names(), vec!["Island"]);
    assert_eq!(*completions.lock().unwrap(), vec![Generation(2)]);
    assert_eq!(h.notifier.successes(), vec!["Imported 1 card."]);
    assert_eq!(h.orchestrator.state(), ImportState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_run_before_commit() {
    let h = setup(
        FakeCatalog::new()
            .with_card("Sol Ring")
            .with_delay(Duration::from_secs(2)),
        FakeArtSource::new(),
    );
    let mut progress = h.orchestrator.subscribe_progress();

    let run = h
        .orchestrator
        .start(named(&["Sol Ring"]), ProcessOptions::default());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        h.orchestrator.state(),
        ImportState::Running {
            generation: Generation(1)
        }
    );
    assert!(h.orchestrator.cancel());

    let outcome = run.outcome().await;
    assert!(outcome.is_cancelled());
    assert!(h.store.batches().is_empty());
    assert!(h.notifier.notifications().is_empty());
    assert_eq!(h.orchestrator.state(), ImportState::Idle);
    assert!(!h.orchestrator.cancel());

    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            ImportProgress::Started {
                generation: Generation(1),
                intents: 1
            },
            ImportProgress::Cancelled {
                generation: Generation(1)
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_external_signal_cancels_run() {
    let h = setup(
        FakeCatalog::new()
            .with_card("Sol Ring")
            .with_delay(Duration::from_secs(2)),
        FakeArtSource::new(),
    );
    let signal = CancellationToken::new();

    let run = h.orchestrator.start(
        named(&["Sol Ring"]),
        ProcessOptions::default().with_signal(signal.clone()),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    signal.cancel();

    assert!(run.outcome().await.is_cancelled());
    assert!(h.store.batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_progress_events_follow_run_lifecycle() {
    let h = setup(FakeCatalog::new().with_card("Sol Ring"), FakeArtSource::new());
    let mut progress = h.orchestrator.subscribe_progress();

    h.orchestrator
        .process_cards(named(&["Sol Ring", "Missing"]))
        .await;

    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push(event);
    }
    let generation = Generation(1);
    assert_eq!(
        events,
        vec![
            ImportProgress::Started {
                generation,
                intents: 2
            },
            ImportProgress::Resolved {
                generation,
                resolved: 1,
                unresolved: 1
            },
            ImportProgress::Committed {
                generation,
                cards: 1
            },
            ImportProgress::Completed {
                generation,
                imported: 1,
                failed: 1
            },
        ]
    );
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_sources_and_default_back_are_committed() {
    let h = setup(
        FakeCatalog::new().with_card("Sol Ring"),
        FakeArtSource::new().with_image("art-1", b"png bytes"),
    );
    h.settings
        .set_default_back_image_id(Some("back-default".to_string()));

    let intents = vec![
        ImportIntent::named("Sol Ring", 1).unwrap(),
        ImportIntent::new(
            "Lightning Bolt",
            4,
            IntentSource::Mpc {
                mpc_id: "art-1".to_string(),
                is_token: false,
            },
        )
        .unwrap()
        .with_back("back-linked"),
        ImportIntent::new(
            "Custom Proxy",
            1,
            IntentSource::Manual {
                local_image_id: "local-7".to_string(),
                has_built_in_bleed: Some(true),
            },
        )
        .unwrap(),
    ];
    h.orchestrator.process_cards(intents).await;

    let batches = h.store.batches();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    let image_ids: Vec<&str> = batch.images.iter().map(|image| image.id.as_str()).collect();
    assert!(image_ids.contains(&"mpc:art-1"));
    assert!(!image_ids.contains(&"local-7"));

    let cards = &batch.cards;
    assert_eq!(cards[0].set.as_deref(), Some("tst"));
    assert_eq!(cards[0].back_image_id.as_deref(), Some("back-default"));
    assert_eq!(cards[1].image_id.as_deref(), Some("mpc:art-1"));
    assert_eq!(cards[1].back_image_id.as_deref(), Some("back-linked"));
    assert_eq!(cards[1].has_built_in_bleed, Some(true));
    assert_eq!(cards[2].image_id.as_deref(), Some("local-7"));
}

#[tokio::test(start_paused = true)]
async fn test_token_pass_imports_missing_tokens_once() {
    let h = setup(
        FakeCatalog::new().with_token_parts("Dockside Extortionist", &["Treasure"]),
        FakeArtSource::new(),
    );
    h.settings.set_auto_import_tokens(true);

    let outcome = h
        .orchestrator
        .process_cards(named(&["Dockside Extortionist"]))
        .await;
    assert!(outcome.is_completed());
    let follow_up = h
        .orchestrator
        .wait_for_token_pass()
        .await
        .expect("the token pass should import Treasure");
    assert_eq!(follow_up.summary().unwrap().imported(), 1);

    let tokens: Vec<_> = h.store.cards().into_iter().filter(|c| c.is_token).collect();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].name, "Treasure");
    assert!(h.store.has_card("treasure", true).await.unwrap());
    assert!(!h.orchestrator.token_pass_running());
    // The follow-up run is silent
    assert_eq!(h.notifier.notifications().len(), 1);

    h.orchestrator
        .process_cards(named(&["Dockside Extortionist"]))
        .await;
    assert!(h.orchestrator.wait_for_token_pass().await.is_none());

    let tokens = h.store.cards().into_iter().filter(|c| c.is_token).count();
    assert_eq!(tokens, 1);
    assert_eq!(h.store.batches().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_follow_up_run_only_starts_from_the_current_generation() {
    let h = setup(
        FakeCatalog::new().with_card("Sol Ring").with_card("Island"),
        FakeArtSource::new(),
    );

    h.orchestrator.process_cards(named(&["Sol Ring"])).await;
    let follow_up = h
        .orchestrator
        .start_after(Generation(1), named(&["Island"]), ProcessOptions::silent())
        .expect("generation 1 is still current");
    assert_eq!(follow_up.generation(), Generation(2));
    assert!(follow_up.outcome().await.is_completed());

    let stale = h
        .orchestrator
        .start_after(Generation(1), named(&["Island"]), ProcessOptions::silent());
    assert!(stale.is_none());
    assert_eq!(h.orchestrator.current_generation(), Generation(2));
    assert_eq!(h.store.card_names(), vec!["Sol Ring", "Island"]);
}

#[tokio::test(start_paused = true)]
async fn test_token_pass_resolves_the_exact_token_printing() {
    let h = setup(
        FakeCatalog::new()
            .with_printing("Treasure", "old", "1")
            .with_token_parts("Dockside Extortionist", &["Treasure"]),
        FakeArtSource::new(),
    );
    h.settings.set_auto_import_tokens(true);

    h.orchestrator
        .process_cards(named(&["Dockside Extortionist"]))
        .await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let tokens: Vec<_> = h.store.cards().into_iter().filter(|c| c.is_token).collect();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].set.as_deref(), Some("ttst"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_run_suppresses_notifications_and_tokens() {
    let h = setup(
        FakeCatalog::new().with_token_parts("Dockside Extortionist", &["Treasure"]),
        FakeArtSource::new(),
    );
    h.settings.set_auto_import_tokens(true);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let options = ProcessOptions::silent().on_complete(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let outcome = h
        .orchestrator
        .process(named(&["Dockside Extortionist", "Missing"]), options)
        .await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(outcome.summary().unwrap().is_partial());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.notifier.notifications().is_empty());
    assert_eq!(h.store.card_names(), vec!["Dockside Extortionist"]);
}
