use std::sync::Arc;

use suspense_cache::{CacheConfig, CacheError, EntryStatus, Lookup, SuspendingCache, producer_fn};

use crate::{Pokedex, Pokemon, setup, setup_cache};

fn key(name: &str) -> String {
    name.to_owned()
}

#[tokio::test]
async fn test_first_lookup_starts_computation() {
    let (cache, pokedex) = setup_cache();

    let lookup = cache.get(&key("bulbasaur"));
    assert!(lookup.is_pending());

    assert_eq!(pokedex.computations(), 1);
    assert_eq!(cache.peek(&key("bulbasaur")), Some(EntryStatus::Pending));
    assert_eq!(cache.pending_count(), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_pending_lookups_are_deduplicated() {
    let (cache, pokedex) = setup_cache();

    for _ in 0..5 {
        assert!(cache.get(&key("charmander")).is_pending());
        // give the computation a chance to run, it is held back by the pokedex
        tokio::task::yield_now().await;
    }

    assert_eq!(pokedex.computations(), 1);
    assert_eq!(cache.pending_count(), 1);
}

#[tokio::test]
async fn test_pikachu() {
    let (cache, pokedex) = setup_cache();
    let pikachu = key("pikachu");

    let first = cache.get(&pikachu);
    let second = cache.get(&pikachu);
    let third = cache.get(&pikachu);
    assert!(first.is_pending());
    assert!(second.is_pending());
    assert!(third.is_pending());
    assert_eq!(pokedex.computations(), 1);

    pokedex.release("pikachu");
    let settled = first.into_suspended().unwrap().await;
    assert_eq!(settled, Ok(Pokemon::new("pikachu")));

    // the other handles observe the very same settlement
    assert_eq!(
        second.into_suspended().unwrap().await,
        Ok(Pokemon::new("pikachu"))
    );

    let fourth = cache.get(&pikachu);
    assert_eq!(fourth.into_ready(), Some(Ok(Pokemon::new("pikachu"))));
    assert_eq!(pokedex.computations(), 1);
}

#[tokio::test]
async fn test_resolved_value_is_served_synchronously() {
    let (cache, pokedex) = setup_cache();
    let squirtle = key("squirtle");

    pokedex.release("squirtle");
    assert_eq!(cache.get_async(&squirtle).await, Ok(Pokemon::new("squirtle")));

    for _ in 0..3 {
        match cache.get(&squirtle) {
            Lookup::Ready(entry) => assert_eq!(entry, Ok(Pokemon::new("squirtle"))),
            Lookup::Pending(_) => panic!("settled lookup must not be pending"),
        }
    }

    assert_eq!(cache.peek(&squirtle), Some(EntryStatus::Resolved));
    assert_eq!(cache.pending_count(), 0);
    assert_eq!(pokedex.computations(), 1);
}

#[tokio::test]
async fn test_failure_is_replayed() {
    let (cache, pokedex) = setup_cache();
    let glitch = key("glitch-city");

    pokedex.release("glitch-city");
    let expected = Err(CacheError::Failed("glitch-city crashed the game".into()));
    assert_eq!(cache.get_async(&glitch).await, expected);

    for _ in 0..3 {
        assert_eq!(cache.get(&glitch).into_ready(), Some(expected.clone()));
    }

    assert_eq!(cache.peek(&glitch), Some(EntryStatus::Failed));
    // no retry was attempted
    assert_eq!(pokedex.computations(), 1);
}

#[tokio::test]
async fn test_not_found_is_replayed() {
    let (cache, pokedex) = setup_cache();
    let missingno = key("missingno");

    pokedex.release("missingno");
    assert_eq!(cache.get_async(&missingno).await, Err(CacheError::NotFound));
    assert_eq!(
        cache.get(&missingno).into_ready(),
        Some(Err(CacheError::NotFound))
    );
    assert_eq!(pokedex.computations(), 1);
}

#[tokio::test]
async fn test_distinct_keys_are_independent() {
    let (cache, pokedex) = setup_cache();
    let a = key("abra");
    let b = key("bellsprout");

    assert!(cache.get(&a).is_pending());
    let b_pending = cache.get(&b).into_suspended().unwrap();
    assert_eq!(pokedex.computations(), 2);

    pokedex.release("bellsprout");
    assert_eq!(b_pending.await, Ok(Pokemon::new("bellsprout")));

    assert_eq!(cache.peek(&a), Some(EntryStatus::Pending));
    assert_eq!(cache.peek(&b), Some(EntryStatus::Resolved));
    assert!(cache.get(&a).is_pending());
    assert_eq!(pokedex.computations(), 2);

    pokedex.release("abra");
    assert_eq!(cache.get_async(&a).await, Ok(Pokemon::new("abra")));
    assert_eq!(cache.pending_count(), 0);
}

#[tokio::test]
async fn test_peek_and_preload() {
    let (cache, pokedex) = setup_cache();
    let mew = key("mew");

    assert_eq!(cache.peek(&mew), None);
    assert!(cache.is_empty());
    assert_eq!(pokedex.computations(), 0);

    assert!(cache.preload(&mew));
    assert!(!cache.preload(&mew));
    assert_eq!(cache.peek(&mew), Some(EntryStatus::Pending));
    assert_eq!(pokedex.computations(), 1);

    pokedex.release("mew");
    assert_eq!(cache.get_async(&mew).await, Ok(Pokemon::new("mew")));
    assert!(!cache.preload(&mew));
    assert_eq!(pokedex.computations(), 1);
}

#[tokio::test]
async fn test_clones_share_entries() {
    let (cache, pokedex) = setup_cache();
    let onix = key("onix");
    let other = cache.clone();

    assert!(cache.get(&onix).is_pending());
    assert!(other.get(&onix).is_pending());
    assert_eq!(pokedex.computations(), 1);

    pokedex.release("onix");
    assert_eq!(other.get_async(&onix).await, Ok(Pokemon::new("onix")));
    assert_eq!(cache.get(&onix).into_ready(), Some(Ok(Pokemon::new("onix"))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups() {
    let (cache, pokedex) = setup_cache();
    let cache = Arc::new(cache);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_async(&key("eevee")).await })
        })
        .collect();

    tokio::task::yield_now().await;
    pokedex.release("eevee");

    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap(), Ok(Pokemon::new("eevee")));
    }
    assert_eq!(pokedex.computations(), 1);
}

#[tokio::test]
async fn test_closure_producer() {
    setup();

    let producer = producer_fn(|level: &u32| {
        let level = *level;
        async move {
            match level {
                0 => Err(CacheError::failed("level must be positive")),
                level => Ok(level * level * level),
            }
        }
    });
    let cache = SuspendingCache::new(
        CacheConfig::default(),
        producer,
        tokio::runtime::Handle::current(),
    );

    assert_eq!(cache.name(), "suspense");
    assert_eq!(cache.get_async(&5).await, Ok(125));
    assert_eq!(cache.get(&5).into_ready(), Some(Ok(125)));
    assert_eq!(
        cache.get_async(&0).await,
        Err(CacheError::Failed("level must be positive".into()))
    );
}

#[test]
fn test_runtime_shutdown_settles_pending() {
    setup();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let pokedex = Pokedex::new();
    let cache = SuspendingCache::new(
        CacheConfig::default(),
        pokedex.clone(),
        runtime.handle().clone(),
    );

    let suspended = cache.get(&key("ditto")).into_suspended().unwrap();
    assert_eq!(cache.peek(&key("ditto")), Some(EntryStatus::Pending));

    // dropping the runtime drops the computation without it ever settling
    drop(runtime);

    assert_eq!(cache.peek(&key("ditto")), Some(EntryStatus::Failed));
    assert_eq!(
        futures::executor::block_on(suspended),
        Err(CacheError::InternalError)
    );
    assert_eq!(
        cache.get(&key("ditto")).into_ready(),
        Some(Err(CacheError::InternalError))
    );
    assert_eq!(pokedex.computations(), 1);
}

#[test]
fn test_lookup_on_shut_down_runtime() {
    setup();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let handle = runtime.handle().clone();
    drop(runtime);

    let pokedex = Pokedex::new();
    let cache = SuspendingCache::new(CacheConfig::default(), pokedex.clone(), handle);

    // the first lookup is pending, but the computation is gone before it ever runs
    let suspended = cache.get(&key("porygon")).into_suspended().unwrap();
    assert_eq!(cache.peek(&key("porygon")), Some(EntryStatus::Failed));
    assert_eq!(
        futures::executor::block_on(suspended),
        Err(CacheError::InternalError)
    );
    assert_eq!(
        cache.get(&key("porygon")).into_ready(),
        Some(Err(CacheError::InternalError))
    );
    assert_eq!(pokedex.computations(), 1);
}
