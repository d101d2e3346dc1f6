/// Entity write tests
///
/// Pending deltas and child records across mutations against the in-memory store.
/// Run with: cargo test --test entity_write_tests
mod support;

use std::sync::Arc;

use storecheck::marshal::Children;
use storecheck::requirements::fixtures::{DataTypes, Order, OrderLine};
use storecheck::values::{Amount, IntSet};
use storecheck::{Actor, MutateOptions, RetrieveOptions, StoreError};
use support::{MemoryStore, connect, test_caller};

async fn actor_for<F>(store: Arc<MemoryStore>, register: F) -> Actor
where
    F: FnOnce(&storecheck::Connection) -> storecheck::Result<()>,
{
    let connection = connect(store);
    register(&connection).unwrap();
    connection.sync_schema().wait().await.unwrap();
    connection.actor(test_caller())
}

#[tokio::test]
async fn test_selective_mutate_clears_sent_deltas() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor_for(store, |c| c.register::<DataTypes>()).await;

    let mut entity = DataTypes {
        integer_set: IntSet::from_values([1, 2]),
        ..DataTypes::default()
    };
    actor.mutate(&mut entity, MutateOptions::new()).await.unwrap();
    let id = entity.base.id().clone();

    entity.integer_set.add(7);
    actor
        .mutate(&mut entity, MutateOptions::new().select(["integer_set"]))
        .await
        .unwrap();
    assert!(!entity.integer_set.has_delta());

    // Another writer removes the member in between.
    let mut other: DataTypes = actor.get(&id, RetrieveOptions::new()).await.unwrap();
    assert!(other.integer_set.contains(&7));
    other.integer_set.remove(&7);
    actor.mutate(&mut other, MutateOptions::new()).await.unwrap();

    actor.mutate(&mut entity, MutateOptions::new()).await.unwrap();
    let read: DataTypes = actor.get(&id, RetrieveOptions::new()).await.unwrap();
    let mut members = read.integer_set.to_vec();
    members.sort();
    assert_eq!(members, vec![1, 2]);
}

#[tokio::test]
async fn test_selective_mutate_keeps_unselected_deltas() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor_for(store, |c| c.register::<DataTypes>()).await;

    let mut entity = DataTypes::default();
    actor.mutate(&mut entity, MutateOptions::new()).await.unwrap();

    entity.integer_set.add(3);
    entity.string_set.add("blue".to_string());
    actor
        .mutate(&mut entity, MutateOptions::new().select(["integer_set"]))
        .await
        .unwrap();
    assert!(!entity.integer_set.has_delta());
    assert!(entity.string_set.has_delta());

    actor.mutate(&mut entity, MutateOptions::new()).await.unwrap();
    let read: DataTypes = actor.get(entity.base.id(), RetrieveOptions::new()).await.unwrap();
    assert!(read.string_set.contains(&"blue".to_string()));
    assert!(read.integer_set.contains(&3));
}

#[tokio::test]
async fn test_dotted_child_id_rejected_before_sending() {
    let store = Arc::new(MemoryStore::new());
    let actor = actor_for(store.clone(), |c| c.register::<Order>()).await;

    let mut order = Order {
        number: "order-dotted".into(),
        lines: Children::new(vec![OrderLine {
            sku: "sku.1".into(),
            quantity: 1,
            unit_price: Amount::gbp(100),
        }]),
        ..Order::default()
    };
    let err = actor.mutate(&mut order, MutateOptions::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::Marshal(_)), "{:?}", err);
    assert!(!order.base.has_id());
    assert!(!store.request_kinds().contains(&"mutate"));
}
