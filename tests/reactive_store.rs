#![cfg(not(target_arch = "wasm32"))]

use livebind::error::LiveErrorCode;
use livebind::model::{Model, ModelId};
use livebind::platform::TokioSpawner;
use livebind::query::MemoryTransport;
use livebind::reactive::{ReactiveContext, ReactiveValue};
use livebind::store::StoreState;
use livebind::{Session, SessionSettings};
use serde_json::{json, Map, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

fn seeded_transport() -> MemoryTransport {
    let transport = MemoryTransport::new();
    transport.set_rows(
        "tasks",
        vec![
            json!({"_id": 1, "status": "open"}),
            json!({"_id": 2, "status": "done"}),
            json!({"_id": 3, "status": "open"}),
        ],
    );
    transport
}

fn ids(models: &[Model]) -> Vec<ModelId> {
    models.iter().map(|model| model.id().clone()).collect()
}

#[test]
fn reading_a_collection_inside_a_computation_converges() {
    let transport = seeded_transport();
    let session = Session::new(Rc::new(transport.clone()));
    let tasks = session.collection("tasks");

    let lengths = Rc::new(RefCell::new(Vec::new()));
    let (reader, sink) = (tasks.clone(), lengths.clone());
    let _view = session.context().autorun(move || sink.borrow_mut().push(reader.len()));

    assert_eq!(*lengths.borrow(), vec![0]);
    session.run_until_stalled().unwrap();

    assert_eq!(lengths.borrow().last(), Some(&3));
    assert_eq!(tasks.state(), StoreState::Loaded);
    assert_eq!(transport.add_listener_count(), 1);
    assert!(tasks.store().unwrap().listener().is_some());
}

#[test]
fn stopping_the_last_reader_releases_the_subscription() {
    let transport = seeded_transport();
    let session = Session::new(Rc::new(transport.clone()));
    let tasks = session.collection("tasks");

    let reader = tasks.clone();
    let view = session.context().autorun(move || {
        reader.len();
    });
    session.run_until_stalled().unwrap();
    let store = tasks.store().unwrap();
    assert_eq!(store.state_untracked(), StoreState::Loaded);

    view.stop();
    session.run_until_stalled().unwrap();

    assert_eq!(store.state_untracked(), StoreState::Dirty);
    assert!(store.listener().is_none());
    assert_eq!(transport.remove_listener_count(), 1);
    assert!(session.pool().is_empty());
}

#[test]
fn state_reader_alone_keeps_the_store_attached() {
    let transport = seeded_transport();
    let session = Session::new(Rc::new(transport.clone()));
    let tasks = session.collection("tasks");

    let (rows, states) = (tasks.clone(), tasks.clone());
    let row_view = session.context().autorun(move || {
        rows.len();
    });
    let state_view = session.context().autorun(move || {
        states.state();
    });
    session.run_until_stalled().unwrap();

    row_view.stop();
    session.run_until_stalled().unwrap();
    assert_eq!(tasks.store().unwrap().state_untracked(), StoreState::Loaded);
    assert_eq!(transport.remove_listener_count(), 0);

    state_view.stop();
    session.run_until_stalled().unwrap();
    assert_eq!(tasks.store().unwrap().state_untracked(), StoreState::Dirty);
    assert_eq!(transport.remove_listener_count(), 1);
}

#[test]
fn reactive_query_switches_listeners() {
    let transport = seeded_transport();
    let session = Session::new(Rc::new(transport.clone()));
    let status = ReactiveValue::new(session.context(), "open".to_owned());

    let filter_status = status.clone();
    let tasks = session
        .collection("tasks")
        .find_reactive(move || object(json!({"status": filter_status.get()})))
        .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (reader, sink) = (tasks.clone(), seen.clone());
    let _view = session.context().autorun(move || sink.borrow_mut().push(ids(&reader.to_vec())));
    session.run_until_stalled().unwrap();
    assert_eq!(
        seen.borrow().last(),
        Some(&vec![ModelId::from(1), ModelId::from(3)])
    );
    let open_listener = tasks.store().unwrap().listener().unwrap();

    status.set("done".to_owned());
    session.run_until_stalled().unwrap();

    assert_eq!(seen.borrow().last(), Some(&vec![ModelId::from(2)]));
    assert_eq!(transport.add_listener_count(), 2);
    assert_eq!(transport.remove_listener_count(), 1);
    assert!(!open_listener.is_listening());
    assert_eq!(session.pool().len(), 1);
    let done_listener = tasks.store().unwrap().listener().unwrap();
    assert!(!done_listener.ptr_eq(&open_listener));
    assert_eq!(done_listener.query().filter(), &object(json!({"status": "done"})));
}

#[test]
fn find_rejects_both_query_forms() {
    let session = Session::new(Rc::new(MemoryTransport::new()));
    let err = session
        .collection("tasks")
        .find_with(Some(Map::new()), Some(Rc::new(Map::new)))
        .unwrap_err();
    assert_eq!(err.code, LiveErrorCode::InvalidArgument);
}

#[test]
fn event_callbacks_keep_the_store_listening() {
    let transport = seeded_transport();
    let session = Session::new(Rc::new(transport.clone()));
    let tasks = session.collection("tasks");

    let registration = tasks.on(|_| {});
    session.run_until_stalled().unwrap();
    let store = tasks.store().unwrap();
    assert_eq!(store.state_untracked(), StoreState::Loaded);
    assert!(store.has_events());

    // A fetch against a loaded store resolves at once and keeps listening.
    let rows = tasks.fetch().unwrap().try_take().unwrap().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(store.listener().is_some());

    drop(registration);
    session.run_until_stalled().unwrap();
    assert_eq!(store.state_untracked(), StoreState::Dirty);
    assert!(store.listener().is_none());
    assert_eq!(transport.remove_listener_count(), 1);

    // Reading a dirty collection loads it again.
    let rows = session.run_until(tasks.fetch().unwrap()).unwrap().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(transport.add_listener_count(), 2);
}

#[test]
fn state_changes_are_reactive() {
    let transport = seeded_transport();
    let session = Session::new(Rc::new(transport));
    let tasks = session.collection("tasks");

    let states = Rc::new(RefCell::new(Vec::new()));
    let (reader, sink) = (tasks.clone(), states.clone());
    let _view = session.context().autorun(move || sink.borrow_mut().push(reader.state()));

    let _events = tasks.on(|_| {});
    session.run_until_stalled().unwrap();

    assert_eq!(states.borrow().first(), Some(&StoreState::NotLoaded));
    assert_eq!(states.borrow().last(), Some(&StoreState::Loaded));
}

#[test]
fn unload_returns_to_not_loaded() {
    let transport = seeded_transport();
    let session = Session::new(Rc::new(transport));
    let tasks = session.collection("tasks");
    session.run_until(tasks.fetch().unwrap()).unwrap().unwrap();

    tasks.unload_data().unwrap();
    assert_eq!(tasks.state(), StoreState::NotLoaded);
    assert_eq!(tasks.model().len_untracked(), 0);
}

#[test]
fn reading_after_unload_subscribes_again() {
    let transport = seeded_transport();
    let session = Session::new(Rc::new(transport.clone()));
    let tasks = session.collection("tasks");
    let _events = tasks.on(|_| {});
    session.run_until_stalled().unwrap();

    tasks.unload_data().unwrap();
    assert!(tasks.store().unwrap().listener().is_none());
    assert_eq!(tasks.len(), 0);
    assert_eq!(tasks.state(), StoreState::Loading);
    session.run_until_stalled().unwrap();

    assert_eq!(tasks.state(), StoreState::Loaded);
    assert_eq!(tasks.len(), 3);
    assert_eq!(transport.add_listener_count(), 2);
    assert_eq!(transport.remove_listener_count(), 1);
}

#[test]
fn find_one_is_empty_until_loaded() {
    let transport = seeded_transport();
    let session = Session::new(Rc::new(transport.clone()));
    let tasks = session.collection("tasks");

    let found = Rc::new(RefCell::new(None));
    let (reader, slot) = (tasks.clone(), found.clone());
    let _view = session.context().autorun(move || {
        let model = reader.find_one(object(json!({"status": "done"}))).unwrap();
        *slot.borrow_mut() = model.map(|model| model.id().clone());
    });
    assert!(found.borrow().is_none());

    session.run_until_stalled().unwrap();
    assert_eq!(*found.borrow(), Some(ModelId::from(2)));
    assert_eq!(transport.add_listener_count(), 1);
}

#[test]
fn manual_flush_without_auto_flush() {
    let transport = seeded_transport();
    let session = Session::builder(Rc::new(transport))
        .settings(SessionSettings {
            name: Some("manual".into()),
            auto_flush: false,
            ..Default::default()
        })
        .build();
    let tasks = session.collection("tasks");

    let runs = Rc::new(Cell::new(0));
    let (reader, counter) = (tasks.clone(), runs.clone());
    let _view = session.context().autorun(move || {
        reader.len();
        counter.set(counter.get() + 1);
    });
    session.run_until_stalled().unwrap();
    assert_eq!(runs.get(), 1);
    assert!(session.context().pending() > 0);

    session.flush().unwrap();
    assert_eq!(runs.get(), 2);
}

#[test]
fn custom_model_factory_builds_rows() {
    let transport = seeded_transport();
    let session = Session::builder(Rc::new(transport))
        .model_factory(Rc::new(
            |context: &ReactiveContext, id: ModelId, mut attributes: Map<String, Value>| {
                attributes.insert("source".into(), json!("remote"));
                Model::new(context, id, attributes)
            },
        ))
        .build();

    let tasks = session.collection("tasks");
    let rows = session.run_until(tasks.fetch().unwrap()).unwrap().unwrap();
    assert!(rows.iter().all(|model| model.get("source") == Some(json!("remote"))));
}

#[tokio::test(flavor = "current_thread")]
async fn tokio_spawner_drives_a_session() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let transport = seeded_transport();
            let session = Session::builder(Rc::new(transport.clone()))
                .spawner(Rc::new(TokioSpawner))
                .build();
            let tasks = session.collection("tasks").find(object(json!({"status": "open"}))).unwrap();

            let rows = tasks.fetch().unwrap().await.unwrap();
            assert_eq!(ids(&rows), vec![ModelId::from(1), ModelId::from(3)]);

            let err = session.run_until_stalled().unwrap_err();
            assert_eq!(err.code, LiveErrorCode::Unsupported);
        })
        .await;
}
