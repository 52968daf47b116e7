use std::cell::RefCell;
use std::rc::Rc;

use arbor::{
    arg, Actions, Input, Instance, ModelDef, ModelError, ModelFactory, Store, StoreConfig,
    ViewPolicy, Views,
};
use serde_json::{json, Value};

fn define_todo(store: &Store, default_text: &str) -> ModelFactory {
    let default_text = default_text.to_string();
    store
        .define(
            "Todo",
            ModelDef::new(move || json!({"text": default_text, "completed": false}))
                .actions(Actions::new().action("complete", |this, _| this.set("completed", true))),
        )
        .unwrap()
}

fn define_board(store: &Store) -> ModelFactory {
    store
        .define(
            "Board",
            ModelDef::new(|| json!({"todos": [{"__model": "Todo", "text": "seeded"}]})).actions(
                Actions::new()
                    .action("add", |this, args| {
                        let list = this.get_node("todos").ok_or(ModelError::NotAList)?;
                        list.push(json!({"__model": "Todo", "text": arg(args, 0)}))?;
                        Ok(())
                    })
                    .action("addPlain", |this, args| {
                        let list = this.get_node("todos").ok_or(ModelError::NotAList)?;
                        list.push(json!({"text": arg(args, 0)}))?;
                        Ok(())
                    }),
            ),
        )
        .unwrap()
}

fn todo_at(board: &Instance, index: usize) -> Option<Instance> {
    board
        .state()
        .pointer(&format!("/todos/{index}"))
        .and_then(|entry| entry.into_model())
}

#[test]
fn tagged_initial_state_becomes_live_instances() {
    let store = Store::new();
    define_todo(&store, "");
    let board = define_board(&store).create_default().unwrap();

    let seeded = todo_at(&board, 0).expect("tagged record must rehydrate");
    assert_eq!(seeded.model_name(), "Todo");
    assert_eq!(
        seeded.get_snapshot().unwrap(),
        json!({"__model": "Todo", "text": "seeded", "completed": false})
    );
    assert_eq!(seeded.parent(), Some(board.clone()));

    board.call("add", vec![json!("written")]).unwrap();
    board.call("addPlain", vec![json!("plain")]).unwrap();
    assert!(todo_at(&board, 1).is_some());
    assert!(todo_at(&board, 2).is_none());
}

#[test]
fn reset_turns_tags_into_plain_data() {
    let store = Store::new();
    define_todo(&store, "");
    let board_factory = define_board(&store);
    assert!(store.is_registered("Todo"));

    store.reset_registry();
    assert!(!store.is_registered("Todo"));
    assert!(store.registered_models().is_empty());

    let board = board_factory.create_default().unwrap();
    assert!(todo_at(&board, 0).is_none());
    assert_eq!(
        board.snapshot_at("/todos/0").unwrap(),
        Some(json!({"__model": "Todo", "text": "seeded"}))
    );
}

#[test]
fn redefinition_replaces_the_registered_model() {
    let store = Store::new();
    define_todo(&store, "old default");
    define_todo(&store, "new default");
    let board = define_board(&store).create_default().unwrap();

    board
        .apply_snapshot(
            &json!({"todos": [{"__model": "Todo", "text": "seeded"}, {"__model": "Todo"}]}),
            true,
        )
        .unwrap();
    let restored = todo_at(&board, 1).expect("snapshot restore must rehydrate");
    assert_eq!(restored.state().get_str("text").as_deref(), Some("new default"));
}

#[test]
fn whole_snapshots_rehydrate_into_new_instances() {
    let store = Store::new();
    define_todo(&store, "");
    let board = define_board(&store).create_default().unwrap();
    board.call("add", vec![json!("second")]).unwrap();
    todo_at(&board, 1).unwrap().call("complete", vec![]).unwrap();

    let snapshot = board.get_snapshot().unwrap();
    let copy = store.rehydrate(&snapshot).unwrap().expect("Board is registered");
    assert_ne!(copy, board);
    assert_eq!(copy.get_snapshot().unwrap(), snapshot);
    assert_eq!(todo_at(&copy, 1).unwrap().state().get_bool("completed"), Some(true));

    assert!(store.rehydrate(&json!({"__model": "Nope"})).unwrap().is_none());
    assert!(store.rehydrate(&json!([1])).unwrap().is_none());
}

#[test]
fn reassigned_instances_move_instead_of_copying() {
    let store = Store::new();
    let todo = define_todo(&store, "moving");
    let hand_off: Rc<RefCell<Option<Instance>>> = Rc::new(RefCell::new(None));
    let held = Rc::clone(&hand_off);
    let shelf = store
        .define(
            "Shelf",
            ModelDef::new(|| json!({"items": []})).actions(Actions::new().action(
                "take",
                move |this, _| {
                    let item = held.borrow().clone().ok_or(ModelError::Detached)?;
                    let items = this.get_node("items").ok_or(ModelError::NotAList)?;
                    items.push(item)?;
                    Ok(())
                },
            )),
        )
        .unwrap();
    let left = shelf.create_default().unwrap();
    let right = shelf.create_default().unwrap();
    let item = todo.create_default().unwrap();
    *hand_off.borrow_mut() = Some(item.clone());

    left.call("take", vec![]).unwrap();
    assert_eq!(item.parent(), Some(left.clone()));

    let left_patches = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&left_patches);
    left.on_patch(move |patch| sink.borrow_mut().push((patch.path.clone(), patch.value.clone())));

    right.call("take", vec![]).unwrap();
    assert_eq!(item.parent(), Some(right.clone()));
    assert_eq!(*left_patches.borrow(), [("/items/0".to_string(), Value::Null)]);
    assert_eq!(left.snapshot_at("/items/0").unwrap(), Some(Value::Null));

    let right_patches = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&right_patches);
    right.on_patch(move |patch| sink.borrow_mut().push(patch.path.clone()));

    item.call("complete", vec![]).unwrap();
    assert_eq!(left_patches.borrow().len(), 1);
    assert_eq!(*right_patches.borrow(), ["/items/0/completed"]);
    assert_eq!(
        left.get_snapshot().unwrap(),
        json!({"__model": "Shelf", "items": [null]})
    );
}

/// Boxes that can be put into one another through a shared hand-off.
fn boxes(store: &Store, hand_off: &Rc<RefCell<Option<Instance>>>) -> ModelFactory {
    let held = Rc::clone(hand_off);
    store
        .define(
            "Box",
            ModelDef::new(|| json!({"inner": null}))
                .actions(Actions::new().action("put", move |this, _| {
                    let item = held.borrow().clone().ok_or(ModelError::Detached)?;
                    this.set("inner", item)
                }))
                .views(Views::new().view("holds", |this| {
                    Value::from(this.get("inner").is_some_and(|inner| inner.into_model().is_some()))
                })),
        )
        .unwrap()
}

#[test]
fn moved_instances_leave_their_old_container() {
    let store = Store::new();
    let hand_off = Rc::new(RefCell::new(None));
    let factory = boxes(&store, &hand_off);
    let (a, b, c) = (
        factory.create_default().unwrap(),
        factory.create_default().unwrap(),
        factory.create_default().unwrap(),
    );

    *hand_off.borrow_mut() = Some(b.clone());
    a.call("put", vec![]).unwrap();
    assert_eq!(a.view("holds").unwrap(), json!(true));
    c.call("put", vec![]).unwrap();
    assert_eq!(a.view("holds").unwrap(), json!(false));
    assert_eq!(b.parent(), Some(c.clone()));

    // `a` no longer holds `b`, so `b` may now hold `a`.
    *hand_off.borrow_mut() = Some(a.clone());
    b.call("put", vec![]).unwrap();
    assert_eq!(a.root(), c);
    assert_eq!(
        c.get_snapshot().unwrap(),
        json!({"__model": "Box", "inner": {
            "__model": "Box", "inner": {"__model": "Box", "inner": null}
        }})
    );

    *hand_off.borrow_mut() = Some(c.clone());
    assert!(matches!(a.call("put", vec![]), Err(ModelError::Cycle)));
    assert_eq!(a.state().get("inner").map(|inner| inner.is_null()), Some(true));
}

#[test]
fn config_loads_from_toml_and_changes_the_tag_key() {
    let config: StoreConfig = toml::from_str(
        r#"
            model_key = "$type"
            view_policy = "eager"
        "#,
    )
    .unwrap();
    assert_eq!(config.view_policy, ViewPolicy::Eager);

    let store = Store::with_config(config);
    store
        .define("Leaf", ModelDef::new(|| json!({"v": 1})))
        .unwrap();
    let tree = store
        .define(
            "Tree",
            ModelDef::new(|| json!({"leaf": {"$type": "Leaf", "v": 2}, "other": {"__model": "Leaf"}})),
        )
        .unwrap()
        .create_default()
        .unwrap();

    assert_eq!(tree.get_snapshot().unwrap()["$type"], json!("Tree"));
    assert!(tree.child("leaf").is_some());
    assert!(tree.child("other").is_none());
    assert!(matches!(
        store.define(
            "Bad",
            ModelDef::new(|| json!({})).views(Views::new().view("$type", |_| Value::Null))
        ),
        Err(arbor::DefinitionError::ReservedMember { .. })
    ));
}

#[test]
fn eager_views_recompute_before_subscribers_run() {
    let build = |policy: ViewPolicy| {
        let store = Store::with_config(StoreConfig::default().with_view_policy(policy));
        store
            .define(
                "Counter",
                ModelDef::new(|| json!({"n": 0}))
                    .actions(Actions::new().action("bump", |this, _| {
                        let n = this.get_i64("n").unwrap_or(0);
                        this.set("n", n + 1)
                    }))
                    .views(Views::new().view("double", |this| {
                        Value::from(this.get_i64("n").unwrap_or(0) * 2)
                    })),
            )
            .unwrap()
            .create_default()
            .unwrap()
    };

    let lazy = build(ViewPolicy::Lazy);
    lazy.call("bump", vec![]).unwrap();
    assert_eq!(lazy.view_evaluations(), 0);
    assert_eq!(lazy.view("double").unwrap(), json!(2));
    assert_eq!(lazy.view_evaluations(), 1);

    let eager = build(ViewPolicy::Eager);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let observed = eager.clone();
    eager.on_patch(move |_| sink.borrow_mut().push(observed.view_evaluations()));
    eager.call("bump", vec![]).unwrap();
    assert_eq!(*seen.borrow(), [1]);
    assert_eq!(eager.view("double").unwrap(), json!(2));
    assert_eq!(eager.view_evaluations(), 1);
}

#[test]
fn overrides_can_carry_instances() {
    let store = Store::new();
    let todo = define_todo(&store, "");
    let holder = store
        .define("Holder", ModelDef::new(|| json!({"slot": null})))
        .unwrap();
    let item = todo.create_default().unwrap();
    let held = holder
        .create(Input::record([("slot", Input::from(&item))]))
        .unwrap();
    assert_eq!(held.child("slot"), Some(item.clone()));
    assert_eq!(item.root(), held);
}
