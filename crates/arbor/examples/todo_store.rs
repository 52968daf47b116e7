//! A small todo list driven through actions, printing every event.
//!
//! Run:  cargo run --example todo_store -p arbor

use arbor::{arg, Actions, Instance, ModelDef, ModelError, Store, Views};
use serde_json::{json, Value};

fn todos_of(this: &arbor::ReadOnly) -> Vec<Instance> {
    this.get_node("todos")
        .map(|todos| todos.items().into_iter().filter_map(|e| e.into_model()).collect())
        .unwrap_or_default()
}

// ── models ────────────────────────────────────────────────────────────────────

fn build(store: &Store) -> Result<Instance, Box<dyn std::error::Error>> {
    store.define(
        "Todo",
        ModelDef::new(|| json!({"text": "", "completed": false})).actions(
            Actions::new().action("toggle", |this, _| {
                let done = this.get_bool("completed").unwrap_or(false);
                this.set("completed", !done)
            }),
        ),
    )?;

    let app = store
        .define(
            "TodoList",
            ModelDef::new(|| json!({"todos": []}))
                .actions(Actions::new().action("add", |this, args| {
                    let todos = this.get_node("todos").ok_or(ModelError::NotAList)?;
                    todos.push(json!({"__model": "Todo", "text": arg(args, 0)}))?;
                    Ok(())
                }))
                .views(Views::new().view("remaining", |this| {
                    let open = todos_of(this)
                        .iter()
                        .filter(|t| !t.state().get_bool("completed").unwrap_or(false))
                        .count();
                    Value::from(open)
                })),
        )?
        .create_default()?;
    Ok(app)
}

// ── main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new();
    let app = build(&store)?;

    app.on_action(|ev| println!("  action    {} {}", ev.name, ev.path), false);
    app.on_patch(|patch| println!("  patch     {} = {}", patch.path, patch.value));
    app.on_snapshot(|snapshot| println!("  snapshot  {snapshot}"));

    println!("\n  adding two todos\n");
    app.call("add", vec![json!("write the demo")])?;
    app.call("add", vec![json!("read the output")])?;

    println!("\n  toggling the first one through its own instance\n");
    let first = app.state().pointer("/todos/0").and_then(|e| e.into_model());
    if let Some(first) = first {
        first.call("toggle", vec![])?;
    }

    println!("\n  remaining: {}", app.view("remaining")?);

    let saved = app.get_snapshot()?;
    let copy = store
        .rehydrate(&saved)?
        .ok_or("TodoList is registered")?;
    println!("  rehydrated copy matches: {}\n", copy.get_snapshot()? == saved);
    Ok(())
}
