//! A minimal history recorder driving an instance the way a time-travel
//! debugger does: record after every completed action, jump by applying
//! recorded snapshots, and ignore its own restores.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arbor::{arg, Actions, Instance, ModelDef, Store, Subscription, Views};
use serde_json::{json, Value};

struct History {
    target: Instance,
    restoring: Rc<Cell<bool>>,
    entries: Rc<RefCell<Vec<(String, Value)>>>,
    subscriptions: Vec<Subscription>,
}

impl History {
    fn attach(target: &Instance) -> Self {
        let restoring = Rc::new(Cell::new(false));
        let entries = Rc::new(RefCell::new(vec![(
            "@@INIT".to_string(),
            target.get_snapshot().unwrap(),
        )]));

        let (flag, log, source) = (Rc::clone(&restoring), Rc::clone(&entries), target.clone());
        let on_action = target.on_action(
            move |ev| {
                if !flag.get() {
                    log.borrow_mut()
                        .push((ev.name.clone(), source.get_snapshot().unwrap()));
                }
            },
            true,
        );
        let (flag, log) = (Rc::clone(&restoring), Rc::clone(&entries));
        let on_snapshot = target.on_snapshot(move |snapshot| {
            if flag.get() {
                return;
            }
            // Completed actions are already recorded; anything else is an import.
            let last = log.borrow().last().map(|(_, s)| s.clone());
            if last.as_ref() != Some(snapshot) {
                log.borrow_mut().push(("@@IMPORT".to_string(), snapshot.clone()));
            }
        });

        Self {
            target: target.clone(),
            restoring,
            entries,
            subscriptions: vec![on_action, on_snapshot],
        }
    }

    fn jump_to(&self, index: usize) {
        let snapshot = self.entries.borrow()[index].1.clone();
        self.restoring.set(true);
        self.target.apply_snapshot(&snapshot, false).unwrap();
        self.restoring.set(false);
    }

    fn labels(&self) -> Vec<String> {
        self.entries.borrow().iter().map(|(name, _)| name.clone()).collect()
    }

    fn detach(&self) {
        for sub in &self.subscriptions {
            sub.unsubscribe();
        }
    }
}

fn counter() -> Instance {
    let store = Store::new();
    store
        .define(
            "Counter",
            ModelDef::new(|| json!({"count": 0, "step": 1}))
                .actions(
                    Actions::new()
                        .action("increment", |this, _| {
                            let next = this.get_i64("count").unwrap_or(0)
                                + this.get_i64("step").unwrap_or(1);
                            this.set("count", next)
                        })
                        .action("setStep", |this, args| this.set("step", arg(args, 0))),
                )
                .views(Views::new().view("label", |this| {
                    Value::from(format!("count={}", this.get_i64("count").unwrap_or(0)))
                })),
        )
        .unwrap()
        .create_default()
        .unwrap()
}

#[test]
fn completed_actions_are_recorded_with_their_snapshots() {
    let counter = counter();
    let history = History::attach(&counter);

    counter.call("increment", vec![]).unwrap();
    counter.call("setStep", vec![json!(5)]).unwrap();
    counter.call("increment", vec![]).unwrap();

    assert_eq!(history.labels(), ["@@INIT", "increment", "setStep", "increment"]);
    assert_eq!(history.entries.borrow()[3].1["count"], json!(6));
}

#[test]
fn jumping_restores_state_without_growing_history() {
    let counter = counter();
    let history = History::attach(&counter);
    counter.call("increment", vec![]).unwrap();
    counter.call("increment", vec![]).unwrap();
    assert_eq!(counter.view("label").unwrap(), json!("count=2"));

    history.jump_to(1);
    assert_eq!(counter.state().get_i64("count"), Some(1));
    assert_eq!(counter.view("label").unwrap(), json!("count=1"));

    history.jump_to(0);
    assert_eq!(counter.view("label").unwrap(), json!("count=0"));
    assert_eq!(history.labels().len(), 3);
}

#[test]
fn external_imports_are_recorded_once() {
    let counter = counter();
    let history = History::attach(&counter);

    counter
        .apply_snapshot(&json!({"count": 40, "step": 2}), false)
        .unwrap();
    counter.call("increment", vec![]).unwrap();
    assert_eq!(history.labels(), ["@@INIT", "@@IMPORT", "increment"]);
    assert_eq!(counter.state().get_i64("count"), Some(42));

    history.detach();
    counter.call("increment", vec![]).unwrap();
    assert_eq!(history.labels().len(), 3);
}
