//! Named state transitions and their dispatch.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_lite::future::BoxedLocal;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::ModelError;
use crate::event::{ActionEvent, Event};
use crate::facade::Mutable;
use crate::model::Instance;

pub(crate) type ActionFn = Rc<dyn Fn(&Mutable, &[Value]) -> Result<Outcome, ModelError>>;

/// Deferred remainder of an async action.
pub type Task = BoxedLocal<Result<Value, ModelError>>;

/// What an action body hands back.
pub enum Outcome {
    Ready(Value),
    /// Completion is reported once the task resolves successfully.
    Pending(Task),
}

impl Outcome {
    pub fn pending<F>(task: F) -> Self
    where
        F: Future<Output = Result<Value, ModelError>> + 'static,
    {
        Outcome::Pending(Box::pin(task))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending(_))
    }

    pub fn into_ready(self) -> Option<Value> {
        match self {
            Outcome::Ready(value) => Some(value),
            Outcome::Pending(_) => None,
        }
    }

    /// Waits for the action to finish, whichever way it returned.
    pub async fn settle(self) -> Result<Value, ModelError> {
        match self {
            Outcome::Ready(value) => Ok(value),
            Outcome::Pending(task) => task.await,
        }
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Outcome::Ready(value)
    }
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Outcome::Ready(Value::Null)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Outcome::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Action table of a [`ModelDef`](crate::ModelDef).
#[derive(Default, Clone)]
pub struct Actions {
    entries: Vec<(String, ActionFn)>,
}

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an action. The body receives the mutable facade over the
    /// instance and the call arguments.
    pub fn action<F, R>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Mutable, &[Value]) -> Result<R, ModelError> + 'static,
        R: Into<Outcome>,
    {
        let body: ActionFn =
            Rc::new(move |this: &Mutable, args: &[Value]| body(this, args).map(Into::into));
        self.entries.push((name.into(), body));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, ActionFn)> {
        self.entries
    }
}

enum Progress {
    Running(Task),
    /// Being polled further up the stack.
    Polling,
    Done(Option<Result<Value, ModelError>>),
}

/// Continuation of an async action, shared between the task handed to the
/// caller and the store, so it can finish after the caller lets go.
pub(crate) struct PendingAction {
    progress: RefCell<Progress>,
}

impl PendingAction {
    fn new(task: Task) -> Self {
        Self {
            progress: RefCell::new(Progress::Running(task)),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(*self.progress.borrow(), Progress::Done(_))
    }

    /// Polls the continuation once unless it already finished.
    pub(crate) fn drive(&self, cx: &mut Context<'_>) -> Poll<()> {
        let current = std::mem::replace(&mut *self.progress.borrow_mut(), Progress::Polling);
        let mut task = match current {
            Progress::Running(task) => task,
            other => {
                let finished = matches!(other, Progress::Done(_));
                *self.progress.borrow_mut() = other;
                return if finished { Poll::Ready(()) } else { Poll::Pending };
            }
        };
        let (next, poll) = match task.as_mut().poll(cx) {
            Poll::Ready(output) => (Progress::Done(Some(output)), Poll::Ready(())),
            Poll::Pending => (Progress::Running(task), Poll::Pending),
        };
        *self.progress.borrow_mut() = next;
        poll
    }

    fn take_output(&self) -> Option<Result<Value, ModelError>> {
        match &mut *self.progress.borrow_mut() {
            Progress::Done(output) => output.take(),
            _ => None,
        }
    }
}

/// The caller's side of a [`PendingAction`].
struct ActionHandle {
    pending: Rc<PendingAction>,
}

impl Future for ActionHandle {
    type Output = Result<Value, ModelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.pending.drive(cx) {
            Poll::Ready(()) => Poll::Ready(self.pending.take_output().unwrap_or(Ok(Value::Null))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Argument `index`, or null when the caller passed fewer.
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

impl Instance {
    /// Invokes action `name`.
    ///
    /// Observers see an `action` event before the body runs. A ready
    /// outcome is followed by `action-complete` and `snapshot`; a pending
    /// one emits those when its task resolves successfully. Errors from the
    /// body propagate and suppress completion.
    ///
    /// Pending tasks are shared with the store: dropping the returned task
    /// does not cancel the action, and [`Store::run_pending`](crate::Store::run_pending)
    /// finishes it.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Outcome, ModelError> {
        let definition = self.definition();
        let body = definition
            .action(name)
            .ok_or_else(|| ModelError::UnknownAction {
                model: definition.name().to_string(),
                name: name.to_string(),
            })?;
        trace!(model = %definition.name(), action = %name, "action dispatched");
        let event = ActionEvent {
            name: name.to_string(),
            path: String::new(),
            args,
        };
        self.store().dispatch(self.id(), Event::Action(event.clone()));

        let outcome = body(&self.mutable(), &event.args)?;
        match outcome {
            Outcome::Ready(value) => {
                self.complete(event);
                Ok(Outcome::Ready(value))
            }
            Outcome::Pending(task) => {
                let instance = self.clone();
                let continuation: Task = Box::pin(async move {
                    let value = task.await.inspect_err(|err| {
                        debug!(action = %event.name, error = %err, "async action failed");
                    })?;
                    instance.complete(event);
                    Ok(value)
                });
                let pending = Rc::new(PendingAction::new(continuation));
                self.store().track_pending(Rc::clone(&pending));
                Ok(Outcome::pending(ActionHandle { pending }))
            }
        }
    }

    fn complete(&self, event: ActionEvent) {
        trace!(action = %event.name, "action complete");
        self.store().dispatch(self.id(), Event::ActionComplete(event));
        self.store().dispatch(
            self.id(),
            Event::Snapshot {
                snapshot: Value::Null,
            },
        );
    }
}
