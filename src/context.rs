//! Ambient, per-call-frame values.
//!
//! Handler methods (`Staking::delegate`, `Governance::vote`, ...) need
//! access to things like "who signed this transaction" or "what time is
//! it" without every caller threading them through explicit parameters.
//! A [`Context`] is a thread-local stack of typed slots that the
//! orchestration layer (`app::App::deliver_tx`, `BeginBlock`/`EndBlock`
//! dispatch) populates before invoking module code, and clears afterward.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static CONTEXT: RefCell<HashMap<TypeId, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Installs `value` in the ambient context for the duration of `f`, then
/// removes it (restoring whatever was there before, if anything).
pub fn with_context<T: 'static, R>(value: T, f: impl FnOnce() -> R) -> R {
    let previous = CONTEXT.with(|ctx| {
        ctx.borrow_mut()
            .insert(TypeId::of::<T>(), Box::new(value))
    });
    let result = f();
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        match previous {
            Some(previous) => {
                ctx.insert(TypeId::of::<T>(), previous);
            }
            None => {
                ctx.remove(&TypeId::of::<T>());
            }
        }
    });
    result
}

/// Implemented by every type that reads from the ambient context. Blanket
/// implementation below covers all `Sized` types, mirroring the reference
/// framework's `GetContext` trait, which every module struct picks up for
/// free via `self.context::<Signer>()`.
pub trait GetContext {
    fn context<T: Clone + 'static>(&self) -> Option<T>;
}

impl<S> GetContext for S {
    fn context<T: Clone + 'static>(&self) -> Option<T> {
        CONTEXT.with(|ctx| {
            ctx.borrow()
                .get(&TypeId::of::<T>())
                .and_then(|value| value.downcast_ref::<T>())
                .cloned()
        })
    }
}
