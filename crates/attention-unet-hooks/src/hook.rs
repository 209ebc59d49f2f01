//! Hook points and the disposable handles registered on them

use std::cell::RefCell;
use std::ops::Index;
use std::rc::{Rc, Weak};

use burn::prelude::*;

use crate::capture::{Capture, CaptureOptions};

type Callback<M, I, O> = Box<dyn FnMut(&M, &I, &O)>;

struct Registry<M, I, O> {
    next_id: usize,
    callbacks: Vec<(usize, Callback<M, I, O>)>,
}

/// Event source that callbacks register on
///
/// For forward points `I`/`O` are the module's input and output; for
/// backward points they are the gradients with respect to them.
/// Callbacks run in registration order. They must not register or remove
/// hooks on the point that is currently firing.
pub struct HookPoint<M, I, O> {
    registry: Rc<RefCell<Registry<M, I, O>>>,
}

impl<M, I, O> HookPoint<M, I, O> {
    pub fn new() -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.registry.borrow().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every registered callback
    pub fn fire(&self, module: &M, input: &I, output: &O) {
        let mut registry = self.registry.borrow_mut();
        for (_, callback) in registry.callbacks.iter_mut() {
            callback(module, input, output);
        }
    }
}

impl<M: 'static, I: 'static, O: 'static> HookPoint<M, I, O> {
    fn register(&self, callback: Callback<M, I, O>) -> Box<dyn Registration> {
        let mut registry = self.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.callbacks.push((id, callback));
        tracing::debug!(id, live = registry.callbacks.len(), "registered hook");

        Box::new(Handle {
            id,
            registry: Rc::downgrade(&self.registry),
        })
    }
}

impl<M, I, O> Default for HookPoint<M, I, O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased registration on some [`HookPoint`]
trait Registration {
    /// Unregisters the callback, returning whether it was still registered
    fn release(&self) -> bool;
}

struct Handle<M, I, O> {
    id: usize,
    registry: Weak<RefCell<Registry<M, I, O>>>,
}

impl<M, I, O> Registration for Handle<M, I, O> {
    fn release(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.borrow_mut();
        let before = registry.callbacks.len();
        registry.callbacks.retain(|(id, _)| *id != self.id);
        let released = registry.callbacks.len() < before;
        tracing::debug!(id = self.id, released, "removed hook");
        released
    }
}

/// Callback registered on one hook point that keeps its latest result
///
/// The registration is released by [`Hook::remove`] or when the hook is
/// dropped, whichever comes first.
pub struct Hook<T> {
    stored: Rc<RefCell<Option<T>>>,
    registration: Option<Box<dyn Registration>>,
}

impl<T: 'static> Hook<T> {
    /// Registers `func` on `point`
    ///
    /// On every event the input and output are prepared according to
    /// `options`, passed to `func` together with the module, and the
    /// result replaces the stored value.
    pub fn new<B, M, I, O, F>(
        point: &HookPoint<M, I, O>,
        mut func: F,
        options: CaptureOptions<B>,
    ) -> Self
    where
        B: Backend,
        M: 'static,
        I: Capture<B> + 'static,
        O: Capture<B> + 'static,
        F: FnMut(&M, &I, &O) -> T + 'static,
    {
        let stored = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&stored);
        let registration = point.register(Box::new(move |module: &M, input: &I, output: &O| {
            let input = options.prepare(input);
            let output = options.prepare(output);
            *slot.borrow_mut() = Some(func(module, &input, &output));
        }));

        Self {
            stored,
            registration: Some(registration),
        }
    }
}

impl<T> Hook<T> {
    /// Latest result, `None` before the first event
    pub fn stored(&self) -> Option<T>
    where
        T: Clone,
    {
        self.stored.borrow().clone()
    }

    /// Takes the latest result out of the hook
    pub fn take(&self) -> Option<T> {
        self.stored.borrow_mut().take()
    }

    /// Unregisters the callback; calling it again does nothing
    pub fn remove(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.release();
        }
    }

    pub fn is_removed(&self) -> bool {
        self.registration.is_none()
    }
}

impl<T> Drop for Hook<T> {
    fn drop(&mut self) {
        self.remove();
    }
}

/// One [`Hook`] per hook point, sharing a single function
pub struct Hooks<T> {
    hooks: Vec<Hook<T>>,
}

impl<T: 'static> Hooks<T> {
    pub fn new<B, M, I, O, F>(
        points: &[&HookPoint<M, I, O>],
        func: F,
        options: CaptureOptions<B>,
    ) -> Self
    where
        B: Backend,
        M: 'static,
        I: Capture<B> + 'static,
        O: Capture<B> + 'static,
        F: FnMut(&M, &I, &O) -> T + 'static,
    {
        let func = Rc::new(RefCell::new(func));
        let hooks = points
            .iter()
            .map(|point| {
                let func = Rc::clone(&func);
                Hook::new(
                    point,
                    move |module: &M, input: &I, output: &O| {
                        (&mut *func.borrow_mut())(module, input, output)
                    },
                    options.clone(),
                )
            })
            .collect();
        Self { hooks }
    }
}

impl<T> Hooks<T> {
    /// Latest result of every hook, in registration order
    pub fn stored(&self) -> Vec<Option<T>>
    where
        T: Clone,
    {
        self.hooks.iter().map(Hook::stored).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Hook<T>> {
        self.hooks.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hook<T>> {
        self.hooks.iter()
    }

    pub fn remove(&mut self) {
        self.hooks.iter_mut().for_each(Hook::remove);
    }
}

impl<T> Index<usize> for Hooks<T> {
    type Output = Hook<T>;

    fn index(&self, index: usize) -> &Hook<T> {
        &self.hooks[index]
    }
}

impl<'a, T> IntoIterator for &'a Hooks<T> {
    type Item = &'a Hook<T>;
    type IntoIter = std::slice::Iter<'a, Hook<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.hooks.iter()
    }
}

/// Stores the detached output of every event on `point`
pub fn hook_output<B, M, I, O>(point: &HookPoint<M, I, O>) -> Hook<O>
where
    B: Backend,
    M: 'static,
    I: Capture<B> + 'static,
    O: Capture<B> + 'static,
{
    Hook::new(point, |_: &M, _: &I, output: &O| output.clone(), CaptureOptions::<B>::new())
}

/// [`hook_output`] on several points
pub fn hook_outputs<B, M, I, O>(points: &[&HookPoint<M, I, O>]) -> Hooks<O>
where
    B: Backend,
    M: 'static,
    I: Capture<B> + 'static,
    O: Capture<B> + 'static,
{
    Hooks::new(points, |_: &M, _: &I, output: &O| output.clone(), CaptureOptions::<B>::new())
}
