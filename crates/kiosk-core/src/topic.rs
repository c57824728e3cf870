use std::sync::{Arc, Mutex, MutexGuard};

/// Receives events published on a [`Topic`].
pub trait Observer<T>: Send + Sync {
    fn notify(&self, event: &T);
}

impl<T, F> Observer<T> for F
where
    F: Fn(&T) + Send + Sync,
{
    fn notify(&self, event: &T) {
        self(event)
    }
}

pub type ObserverRef<T> = Arc<dyn Observer<T>>;

/// A registry of observers for one channel. Membership is by `Arc`
/// identity, so attaching the same handle twice delivers once.
pub struct Topic<T> {
    name: &'static str,
    observers: Mutex<Vec<ObserverRef<T>>>,
}

impl<T> Topic<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `false` when the observer was already attached.
    pub fn attach(&self, observer: ObserverRef<T>) -> bool {
        let mut observers = self.lock();
        if observers.iter().any(|existing| same_observer(existing, &observer)) {
            return false;
        }
        observers.push(observer);
        true
    }

    /// Returns `false` when the observer was not attached.
    pub fn detach(&self, observer: &ObserverRef<T>) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|existing| !same_observer(existing, observer));
        observers.len() != before
    }

    /// Delivers to every observer attached when the call starts. Observers
    /// run outside the registry lock so they may attach or detach freely.
    pub fn publish(&self, event: &T) -> usize {
        let snapshot: Vec<ObserverRef<T>> = self.lock().clone();
        for observer in &snapshot {
            observer.notify(event);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ObserverRef<T>>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn same_observer<T>(a: &ObserverRef<T>, b: &ObserverRef<T>) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
