use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
};

use log::{debug, error, warn};

use crate::{StrideError, session::Snapshot};

/// Receives values published through an [`ObservableState`].
///
/// Each observer runs on its own delivery thread, so a slow or failing observer
/// never holds up the publisher or the other observers. Returning
/// [`StrideError::ObserverDisconnected`] ends the subscription.
pub trait Observer<T>: Send {
    fn on_next(&mut self, value: &T) -> Result<(), StrideError>;
}

impl Observer<Snapshot> for Sender<Snapshot> {
    fn on_next(&mut self, value: &Snapshot) -> Result<(), StrideError> {
        self.send(value.clone())
            .map_err(|_| StrideError::ObserverDisconnected)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber<T> {
    id: SubscriptionId,
    queue: Sender<T>,
    active: Arc<AtomicBool>,
}

struct Inner<T> {
    current: T,
    subscribers: Vec<Subscriber<T>>,
    next_id: u64,
}

/// Holds the current value and fans every new value out to subscribers.
///
/// `publish` only pushes onto per-subscriber queues, so it is cheap enough to call
/// while holding a lock around the state that produced the value. Queues are filled
/// in subscription order while the inner lock is held, so every subscriber sees
/// values in publish order.
pub struct ObservableState<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> ObservableState<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: initial,
                subscribers: Vec::new(),
                next_id: 0,
            }),
        }
    }

    pub fn current(&self) -> T {
        self.lock().current.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn publish(&self, value: T) {
        let mut inner = self.lock();
        inner.subscribers.retain(|subscriber| {
            if subscriber.queue.send(value.clone()).is_err() {
                debug!("Dropping subscriber {:?}, delivery thread is gone", subscriber.id);
                return false;
            }
            true
        });
        inner.current = value;
    }

    /// Registers an observer. The current value is queued to it before any value
    /// published afterwards.
    pub fn subscribe<O>(&self, mut observer: O) -> Result<SubscriptionId, StrideError>
    where
        O: Observer<T> + 'static,
    {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;

        let (queue, deliveries) = mpsc::channel::<T>();
        let active = Arc::new(AtomicBool::new(true));
        let delivery_active = Arc::clone(&active);

        thread::Builder::new()
            .name(format!("stride-observer-{}", id.0))
            .spawn(move || {
                for value in deliveries {
                    if !delivery_active.load(Ordering::Acquire) {
                        break;
                    }
                    match panic::catch_unwind(AssertUnwindSafe(|| observer.on_next(&value))) {
                        Ok(Ok(())) => {}
                        Ok(Err(StrideError::ObserverDisconnected)) => {
                            // the queue closes with this thread, publish prunes the subscriber
                            debug!("Observer {:?} disconnected", id);
                            break;
                        }
                        Ok(Err(e)) => warn!("Observer {:?} failed: {}", id, e),
                        Err(_) => error!("Observer {:?} panicked while handling an update", id),
                    }
                }
                debug!("Delivery thread for observer {:?} exited", id);
            })
            .map_err(|e| StrideError::ThreadSpawnError {
                name: "observer".to_string(),
                source: e,
            })?;

        // cannot fail, the receiver was just moved into the delivery thread
        let _ = queue.send(inner.current.clone());
        inner.subscribers.push(Subscriber { id, queue, active });
        Ok(id)
    }

    /// Removes an observer. A delivery already in progress completes, nothing
    /// queued behind it is delivered. Returns false for unknown ids.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let Some(index) = inner.subscribers.iter().position(|s| s.id == id) else {
            return false;
        };
        let subscriber = inner.subscribers.remove(index);
        subscriber.active.store(false, Ordering::Release);
        true
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // publish and subscribe never leave the inner state half updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
