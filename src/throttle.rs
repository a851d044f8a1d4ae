//! Rate limiting of function invocations within a rolling window.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::error::ThrottleError;

type AllowFn<A> = Box<dyn Fn(&A) -> bool + Send + Sync>;
type DropFn<A> = Box<dyn Fn(A) + Send + Sync>;

/// Optional hooks of a [`Throttled`] function.
pub struct ThrottleOptions<A> {
    /// Calls for which this returns `true` bypass the limiter. They are invoked and not counted.
    pub allow: Option<AllowFn<A>>,
    /// Receives the arguments of dropped calls.
    pub drop:  Option<DropFn<A>>,
}

impl<A> ThrottleOptions<A> {
    pub fn allow<F: Fn(&A) -> bool + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.allow = Some(Box::new(f));
        self
    }

    pub fn on_drop<F: Fn(A) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.drop = Some(Box::new(f));
        self
    }
}

impl<A> Default for ThrottleOptions<A> {
    fn default() -> Self {
        Self {
            allow: None,
            drop:  None,
        }
    }
}

#[derive(Debug, Default)]
struct Window {
    started: Option<Instant>,
    count:   u32,
    dropped: u64,
}

/// A function wrapped by [`throttle`].
pub struct Throttled<A, R> {
    invoke_limit: u32,
    time_limit:   Duration,
    f:            Box<dyn Fn(A) -> R + Send + Sync>,
    options:      ThrottleOptions<A>,
    window:       Mutex<Window>,
}

/// Wrap `f` so that it runs at most `invoke_limit` times within `time_limit` counted from the first call of the
/// current window. Excess calls are dropped, not queued.
pub fn throttle<A, R, F>(
    invoke_limit: u32,
    time_limit: Duration,
    f: F,
    options: ThrottleOptions<A>,
) -> Result<Throttled<A, R>, ThrottleError>
where
    F: Fn(A) -> R + Send + Sync + 'static,
{
    if invoke_limit == 0 || time_limit.is_zero() {
        return Err(ThrottleError {
            invoke_limit,
            time_limit,
        });
    }

    Ok(Throttled {
        invoke_limit,
        time_limit,
        f: Box::new(f),
        options,
        window: Mutex::new(Window::default()),
    })
}

impl<A, R> Throttled<A, R> {
    /// Invoke the wrapped function unless the limit is exhausted. `None` means the call was dropped.
    pub fn call(&self, arg: A) -> Option<R> {
        if self.options.allow.as_ref().is_some_and(|allow| allow(&arg)) {
            return Some((self.f)(arg));
        }

        let admitted = {
            let mut window = self.window.lock();
            let now = Instant::now();
            if window.started.is_none_or(|started| now.duration_since(started) >= self.time_limit) {
                window.started = Some(now);
                window.count = 0;
            }
            if window.count < self.invoke_limit {
                window.count += 1;
                true
            }
            else {
                window.dropped += 1;
                false
            }
        };

        if admitted {
            Some((self.f)(arg))
        }
        else {
            trace!("throttled call dropped");
            if let Some(on_drop) = &self.options.drop {
                on_drop(arg);
            }
            None
        }
    }

    pub fn invoke_limit(&self) -> u32 {
        self.invoke_limit
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Number of calls dropped since the last call of this method.
    pub fn take_dropped(&self) -> u64 {
        std::mem::take(&mut self.window.lock().dropped)
    }
}

impl<A, R> std::fmt::Debug for Throttled<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttled")
            .field("invoke_limit", &self.invoke_limit)
            .field("time_limit", &self.time_limit)
            .field("window", &*self.window.lock())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[test]
    fn rejects_non_positive_limits() {
        assert!(throttle(0, Duration::from_millis(500), |_: ()| (), ThrottleOptions::default()).is_err());
        assert!(throttle(2, Duration::ZERO, |_: ()| (), ThrottleOptions::default()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn two_per_half_second() {
        let invoked = Arc::new(AtomicU32::new(0));
        let dropped = Arc::new(AtomicU32::new(0));
        let inv = invoked.clone();
        let drp = dropped.clone();
        let throttled = throttle(
            2,
            Duration::from_millis(500),
            move |_: u32| {
                inv.fetch_add(1, Ordering::SeqCst);
            },
            ThrottleOptions::default().on_drop(move |_| {
                drp.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        for i in 0..5 {
            throttled.call(i);
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 2);
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
        assert_eq!(throttled.take_dropped(), 3);

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(throttled.call(5).is_some());
        assert_eq!(invoked.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn window_counts_from_first_call() {
        let throttled = throttle(1, Duration::from_millis(100), |x: u32| x, ThrottleOptions::default()).unwrap();
        assert_eq!(throttled.call(1), Some(1));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(throttled.call(2), None);
        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(throttled.call(3), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn allowed_calls_bypass() {
        let throttled = throttle(
            1,
            Duration::from_secs(1),
            |x: u32| x,
            ThrottleOptions::default().allow(|x: &u32| *x >= 100),
        )
        .unwrap();
        assert_eq!(throttled.call(1), Some(1));
        assert_eq!(throttled.call(100), Some(100));
        assert_eq!(throttled.call(2), None);
        assert_eq!(throttled.call(101), Some(101));
    }
}
