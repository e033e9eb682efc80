//! Randomized think-time delays with cooperative shutdown.
//!
//! Every [`Sleeper`] is created through a [`SleeperRegistry`], which keeps a
//! strong handle to each live sleeper's wake state. Calling
//! [`SleeperRegistry::shutdown_all`] wakes every sleeper that is currently
//! waiting and makes all further sleeps on those instances fail with
//! [`SleeperError::Shutdown`]. Dropping (or [`Sleeper::dispose`]-ing) a
//! sleeper removes it from the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::error::SleeperError;

/// Wake state shared between a sleeper and its registry.
#[derive(Default)]
struct SleeperState {
    shutdown: AtomicBool,
    notify: Notify,
}

impl SleeperState {
    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    sleepers: Mutex<HashMap<u64, Arc<SleeperState>>>,
}

/// Owning registry of every live [`Sleeper`].
#[derive(Clone, Default)]
pub struct SleeperRegistry {
    inner: Arc<RegistryInner>,
}

impl SleeperRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registered sleeper.
    ///
    /// `factor` scales every sleep; `limit_99_75_factor` bounds the spread of
    /// [`Sleeper::sleep_normal`] (see there).
    ///
    /// # Errors
    ///
    /// Returns [`SleeperError::NegativeFactor`] when either factor is
    /// negative or not a number.
    pub fn create(&self, factor: f64, limit_99_75_factor: f64) -> Result<Sleeper, SleeperError> {
        if !(factor >= 0.0 && limit_99_75_factor >= 0.0) {
            return Err(SleeperError::NegativeFactor {
                factor,
                limit: limit_99_75_factor,
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SleeperState::default());
        if let Ok(mut sleepers) = self.inner.sleepers.lock() {
            sleepers.insert(id, state.clone());
        }

        Ok(Sleeper {
            id,
            state,
            registry: self.inner.clone(),
            factor,
            limit_99_75_factor,
        })
    }

    /// Shuts down every sleeper currently registered and forgets them.
    pub fn shutdown_all(&self) {
        let drained: Vec<Arc<SleeperState>> = match self.inner.sleepers.lock() {
            Ok(mut sleepers) => sleepers.drain().map(|(_, state)| state).collect(),
            Err(_) => Vec::new(),
        };
        debug!("Shutting down {} sleepers", drained.len());
        for state in drained {
            state.shutdown();
        }
    }

    /// Number of registered sleepers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.sleepers.lock().map_or(0, |sleepers| sleepers.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Think-time generator.
pub struct Sleeper {
    id: u64,
    state: Arc<SleeperState>,
    registry: Arc<RegistryInner>,
    factor: f64,
    limit_99_75_factor: f64,
}

impl Sleeper {
    /// Shuts down this sleeper only. Sleeps already in progress fail.
    pub fn shutdown(&self) {
        self.state.shutdown();
    }

    /// Deregisters this sleeper from its registry.
    pub fn dispose(self) {
        drop(self);
    }

    /// Sleeps for a time drawn from a pseudo normal distribution around
    /// `mean`. Roughly 99.75% of the times fall within
    /// `mean * limit_99_75_factor` of the mean.
    ///
    /// # Errors
    ///
    /// Returns [`SleeperError::Shutdown`] if the sleeper is, or becomes,
    /// shut down.
    pub async fn sleep_normal(&self, mean: Duration) -> Result<(), SleeperError> {
        self.check_shutdown()?;

        let mean_ms = duration_ms(mean);
        if mean_ms == 0 {
            return Ok(());
        }

        let time_ms = if self.limit_99_75_factor > 0.0 {
            normal_sample_ms(mean_ms, self.limit_99_75_factor)
        } else {
            mean_ms
        };
        self.do_sleep(time_ms).await
    }

    /// Sleeps for a time drawn uniformly from `[0, maximum)`.
    ///
    /// # Errors
    ///
    /// Returns [`SleeperError::Shutdown`] if the sleeper is, or becomes,
    /// shut down.
    pub async fn sleep_flat(&self, maximum: Duration) -> Result<(), SleeperError> {
        self.check_shutdown()?;

        let maximum_ms = duration_ms(maximum);
        if maximum_ms == 0 {
            return Ok(());
        }

        let time_ms = rand::thread_rng().gen_range(0..maximum_ms);
        self.do_sleep(time_ms).await
    }

    async fn do_sleep(&self, time_ms: u64) -> Result<(), SleeperError> {
        let scaled_ms = scale_ms(time_ms, self.factor);
        if scaled_ms == 0 {
            return Ok(());
        }

        debug!("Sleeping for {} ms", scaled_ms);
        let deadline = Instant::now()
            .checked_add(Duration::from_millis(scaled_ms))
            .unwrap_or_else(Instant::now);

        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.check_shutdown()?;

            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return Ok(()),
                () = &mut notified => {}
            }
        }
    }

    fn check_shutdown(&self) -> Result<(), SleeperError> {
        if self.state.is_shutdown() {
            return Err(SleeperError::Shutdown);
        }
        Ok(())
    }
}

impl Drop for Sleeper {
    fn drop(&mut self) {
        if let Ok(mut sleepers) = self.registry.sleepers.lock() {
            sleepers.remove(&self.id);
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Think-time scaling is inherently floating point"
)]
fn scale_ms(time_ms: u64, factor: f64) -> u64 {
    let scaled = (time_ms as f64) * factor;
    if scaled <= 0.0 { 0 } else { scaled as u64 }
}

#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Box-Muller sampling is inherently floating point"
)]
fn normal_sample_ms(mean_ms: u64, limit_99_75_factor: f64) -> u64 {
    let mut rng = rand::thread_rng();
    // Box-Muller; u1 must be non-zero for the logarithm.
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen::<f64>();
    let gaussian = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();

    let mean = mean_ms as f64;
    let sigma = (mean * limit_99_75_factor) / 3.0;
    let sample = mean + gaussian * sigma;
    if sample <= 0.0 { 0 } else { sample as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use std::future::Future;

    fn run_async_test<F>(future: F) -> AppResult<()>
    where
        F: Future<Output = AppResult<()>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::validation(format!("Failed to build runtime: {}", err)))?;
        runtime.block_on(future)
    }

    #[test]
    fn negative_factors_are_rejected() {
        let registry = SleeperRegistry::new();
        assert!(registry.create(-1.0, 0.0).is_err());
        assert!(registry.create(1.0, -0.5).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn dispose_deregisters_sleeper() -> AppResult<()> {
        let registry = SleeperRegistry::new();
        let first = registry.create(1.0, 0.0)?;
        let second = registry.create(1.0, 0.0)?;
        assert_eq!(registry.len(), 2);

        first.dispose();
        assert_eq!(registry.len(), 1);
        drop(second);
        assert!(registry.is_empty());
        Ok(())
    }

    #[test]
    fn shutdown_all_wakes_sleeping_sleepers() -> AppResult<()> {
        run_async_test(async {
            let registry = SleeperRegistry::new();
            let sleeper = registry.create(1.0, 0.0)?;

            let waker = registry.clone();
            let wake_task = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                waker.shutdown_all();
            });

            let started = std::time::Instant::now();
            let result = sleeper.sleep_normal(Duration::from_secs(30)).await;
            wake_task.await?;

            assert!(matches!(result, Err(SleeperError::Shutdown)));
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(registry.is_empty());
            Ok(())
        })
    }

    #[test]
    fn shutdown_is_permanent_for_the_instance() -> AppResult<()> {
        run_async_test(async {
            let registry = SleeperRegistry::new();
            let sleeper = registry.create(1.0, 0.0)?;
            registry.shutdown_all();

            assert!(matches!(
                sleeper.sleep_flat(Duration::from_millis(5)).await,
                Err(SleeperError::Shutdown)
            ));
            assert!(matches!(
                sleeper.sleep_normal(Duration::ZERO).await,
                Err(SleeperError::Shutdown)
            ));

            let fresh = registry.create(1.0, 0.0)?;
            fresh.sleep_flat(Duration::from_millis(2)).await?;
            Ok(())
        })
    }

    #[test]
    fn zero_factor_never_sleeps() -> AppResult<()> {
        run_async_test(async {
            let registry = SleeperRegistry::new();
            let sleeper = registry.create(0.0, 0.5)?;
            let started = std::time::Instant::now();
            sleeper.sleep_normal(Duration::from_secs(10)).await?;
            sleeper.sleep_flat(Duration::from_secs(10)).await?;
            assert!(started.elapsed() < Duration::from_secs(1));
            Ok(())
        })
    }

    #[test]
    fn normal_samples_stay_non_negative() {
        for _ in 0..1_000 {
            let sample = normal_sample_ms(10, 10.0);
            assert!(sample < 1_000);
        }
    }
}
