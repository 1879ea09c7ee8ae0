//! Token pool bounding concurrent in-flight requests.
//!
//! # Responsibilities
//! - Hold exactly `capacity` interchangeable tokens at rest
//! - Hand out tokens without waiting, or queue until one is returned
//! - Return tokens exactly once, on every exit path

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::observability::metrics;

/// Default number of concurrent admissions.
pub const DEFAULT_CAPACITY: usize = 100;

/// Returned by [`TokenPool::acquire`] once the pool has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token pool closed")]
pub struct PoolClosed;

/// A fixed-capacity counting pool.
///
/// Cloning is cheap and every clone draws from the same tokens.
#[derive(Debug, Clone)]
pub struct TokenPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TokenPool {
    /// Create a pool holding `capacity` tokens. Zero falls back to the default.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a token if one is free right now.
    pub fn try_acquire(&self) -> Option<Token> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.issue(permit))
    }

    /// Wait until a token is free.
    ///
    /// Waiters are served in arrival order. Fails only once the pool is closed.
    pub async fn acquire(&self) -> Result<Token, PoolClosed> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolClosed)?;
        Ok(self.issue(permit))
    }

    /// Stop admitting. Queued waiters fail with [`PoolClosed`]; held tokens stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Tokens currently at rest.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Tokens currently held by requests.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn issue(&self, permit: OwnedSemaphorePermit) -> Token {
        metrics::set_tokens_in_use(self.in_use());
        Token {
            permit: Some(permit),
            pool: self.clone(),
        }
    }
}

impl Default for TokenPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One unit of admitted capacity.
///
/// The token goes back to its pool when dropped, even while unwinding from a panic.
#[derive(Debug)]
pub struct Token {
    permit: Option<OwnedSemaphorePermit>,
    pool: TokenPool,
}

impl Token {
    /// Return the token to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            metrics::set_tokens_in_use(self.pool.in_use());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_uses_default() {
        let pool = TokenPool::new(0);
        assert_eq!(pool.capacity(), DEFAULT_CAPACITY);
        assert_eq!(pool.available(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_try_acquire_exhausts_and_release_restores() {
        let pool = TokenPool::new(2);
        let a = pool.try_acquire().expect("first token");
        let b = pool.try_acquire().expect("second token");
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.in_use(), 2);

        a.release();
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let pool = TokenPool::new(1);
        let held = pool.try_acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "waiter should be blocked while the token is held");

        drop(held);
        let token = waiter.await.unwrap().expect("token after release");
        assert_eq!(pool.available(), 0);
        drop(token);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters_but_keeps_held_tokens() {
        let pool = TokenPool::new(1);
        let held = pool.try_acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::task::yield_now().await;

        pool.close();
        assert_eq!(waiter.await.unwrap().unwrap_err(), PoolClosed);
        assert!(pool.is_closed());
        drop(held);
    }

    #[test]
    fn test_token_released_while_unwinding() {
        let pool = TokenPool::new(1);
        let inner = pool.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _token = inner.try_acquire().unwrap();
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
    }
}
