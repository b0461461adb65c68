use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::{Duration, Instant};

const RETRY_INTERVAL: Duration = Duration::from_millis(1);

pub trait TryLockWithTimeout<T: ?Sized> {
    /// Retries `try_lock` until `timeout` elapses. A poisoned lock is
    /// returned right away.
    fn try_lock_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, T>, TryLockError<MutexGuard<'_, T>>>;
}

impl<T: ?Sized> TryLockWithTimeout<T> for Mutex<T> {
    fn try_lock_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, T>, TryLockError<MutexGuard<'_, T>>> {
        let start = Instant::now();
        loop {
            match self.try_lock() {
                Err(TryLockError::WouldBlock) if start.elapsed() < timeout => {
                    std::thread::sleep(RETRY_INTERVAL)
                }
                result => return result,
            }
        }
    }
}

pub trait TryRwLockWithTimeout<T: ?Sized> {
    fn try_read_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<RwLockReadGuard<'_, T>, TryLockError<RwLockReadGuard<'_, T>>>;

    fn try_write_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<RwLockWriteGuard<'_, T>, TryLockError<RwLockWriteGuard<'_, T>>>;
}

impl<T: ?Sized> TryRwLockWithTimeout<T> for RwLock<T> {
    fn try_read_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<RwLockReadGuard<'_, T>, TryLockError<RwLockReadGuard<'_, T>>> {
        let start = Instant::now();
        loop {
            match self.try_read() {
                Err(TryLockError::WouldBlock) if start.elapsed() < timeout => {
                    std::thread::sleep(RETRY_INTERVAL)
                }
                result => return result,
            }
        }
    }

    fn try_write_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<RwLockWriteGuard<'_, T>, TryLockError<RwLockWriteGuard<'_, T>>> {
        let start = Instant::now();
        loop {
            match self.try_write() {
                Err(TryLockError::WouldBlock) if start.elapsed() < timeout => {
                    std::thread::sleep(RETRY_INTERVAL)
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_free_mutex() {
        let mutex = Arc::new(Mutex::new(1));
        let guard = mutex.try_lock_with_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(*guard, 1);
    }

    #[test]
    fn test_lock_times_out() {
        let mutex = Mutex::new(1);
        let _held = mutex.lock().unwrap();
        let result = mutex.try_lock_with_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(TryLockError::WouldBlock)));
    }

    #[test]
    fn test_lock_released_by_other_thread() {
        let mutex = Arc::new(Mutex::new(0));
        let mut guard = mutex.lock().unwrap();
        let contender = mutex.clone();
        let handle = std::thread::spawn(move || {
            *contender.try_lock_with_timeout(Duration::from_secs(5)).unwrap()
        });
        std::thread::sleep(Duration::from_millis(20));
        *guard = 5;
        drop(guard);
        assert_eq!(handle.join().unwrap(), 5);
    }

    #[test]
    fn test_rwlock() {
        let lock = RwLock::new(vec![1]);
        {
            let first = lock.try_read_with_timeout(Duration::from_millis(10)).unwrap();
            let second = lock.try_read_with_timeout(Duration::from_millis(10)).unwrap();
            assert_eq!(first.len(), second.len());
            assert!(matches!(
                lock.try_write_with_timeout(Duration::from_millis(10)),
                Err(TryLockError::WouldBlock)
            ));
        }
        lock.try_write_with_timeout(Duration::from_millis(10)).unwrap().push(2);
        assert_eq!(lock.try_read_with_timeout(Duration::from_millis(10)).unwrap().len(), 2);
    }
}
