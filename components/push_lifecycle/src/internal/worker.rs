/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::cell::RefCell;

use crate::error::{debug, Error, Result};
use crate::internal::platform::{Platform, WorkerRegistration};

/// Registers the background worker and remembers the ready registration.
///
/// There is no automatic retry; a failed registration is reported and the
/// next call tries again.
pub struct WorkerRegistrar {
    script_path: String,
    scope: String,
    registration: RefCell<Option<WorkerRegistration>>,
}

impl WorkerRegistrar {
    pub fn new(script_path: &str, scope: &str) -> Self {
        Self {
            script_path: script_path.to_owned(),
            scope: scope.to_owned(),
            registration: RefCell::new(None),
        }
    }

    /// The last ready registration, without touching the platform.
    pub fn registration(&self) -> Option<WorkerRegistration> {
        self.registration.borrow().clone()
    }

    pub async fn register_and_wait_ready<P: Platform + ?Sized>(
        &self,
        platform: &P,
    ) -> Result<WorkerRegistration> {
        if let Some(registration) = self.registration() {
            return Ok(registration);
        }
        debug!(
            "registering worker '{}' for scope '{}'",
            self.script_path, self.scope
        );
        let registration = platform
            .register_worker(&self.script_path, &self.scope)
            .await
            .map_err(|e| Error::WorkerRegistration(e.to_string()))?;
        debug!("worker ready for scope '{}'", registration.scope);
        *self.registration.borrow_mut() = Some(registration.clone());
        Ok(registration)
    }

    /// Drop the remembered registration so the next call registers again.
    pub fn forget(&self) {
        self.registration.borrow_mut().take();
    }
}

/// Where a freshly registered worker is in its install cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerProgress {
    Active,
    /// Installing or waiting.
    Pending,
    /// Nothing active and nothing on the way.
    Gone,
}

/// Poll `progress` every `interval_ms` until the worker is active, giving up
/// after `timeout_ms`.
#[cfg_attr(not(all(target_arch = "wasm32", feature = "web")), allow(dead_code))]
pub(crate) async fn wait_until_active<F, Sl, Fut>(
    progress: F,
    sleep: Sl,
    timeout_ms: u32,
    interval_ms: u32,
) -> Result<()>
where
    F: Fn() -> WorkerProgress,
    Sl: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut elapsed = 0;
    loop {
        match progress() {
            WorkerProgress::Active => return Ok(()),
            WorkerProgress::Gone => {
                return Err(Error::WorkerRegistration(
                    "no incoming worker found during registration".to_string(),
                ))
            }
            WorkerProgress::Pending if elapsed >= timeout_ms => {
                return Err(Error::WorkerRegistration(format!(
                    "worker not active after {} ms",
                    timeout_ms
                )))
            }
            WorkerProgress::Pending => {
                sleep(interval_ms).await?;
                elapsed += interval_ms;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::internal::platform::MockPlatform;
    use mockall::predicate::eq;

    fn registration() -> WorkerRegistration {
        WorkerRegistration {
            scope: "https://example.com/".to_string(),
            script_url: "https://example.com/sw.js".to_string(),
        }
    }

    #[test]
    fn test_registers_once() -> Result<()> {
        let mut platform = MockPlatform::new();
        platform
            .expect_register_worker()
            .with(eq("/sw.js"), eq("/"))
            .times(1)
            .returning(|_, _| Ok(registration()));

        let registrar = WorkerRegistrar::new("/sw.js", "/");
        assert!(registrar.registration().is_none());
        let first = pollster::block_on(registrar.register_and_wait_ready(&platform))?;
        let second = pollster::block_on(registrar.register_and_wait_ready(&platform))?;
        assert_eq!(first, second);
        assert_eq!(registrar.registration(), Some(registration()));
        Ok(())
    }

    #[test]
    fn test_failure_is_typed_and_not_cached() -> Result<()> {
        let mut platform = MockPlatform::new();
        platform
            .expect_register_worker()
            .times(2)
            .returning(|_, _| Err(Error::Platform("insecure origin".to_string())));

        let registrar = WorkerRegistrar::new("/sw.js", "/");
        for _ in 0..2 {
            let err = pollster::block_on(registrar.register_and_wait_ready(&platform))
                .unwrap_err();
            assert!(matches!(err, Error::WorkerRegistration(reason) if reason.contains("insecure origin")));
        }
        assert!(registrar.registration().is_none());
        Ok(())
    }

    #[test]
    fn test_forget() -> Result<()> {
        let mut platform = MockPlatform::new();
        platform
            .expect_register_worker()
            .times(2)
            .returning(|_, _| Ok(registration()));

        let registrar = WorkerRegistrar::new("/sw.js", "/");
        pollster::block_on(registrar.register_and_wait_ready(&platform))?;
        registrar.forget();
        assert!(registrar.registration().is_none());
        pollster::block_on(registrar.register_and_wait_ready(&platform))?;
        Ok(())
    }

    #[test]
    fn test_wait_until_active() {
        use std::cell::Cell;

        let polls = Cell::new(0);
        let slept = Cell::new(0);
        let progress = || {
            polls.set(polls.get() + 1);
            if polls.get() < 3 {
                WorkerProgress::Pending
            } else {
                WorkerProgress::Active
            }
        };
        let sleep = |ms: u32| {
            slept.set(slept.get() + ms);
            async { Ok(()) }
        };
        pollster::block_on(wait_until_active(progress, sleep, 1000, 50)).unwrap();
        assert_eq!(polls.get(), 3);
        assert_eq!(slept.get(), 100);
    }

    #[test]
    fn test_wait_until_active_gives_up() {
        let sleep = |_| async { Ok(()) };
        let err = pollster::block_on(wait_until_active(
            || WorkerProgress::Pending,
            sleep,
            200,
            50,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::WorkerRegistration(reason) if reason.contains("200 ms")));

        let err = pollster::block_on(wait_until_active(|| WorkerProgress::Gone, sleep, 200, 50))
            .unwrap_err();
        assert!(matches!(err, Error::WorkerRegistration(_)));
    }
}
