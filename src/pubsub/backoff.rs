//! Политика перезапуска сессии подписки.
//!
//! По умолчанию сессия перезапускается сразу после сбоя, без ограничения
//! числа попыток. [`RestartBackoff`] включает экспоненциальную задержку,
//! чтобы при длительной недоступности брокера не крутить перезапуски
//! вхолостую.

use std::time::Duration;

use chanbus_error::ConfigError;

use crate::config::SubscriptionSettings;

/// Экспоненциальная задержка перед перезапуском.
///
/// Для попытки `n` (с нуля) базовая задержка равна `first × factor^n`,
/// ограниченная `max`. Затем применяется jitter: задержка уменьшается
/// на случайную долю не больше `jitter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartBackoff {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
    /// Доля случайного разброса, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl RestartBackoff {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(ConfigError::invalid("backoff_factor", "must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::invalid("backoff_jitter", "must be within 0.0..=1.0"));
        }
        if self.first > self.max {
            return Err(ConfigError::invalid(
                "backoff_first_ms",
                "must not exceed backoff_max_ms",
            ));
        }
        Ok(())
    }

    /// Задержка без разброса.
    pub fn base_delay(
        &self,
        attempt: u32,
    ) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn delay(
        &self,
        attempt: u32,
    ) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        base.mul_f64(1.0 - self.jitter * fastrand::f64())
    }
}

/// Что делать между неудачной сессией и следующей попыткой.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RestartPolicy {
    /// Перезапуск сразу (только уступаем планировщику).
    #[default]
    Immediate,
    Backoff(RestartBackoff),
}

impl RestartPolicy {
    /// Задержка перед попыткой `attempt`; `None` для немедленного
    /// перезапуска.
    pub fn delay(
        &self,
        attempt: u32,
    ) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::Backoff(backoff) => Some(backoff.delay(attempt)),
        }
    }

    pub fn from_settings(settings: &SubscriptionSettings) -> Result<Self, ConfigError> {
        if !settings.backoff_enabled {
            return Ok(Self::Immediate);
        }
        let backoff = RestartBackoff {
            first: Duration::from_millis(settings.backoff_first_ms),
            max: Duration::from_millis(settings.backoff_max_ms),
            factor: settings.backoff_factor,
            jitter: settings.backoff_jitter,
        };
        backoff.validate()?;
        Ok(Self::Backoff(backoff))
    }
}
