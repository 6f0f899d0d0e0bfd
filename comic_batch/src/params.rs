//! Processing parameters, validated once at pipeline entry.

use crate::auto_tune::MAX_BATCH_SIZE;
use crate::error::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Upper bound for an explicit worker count.
pub const WORKER_LIMIT: usize = 64;

/// `-unsharp RxS+A+T`; skipped entirely when `amount` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnsharpMask {
    pub radius: f64,
    pub sigma: f64,
    pub amount: f64,
    pub threshold: f64,
}

impl Default for UnsharpMask {
    fn default() -> Self {
        Self {
            radius: 0.0,
            sigma: 0.75,
            amount: 0.75,
            threshold: 0.008,
        }
    }
}

impl UnsharpMask {
    pub fn is_enabled(&self) -> bool {
        self.amount > 0.0
    }

    /// Geometry argument, e.g. `0x0.75+0.75+0.008`.
    pub fn geometry(&self) -> String {
        format!(
            "{}x{}+{}+{}",
            self.radius, self.sigma, self.amount, self.threshold
        )
    }
}

/// Parses the same `RxS+A+T` geometry the tool accepts.
impl FromStr for UnsharpMask {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let malformed = || format!("expected RADIUSxSIGMA+AMOUNT+THRESHOLD, got '{}'", s);

        let (radius, rest) = s.trim().split_once(['x', 'X']).ok_or_else(malformed)?;
        let mut parts = rest.split('+');
        let (Some(sigma), Some(amount), Some(threshold), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        let number = |v: &str| v.trim().parse::<f64>().map_err(|_| malformed());
        Ok(Self {
            radius: number(radius)?,
            sigma: number(sigma)?,
            amount: number(amount)?,
            threshold: number(threshold)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParameters {
    /// Pages at least this wide (px) are split into two halves.
    pub width_threshold: u32,
    /// Output height (px); width follows the aspect ratio.
    pub resize_height: u32,
    /// JPEG quality, 1..=100.
    pub quality: u8,
    pub unsharp: UnsharpMask,
    /// 0 selects automatic tuning of workers and batch size.
    pub workers: usize,
    /// Images per batch when `workers` is explicit, 1..=1000.
    pub batch_size: usize,
    pub grayscale: bool,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            width_threshold: 1000,
            resize_height: 1600,
            quality: 85,
            unsharp: UnsharpMask::default(),
            workers: 0,
            batch_size: 50,
            grayscale: false,
        }
    }
}

impl ProcessingParameters {
    pub fn is_auto(&self) -> bool {
        self.workers == 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.width_threshold == 0 {
            return Err(invalid("width threshold must be greater than 0"));
        }
        if self.resize_height == 0 {
            return Err(invalid("resize height must be greater than 0"));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(invalid(format!(
                "quality must be within 1..=100, got {}",
                self.quality
            )));
        }

        let u = &self.unsharp;
        for (name, value) in [
            ("radius", u.radius),
            ("sigma", u.sigma),
            ("amount", u.amount),
            ("threshold", u.threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!(
                    "unsharp {} must be a finite value >= 0, got {}",
                    name, value
                )));
            }
        }

        if self.workers > WORKER_LIMIT {
            return Err(invalid(format!(
                "workers must be 0 (auto) or within 1..={}, got {}",
                WORKER_LIMIT, self.workers
            )));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(invalid(format!(
                "batch size must be within 1..={}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ProcessingError {
    ProcessingError::InvalidParameter(msg.into())
}
