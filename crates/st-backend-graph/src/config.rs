// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-wide numeric defaults: the float dtype used when callers do not
//! name one, and the fuzz epsilon used by the cross-entropy clipping paths.

use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::engine::DType;
use crate::error::{Error, Result};

static FLOATX: Lazy<RwLock<DType>> = Lazy::new(|| RwLock::new(DType::F32));
static EPSILON: Lazy<RwLock<f64>> = Lazy::new(|| RwLock::new(1e-7));

/// Default floating dtype for variables, placeholders and random tensors.
pub fn floatx() -> DType {
    *FLOATX.read().unwrap_or_else(|e| e.into_inner())
}

/// Override the default floating dtype. Only floating dtypes are accepted.
pub fn set_floatx(dtype: DType) -> Result<()> {
    if !dtype.is_float() {
        return Err(Error::NonFloatDType(dtype));
    }
    *FLOATX.write().unwrap_or_else(|e| e.into_inner()) = dtype;
    Ok(())
}

/// Fuzz factor guarding logs and divisions in the probability paths.
pub fn epsilon() -> f64 {
    *EPSILON.read().unwrap_or_else(|e| e.into_inner())
}

pub fn set_epsilon(value: f64) {
    *EPSILON.write().unwrap_or_else(|e| e.into_inner()) = value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floatx_rejects_integer_dtypes() {
        assert!(matches!(
            set_floatx(DType::I32),
            Err(Error::NonFloatDType(DType::I32))
        ));
        assert!(floatx().is_float());
    }
}
