// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The process-wide execution session.
//!
//! Lazily constructed from whichever engine first needs it, replaceable by
//! explicit assignment, never torn down. The slot itself is mutex-guarded;
//! everything past the slot is the engine's concern.

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::engine::{Engine, HostBuffer, Session};
use crate::error::Result;
use crate::tensor::{GraphTensor, Variable};

static GLOBAL: Lazy<Mutex<Option<Arc<dyn Session>>>> = Lazy::new(|| Mutex::new(None));

/// The process-wide session, created from `engine` on first use.
pub fn current(engine: &Engine) -> Result<Arc<dyn Session>> {
    let mut slot = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(sess) = slot.as_ref() {
        return Ok(sess.clone());
    }
    debug!("creating process-wide session");
    let sess = engine.clone().new_session()?;
    *slot = Some(sess.clone());
    Ok(sess)
}

/// Swap in a caller-constructed session. The previous one is dropped without
/// ceremony; there is no teardown protocol.
pub fn replace(session: Arc<dyn Session>) {
    let mut slot = GLOBAL.lock().unwrap_or_else(|e| e.into_inner());
    *slot = Some(session);
}

/// Materialize a single expression in the process-wide session.
pub fn eval(x: &GraphTensor) -> Result<HostBuffer> {
    x.eval()
}

/// Fetch a variable's current value. Same machinery as [`eval`].
pub fn get_value(v: &Variable) -> Result<HostBuffer> {
    v.tensor().eval()
}

/// Store `value` into the variable by running an assign op in the
/// process-wide session.
pub fn set_value(v: &Variable, value: HostBuffer) -> Result<()> {
    let engine = v.engine();
    let constant = engine.constant(value)?;
    let assign = engine.assign(v.node(), constant)?;
    let sess = current(engine)?;
    sess.run(&[assign], &[])?;
    Ok(())
}
